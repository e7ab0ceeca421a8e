use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use time::OffsetDateTime;
use uuid::Uuid;

/// Closed set of subscription lifecycle states. Rows only move between
/// these along the edges encoded in [`crate::services::subscription_events`];
/// anything else is a logged no-op.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Created locally, waiting for the user to approve on PayPal.
    PendingApproval,
    /// User returned from the approval page; waiting for the ACTIVATED webhook.
    PendingWebhookConfirmation,
    Active,
    /// Cancelled on the PayPal side (webhook).
    Cancelled,
    /// User abandoned the approval flow in the browser.
    CancelledByUser,
    Expired,
    Suspended,
    PastDue,
    /// A payment was refunded or reversed; needs manual review.
    PaymentIssue,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::PendingApproval => "pending_approval",
            SubscriptionStatus::PendingWebhookConfirmation => "pending_webhook_confirmation",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::CancelledByUser => "cancelled_by_user",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Suspended => "suspended",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::PaymentIssue => "payment_issue",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "pending_approval" => SubscriptionStatus::PendingApproval,
            "pending_webhook_confirmation" => SubscriptionStatus::PendingWebhookConfirmation,
            "active" => SubscriptionStatus::Active,
            "cancelled" => SubscriptionStatus::Cancelled,
            "cancelled_by_user" => SubscriptionStatus::CancelledByUser,
            "expired" => SubscriptionStatus::Expired,
            "suspended" => SubscriptionStatus::Suspended,
            "past_due" => SubscriptionStatus::PastDue,
            "payment_issue" => SubscriptionStatus::PaymentIssue,
            _ => return None,
        })
    }

    /// States that count against the one-open-subscription-per-user
    /// invariant. Must match the partial unique index in the migrations.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::PendingApproval
                | SubscriptionStatus::PendingWebhookConfirmation
                | SubscriptionStatus::Active
                | SubscriptionStatus::Suspended
                | SubscriptionStatus::PastDue
        )
    }
}

/// One user-plan billing relationship, joined to PayPal by
/// `paypal_subscription_id`. Never deleted; terminal rows are retained
/// for audit.
#[derive(Clone, Debug, Serialize)]
pub struct Subscription {
    pub id: i64,
    pub user_id: Uuid,
    pub plan_id: i64,
    pub paypal_subscription_id: String,
    pub status: SubscriptionStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub starts_at: Option<OffsetDateTime>,
    /// Next billing time while active; expiry date once terminal.
    #[serde(with = "time::serde::rfc3339::option")]
    pub ends_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub trial_ends_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub cancelled_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
            && self
                .ends_at
                .map_or(true, |ends| ends > OffsetDateTime::now_utc())
    }
}

impl FromRow<'_, PgRow> for Subscription {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let status_raw: String = row.try_get("status")?;
        let status = SubscriptionStatus::parse(&status_raw).ok_or_else(|| {
            sqlx::Error::ColumnDecode {
                index: "status".into(),
                source: format!("unknown subscription status {status_raw:?}").into(),
            }
        })?;
        Ok(Subscription {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            plan_id: row.try_get("plan_id")?,
            paypal_subscription_id: row.try_get("paypal_subscription_id")?,
            status,
            starts_at: row.try_get("starts_at")?,
            ends_at: row.try_get("ends_at")?,
            trial_ends_at: row.try_get("trial_ends_at")?,
            cancelled_at: row.try_get("cancelled_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// One received billing event, appended to the audit log exactly once per
/// `(event_type, external_event_id)`.
#[derive(Clone, Debug, Serialize)]
pub struct SubscriptionEvent {
    pub id: i64,
    pub subscription_id: i64,
    pub event_type: String,
    pub external_event_id: String,
    pub payload: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            SubscriptionStatus::PendingApproval,
            SubscriptionStatus::PendingWebhookConfirmation,
            SubscriptionStatus::Active,
            SubscriptionStatus::Cancelled,
            SubscriptionStatus::CancelledByUser,
            SubscriptionStatus::Expired,
            SubscriptionStatus::Suspended,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::PaymentIssue,
        ] {
            assert_eq!(SubscriptionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SubscriptionStatus::parse("nonsense"), None);
    }

    #[test]
    fn terminal_states_are_not_open() {
        assert!(SubscriptionStatus::PendingApproval.is_open());
        assert!(SubscriptionStatus::Active.is_open());
        assert!(SubscriptionStatus::PastDue.is_open());
        assert!(!SubscriptionStatus::Cancelled.is_open());
        assert!(!SubscriptionStatus::CancelledByUser.is_open());
        assert!(!SubscriptionStatus::Expired.is_open());
        assert!(!SubscriptionStatus::PaymentIssue.is_open());
    }

    fn subscription(status: SubscriptionStatus, ends_at: Option<OffsetDateTime>) -> Subscription {
        let now = OffsetDateTime::now_utc();
        Subscription {
            id: 1,
            user_id: Uuid::new_v4(),
            plan_id: 1,
            paypal_subscription_id: "I-TEST".into(),
            status,
            starts_at: None,
            ends_at,
            trial_ends_at: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn active_subscription_with_past_period_end_is_not_active() {
        let past = datetime!(2020-01-01 00:00:00 UTC);
        assert!(!subscription(SubscriptionStatus::Active, Some(past)).is_active());
        assert!(subscription(SubscriptionStatus::Active, None).is_active());
        assert!(!subscription(SubscriptionStatus::Suspended, None).is_active());
    }
}
