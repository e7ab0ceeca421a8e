//! Webhook event dispatch: the transition table mapping PayPal event
//! types onto subscription status mutations, and the idempotent
//! application of a verified event against the store.

use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::db::subscription_repository::{
    EventApplyOutcome, EventRecord, StatusPatch, SubscriptionRepository,
};
use crate::models::subscription::SubscriptionStatus;

/// Which resource field joins the event back to a local subscription.
/// BILLING.SUBSCRIPTION.* resources are the subscription itself;
/// PAYMENT.SALE.* resources are payments and only reference it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKey {
    SubscriptionId,
    BillingAgreementId,
}

impl ResourceKey {
    fn field(&self) -> &'static str {
        match self {
            ResourceKey::SubscriptionId => "id",
            ResourceKey::BillingAgreementId => "billing_agreement_id",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct EventRule {
    pub next_status: SubscriptionStatus,
    pub key: ResourceKey,
}

/// The only legal transitions. An event type not listed here is
/// acknowledged and logged, never applied.
pub fn rule_for(event_type: &str) -> Option<EventRule> {
    let rule = match event_type {
        "BILLING.SUBSCRIPTION.ACTIVATED" => EventRule {
            next_status: SubscriptionStatus::Active,
            key: ResourceKey::SubscriptionId,
        },
        "BILLING.SUBSCRIPTION.CANCELLED" => EventRule {
            next_status: SubscriptionStatus::Cancelled,
            key: ResourceKey::SubscriptionId,
        },
        "BILLING.SUBSCRIPTION.EXPIRED" => EventRule {
            next_status: SubscriptionStatus::Expired,
            key: ResourceKey::SubscriptionId,
        },
        "BILLING.SUBSCRIPTION.SUSPENDED" => EventRule {
            next_status: SubscriptionStatus::Suspended,
            key: ResourceKey::SubscriptionId,
        },
        "PAYMENT.SALE.COMPLETED" => EventRule {
            next_status: SubscriptionStatus::Active,
            key: ResourceKey::BillingAgreementId,
        },
        "PAYMENT.SALE.DENIED" => EventRule {
            next_status: SubscriptionStatus::PastDue,
            key: ResourceKey::BillingAgreementId,
        },
        "PAYMENT.SALE.REFUNDED" | "PAYMENT.SALE.REVERSED" => EventRule {
            next_status: SubscriptionStatus::PaymentIssue,
            key: ResourceKey::BillingAgreementId,
        },
        _ => return None,
    };
    Some(rule)
}

fn parse_time(resource: &Value, field: &str) -> Option<OffsetDateTime> {
    resource
        .get(field)
        .and_then(|v| v.as_str())
        .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
}

/// Side fields each event type sets alongside its status transition.
/// PAYMENT.SALE.COMPLETED deliberately leaves `ends_at` alone: the next
/// billing time comes from the subscription resource, not the sale, and
/// is refreshed by the accompanying BILLING.SUBSCRIPTION events.
fn patch_for(event_type: &str, rule: &EventRule, resource: &Value) -> StatusPatch {
    let mut patch = StatusPatch::status_only(rule.next_status);
    match event_type {
        "BILLING.SUBSCRIPTION.ACTIVATED" => {
            patch.starts_at =
                Some(parse_time(resource, "start_time").unwrap_or_else(OffsetDateTime::now_utc));
            patch.ends_at = resource
                .get("billing_info")
                .and_then(|info| info.get("next_billing_time"))
                .and_then(|v| v.as_str())
                .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok());
        }
        "BILLING.SUBSCRIPTION.CANCELLED" => {
            patch.cancelled_at = Some(
                parse_time(resource, "status_update_time").unwrap_or_else(OffsetDateTime::now_utc),
            );
        }
        "BILLING.SUBSCRIPTION.EXPIRED" => {
            patch.ends_at = Some(
                parse_time(resource, "status_update_time").unwrap_or_else(OffsetDateTime::now_utc),
            );
        }
        _ => {}
    }
    patch
}

#[derive(Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Applied(SubscriptionStatus),
    /// Same (event_type, event id) already in the log; nothing changed.
    Duplicate,
    /// Event referenced no local subscription; acknowledged so the
    /// notifier does not redeliver forever.
    UnknownSubscription,
    /// Event type outside the transition table.
    Unrecognized,
    /// The resource carried no usable join key.
    MissingResourceKey,
}

/// Applies one verified webhook event. Infallible outcomes (duplicates,
/// unknown ids, unrecognized types) are normal operation; only repository
/// failures propagate as errors.
pub async fn dispatch(
    repo: &dyn SubscriptionRepository,
    external_event_id: Option<&str>,
    event_type: &str,
    resource: &Value,
    raw_body: &Value,
) -> Result<DispatchOutcome, sqlx::Error> {
    let event_type = event_type.to_ascii_uppercase();

    let rule = match rule_for(&event_type) {
        Some(rule) => rule,
        None => {
            info!(event_type, "unhandled webhook event type acknowledged");
            return Ok(DispatchOutcome::Unrecognized);
        }
    };

    let subscription_key = match resource.get(rule.key.field()).and_then(|v| v.as_str()) {
        Some(key) if !key.is_empty() => key,
        _ => {
            warn!(
                event_type,
                field = rule.key.field(),
                "webhook event missing resource join key"
            );
            return Ok(DispatchOutcome::MissingResourceKey);
        }
    };

    // The event's own id keys the audit log; a notifier that omits it
    // degrades to per-(type, subscription) idempotency.
    let fallback_id;
    let event_id = match external_event_id {
        Some(id) if !id.is_empty() => id,
        _ => {
            fallback_id = format!("{event_type}:{subscription_key}");
            &fallback_id
        }
    };

    let patch = patch_for(&event_type, &rule, resource);
    let record = EventRecord {
        event_type: &event_type,
        external_event_id: event_id,
        payload: raw_body,
    };

    match repo.apply_event(subscription_key, record, patch).await? {
        EventApplyOutcome::Applied(sub) => {
            info!(
                event_type,
                paypal_subscription_id = subscription_key,
                user_id = %sub.user_id,
                status = sub.status.as_str(),
                "webhook event applied"
            );
            Ok(DispatchOutcome::Applied(sub.status))
        }
        EventApplyOutcome::Duplicate => {
            info!(
                event_type,
                paypal_subscription_id = subscription_key,
                event_id,
                "duplicate webhook delivery ignored"
            );
            Ok(DispatchOutcome::Duplicate)
        }
        EventApplyOutcome::UnknownSubscription => {
            warn!(
                event_type,
                paypal_subscription_id = subscription_key,
                "webhook event references no local subscription"
            );
            Ok(DispatchOutcome::UnknownSubscription)
        }
    }
}
