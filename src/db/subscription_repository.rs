use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::subscription::{Subscription, SubscriptionStatus};

/// Identity and body of one received billing event, inserted into the
/// append-only audit log.
#[derive(Clone, Debug)]
pub struct EventRecord<'a> {
    pub event_type: &'a str,
    /// The notification's own unique id, or a synthesized fallback when
    /// the notifier sent none. Keys the idempotency check.
    pub external_event_id: &'a str,
    pub payload: &'a Value,
}

/// Status transition plus the side fields a webhook event sets. `None`
/// leaves the column untouched.
#[derive(Clone, Copy, Debug)]
pub struct StatusPatch {
    pub status: SubscriptionStatus,
    pub starts_at: Option<OffsetDateTime>,
    pub ends_at: Option<OffsetDateTime>,
    pub cancelled_at: Option<OffsetDateTime>,
}

impl StatusPatch {
    pub fn status_only(status: SubscriptionStatus) -> Self {
        StatusPatch {
            status,
            starts_at: None,
            ends_at: None,
            cancelled_at: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct NewSubscription<'a> {
    pub user_id: Uuid,
    pub plan_id: i64,
    pub paypal_subscription_id: &'a str,
    /// Creation request/response pair, seeded into the event log.
    pub seed_event: EventRecord<'a>,
}

#[derive(Debug, Error)]
pub enum InsertSubscriptionError {
    /// The one-open-subscription-per-user index rejected the insert.
    #[error("user already has an open subscription")]
    AlreadySubscribed,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, PartialEq, Eq)]
pub enum ApprovalCallbackOutcome {
    /// pending_approval moved to pending_webhook_confirmation.
    Updated,
    /// A matching row exists but is past pending_approval; duplicate
    /// browser return, nothing to do.
    AlreadySettled,
    /// No local row for this user and PayPal subscription id.
    NotFound,
}

#[derive(Debug)]
pub enum EventApplyOutcome {
    Applied(Subscription),
    /// The event log already holds this (event_type, external_event_id);
    /// no state was touched.
    Duplicate,
    /// No local row carries this PayPal subscription id.
    UnknownSubscription,
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn find_by_paypal_subscription_id(
        &self,
        paypal_subscription_id: &str,
    ) -> Result<Option<Subscription>, sqlx::Error>;

    /// Read-only view used by dashboards.
    async fn find_active_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<Subscription>, sqlx::Error>;

    /// Inserts a pending_approval row and seeds its event log in one
    /// transaction. The partial unique index on open statuses makes the
    /// concurrent-subscribe race lose here rather than double-book.
    async fn insert_pending(
        &self,
        new: NewSubscription<'_>,
    ) -> Result<Subscription, InsertSubscriptionError>;

    /// Conditional transition for the browser approval return.
    async fn mark_approval_returned(
        &self,
        user_id: Uuid,
        paypal_subscription_id: &str,
    ) -> Result<ApprovalCallbackOutcome, sqlx::Error>;

    /// Moves every pending_approval row of the user to cancelled_by_user
    /// with `ends_at = now`. Returns the number of rows affected.
    async fn cancel_pending_for_user(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<u64, sqlx::Error>;

    /// Appends the event and applies the patch atomically. The event-log
    /// insert is the idempotency gate: a conflict short-circuits to
    /// `Duplicate` without mutating the subscription row.
    async fn apply_event(
        &self,
        paypal_subscription_id: &str,
        event: EventRecord<'_>,
        patch: StatusPatch,
    ) -> Result<EventApplyOutcome, sqlx::Error>;
}
