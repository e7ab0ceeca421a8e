use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::subscription_repository::{
    ApprovalCallbackOutcome, EventApplyOutcome, EventRecord, InsertSubscriptionError,
    NewSubscription, StatusPatch, SubscriptionRepository,
};
use crate::models::subscription::Subscription;

pub struct PostgresSubscriptionRepository {
    pub pool: PgPool,
}

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, plan_id, paypal_subscription_id, status, \
     starts_at, ends_at, trial_ends_at, cancelled_at, created_at, updated_at";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn find_by_paypal_subscription_id(
        &self,
        paypal_subscription_id: &str,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM user_subscriptions
             WHERE paypal_subscription_id = $1"
        ))
        .bind(paypal_subscription_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn find_active_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM user_subscriptions
             WHERE user_id = $1
               AND status = 'active'
               AND (ends_at IS NULL OR ends_at > now())
             ORDER BY created_at DESC
             LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn insert_pending(
        &self,
        new: NewSubscription<'_>,
    ) -> Result<Subscription, InsertSubscriptionError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_as::<_, Subscription>(&format!(
            "INSERT INTO user_subscriptions (user_id, plan_id, paypal_subscription_id, status, starts_at)
             VALUES ($1, $2, $3, 'pending_approval', now())
             RETURNING {SUBSCRIPTION_COLUMNS}"
        ))
        .bind(new.user_id)
        .bind(new.plan_id)
        .bind(new.paypal_subscription_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                InsertSubscriptionError::AlreadySubscribed
            } else {
                InsertSubscriptionError::Db(err)
            }
        })?;

        sqlx::query(
            "INSERT INTO subscription_events (subscription_id, event_type, external_event_id, payload)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (event_type, external_event_id) DO NOTHING",
        )
        .bind(inserted.id)
        .bind(new.seed_event.event_type)
        .bind(new.seed_event.external_event_id)
        .bind(new.seed_event.payload)
        .execute(&mut *tx)
        .await
        .map_err(InsertSubscriptionError::Db)?;

        tx.commit().await?;
        Ok(inserted)
    }

    async fn mark_approval_returned(
        &self,
        user_id: Uuid,
        paypal_subscription_id: &str,
    ) -> Result<ApprovalCallbackOutcome, sqlx::Error> {
        let updated = sqlx::query(
            "UPDATE user_subscriptions
             SET status = 'pending_webhook_confirmation', updated_at = now()
             WHERE user_id = $1 AND paypal_subscription_id = $2 AND status = 'pending_approval'",
        )
        .bind(user_id)
        .bind(paypal_subscription_id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() > 0 {
            return Ok(ApprovalCallbackOutcome::Updated);
        }

        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(
                 SELECT 1 FROM user_subscriptions
                 WHERE user_id = $1 AND paypal_subscription_id = $2
             )",
        )
        .bind(user_id)
        .bind(paypal_subscription_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(if exists {
            ApprovalCallbackOutcome::AlreadySettled
        } else {
            ApprovalCallbackOutcome::NotFound
        })
    }

    async fn cancel_pending_for_user(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE user_subscriptions
             SET status = 'cancelled_by_user', ends_at = $2, updated_at = now()
             WHERE user_id = $1 AND status = 'pending_approval'",
        )
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn apply_event(
        &self,
        paypal_subscription_id: &str,
        event: EventRecord<'_>,
        patch: StatusPatch,
    ) -> Result<EventApplyOutcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        // Row lock so concurrent deliveries for the same subscription
        // serialize on the event-log insert below.
        let existing = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM user_subscriptions WHERE paypal_subscription_id = $1 FOR UPDATE",
        )
        .bind(paypal_subscription_id)
        .fetch_optional(&mut *tx)
        .await?;

        let subscription_id = match existing {
            Some(id) => id,
            None => return Ok(EventApplyOutcome::UnknownSubscription),
        };

        let logged = sqlx::query(
            "INSERT INTO subscription_events (subscription_id, event_type, external_event_id, payload)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (event_type, external_event_id) DO NOTHING",
        )
        .bind(subscription_id)
        .bind(event.event_type)
        .bind(event.external_event_id)
        .bind(event.payload)
        .execute(&mut *tx)
        .await?;

        if logged.rows_affected() == 0 {
            return Ok(EventApplyOutcome::Duplicate);
        }

        let updated = sqlx::query_as::<_, Subscription>(&format!(
            "UPDATE user_subscriptions
             SET status = $2,
                 starts_at = COALESCE($3, starts_at),
                 ends_at = COALESCE($4, ends_at),
                 cancelled_at = COALESCE($5, cancelled_at),
                 updated_at = now()
             WHERE id = $1
             RETURNING {SUBSCRIPTION_COLUMNS}"
        ))
        .bind(subscription_id)
        .bind(patch.status.as_str())
        .bind(patch.starts_at)
        .bind(patch.ends_at)
        .bind(patch.cancelled_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(EventApplyOutcome::Applied(updated))
    }
}
