use serde_json::json;
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, Duration, OffsetDateTime};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::subscription_repository::{EventRecord, InsertSubscriptionError, NewSubscription};
use crate::services::paypal::{CreateSubscriptionRequest, PayPalServiceError};
use crate::AppState;

#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("plan not found")]
    PlanNotFound,
    #[error("plan is not billable")]
    PlanNotBillable,
    #[error("user already has an open subscription")]
    AlreadySubscribed,
    #[error(transparent)]
    Gateway(#[from] PayPalServiceError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Starts a subscription purchase: creates the remote subscription at
/// PayPal, records the local pending_approval row with its audit seed,
/// and returns the approval URL the browser must be sent to.
///
/// The local row is only written after PayPal has returned an approval
/// link, so a gateway failure leaves no dangling local state. The reverse
/// gap (remote created, local insert fails) is logged with the remote id
/// for manual reconciliation.
pub async fn initiate_subscription(
    state: &AppState,
    user_id: Uuid,
    plan_id: i64,
) -> Result<String, SubscribeError> {
    let plan = state
        .plans
        .find_plan(plan_id)
        .await?
        .ok_or(SubscribeError::PlanNotFound)?;

    let paypal_plan_id = match plan.paypal_plan_id.as_deref() {
        Some(id) if plan.is_billable() => id,
        _ => return Err(SubscribeError::PlanNotBillable),
    };

    // Cheap pre-check for a friendlier rejection; the partial unique
    // index in insert_pending is what actually closes the race.
    if state
        .subscriptions
        .find_active_for_user(user_id)
        .await?
        .is_some()
    {
        return Err(SubscribeError::AlreadySubscribed);
    }

    let start_time = (OffsetDateTime::now_utc() + Duration::minutes(1))
        .format(&Rfc3339)
        .ok();
    let origin = &state.config.frontend_origin;
    let request = CreateSubscriptionRequest {
        plan_id: paypal_plan_id.to_string(),
        start_time,
        brand_name: state.config.paypal.brand_name.clone(),
        return_url: format!("{origin}/api/subscriptions/success"),
        cancel_url: format!("{origin}/api/subscriptions/cancel"),
    };
    let request_body = request.to_body();

    let created = state.paypal.create_subscription(request).await?;

    let approval_url = match created.approval_url() {
        Some(url) => url.to_string(),
        None => {
            // The remote subscription exists but cannot be approved.
            // Recorded for manual reconciliation; no local row is written.
            error!(
                paypal_subscription_id = %created.id,
                %user_id,
                "subscription created remotely but no approval link returned"
            );
            return Err(SubscribeError::Gateway(
                PayPalServiceError::MissingApprovalLink,
            ));
        }
    };

    let seed_payload = json!({
        "request": request_body,
        "response": created.raw,
    });
    let external_event_id = format!("create:{}", created.id);
    let new = NewSubscription {
        user_id,
        plan_id: plan.id,
        paypal_subscription_id: &created.id,
        seed_event: EventRecord {
            event_type: "subscription.created",
            external_event_id: &external_event_id,
            payload: &seed_payload,
        },
    };

    match state.subscriptions.insert_pending(new).await {
        Ok(subscription) => {
            info!(
                %user_id,
                plan_id = plan.id,
                paypal_subscription_id = %subscription.paypal_subscription_id,
                "subscription initiated, awaiting buyer approval"
            );
            Ok(approval_url)
        }
        Err(InsertSubscriptionError::AlreadySubscribed) => {
            warn!(
                %user_id,
                paypal_subscription_id = %created.id,
                "concurrent subscribe lost the open-subscription race; remote subscription left unapproved"
            );
            Err(SubscribeError::AlreadySubscribed)
        }
        Err(InsertSubscriptionError::Db(err)) => {
            error!(
                %user_id,
                paypal_subscription_id = %created.id,
                error = %err,
                "remote subscription created but local insert failed"
            );
            Err(SubscribeError::Db(err))
        }
    }
}
