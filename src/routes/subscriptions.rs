use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{error, info};

use crate::responses::{redirect_with_flash, Flash, JsonResponse};
use crate::routes::auth::AuthUser;
use crate::services::subscriptions::{initiate_subscription, SubscribeError};
use crate::AppState;

pub fn subscription_routes() -> Router<AppState> {
    Router::new()
        .route("/api/subscriptions", get(index))
        .route("/api/subscriptions/current", get(current))
        .route("/api/subscriptions/subscribe/{plan_id}", post(subscribe))
        .route("/api/subscriptions/success", get(success))
        .route("/api/subscriptions/cancel", get(cancel))
}

/// Billable plans, for the pricing page.
pub async fn index(State(state): State<AppState>) -> Response {
    match state.plans.list_billable().await {
        Ok(plans) => Json(plans).into_response(),
        Err(err) => {
            error!(error = %err, "failed to list billable plans");
            JsonResponse::server_error("Unable to load plans").into_response()
        }
    }
}

/// The caller's active subscription, if any.
pub async fn current(State(state): State<AppState>, user: AuthUser) -> Response {
    match state.subscriptions.find_active_for_user(user.user_id).await {
        Ok(Some(subscription)) => Json(subscription).into_response(),
        Ok(None) => JsonResponse::not_found("No active subscription").into_response(),
        Err(err) => {
            error!(error = %err, user_id = %user.user_id, "failed to load current subscription");
            JsonResponse::server_error("Unable to load subscription").into_response()
        }
    }
}

/// Starts checkout for a plan and sends the browser to PayPal's approval
/// page. Every failure lands back on the plans page with a flashed error.
pub async fn subscribe(
    State(state): State<AppState>,
    user: AuthUser,
    Path(plan_id): Path<i64>,
) -> Response {
    let origin = state.config.frontend_origin.clone();
    match initiate_subscription(&state, user.user_id, plan_id).await {
        Ok(approval_url) => axum::response::Redirect::to(&approval_url).into_response(),
        Err(SubscribeError::PlanNotFound) => {
            redirect_with_flash(&origin, "/plans", Flash::Error, "That plan does not exist")
                .into_response()
        }
        Err(SubscribeError::PlanNotBillable) => redirect_with_flash(
            &origin,
            "/plans",
            Flash::Error,
            "That plan is not available for purchase",
        )
        .into_response(),
        Err(SubscribeError::AlreadySubscribed) => redirect_with_flash(
            &origin,
            "/plans",
            Flash::Error,
            "You already have an active subscription",
        )
        .into_response(),
        Err(SubscribeError::Gateway(err)) => {
            error!(error = %err, user_id = %user.user_id, plan_id, "subscription initiation failed at gateway");
            redirect_with_flash(
                &origin,
                "/plans",
                Flash::Error,
                "Payment system error. Please try again later",
            )
            .into_response()
        }
        Err(SubscribeError::Db(err)) => {
            error!(error = %err, user_id = %user.user_id, plan_id, "subscription initiation failed");
            redirect_with_flash(
                &origin,
                "/plans",
                Flash::Error,
                "Something went wrong. Please try again later",
            )
            .into_response()
        }
    }
}

#[derive(Deserialize)]
pub struct ApprovalReturn {
    pub subscription_id: Option<String>,
}

/// Browser return from an approved checkout. Confirmation stays
/// provisional here; only the webhook activates the subscription.
pub async fn success(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ApprovalReturn>,
) -> Response {
    use crate::db::subscription_repository::ApprovalCallbackOutcome;

    let origin = state.config.frontend_origin.clone();
    let subscription_id = match query.subscription_id {
        Some(id) if !id.trim().is_empty() => id,
        _ => {
            return redirect_with_flash(
                &origin,
                "/dashboard",
                Flash::Warning,
                "Approval received, but the subscription reference was missing",
            )
            .into_response()
        }
    };

    match state
        .subscriptions
        .mark_approval_returned(user.user_id, &subscription_id)
        .await
    {
        Ok(ApprovalCallbackOutcome::Updated) => {
            info!(user_id = %user.user_id, paypal_subscription_id = %subscription_id, "buyer approved subscription");
            redirect_with_flash(
                &origin,
                "/dashboard",
                Flash::Success,
                "Thanks! Your subscription is being confirmed",
            )
            .into_response()
        }
        // A repeated return visit; the earlier transition stands.
        Ok(ApprovalCallbackOutcome::AlreadySettled) => redirect_with_flash(
            &origin,
            "/dashboard",
            Flash::Success,
            "Thanks! Your subscription is being confirmed",
        )
        .into_response(),
        Ok(ApprovalCallbackOutcome::NotFound) => {
            error!(user_id = %user.user_id, paypal_subscription_id = %subscription_id, "approval return for unknown subscription");
            redirect_with_flash(
                &origin,
                "/dashboard",
                Flash::Warning,
                "We could not match your approval to a subscription. Support has been notified",
            )
            .into_response()
        }
        Err(err) => {
            error!(error = %err, user_id = %user.user_id, "approval return failed");
            redirect_with_flash(
                &origin,
                "/dashboard",
                Flash::Error,
                "Something went wrong confirming your subscription",
            )
            .into_response()
        }
    }
}

/// Browser return from an abandoned checkout.
pub async fn cancel(State(state): State<AppState>, user: AuthUser) -> Response {
    let origin = state.config.frontend_origin.clone();
    match state
        .subscriptions
        .cancel_pending_for_user(user.user_id, OffsetDateTime::now_utc())
        .await
    {
        Ok(affected) => {
            info!(user_id = %user.user_id, affected, "buyer cancelled checkout");
            redirect_with_flash(&origin, "/plans", Flash::Info, "Checkout cancelled")
                .into_response()
        }
        Err(err) => {
            error!(error = %err, user_id = %user.user_id, "checkout cancellation failed");
            redirect_with_flash(
                &origin,
                "/plans",
                Flash::Error,
                "Something went wrong. Please try again later",
            )
            .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use std::sync::Arc;
    use uuid::Uuid;

    use crate::db::mock_db::{MockPlanRepository, MockSubscriptionRepository};
    use crate::models::subscription::SubscriptionStatus;
    use crate::services::paypal::MockPayPalService;
    use crate::test_support::{state_with, test_plan, test_subscription};

    fn auth(user_id: Uuid) -> AuthUser {
        AuthUser {
            user_id,
            email: "user@example.com".into(),
        }
    }

    fn location(resp: &axum::response::Response) -> String {
        resp.headers()
            .get("location")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    #[tokio::test]
    async fn subscribe_redirects_to_approval_url() {
        let subs = Arc::new(MockSubscriptionRepository::default());
        let state = state_with(
            subs.clone(),
            Arc::new(MockPlanRepository::with_plans(vec![test_plan(1)])),
            Arc::new(
                MockPayPalService::new()
                    .with_subscription("I-42", "https://pay.test/approve?t=I-42"),
            ),
        );

        let resp = subscribe(State(state), auth(Uuid::new_v4()), Path(1)).await;

        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&resp), "https://pay.test/approve?t=I-42");
        assert_eq!(
            subs.status_of("I-42"),
            Some(SubscriptionStatus::PendingApproval)
        );
    }

    #[tokio::test]
    async fn subscribe_flashes_error_when_already_subscribed() {
        let subs = Arc::new(MockSubscriptionRepository::default());
        let user_id = Uuid::new_v4();
        subs.seed(test_subscription(
            user_id,
            "I-LIVE",
            SubscriptionStatus::Active,
        ));
        let state = state_with(
            subs,
            Arc::new(MockPlanRepository::with_plans(vec![test_plan(1)])),
            Arc::new(MockPayPalService::new()),
        );

        let resp = subscribe(State(state), auth(user_id), Path(1)).await;
        let loc = location(&resp);
        assert!(loc.contains("/plans?error="));
        assert!(loc.contains("already%20have"));
    }

    #[tokio::test]
    async fn subscribe_flashes_error_on_gateway_failure() {
        let state = state_with(
            Arc::new(MockSubscriptionRepository::default()),
            Arc::new(MockPlanRepository::with_plans(vec![test_plan(1)])),
            Arc::new(MockPayPalService::new().failing_create()),
        );

        let resp = subscribe(State(state), auth(Uuid::new_v4()), Path(1)).await;
        let loc = location(&resp);
        assert!(loc.contains("/plans?error="));
        assert!(loc.contains("Payment%20system%20error"));
    }

    #[tokio::test]
    async fn success_moves_pending_approval_forward() {
        let subs = Arc::new(MockSubscriptionRepository::default());
        let user_id = Uuid::new_v4();
        subs.seed(test_subscription(
            user_id,
            "I-55",
            SubscriptionStatus::PendingApproval,
        ));
        let state = state_with(
            subs.clone(),
            Arc::new(MockPlanRepository::with_plans(vec![test_plan(1)])),
            Arc::new(MockPayPalService::new()),
        );

        let resp = success(
            State(state),
            auth(user_id),
            Query(ApprovalReturn {
                subscription_id: Some("I-55".into()),
            }),
        )
        .await;

        assert!(location(&resp).contains("/dashboard?success="));
        assert_eq!(
            subs.status_of("I-55"),
            Some(SubscriptionStatus::PendingWebhookConfirmation)
        );
    }

    #[tokio::test]
    async fn repeated_success_return_is_a_quiet_no_op() {
        let subs = Arc::new(MockSubscriptionRepository::default());
        let user_id = Uuid::new_v4();
        subs.seed(test_subscription(
            user_id,
            "I-55",
            SubscriptionStatus::PendingApproval,
        ));
        let state = state_with(
            subs.clone(),
            Arc::new(MockPlanRepository::with_plans(vec![test_plan(1)])),
            Arc::new(MockPayPalService::new()),
        );

        let query = || {
            Query(ApprovalReturn {
                subscription_id: Some("I-55".into()),
            })
        };
        let first = success(State(state.clone()), auth(user_id), query()).await;
        let second = success(State(state), auth(user_id), query()).await;

        // The duplicate return (back button, reload) must see the same
        // success flash, never an error, and cause no second transition.
        assert!(location(&first).contains("/dashboard?success="));
        assert!(location(&second).contains("/dashboard?success="));
        assert_eq!(
            subs.status_of("I-55"),
            Some(SubscriptionStatus::PendingWebhookConfirmation)
        );
    }

    #[tokio::test]
    async fn success_is_idempotent_after_webhook_activation() {
        let subs = Arc::new(MockSubscriptionRepository::default());
        let user_id = Uuid::new_v4();
        subs.seed(test_subscription(
            user_id,
            "I-55",
            SubscriptionStatus::Active,
        ));
        let state = state_with(
            subs.clone(),
            Arc::new(MockPlanRepository::with_plans(vec![test_plan(1)])),
            Arc::new(MockPayPalService::new()),
        );

        let resp = success(
            State(state),
            auth(user_id),
            Query(ApprovalReturn {
                subscription_id: Some("I-55".into()),
            }),
        )
        .await;

        // Late browser return must not regress an activated subscription.
        assert!(location(&resp).contains("/dashboard?success="));
        assert_eq!(subs.status_of("I-55"), Some(SubscriptionStatus::Active));
    }

    #[tokio::test]
    async fn success_warns_when_subscription_unknown() {
        let state = state_with(
            Arc::new(MockSubscriptionRepository::default()),
            Arc::new(MockPlanRepository::with_plans(vec![test_plan(1)])),
            Arc::new(MockPayPalService::new()),
        );

        let resp = success(
            State(state),
            auth(Uuid::new_v4()),
            Query(ApprovalReturn {
                subscription_id: Some("I-GHOST".into()),
            }),
        )
        .await;

        assert!(location(&resp).contains("/dashboard?warning="));
    }

    #[tokio::test]
    async fn success_warns_when_reference_missing() {
        let state = state_with(
            Arc::new(MockSubscriptionRepository::default()),
            Arc::new(MockPlanRepository::with_plans(vec![test_plan(1)])),
            Arc::new(MockPayPalService::new()),
        );

        let resp = success(
            State(state),
            auth(Uuid::new_v4()),
            Query(ApprovalReturn {
                subscription_id: None,
            }),
        )
        .await;

        assert!(location(&resp).contains("/dashboard?warning="));
    }

    #[tokio::test]
    async fn cancel_clears_pending_checkout() {
        let subs = Arc::new(MockSubscriptionRepository::default());
        let user_id = Uuid::new_v4();
        subs.seed(test_subscription(
            user_id,
            "I-77",
            SubscriptionStatus::PendingApproval,
        ));
        let state = state_with(
            subs.clone(),
            Arc::new(MockPlanRepository::with_plans(vec![test_plan(1)])),
            Arc::new(MockPayPalService::new()),
        );

        let resp = cancel(State(state), auth(user_id)).await;

        assert!(location(&resp).contains("/plans?info="));
        assert_eq!(
            subs.status_of("I-77"),
            Some(SubscriptionStatus::CancelledByUser)
        );
    }

    #[tokio::test]
    async fn index_lists_only_billable_plans() {
        let mut unlinked = test_plan(2);
        unlinked.paypal_plan_id = None;
        let state = state_with(
            Arc::new(MockSubscriptionRepository::default()),
            Arc::new(MockPlanRepository::with_plans(vec![test_plan(1), unlinked])),
            Arc::new(MockPayPalService::new()),
        );

        let resp = index(State(state)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
        let plans: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0]["id"], 1);
    }

    #[tokio::test]
    async fn current_returns_404_without_active_subscription() {
        let state = state_with(
            Arc::new(MockSubscriptionRepository::default()),
            Arc::new(MockPlanRepository::with_plans(vec![test_plan(1)])),
            Arc::new(MockPayPalService::new()),
        );

        let resp = current(State(state), auth(Uuid::new_v4())).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
