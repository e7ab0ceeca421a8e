//! Shared fixtures for handler and service tests.

use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::{Config, PayPalSettings};
use crate::db::mock_db::{MockPlanRepository, MockSubscriptionRepository};
use crate::db::plan_repository::PlanRepository;
use crate::db::subscription_repository::SubscriptionRepository;
use crate::models::plan::SubscriptionPlan;
use crate::models::subscription::{Subscription, SubscriptionStatus};
use crate::services::paypal::{MockPayPalService, PayPalService};
use crate::utils::jwt::JwtKeys;
use crate::AppState;

pub fn test_config() -> Config {
    Config {
        database_url: "postgres://unused".into(),
        frontend_origin: "https://app.taxfolio.test".into(),
        paypal: PayPalSettings {
            client_id: "client".into(),
            client_secret: "secret".into(),
            api_base: "https://paypal.test".into(),
            webhook_id: "WH-TEST".into(),
            brand_name: "Taxfolio".into(),
        },
        jwt_issuer: "taxfolio".into(),
        jwt_audience: "taxfolio-app".into(),
    }
}

pub fn state_with(
    subscriptions: Arc<dyn SubscriptionRepository>,
    plans: Arc<dyn PlanRepository>,
    paypal: Arc<dyn PayPalService>,
) -> AppState {
    let jwt_keys =
        JwtKeys::from_secret("test-secret-test-secret-test-secret!").expect("test secret length");
    AppState {
        subscriptions,
        plans,
        paypal,
        config: Arc::new(test_config()),
        jwt_keys: Arc::new(jwt_keys),
    }
}

pub fn test_state() -> AppState {
    state_with(
        Arc::new(MockSubscriptionRepository::default()),
        Arc::new(MockPlanRepository::with_plans(vec![test_plan(1)])),
        Arc::new(MockPayPalService::new()),
    )
}

pub fn test_plan(id: i64) -> SubscriptionPlan {
    SubscriptionPlan {
        id,
        name: format!("Plan {id}"),
        price_cents: 999,
        paypal_plan_id: Some(format!("P-{id:04}")),
        deleted_at: None,
    }
}

pub fn test_subscription(
    user_id: Uuid,
    paypal_subscription_id: &str,
    status: SubscriptionStatus,
) -> Subscription {
    let now = OffsetDateTime::now_utc();
    Subscription {
        id: 1,
        user_id,
        plan_id: 1,
        paypal_subscription_id: paypal_subscription_id.to_string(),
        status,
        starts_at: Some(now),
        ends_at: None,
        trial_ends_at: None,
        cancelled_at: None,
        created_at: now,
        updated_at: now,
    }
}
