use std::sync::Arc;

use crate::config::Config;
use crate::db::{plan_repository::PlanRepository, subscription_repository::SubscriptionRepository};
use crate::services::paypal::PayPalService;
use crate::utils::jwt::JwtKeys;

#[derive(Clone)]
pub struct AppState {
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub plans: Arc<dyn PlanRepository>,
    pub paypal: Arc<dyn PayPalService>,
    pub config: Arc<Config>,
    pub jwt_keys: Arc<JwtKeys>,
}
