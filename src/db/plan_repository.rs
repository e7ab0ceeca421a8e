use async_trait::async_trait;

use crate::models::plan::SubscriptionPlan;

#[async_trait]
pub trait PlanRepository: Send + Sync {
    async fn find_plan(&self, plan_id: i64) -> Result<Option<SubscriptionPlan>, sqlx::Error>;

    /// Non-deleted plans that are linked to a PayPal billing plan.
    async fn list_billable(&self) -> Result<Vec<SubscriptionPlan>, sqlx::Error>;

    /// Links a local plan to a remote billing plan. Returns false when the
    /// local plan does not exist.
    async fn set_paypal_plan_id(
        &self,
        plan_id: i64,
        paypal_plan_id: &str,
    ) -> Result<bool, sqlx::Error>;
}
