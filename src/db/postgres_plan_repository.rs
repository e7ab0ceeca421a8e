use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::plan_repository::PlanRepository;
use crate::models::plan::SubscriptionPlan;

pub struct PostgresPlanRepository {
    pub pool: PgPool,
}

const PLAN_COLUMNS: &str = "id, name, price_cents, paypal_plan_id, deleted_at";

#[async_trait]
impl PlanRepository for PostgresPlanRepository {
    async fn find_plan(&self, plan_id: i64) -> Result<Option<SubscriptionPlan>, sqlx::Error> {
        sqlx::query_as::<_, SubscriptionPlan>(&format!(
            "SELECT {PLAN_COLUMNS} FROM subscription_plans WHERE id = $1"
        ))
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn list_billable(&self) -> Result<Vec<SubscriptionPlan>, sqlx::Error> {
        sqlx::query_as::<_, SubscriptionPlan>(&format!(
            "SELECT {PLAN_COLUMNS} FROM subscription_plans
             WHERE paypal_plan_id IS NOT NULL AND deleted_at IS NULL
             ORDER BY price_cents"
        ))
        .fetch_all(&self.pool)
        .await
    }

    async fn set_paypal_plan_id(
        &self,
        plan_id: i64,
        paypal_plan_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE subscription_plans SET paypal_plan_id = $2, updated_at = now() WHERE id = $1",
        )
        .bind(plan_id)
        .bind(paypal_plan_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
