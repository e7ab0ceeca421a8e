use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use time::OffsetDateTime;

/// A locally administered billing plan. `paypal_plan_id` links it to the
/// remote billing plan; a plan without one cannot be subscribed to.
#[derive(Clone, Debug, Serialize)]
pub struct SubscriptionPlan {
    pub id: i64,
    pub name: String,
    /// Monthly price in cents.
    pub price_cents: i64,
    pub paypal_plan_id: Option<String>,
    #[serde(skip)]
    pub deleted_at: Option<OffsetDateTime>,
}

impl SubscriptionPlan {
    pub fn is_billable(&self) -> bool {
        self.deleted_at.is_none()
            && self
                .paypal_plan_id
                .as_deref()
                .is_some_and(|id| !id.is_empty())
    }
}

impl FromRow<'_, PgRow> for SubscriptionPlan {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(SubscriptionPlan {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            price_cents: row.try_get("price_cents")?,
            paypal_plan_id: row.try_get("paypal_plan_id")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }
}
