//! Operator tool: creates a PayPal billing plan for a local subscription
//! plan and stores the remote id so the plan becomes purchasable.
//!
//! Usage: paypal_create_plan <local_plan_id> <paypal_product_id>

use std::env;

use anyhow::{bail, Context, Result};
use sqlx::postgres::PgPoolOptions;

use taxfolio_backend::config::Config;
use taxfolio_backend::db::plan_repository::PlanRepository;
use taxfolio_backend::db::postgres_plan_repository::PostgresPlanRepository;
use taxfolio_backend::services::paypal::{CreatePlanRequest, LivePayPalService, PayPalService};

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = env::args().skip(1);
    let plan_id: i64 = args
        .next()
        .context("usage: paypal_create_plan <local_plan_id> <paypal_product_id>")?
        .parse()
        .context("local_plan_id must be an integer")?;
    let product_id = args
        .next()
        .context("usage: paypal_create_plan <local_plan_id> <paypal_product_id>")?;

    let config = Config::from_env().context("incomplete configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.database_url)
        .await
        .context("failed to connect to DATABASE_URL")?;
    let plans = PostgresPlanRepository { pool };

    let plan = plans
        .find_plan(plan_id)
        .await
        .context("failed to load plan")?
        .with_context(|| format!("no plan with id {plan_id}"))?;

    if let Some(existing) = plan.paypal_plan_id.as_deref() {
        bail!("plan {plan_id} is already linked to PayPal plan {existing}");
    }

    let paypal = LivePayPalService::from_settings(&config.paypal);
    let price = format!("{}.{:02}", plan.price_cents / 100, plan.price_cents % 100);
    let created = paypal
        .create_plan(CreatePlanRequest {
            product_id,
            name: plan.name.clone(),
            price,
            currency: "USD".into(),
        })
        .await
        .context("PayPal plan creation failed")?;

    let updated = plans
        .set_paypal_plan_id(plan_id, &created.id)
        .await
        .context("failed to store PayPal plan id")?;
    if !updated {
        bail!(
            "PayPal plan {} created but plan {plan_id} disappeared before linking",
            created.id
        );
    }

    println!(
        "Linked plan {plan_id} ({}) to PayPal plan {} (status {})",
        plan.name, created.id, created.status
    );
    Ok(())
}
