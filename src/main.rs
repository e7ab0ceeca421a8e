use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::HeaderValue;
use axum::http::Method;
use axum::{
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use sqlx::PgPool;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use taxfolio_backend::config::Config;
use taxfolio_backend::db::postgres_plan_repository::PostgresPlanRepository;
use taxfolio_backend::db::postgres_subscription_repository::PostgresSubscriptionRepository;
use taxfolio_backend::db::{
    plan_repository::PlanRepository, subscription_repository::SubscriptionRepository,
};
use taxfolio_backend::responses::JsonResponse;
use taxfolio_backend::routes::{paypal_webhook::webhook_routes, subscriptions::subscription_routes};
use taxfolio_backend::services::paypal::{LivePayPalService, PayPalService};
use taxfolio_backend::utils::jwt::JwtKeys;
use taxfolio_backend::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };

    let pool = establish_connection(&config.database_url).await;
    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run database migrations");

    let subscriptions = Arc::new(PostgresSubscriptionRepository { pool: pool.clone() })
        as Arc<dyn SubscriptionRepository>;
    let plans = Arc::new(PostgresPlanRepository { pool: pool.clone() }) as Arc<dyn PlanRepository>;
    let paypal =
        Arc::new(LivePayPalService::from_settings(&config.paypal)) as Arc<dyn PayPalService>;
    let jwt_keys = Arc::new(JwtKeys::from_env().expect("JWT secret misconfigured"));

    let frontend_origin = config.frontend_origin.clone();
    let state = AppState {
        subscriptions,
        plans,
        paypal,
        config: Arc::new(config),
        jwt_keys,
    };

    let rate_limit_ms: u64 = std::env::var("RATE_LIMITER_MILLISECONDS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(200);
    let rate_limit_burst: u32 = std::env::var("RATE_LIMITER_BURST")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(20);
    let api_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(rate_limit_ms)
            .burst_size(rate_limit_burst)
            .use_headers()
            .error_handler(|_err| {
                JsonResponse::too_many_requests(
                    "Too many requests. Please wait a moment and try again.",
                )
                .into_response()
            })
            .finish()
            .unwrap(),
    );

    // Background cleanup of stale rate-limiter entries.
    let governor_limiter = api_governor_conf.limiter().clone();
    std::thread::spawn(move || {
        let interval = std::time::Duration::from_secs(60);
        loop {
            std::thread::sleep(interval);
            governor_limiter.retain_recent();
        }
    });

    let cors = CorsLayer::new()
        .allow_origin(frontend_origin.parse::<HeaderValue>().unwrap())
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(true);

    // The webhook listener stays outside the user-facing rate limiter so
    // a burst of deliveries is never throttled into redelivery loops.
    let app = Router::new()
        .route("/", get(root))
        .merge(subscription_routes().layer(GovernorLayer {
            config: api_governor_conf.clone(),
        }))
        .merge(webhook_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));

    let listener = TcpListener::bind(addr).await.unwrap();
    info!("listening at http://{}", addr);
    axum::serve(listener, make_service).await.unwrap();
}

/// A simple root route.
async fn root() -> Response {
    JsonResponse::success("Taxfolio billing API").into_response()
}

/// Establish a connection to the database and verify it.
async fn establish_connection(database_url: &str) -> PgPool {
    let pool = PgPool::connect(database_url)
        .await
        .expect("Failed to connect to the database");

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .expect("Failed to verify database connection");

    info!("connected to the database");
    pool
}
