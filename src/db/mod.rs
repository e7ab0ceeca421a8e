pub mod mock_db;
pub mod plan_repository;
pub mod postgres_plan_repository;
pub mod postgres_subscription_repository;
pub mod subscription_repository;
