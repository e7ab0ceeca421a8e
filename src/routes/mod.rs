pub mod auth;
pub mod paypal_webhook;
pub mod subscriptions;
