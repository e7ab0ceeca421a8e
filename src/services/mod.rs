pub mod paypal;
pub mod subscription_events;
pub mod subscriptions;
