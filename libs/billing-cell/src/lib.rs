pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::*;
pub use router::billing_routes;
pub use services::{ProtocolService, StripeClient, SubscriptionService, WebhookService};
