pub mod protocol;
pub mod stripe;
pub mod subscription;
pub mod webhook;

pub use protocol::ProtocolService;
pub use stripe::StripeClient;
pub use subscription::SubscriptionService;
pub use webhook::WebhookService;
