pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::*;
pub use router::consultation_routes;
pub use services::{
    AssistService, CompletionClient, ConsultationLifecycle, ConsultationService, MessagingService,
};
