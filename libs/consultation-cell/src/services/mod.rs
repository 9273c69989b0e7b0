pub mod assist;
pub mod consultation;
pub mod lifecycle;
pub mod messaging;

pub use assist::{AssistService, CompletionClient, OpenAiCompletionClient};
pub use consultation::ConsultationService;
pub use lifecycle::ConsultationLifecycle;
pub use messaging::MessagingService;
