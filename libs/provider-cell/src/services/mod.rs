pub mod matching;
pub mod provider;

pub use matching::ProviderMatchingService;
pub use provider::ProviderService;
