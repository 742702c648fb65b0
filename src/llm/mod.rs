pub mod client;
pub mod interpret;
pub mod prompt;
pub mod provider;

pub use client::LlmClient;
pub use interpret::{interpret, strip_code_fences, Diagnosis, PlantAssessment};
pub use provider::{create_provider, LlmProvider};
