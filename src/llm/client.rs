use std::sync::Arc;

use crate::capture::InlineImage;
use crate::config::LlmConfig;
use super::interpret::{interpret, Diagnosis};
use super::prompt::build_diagnosis_prompt;
use super::provider::{create_provider, LlmProvider};

/// LLM client that wraps a provider implementation
#[derive(Clone)]
pub struct LlmClient {
    provider: Arc<dyn LlmProvider>,
    prompt: String,
}

impl LlmClient {
    /// Create a new LlmClient from configuration
    pub fn from_config(config: &LlmConfig) -> Self {
        let provider = create_provider(config);
        Self {
            provider: Arc::from(provider),
            prompt: build_diagnosis_prompt(config.custom_prompt.as_deref(), config.base_prompt.as_deref()),
        }
    }

    /// Wrap an existing provider with the built-in prompt.
    pub fn with_provider(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            prompt: build_diagnosis_prompt(None, None),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.provider_name()
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.provider.endpoint()
    }

    /// Ask the model about a plant photo.
    ///
    /// Never fails: transport errors and unusable answers come back as
    /// [`Diagnosis::Failed`].
    pub fn diagnose(&self, image: &InlineImage) -> Diagnosis {
        match self.provider.diagnose(image, &self.prompt) {
            Ok(text) => {
                let diagnosis = interpret(&text);
                match &diagnosis {
                    Diagnosis::Failed { reason } => {
                        tracing::warn!(provider = self.provider_name(), %reason, "Model returned no usable diagnosis");
                    }
                    Diagnosis::Assessed(a) if !a.missing_fields.is_empty() => {
                        tracing::warn!(
                            provider = self.provider_name(),
                            fields = ?a.missing_fields,
                            "Diagnosis is missing expected fields"
                        );
                    }
                    Diagnosis::Assessed(_) => {}
                }
                diagnosis
            }
            Err(e) => {
                tracing::error!(provider = self.provider_name(), error = %e, "Inference request failed");
                Diagnosis::failed(format!("inference failed: {}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};

    struct Canned(Result<String, String>);

    impl LlmProvider for Canned {
        fn diagnose(&self, _image: &InlineImage, prompt: &str) -> Result<String> {
            assert!(prompt.contains("health_status"));
            self.0.clone().map_err(|e| anyhow!(e))
        }

        fn provider_name(&self) -> &'static str {
            "canned"
        }
    }

    fn image() -> InlineImage {
        InlineImage {
            mime_type: "image/png".to_string(),
            data: String::new(),
        }
    }

    #[test]
    fn test_transport_error_becomes_failed() {
        let client = LlmClient::with_provider(Arc::new(Canned(Err("connection reset".to_string()))));
        let diagnosis = client.diagnose(&image());
        assert_eq!(diagnosis, Diagnosis::failed("inference failed: connection reset"));
    }

    #[test]
    fn test_answer_is_interpreted() {
        let client = LlmClient::with_provider(Arc::new(Canned(Ok(
            "```json\n{\"species\":\"Basil\",\"health_status\":\"Healthy\",\"diagnosis\":\"Vigorous\"}\n```".to_string(),
        ))));
        let Diagnosis::Assessed(a) = client.diagnose(&image()) else {
            panic!("expected assessment");
        };
        assert_eq!(a.species, "Basil");
        assert_eq!(client.provider_name(), "canned");
    }
}
