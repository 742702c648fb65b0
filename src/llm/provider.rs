use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::capture::InlineImage;
use crate::config::{LlmConfig, LlmProviderType};

/// A multimodal model that can look at a plant photo.
pub trait LlmProvider: Send + Sync {
    /// Send the image and instruction, returning the model's raw text answer.
    fn diagnose(&self, image: &InlineImage, prompt: &str) -> Result<String>;

    /// Get the provider name for display
    fn provider_name(&self) -> &'static str;

    /// Base URL requests are sent to, if the provider talks HTTP
    fn endpoint(&self) -> Option<&str> {
        None
    }
}

fn agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

// ============================================================================
// Google Gemini provider
// ============================================================================

pub struct GeminiProvider {
    endpoint: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiBlob,
    },
}

#[derive(Debug, Serialize)]
struct GeminiBlob {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "responseMimeType")]
    response_mime_type: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

impl GeminiProvider {
    pub fn new(endpoint: &str, model: &str, api_key: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl LlmProvider for GeminiProvider {
    fn diagnose(&self, image: &InlineImage, prompt: &str) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(anyhow!("Gemini API key not configured"));
        }

        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![
                    GeminiPart::Text {
                        text: prompt.to_string(),
                    },
                    GeminiPart::InlineData {
                        inline_data: GeminiBlob {
                            mime_type: image.mime_type.clone(),
                            data: image.data.clone(),
                        },
                    },
                ],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: 0.4,
                response_mime_type: "application/json".to_string(),
            },
        };

        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);

        let response = agent(self.timeout)
            .post(&url)
            .set("Content-Type", "application/json")
            .set("x-goog-api-key", &self.api_key)
            .send_json(&request)
            .map_err(|e| anyhow!("Gemini request failed: {}", e))?;

        let gemini_response: GeminiResponse = response
            .into_json()
            .map_err(|e| anyhow!("Failed to parse Gemini response: {}", e))?;

        let text: String = gemini_response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(anyhow!("No response from Gemini"));
        }
        Ok(text)
    }

    fn provider_name(&self) -> &'static str {
        "Google Gemini"
    }

    fn endpoint(&self) -> Option<&str> {
        Some(&self.endpoint)
    }
}

// ============================================================================
// OpenAI-compatible provider (works with LM Studio, OpenAI, and compatible APIs)
// ============================================================================

pub struct OpenAICompatibleProvider {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: Vec<OpenAIContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum OpenAIContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIChatResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
}

impl OpenAICompatibleProvider {
    pub fn new(endpoint: &str, model: &str, api_key: Option<&str>) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.map(|s| s.to_string()),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl LlmProvider for OpenAICompatibleProvider {
    fn diagnose(&self, image: &InlineImage, prompt: &str) -> Result<String> {
        let data_url = format!("data:{};base64,{}", image.mime_type, image.data);

        let request = OpenAIChatRequest {
            model: self.model.clone(),
            messages: vec![OpenAIMessage {
                role: "user".to_string(),
                content: vec![
                    OpenAIContentPart::Text {
                        text: prompt.to_string(),
                    },
                    OpenAIContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_url },
                    },
                ],
            }],
            max_tokens: 800,
            temperature: 0.4,
        };

        let url = format!("{}/chat/completions", self.endpoint);

        let mut req = agent(self.timeout)
            .post(&url)
            .set("Content-Type", "application/json");

        if let Some(ref api_key) = self.api_key {
            req = req.set("Authorization", &format!("Bearer {}", api_key));
        }

        let response = req
            .send_json(&request)
            .map_err(|e| anyhow!("LLM request failed: {}", e))?;

        let chat_response: OpenAIChatResponse = response
            .into_json()
            .map_err(|e| anyhow!("Failed to parse LLM response: {}", e))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("No response from LLM"))
    }

    fn provider_name(&self) -> &'static str {
        "OpenAI-compatible"
    }

    fn endpoint(&self) -> Option<&str> {
        Some(&self.endpoint)
    }
}

// ============================================================================
// Ollama provider
// ============================================================================

pub struct OllamaProvider {
    endpoint: String,
    model: String,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    images: Vec<String>,
    stream: bool,
    format: String,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaProvider {
    pub fn new(endpoint: Option<&str>, model: &str) -> Self {
        Self {
            endpoint: endpoint
                .unwrap_or("http://localhost:11434")
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            timeout: Duration::from_secs(180),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl LlmProvider for OllamaProvider {
    fn diagnose(&self, image: &InlineImage, prompt: &str) -> Result<String> {
        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            images: vec![image.data.clone()],
            stream: false,
            format: "json".to_string(),
        };

        let url = format!("{}/api/generate", self.endpoint);

        let response = agent(self.timeout)
            .post(&url)
            .set("Content-Type", "application/json")
            .send_json(&request)
            .map_err(|e| anyhow!("Ollama request failed: {}", e))?;

        let ollama_response: OllamaResponse = response
            .into_json()
            .map_err(|e| anyhow!("Failed to parse Ollama response: {}", e))?;

        Ok(ollama_response.response)
    }

    fn provider_name(&self) -> &'static str {
        "Ollama"
    }

    fn endpoint(&self) -> Option<&str> {
        Some(&self.endpoint)
    }
}

// ============================================================================
// Factory function
// ============================================================================

/// Create an LLM provider based on configuration
pub fn create_provider(config: &LlmConfig) -> Box<dyn LlmProvider> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let endpoint = config.resolved_endpoint();

    match config.provider {
        LlmProviderType::Gemini => Box::new(
            GeminiProvider::new(endpoint, &config.model, config.api_key.as_deref().unwrap_or(""))
                .with_timeout(timeout),
        ),
        LlmProviderType::OpenAI | LlmProviderType::LmStudio => Box::new(
            OpenAICompatibleProvider::new(endpoint, &config.model, config.api_key.as_deref())
                .with_timeout(timeout),
        ),
        LlmProviderType::Ollama => {
            Box::new(OllamaProvider::new(Some(endpoint), &config.model).with_timeout(timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn image() -> InlineImage {
        InlineImage {
            mime_type: "image/jpeg".to_string(),
            data: "QUJD".to_string(),
        }
    }

    #[test]
    fn test_gemini_request_and_answer() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/v1beta/models/gemini-2.0-flash:generateContent")
            .match_header("x-goog-api-key", "key-1")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "contents": [{"parts": [
                    {"text": "look"},
                    {"inlineData": {"mimeType": "image/jpeg", "data": "QUJD"}}
                ]}]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"candidates":[{"content":{"parts":[{"text":"{\"species\":"},{"text":"\"Fern\"}"}],"role":"model"}}]}"#,
            )
            .create();

        let provider = GeminiProvider::new(&format!("{}/v1beta/", server.url()), "gemini-2.0-flash", "key-1");
        let text = provider.diagnose(&image(), "look").unwrap();
        mock.assert();
        assert_eq!(text, r#"{"species":"Fern"}"#);
    }

    #[test]
    fn test_gemini_without_key_fails_fast() {
        let provider = GeminiProvider::new("http://127.0.0.1:9", "gemini-2.0-flash", "");
        assert!(provider.diagnose(&image(), "look").is_err());
    }

    #[test]
    fn test_gemini_blocked_answer_is_error() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/models/m:generateContent")
            .with_status(200)
            .with_body(r#"{"candidates":[],"promptFeedback":{"blockReason":"SAFETY"}}"#)
            .create();

        let provider = GeminiProvider::new(&server.url(), "m", "k");
        assert!(provider.diagnose(&image(), "look").is_err());
    }

    #[test]
    fn test_openai_compatible_sends_data_url() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-1")
            .match_body(Matcher::Regex("data:image/jpeg;base64,QUJD".into()))
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"{\"species\":\"Aloe\"}"}}]}"#)
            .create();

        let provider = OpenAICompatibleProvider::new(&format!("{}/v1", server.url()), "gpt-4o-mini", Some("sk-1"));
        assert_eq!(provider.diagnose(&image(), "look").unwrap(), r#"{"species":"Aloe"}"#);
        mock.assert();
    }

    #[test]
    fn test_ollama_http_error() {
        let mut server = mockito::Server::new();
        server.mock("POST", "/api/generate").with_status(500).create();

        let provider = OllamaProvider::new(Some(&server.url()), "llava");
        let err = provider.diagnose(&image(), "look").unwrap_err();
        assert!(err.to_string().contains("Ollama request failed"));
    }

    #[test]
    fn test_factory_names() {
        let mut config = LlmConfig::default();
        assert_eq!(create_provider(&config).provider_name(), "Google Gemini");
        config.provider = LlmProviderType::Ollama;
        assert_eq!(create_provider(&config).provider_name(), "Ollama");
        config.provider = LlmProviderType::LmStudio;
        assert_eq!(create_provider(&config).provider_name(), "OpenAI-compatible");
    }

    #[test]
    fn test_factory_uses_provider_endpoint() {
        let config: LlmConfig = toml::from_str(r#"provider = "ollama""#).unwrap();
        assert_eq!(create_provider(&config).endpoint(), Some("http://localhost:11434"));

        let config: LlmConfig = toml::from_str(r#"provider = "lmstudio""#).unwrap();
        assert_eq!(create_provider(&config).endpoint(), Some("http://localhost:1234/v1"));

        let config = LlmConfig::default();
        assert_eq!(
            create_provider(&config).endpoint(),
            Some("https://generativelanguage.googleapis.com/v1beta")
        );
    }

    #[test]
    fn test_factory_honours_configured_endpoint() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/api/generate")
            .with_status(200)
            .with_body(r#"{"response":"{\"species\":\"Ivy\"}"}"#)
            .create();

        let config = LlmConfig {
            provider: LlmProviderType::Ollama,
            endpoint: Some(format!("{}/", server.url())),
            ..Default::default()
        };
        let text = create_provider(&config).diagnose(&image(), "look").unwrap();
        mock.assert();
        assert_eq!(text, r#"{"species":"Ivy"}"#);
    }
}
