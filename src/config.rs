use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub drive: DriveConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub capture: CaptureConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    #[default]
    Sqlite,
    /// Hosted PostgREST endpoint (e.g. a Supabase project)
    Rest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: DatabaseType,

    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,

    /// Project URL, e.g. `https://xyz.supabase.co`
    #[serde(default)]
    pub rest_url: Option<String>,

    #[serde(default)]
    pub rest_api_key: Option<String>,
}

fn default_sqlite_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("plantcare")
        .join("plantcare.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseType::default(),
            sqlite_path: default_sqlite_path(),
            rest_url: None,
            rest_api_key: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderType {
    #[default]
    Gemini,
    OpenAI,
    LmStudio,
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProviderType,

    /// Base URL of the provider API; each provider has its own default
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Extra context prepended to the diagnosis prompt
    #[serde(default)]
    pub custom_prompt: Option<String>,

    /// Replaces the built-in diagnosis prompt entirely
    #[serde(default)]
    pub base_prompt: Option<String>,

    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl LlmProviderType {
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            LlmProviderType::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            LlmProviderType::OpenAI => "https://api.openai.com/v1",
            LlmProviderType::LmStudio => "http://localhost:1234/v1",
            LlmProviderType::Ollama => "http://localhost:11434",
        }
    }
}

fn default_llm_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    120
}

impl LlmConfig {
    /// Configured endpoint, or the default of the selected provider.
    pub fn resolved_endpoint(&self) -> &str {
        self.endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| self.provider.default_endpoint())
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProviderType::default(),
            endpoint: None,
            model: default_llm_model(),
            api_key: None,
            custom_prompt: None,
            base_prompt: None,
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveConfig {
    #[serde(default = "default_upload_endpoint")]
    pub upload_endpoint: String,

    #[serde(default = "default_files_endpoint")]
    pub files_endpoint: String,

    /// Destination folder for uploads; the drive root when unset
    #[serde(default)]
    pub folder_id: Option<String>,

    #[serde(default = "default_drive_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_upload_endpoint() -> String {
    "https://www.googleapis.com/upload/drive/v3/files".to_string()
}

fn default_files_endpoint() -> String {
    "https://www.googleapis.com/drive/v3/files".to_string()
}

fn default_drive_timeout_secs() -> u64 {
    60
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            upload_endpoint: default_upload_endpoint(),
            files_endpoint: default_files_endpoint(),
            folder_id: None,
            timeout_secs: default_drive_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,

    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub client_secret: Option<String>,

    #[serde(default = "default_session_path")]
    pub session_path: PathBuf,
}

fn default_token_endpoint() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_session_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("plantcare")
        .join("session.json")
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_endpoint: default_token_endpoint(),
            client_id: None,
            client_secret: None,
            session_path: default_session_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Longest edge sent to the model; larger images are downscaled
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,

    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

fn default_max_dimension() -> u32 {
    1024
}

fn default_max_bytes() -> u64 {
    20 * 1024 * 1024 // inline payload limit of the inference APIs
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_dimension: default_max_dimension(),
            max_bytes: default_max_bytes(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            llm: LlmConfig::default(),
            drive: DriveConfig::default(),
            auth: AuthConfig::default(),
            capture: CaptureConfig::default(),
        }
    }
}

impl Config {
    /// Load from `PLANTCARE_CONFIG` or the default location, writing a default
    /// file on first run.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Overlay credentials and the folder id from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("PLANTCARE_LLM_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(folder) = get("PLANTCARE_DRIVE_FOLDER_ID") {
            self.drive.folder_id = Some(folder);
        }
        if let Some(url) = get("PLANTCARE_DB_URL") {
            self.database.rest_url = Some(url);
            self.database.backend = DatabaseType::Rest;
        }
        if let Some(key) = get("PLANTCARE_DB_API_KEY") {
            self.database.rest_api_key = Some(key);
        }
        if let Some(id) = get("PLANTCARE_OAUTH_CLIENT_ID") {
            self.auth.client_id = Some(id);
        }
        if let Some(secret) = get("PLANTCARE_OAUTH_CLIENT_SECRET") {
            self.auth.client_secret = Some(secret);
        }
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("plantcare")
    }

    fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("PLANTCARE_CONFIG") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [llm]
            provider = "ollama"
            model = "llava"

            [drive]
            folder_id = "folder-1"
            "#,
        )
        .unwrap();

        assert_eq!(config.llm.provider, LlmProviderType::Ollama);
        assert_eq!(config.llm.model, "llava");
        assert_eq!(config.llm.timeout_secs, 120);
        assert_eq!(config.llm.resolved_endpoint(), "http://localhost:11434");
        assert_eq!(config.drive.folder_id.as_deref(), Some("folder-1"));
        assert_eq!(config.database.backend, DatabaseType::Sqlite);
        assert_eq!(config.capture.max_dimension, 1024);
    }

    #[test]
    fn test_endpoint_per_provider() {
        let mut llm = LlmConfig::default();
        assert_eq!(llm.resolved_endpoint(), "https://generativelanguage.googleapis.com/v1beta");

        llm.provider = LlmProviderType::LmStudio;
        assert_eq!(llm.resolved_endpoint(), "http://localhost:1234/v1");

        llm.endpoint = Some("  ".to_string());
        assert_eq!(llm.resolved_endpoint(), "http://localhost:1234/v1");

        llm.endpoint = Some("http://gpu-box:1234/v1".to_string());
        assert_eq!(llm.resolved_endpoint(), "http://gpu-box:1234/v1");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.llm.custom_prompt = Some("Indoor plants only".to_string());
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.llm.custom_prompt.as_deref(), Some("Indoor plants only"));
        assert_eq!(loaded.drive.upload_endpoint, config.drive.upload_endpoint);
    }

    #[test]
    fn test_env_overlay() {
        let env: HashMap<&str, &str> = [
            ("PLANTCARE_LLM_API_KEY", "gem-key"),
            ("PLANTCARE_DRIVE_FOLDER_ID", "folder-9"),
            ("PLANTCARE_DB_URL", "https://demo.supabase.co"),
            ("PLANTCARE_DB_API_KEY", "anon"),
            ("PLANTCARE_OAUTH_CLIENT_ID", "   "),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.llm.api_key.as_deref(), Some("gem-key"));
        assert_eq!(config.drive.folder_id.as_deref(), Some("folder-9"));
        assert_eq!(config.database.backend, DatabaseType::Rest);
        assert_eq!(config.database.rest_url.as_deref(), Some("https://demo.supabase.co"));
        assert_eq!(config.database.rest_api_key.as_deref(), Some("anon"));
        // blank values are ignored
        assert!(config.auth.client_id.is_none());
    }
}
