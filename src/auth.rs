//! Drive session handling.
//!
//! The provider access token obtained from the OAuth consent step is the
//! bearer credential for drive uploads. It is kept in an explicit [`Session`]
//! that callers pass into every pipeline operation.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::AuthConfig;
use crate::error::PipelineError;

/// Tokens are treated as expired this long before their actual expiry.
const EXPIRY_SKEW_SECS: i64 = 60;

/// Longest token lifetime accepted from the command line.
pub const MAX_EXPIRES_IN_SECS: i64 = 366 * 24 * 60 * 60;

/// `now + seconds`, or `None` when that is out of range.
pub fn expiry_after(now: DateTime<Utc>, seconds: i64) -> Option<DateTime<Utc>> {
    Duration::try_seconds(seconds).and_then(|offset| now.checked_add_signed(offset))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub provider_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(provider_token: impl Into<String>) -> Self {
        Self {
            provider_token: provider_token.into(),
            refresh_token: None,
            expires_at: None,
        }
    }

    pub fn with_refresh_token(mut self, token: Option<String>) -> Self {
        self.refresh_token = token;
        self
    }

    /// An offset too large to represent leaves the expiry unknown.
    pub fn expiring_in(mut self, seconds: i64) -> Self {
        self.expires_at = expiry_after(Utc::now(), seconds);
        self
    }

    /// A session without a known expiry is assumed valid until the storage
    /// service rejects it.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now + Duration::seconds(EXPIRY_SKEW_SECS) >= expires_at,
            None => false,
        }
    }

    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        !self.provider_token.trim().is_empty() && !self.is_expired_at(now)
    }
}

/// JSON file holding the current session.
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<Session>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read session {}", self.path.display()))?;
        let session = serde_json::from_str(&content)
            .with_context(|| format!("Corrupt session file {}", self.path.display()))?;
        Ok(Some(session))
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(session)?)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access_token: String,
    pub expires_in: Option<i64>,
    pub refresh_token: Option<String>,
}

/// Exchanges a refresh token for a new access token.
pub trait TokenRefresher: Send + Sync {
    fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken>;
}

/// OAuth 2.0 `refresh_token` grant against a token endpoint.
pub struct OAuthRefresher {
    token_endpoint: String,
    client_id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl OAuthRefresher {
    pub fn new(token_endpoint: &str, client_id: &str, client_secret: &str) -> Self {
        Self {
            token_endpoint: token_endpoint.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        }
    }

    /// `None` unless both client id and secret are configured.
    pub fn from_config(config: &AuthConfig) -> Option<Self> {
        match (&config.client_id, &config.client_secret) {
            (Some(id), Some(secret)) => Some(Self::new(&config.token_endpoint, id, secret)),
            _ => None,
        }
    }
}

impl TokenRefresher for OAuthRefresher {
    fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken> {
        let agent = ureq::AgentBuilder::new()
            .timeout(std::time::Duration::from_secs(30))
            .build();

        let response = agent
            .post(&self.token_endpoint)
            .send_form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
            ])
            .map_err(|e| anyhow!("Token refresh failed: {}", e))?;

        let token: TokenResponse = response
            .into_json()
            .map_err(|e| anyhow!("Failed to parse token response: {}", e))?;

        Ok(RefreshedToken {
            access_token: token.access_token,
            expires_in: token.expires_in,
            refresh_token: token.refresh_token,
        })
    }
}

/// Resolves the session to use for the next pipeline run.
pub struct SessionManager {
    store: SessionStore,
    refresher: Option<Box<dyn TokenRefresher>>,
}

impl SessionManager {
    pub fn new(store: SessionStore, refresher: Option<Box<dyn TokenRefresher>>) -> Self {
        Self { store, refresher }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        let refresher = OAuthRefresher::from_config(config)
            .map(|r| Box::new(r) as Box<dyn TokenRefresher>);
        Self::new(SessionStore::new(&config.session_path), refresher)
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Return a usable session, refreshing an expired one when possible.
    pub fn active_session(&self) -> Result<Session, PipelineError> {
        self.active_session_at(Utc::now())
    }

    pub fn active_session_at(&self, now: DateTime<Utc>) -> Result<Session, PipelineError> {
        let session = match self.store.load() {
            Ok(Some(session)) => session,
            Ok(None) => return Err(PipelineError::Reauthenticate),
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unreadable session");
                return Err(PipelineError::Reauthenticate);
            }
        };

        if session.is_usable_at(now) {
            return Ok(session);
        }

        let (Some(refresher), Some(refresh_token)) = (&self.refresher, &session.refresh_token) else {
            tracing::info!("Session expired and cannot be refreshed");
            return Err(PipelineError::Reauthenticate);
        };

        let refreshed = refresher.refresh(refresh_token).map_err(|e| {
            tracing::warn!(error = %e, "Session refresh failed");
            PipelineError::Reauthenticate
        })?;

        let renewed = Session {
            provider_token: refreshed.access_token,
            refresh_token: refreshed.refresh_token.or(session.refresh_token),
            expires_at: refreshed.expires_in.and_then(|secs| {
                let at = expiry_after(now, secs);
                if at.is_none() {
                    tracing::warn!(expires_in = secs, "Ignoring out-of-range token lifetime");
                }
                at
            }),
        };

        if let Err(e) = self.store.save(&renewed) {
            tracing::warn!(error = %e, "Failed to persist refreshed session");
        }
        tracing::info!("Session refreshed");
        Ok(renewed)
    }
}
