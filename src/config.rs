//! Client configuration

use crate::error::{ClientError, Result};
use reqwest::Url;

/// Environment variable holding the backend origin.
pub const BACKEND_URL_ENV: &str = "PORTAL_BACKEND_URL";

/// Origin used when [`BACKEND_URL_ENV`] is unset or empty.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

/// Configuration for the portal client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL every API path is appended to, e.g. `https://portal.example.com/api`
    pub backend_url: String,
}

impl ClientConfig {
    pub fn new(backend_url: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into(),
        }
    }

    /// Read the backend origin from `PORTAL_BACKEND_URL`, falling back to the local default.
    pub fn from_env() -> Self {
        Self::new(resolve_backend_url(std::env::var(BACKEND_URL_ENV).ok()))
    }

    /// Validate the configured URL and return it without a trailing slash.
    pub(crate) fn origin(&self) -> Result<String> {
        let trimmed = self.backend_url.trim();
        let url = Url::parse(trimmed)
            .map_err(|e| ClientError::Configuration(format!("Invalid backend URL {trimmed:?}: {e}")))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClientError::Configuration(format!(
                "Backend URL must use http or https, got {:?}",
                url.scheme()
            )));
        }

        Ok(trimmed.trim_end_matches('/').to_string())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BACKEND_URL)
    }
}

fn resolve_backend_url(value: Option<String>) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_or_blank_env_uses_default() {
        assert_eq!(resolve_backend_url(None), DEFAULT_BACKEND_URL);
        assert_eq!(resolve_backend_url(Some("  ".to_string())), DEFAULT_BACKEND_URL);
        assert_eq!(
            resolve_backend_url(Some("https://portal.example.com".to_string())),
            "https://portal.example.com"
        );
    }

    #[test]
    fn test_origin_strips_trailing_slash() {
        let config = ClientConfig::new("https://portal.example.com/api/");
        assert_eq!(config.origin().unwrap(), "https://portal.example.com/api");
    }

    #[test]
    fn test_origin_rejects_invalid_urls() {
        assert!(matches!(
            ClientConfig::new("not a url").origin(),
            Err(ClientError::Configuration(_))
        ));
        assert!(matches!(
            ClientConfig::new("ftp://portal.example.com").origin(),
            Err(ClientError::Configuration(_))
        ));
    }
}
