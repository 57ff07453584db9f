//! Model backend configuration

use super::{LlmService, LoggingService, OpenAIService};
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://api.highflame.app/v1";
pub const DEFAULT_TEMPERATURE: f32 = 0.8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Credentials and routing for the model gateway
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    /// Gateway key, sent as `X-Javelin-apikey`
    pub gateway_api_key: Option<String>,
    /// Gateway route, sent as `X-Javelin-route`
    pub gateway_route: Option<String>,
    pub model: Option<String>,
    /// Upstream provider key, sent as the bearer token
    pub api_key: Option<String>,
    pub base_url: String,
    pub temperature: f32,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_blank = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let temperature = match non_blank("LLM_TEMPERATURE").map(|v| v.parse::<f32>()) {
            Some(Ok(t)) => t,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Ignoring unparseable LLM_TEMPERATURE");
                DEFAULT_TEMPERATURE
            }
            None => DEFAULT_TEMPERATURE,
        };

        Self {
            gateway_api_key: non_blank("HIGHFLAME_API_KEY"),
            gateway_route: non_blank("HIGHFLAME_ROUTE"),
            model: non_blank("MODEL"),
            api_key: non_blank("LLM_API_KEY"),
            base_url: non_blank("LLM_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            temperature,
        }
    }

    /// Check that every required value is present
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("HIGHFLAME_API_KEY", &self.gateway_api_key),
            ("HIGHFLAME_ROUTE", &self.gateway_route),
            ("MODEL", &self.model),
            ("LLM_API_KEY", &self.api_key),
        ];
        for (var, value) in required {
            if value.is_none() {
                return Err(ConfigError::Missing(var));
            }
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::Invalid {
                var: "LLM_BASE_URL",
                reason: format!("not an http(s) URL: {}", self.base_url),
            });
        }
        Ok(())
    }

    /// Validate and construct the logged model service
    pub fn build_service(&self) -> Result<Arc<dyn LlmService>, ConfigError> {
        self.validate()?;
        let service = OpenAIService::new(self)?;
        tracing::info!(
            model = %service.model_id(),
            base_url = %self.base_url,
            "LLM service configured"
        );
        Ok(Arc::new(LoggingService::new(Arc::new(service))))
    }
}
