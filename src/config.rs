//! Runtime configuration. Reads the recognized environment keys and
//! layers CLI flag overrides on top of whatever the environment set.

use crate::model::descriptor::Family;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint: Option<String>,
    pub model_alias: Option<String>,
    pub aws_profile: Option<String>,
    pub aws_region: Option<String>,
    pub google_api_key: Option<String>,
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_k: Option<u32>,
    pub thinking_mode: bool,
    pub user_codebase_dir: String,
    pub max_depth: Option<u32>,
    pub command_timeout: Duration,
    pub log_level: String,
}

impl Config {
    /// Build configuration from the process environment. `USER_CODEBASE_DIR`
    /// is required; everything else falls back to a documented default.
    pub fn from_env() -> Result<Self, String> {
        let user_codebase_dir = env::var("USER_CODEBASE_DIR")
            .map_err(|_| "USER_CODEBASE_DIR is required".to_string())?;

        Ok(Self {
            endpoint: env::var("ENDPOINT").ok(),
            model_alias: env::var("MODEL").ok(),
            aws_profile: env::var("AWS_PROFILE").ok(),
            aws_region: env::var("AWS_REGION").ok(),
            google_api_key: env::var("GOOGLE_API_KEY").ok(),
            max_output_tokens: env::var("MAX_OUTPUT_TOKENS").ok().and_then(|v| v.parse().ok()),
            temperature: env::var("TEMPERATURE").ok().and_then(|v| v.parse().ok()),
            top_k: env::var("TOP_K").ok().and_then(|v| v.parse().ok()),
            thinking_mode: env::var("THINKING_MODE").map(|v| v == "1").unwrap_or(false),
            user_codebase_dir,
            max_depth: env::var("MAX_DEPTH").ok().and_then(|v| v.parse().ok()),
            command_timeout: env::var("COMMAND_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(60)),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Map the `ENDPOINT` environment key to a backend `Family` tag.
    pub fn family(&self) -> Option<Family> {
        match self.endpoint.as_deref() {
            Some("bedrock") => Some(Family::BedrockNova),
            Some("anthropic") => Some(Family::Anthropic),
            Some("openai") => Some(Family::OpenAi),
            Some("google") => Some(Family::Google),
            _ => None,
        }
    }

    /// CLI flag overrides applied on top of whatever the environment set.
    pub fn apply_cli_overrides(
        &mut self,
        root: Option<String>,
        profile: Option<String>,
        region: Option<String>,
        model: Option<String>,
    ) {
        if let Some(root) = root {
            self.user_codebase_dir = root;
        }
        if profile.is_some() {
            self.aws_profile = profile;
        }
        if region.is_some() {
            self.aws_region = region;
        }
        if model.is_some() {
            self.model_alias = model;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_endpoint_to_family() {
        let mut config = bare_config();
        config.endpoint = Some("google".to_string());
        assert_eq!(config.family(), Some(Family::Google));
        config.endpoint = Some("unknown-backend".to_string());
        assert_eq!(config.family(), None);
    }

    #[test]
    fn cli_overrides_win_over_environment_values() {
        let mut config = bare_config();
        config.model_alias = Some("env-model".to_string());
        config.apply_cli_overrides(None, None, None, Some("cli-model".to_string()));
        assert_eq!(config.model_alias.as_deref(), Some("cli-model"));
    }

    fn bare_config() -> Config {
        Config {
            endpoint: None,
            model_alias: None,
            aws_profile: None,
            aws_region: None,
            google_api_key: None,
            max_output_tokens: None,
            temperature: None,
            top_k: None,
            thinking_mode: false,
            user_codebase_dir: "/tmp".to_string(),
            max_depth: None,
            command_timeout: Duration::from_secs(60),
            log_level: "info".to_string(),
        }
    }
}
