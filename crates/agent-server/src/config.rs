//! Environment configuration

use std::time::Duration;

use agent_core::{AgentConfig, AgentError, PromptProfile, Result};
use agent_protocol::{ClientConfig, server_url_from_parts};
use agent_runtime::OllamaConfig;

/// Everything the binary reads from the environment
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Listen address for both the tool protocol and the ask API
    pub bind_addr: String,

    /// Remote tool server, if any
    pub tool_server_url: Option<String>,

    pub streaming_enabled: bool,
    pub tool_call_timeout: Duration,
    pub tool_connect_timeout: Duration,
    pub max_iterations: usize,
    pub llm_timeout: Duration,
    pub profile: PromptProfile,

    /// Replaces the default placeholder set when present
    pub path_placeholders: Option<Vec<String>>,

    pub ollama: OllamaConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; blank values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let secs = |key: &str, default: u64| -> Result<Duration> {
            var(key).map_or(Ok(Duration::from_secs(default)), |v| {
                v.parse()
                    .map(Duration::from_secs)
                    .map_err(|_| AgentError::Config(format!("{key} must be a whole number of seconds, got '{v}'")))
            })
        };

        let tool_server_url = match (var("TOOL_SERVER_URL"), var("TOOL_SERVER_HOST")) {
            (Some(url), _) => Some(url),
            (None, Some(host)) => {
                let port = match var("TOOL_SERVER_PORT") {
                    Some(p) => p
                        .parse()
                        .map_err(|_| AgentError::Config(format!("TOOL_SERVER_PORT is not a port: '{p}'")))?,
                    None => 8001,
                };
                Some(server_url_from_parts(&host, port))
            }
            (None, None) => None,
        };

        let max_iterations = match var("AGENT_MAX_ITERATIONS") {
            Some(v) => match v.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(AgentError::Config(format!(
                        "AGENT_MAX_ITERATIONS must be a positive integer, got '{v}'"
                    )));
                }
            },
            None => AgentConfig::default().max_iterations,
        };

        let profile = var("AGENT_PROMPT_PROFILE")
            .map_or(Ok(PromptProfile::General), |v| v.parse())?;

        let path_placeholders = var("AGENT_PATH_PLACEHOLDERS").map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_lowercase)
                .collect()
        });

        let streaming_enabled = var("TOOL_STREAMING_ENABLED")
            .is_none_or(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on"));

        let defaults = OllamaConfig::default();
        let ollama = OllamaConfig {
            host: var("OLLAMA_HOST").unwrap_or(defaults.host),
            port: var("OLLAMA_PORT").and_then(|p| p.parse().ok()).unwrap_or(defaults.port),
            model: var("OLLAMA_MODEL").unwrap_or(defaults.model),
            timeout_secs: var("OLLAMA_TIMEOUT_SECS")
                .and_then(|t| t.parse().ok())
                .unwrap_or(defaults.timeout_secs),
        };

        Ok(Self {
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8765".into()),
            tool_server_url,
            streaming_enabled,
            tool_call_timeout: secs("TOOL_CALL_TIMEOUT_SECS", 30)?,
            tool_connect_timeout: secs("TOOL_CONNECT_TIMEOUT_SECS", 15)?,
            max_iterations,
            llm_timeout: secs("AGENT_LLM_TIMEOUT_SECS", 120)?,
            profile,
            path_placeholders,
            ollama,
        })
    }

    pub fn agent_config(&self) -> AgentConfig {
        let mut config = AgentConfig {
            max_iterations: self.max_iterations,
            profile: self.profile,
            llm_timeout: self.llm_timeout,
            tool_timeout: self.tool_call_timeout,
            streaming_enabled: self.streaming_enabled,
            ..AgentConfig::default()
        };
        config.generation.model.clone_from(&self.ollama.model);
        if let Some(placeholders) = &self.path_placeholders {
            config.path_placeholders = placeholders.iter().cloned().collect();
        }
        config
    }

    pub fn client_config(&self) -> Option<ClientConfig> {
        self.tool_server_url.as_ref().map(|url| {
            ClientConfig::new(url)
                .with_connect_timeout(self.tool_connect_timeout)
                .with_request_timeout(self.tool_call_timeout)
        })
    }
}
