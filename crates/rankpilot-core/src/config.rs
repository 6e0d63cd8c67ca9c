//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level RankPilot configuration, loaded from a JSON5 file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agents: Option<AgentsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<ModelsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defaults: Option<AgentDefaults>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefaults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Maximum tool-calling rounds per agent run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rounds: Option<u32>,

    /// Identity override prepended to the system prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

// --- Typed provider config ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub providers: Option<Vec<ProviderConfig>>,
}

/// Configuration for a single LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl ProviderConfig {
    /// Resolve the API key: check `api_key` field first, then `api_key_env`.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum turns retained after history normalization (default: 40).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Directory for extracted memory notes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,

    /// Disable the post-run note extraction step.
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    ///
    /// A missing file yields the default config; an unusable provider setup
    /// is reported by [`Config::validate`], not here.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::RankPilotError::Io)?;
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::RankPilotError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file location: `~/.rankpilot/config.json`
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Resolve the workspace directory.
    pub fn workspace_dir(&self) -> PathBuf {
        self.agents
            .as_ref()
            .and_then(|a| a.defaults.as_ref())
            .and_then(|d| d.workspace.as_ref())
            .map(|w| {
                let expanded = shellexpand::tilde(w);
                PathBuf::from(expanded.as_ref())
            })
            .unwrap_or_else(|| data_dir().join("workspace"))
    }

    /// Get the default model name, falling back to the first provider's.
    pub fn default_model(&self) -> String {
        self.agents
            .as_ref()
            .and_then(|a| a.defaults.as_ref())
            .and_then(|d| d.model.clone())
            .or_else(|| {
                self.first_provider()
                    .and_then(|p| p.default_model.clone())
            })
            .unwrap_or_else(|| "claude-sonnet-4-20250514".to_string())
    }

    /// Get the default max_tokens.
    pub fn max_tokens(&self) -> u32 {
        self.agents
            .as_ref()
            .and_then(|a| a.defaults.as_ref())
            .and_then(|d| d.max_tokens)
            .unwrap_or(4096)
    }

    /// Get temperature setting.
    pub fn temperature(&self) -> Option<f64> {
        self.agents
            .as_ref()
            .and_then(|a| a.defaults.as_ref())
            .and_then(|d| d.temperature)
    }

    /// Maximum tool-calling rounds per run.
    pub fn max_rounds(&self) -> u32 {
        self.agents
            .as_ref()
            .and_then(|a| a.defaults.as_ref())
            .and_then(|d| d.max_rounds)
            .unwrap_or(5)
    }

    /// Custom system prompt identity, if configured.
    pub fn system_prompt(&self) -> Option<&str> {
        self.agents
            .as_ref()
            .and_then(|a| a.defaults.as_ref())
            .and_then(|d| d.system_prompt.as_deref())
    }

    /// Configured log level (trace/debug/info/warn/error), if any.
    pub fn log_level(&self) -> Option<&str> {
        self.logging.as_ref().and_then(|l| l.level.as_deref())
    }

    /// Maximum turns retained after history normalization.
    pub fn max_history_turns(&self) -> usize {
        self.session
            .as_ref()
            .and_then(|s| s.max_turns)
            .unwrap_or(40)
    }

    /// Directory for extracted memory notes, `None` when extraction is off.
    pub fn memory_dir(&self) -> Option<PathBuf> {
        let memory = self.memory.as_ref()?;
        if memory.disabled {
            return None;
        }
        Some(
            memory
                .dir
                .as_ref()
                .map(|d| PathBuf::from(shellexpand::tilde(d).as_ref()))
                .unwrap_or_else(|| data_dir().join("memory")),
        )
    }

    /// Find a provider config by id.
    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.models
            .as_ref()
            .and_then(|m| m.providers.as_ref())
            .and_then(|p| p.iter().find(|pc| pc.id == id))
    }

    /// Get the first provider config.
    pub fn first_provider(&self) -> Option<&ProviderConfig> {
        self.models
            .as_ref()
            .and_then(|m| m.providers.as_ref())
            .and_then(|p| p.first())
    }

    /// Validate config, returning (warnings, errors).
    ///
    /// Having no provider with a resolvable API key is an error: the agent
    /// cannot start a single round without one.
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        let providers = self
            .models
            .as_ref()
            .and_then(|m| m.providers.as_ref())
            .map(Vec::as_slice)
            .unwrap_or_default();

        if providers.is_empty() {
            errors.push("No LLM providers configured".to_string());
        } else {
            let mut usable = 0;
            for p in providers {
                if p.resolve_api_key().is_none() {
                    warnings.push(format!("Provider '{}' has no API key configured", p.id));
                } else {
                    usable += 1;
                }
            }
            if usable == 0 {
                errors.push("No provider has a usable API key".to_string());
            }
        }

        if self.max_rounds() == 0 {
            errors.push("agents.defaults.max_rounds cannot be 0".to_string());
        }

        (warnings, errors)
    }
}

/// Base directory for RankPilot data: `~/.rankpilot/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".rankpilot")
}
