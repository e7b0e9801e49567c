use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Serialize, Deserialize};

use crate::error::{ChatError, Result};
use crate::types::SamplingParams;

pub const DEFAULT_MODEL_ID: &str = "microsoft/Phi-3-mini-4k-instruct";
pub const DEFAULT_PROXY_BASE: &str = "https://api.allorigins.win/raw?url=";
pub const DEFAULT_SEARCH_URL: &str = "https://duckduckgo.com/html?q=";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant that can search the web. When you need information to answer a question, use the search command like this:

<search>your search query</search>

For example:
User: What's the weather in Dublin?
Assistant: Let me check that for you.
<search>Dublin Ireland current weather</search>

Keep your responses concise and focused on the information needed.";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub model: ModelConfig,
    pub generation: SamplingParams,
    pub search: SearchConfig,
    pub conversation: ConversationConfig,
    pub device: DeviceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model identifier, resolved to `models_dir/model_id`
    pub model_id: String,

    /// Root directory holding downloaded model snapshots
    pub models_dir: PathBuf,

    /// Weight precision used when materializing the model
    pub precision: Precision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    F32,
    F16,
    Bf16,
}

impl Precision {
    pub fn dtype(self) -> candle_core::DType {
        match self {
            Precision::F32 => candle_core::DType::F32,
            Precision::F16 => candle_core::DType::F16,
            Precision::Bf16 => candle_core::DType::BF16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Prefix every outbound URL is appended to, percent-encoded
    pub proxy_base: String,

    /// Search surface queried for directives
    pub search_url: String,

    /// Number of result entries kept from a search page
    pub max_results: usize,

    /// Character cap for visited page text
    pub page_char_limit: usize,

    /// Per-request timeout
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,

    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub system_prompt: String,

    /// Fold the system prompt into the first user turn instead of keeping a
    /// separate system turn. Read once at startup.
    pub prepend_system_to_user: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    Auto,
    Cuda,
    Metal,
    Cpu,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub preference: DevicePreference,

    /// Accelerator ordinal for CUDA/Metal
    pub ordinal: usize,

    /// Whether `Auto` may settle for the CPU when no accelerator is found
    pub allow_cpu_fallback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub file_path: Option<PathBuf>,
    pub timestamps: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_level(self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            models_dir: PathBuf::from("models"),
            precision: Precision::F16,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            proxy_base: DEFAULT_PROXY_BASE.to_string(),
            search_url: DEFAULT_SEARCH_URL.to_string(),
            max_results: 3,
            page_char_limit: 2000,
            request_timeout: Duration::from_secs(20),
            user_agent: format!("search-chat/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            prepend_system_to_user: true,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            preference: DevicePreference::Auto,
            ordinal: 0,
            allow_cpu_fallback: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            file_path: None,
            timestamps: true,
        }
    }
}

/// Errors raised while reading a configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl From<ConfigError> for ChatError {
    fn from(err: ConfigError) -> Self {
        let parameter = match &err {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => {
                path.display().to_string()
            }
        };
        ChatError::ConfigurationError {
            message: err.to_string(),
            parameter,
        }
    }
}

impl ChatConfig {
    /// Load a JSON configuration file; missing sections fall back to defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ChatConfig = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.model_id.trim().is_empty() {
            return Err(ChatError::configuration("model_id", "Model id cannot be empty"));
        }

        let generation = &self.generation;
        if generation.max_new_tokens == 0 {
            return Err(ChatError::configuration(
                "max_new_tokens",
                "Must generate at least one token",
            ));
        }
        // Greedy decoding ignores the temperature
        if generation.do_sample && generation.temperature <= 0.0 {
            return Err(ChatError::configuration(
                "temperature",
                "Temperature must be positive when sampling",
            ));
        }
        if !(generation.top_p > 0.0 && generation.top_p <= 1.0) {
            return Err(ChatError::configuration(
                "top_p",
                "Top-p must be in (0, 1]",
            ));
        }
        if generation.top_k == 0 {
            return Err(ChatError::configuration("top_k", "Top-k must be at least 1"));
        }

        if self.search.max_results == 0 {
            return Err(ChatError::configuration(
                "max_results",
                "At least one search result must be kept",
            ));
        }
        if self.search.proxy_base.trim().is_empty() {
            return Err(ChatError::configuration("proxy_base", "Proxy base cannot be empty"));
        }

        Ok(())
    }
}

mod duration_secs {
    use std::time::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
