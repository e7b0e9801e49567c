use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

pub type Result<T> = std::result::Result<T, ChatError>;

/// Shared, clonable error source. Load failures are handed to every caller
/// awaiting the same in-flight load, so errors must be `Clone`.
pub type ErrorSource = Arc<dyn StdError + Send + Sync>;

#[derive(Debug, Clone)]
pub enum ChatError {
    DeviceUnavailable {
        message: String,
    },
    ModelLoadFailure {
        model_id: String,
        message: String,
        source: Option<ErrorSource>,
    },
    FetchFailure {
        url: String,
        message: String,
    },
    GenerationFailure {
        message: String,
        source: Option<ErrorSource>,
    },
    ConfigurationError {
        message: String,
        parameter: String,
    },
    Io {
        message: String,
        source: Option<ErrorSource>,
    },
}

impl ChatError {
    pub(crate) fn model_load(
        model_id: impl Into<String>,
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        ChatError::ModelLoadFailure {
            model_id: model_id.into(),
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    pub(crate) fn generation(message: impl Into<String>) -> Self {
        ChatError::GenerationFailure {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn configuration(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        ChatError::ConfigurationError {
            message: message.into(),
            parameter: parameter.into(),
        }
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::DeviceUnavailable { message } => {
                write!(f, "Compute device unavailable: {}", message)
            }
            ChatError::ModelLoadFailure { model_id, message, .. } => {
                write!(f, "Failed to load model {}: {}", model_id, message)
            }
            ChatError::FetchFailure { url, message } => {
                write!(f, "Fetch of {} failed: {}", url, message)
            }
            ChatError::GenerationFailure { message, .. } => {
                write!(f, "Generation failed: {}", message)
            }
            ChatError::ConfigurationError { message, parameter } => {
                write!(f, "Configuration error for {}: {}", parameter, message)
            }
            ChatError::Io { message, .. } => {
                write!(f, "I/O error: {}", message)
            }
        }
    }
}

impl StdError for ChatError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ChatError::ModelLoadFailure { source, .. }
            | ChatError::GenerationFailure { source, .. }
            | ChatError::Io { source, .. } => source.as_deref().map(|s| s as &(dyn StdError + 'static)),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::Io {
            message: err.to_string(),
            source: Some(Arc::new(err)),
        }
    }
}

impl From<candle_core::Error> for ChatError {
    fn from(err: candle_core::Error) -> Self {
        ChatError::GenerationFailure {
            message: err.to_string(),
            source: Some(Arc::new(err)),
        }
    }
}

/// Classification helpers for the propagation policy: lifecycle errors are
/// shown to the user and need an explicit retry, fetch errors stay local.
pub(crate) trait ErrorExt {
    fn is_user_visible(&self) -> bool;
    fn requires_explicit_retry(&self) -> bool;
}

impl ErrorExt for ChatError {
    fn is_user_visible(&self) -> bool {
        !matches!(self, ChatError::FetchFailure { .. })
    }

    fn requires_explicit_retry(&self) -> bool {
        matches!(
            self,
            ChatError::DeviceUnavailable { .. }
                | ChatError::ModelLoadFailure { .. }
                | ChatError::GenerationFailure { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ChatError::DeviceUnavailable {
            message: "no adapter".to_string(),
        };
        assert_eq!(error.to_string(), "Compute device unavailable: no adapter");

        let error = ChatError::configuration("top_p", "must be in (0, 1]");
        assert_eq!(error.to_string(), "Configuration error for top_p: must be in (0, 1]");
    }

    #[test]
    fn test_error_classification() {
        let fetch = ChatError::FetchFailure {
            url: "https://example.com".to_string(),
            message: "timeout".to_string(),
        };
        assert!(!fetch.is_user_visible());
        assert!(!fetch.requires_explicit_retry());

        let load = ChatError::model_load(
            "microsoft/Phi-3-mini-4k-instruct",
            "missing weights",
            std::io::Error::new(std::io::ErrorKind::NotFound, "model.safetensors"),
        );
        assert!(load.is_user_visible());
        assert!(load.requires_explicit_retry());
        assert!(load.source().is_some());
    }

    #[test]
    fn test_error_is_clone() {
        let error = ChatError::generation("stream closed");
        let copy = error.clone();
        assert_eq!(error.to_string(), copy.to_string());
    }
}
