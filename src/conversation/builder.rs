use std::sync::Arc;

use crate::{
    config::ChatConfig,
    error::{ChatError, Result},
    metrics::MetricsCollector,
    model::{CandleBackend, InferenceBackend},
    search::{ProxyTransport, SearchTransport, WebContextFetcher},
    session::SessionManager,
};

use super::{orchestrator::ChatOrchestrator, presenter::ChatPresenter};

/// Builder for constructing a ChatOrchestrator instance
pub struct ChatBuilder {
    config: Option<ChatConfig>,
    backend: Option<Arc<dyn InferenceBackend>>,
    transport: Option<Arc<dyn SearchTransport>>,
    presenter: Option<Arc<dyn ChatPresenter>>,
}

impl ChatBuilder {
    /// Create a new builder instance
    pub fn new() -> Self {
        Self {
            config: None,
            backend: None,
            transport: None,
            presenter: None,
        }
    }

    pub fn with_config(mut self, config: ChatConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replace the candle backend
    pub fn with_backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Replace the HTTP proxy transport
    pub fn with_transport(mut self, transport: Arc<dyn SearchTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_presenter(mut self, presenter: Arc<dyn ChatPresenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    /// Build the orchestrator. The model is not loaded until `initialize`.
    pub fn build(self) -> Result<ChatOrchestrator> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let presenter = self
            .presenter
            .ok_or_else(|| ChatError::configuration("presenter", "a presenter is required"))?;

        let backend = match self.backend {
            Some(backend) => backend,
            None => Arc::new(CandleBackend::new(config.model.clone(), config.device.clone())),
        };
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ProxyTransport::new(&config.search)?),
        };

        let session = Arc::new(SessionManager::new(backend, &config.model));
        let fetcher = Arc::new(WebContextFetcher::new(transport, config.search.clone()));

        Ok(ChatOrchestrator::new(
            Arc::new(config),
            session,
            fetcher,
            presenter,
            Arc::new(MetricsCollector::new()),
        ))
    }
}

impl Default for ChatBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use crate::testing::RecordingPresenter;

    #[test]
    fn test_builder_requires_presenter() {
        let result = ChatBuilder::new().build();
        assert!(matches!(
            result,
            Err(ChatError::ConfigurationError { ref parameter, .. }) if parameter == "presenter"
        ));
    }

    #[test]
    fn test_builder_validates_config() {
        let mut config = ChatConfig::default();
        config.generation.top_p = 0.0;

        let result = ChatBuilder::new()
            .with_config(config)
            .with_presenter(Arc::new(RecordingPresenter::default()))
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_builder_defaults_leave_model_unloaded() {
        let orchestrator = ChatBuilder::default()
            .with_presenter(Arc::new(RecordingPresenter::default()))
            .build()
            .unwrap();
        assert_eq!(orchestrator.session().state(), SessionState::Unloaded);
        assert!(orchestrator.transcript().is_empty());
    }
}
