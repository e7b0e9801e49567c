use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::{
    config::ModelConfig,
    error::{ChatError, Result},
    gpu::ComputeDevice,
    model::{CausalModel, ChatTemplate, ChatTokenizer, InferenceBackend, ProgressCallback},
    types::GenerationRequest,
};

use super::stream::{token_channel, TokenStream, STREAM_BUFFER};

/// A loaded tokenizer, model and device, valid until cleanup
pub struct ModelSession {
    model_id: String,
    tokenizer: Arc<dyn ChatTokenizer>,
    model: Arc<dyn CausalModel>,
    device: ComputeDevice,
}

impl fmt::Debug for ModelSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSession")
            .field("model_id", &self.model_id)
            .field("template", &self.tokenizer.chat_template())
            .field("device", &self.device.label())
            .finish()
    }
}

impl ModelSession {
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn tokenizer(&self) -> &Arc<dyn ChatTokenizer> {
        &self.tokenizer
    }

    pub fn model(&self) -> &Arc<dyn CausalModel> {
        &self.model
    }

    pub fn device(&self) -> &ComputeDevice {
        &self.device
    }

    /// Start a generation pass over `request`. The model runs on the blocking
    /// pool; dropping the returned stream stops it at the next token.
    pub fn generate(&self, request: &GenerationRequest) -> Result<TokenStream> {
        let input = self.tokenizer.apply_chat_template(request.turns(), true)?;
        debug!(
            turns = request.turns().len(),
            prompt_tokens = input.token_ids.len(),
            "Starting generation pass"
        );

        let (sink, stream) = token_channel(STREAM_BUFFER);
        let model = self.model.clone();
        let params = request.params().clone();
        tokio::task::spawn_blocking(move || {
            let result = model.generate(&input, &params, &sink);
            if let Err(e) = &result {
                warn!(error = %e, "Generation pass failed");
            }
            sink.finish(result);
        });
        Ok(stream)
    }
}

/// Observable lifecycle of the session slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unloaded,
    Loading,
    Ready,
}

type SharedLoad = Shared<BoxFuture<'static, Result<Arc<ModelSession>>>>;

enum Slot {
    Unloaded,
    Loading(SharedLoad),
    Ready(Arc<ModelSession>),
}

/// Owns the single model session of the process. Concurrent callers of
/// `get_instance` share one load; a failed load leaves the slot unloaded so a
/// later call retries.
pub struct SessionManager {
    backend: Arc<dyn InferenceBackend>,
    model_id: String,
    slot: Arc<Mutex<Slot>>,
}

impl SessionManager {
    pub fn new(backend: Arc<dyn InferenceBackend>, config: &ModelConfig) -> Self {
        Self {
            backend,
            model_id: config.model_id.clone(),
            slot: Arc::new(Mutex::new(Slot::Unloaded)),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn state(&self) -> SessionState {
        match &*self.slot.lock() {
            Slot::Unloaded => SessionState::Unloaded,
            Slot::Loading(_) => SessionState::Loading,
            Slot::Ready(_) => SessionState::Ready,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// The ready session, if any
    pub fn session(&self) -> Option<Arc<ModelSession>> {
        match &*self.slot.lock() {
            Slot::Ready(session) => Some(session.clone()),
            _ => None,
        }
    }

    /// Return the session, loading it on first use. While a load is in
    /// flight every caller awaits the same load; only the first caller's
    /// progress callback is used.
    pub async fn get_instance(&self, progress: Option<ProgressCallback>) -> Result<Arc<ModelSession>> {
        let load = {
            let mut slot = self.slot.lock();
            let in_flight = match &*slot {
                Slot::Ready(session) => return Ok(session.clone()),
                Slot::Loading(load) => Some(load.clone()),
                Slot::Unloaded => None,
            };
            match in_flight {
                Some(load) => {
                    debug!(model_id = %self.model_id, "Joining in-flight model load");
                    load
                }
                None => {
                    info!(model_id = %self.model_id, "Creating new model session");
                    let load = self.spawn_load(progress);
                    *slot = Slot::Loading(load.clone());
                    load
                }
            }
        };
        load.await
    }

    fn spawn_load(&self, progress: Option<ProgressCallback>) -> SharedLoad {
        let backend = self.backend.clone();
        let model_id = self.model_id.clone();
        let slot = self.slot.clone();

        let handle = tokio::spawn(async move {
            let result = load_session(backend.as_ref(), &model_id, progress.as_ref())
                .await
                .map(Arc::new);
            let mut slot = slot.lock();
            *slot = match &result {
                Ok(session) => {
                    info!(model_id = %model_id, device = %session.device().label(), "Model session ready");
                    Slot::Ready(session.clone())
                }
                Err(e) => {
                    error!(model_id = %model_id, error = %e, "Model load failed");
                    Slot::Unloaded
                }
            };
            result
        });

        let model_id = self.model_id.clone();
        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(ChatError::model_load(model_id, "load task aborted", e)),
            }
        }
        .boxed()
        .shared()
    }

    /// Start a generation pass on the ready session
    pub fn generate(&self, request: &GenerationRequest) -> Result<TokenStream> {
        let session = self
            .session()
            .ok_or_else(|| ChatError::generation("model session is not ready"))?;
        session.generate(request)
    }

    /// Destroy the model and release the device. Waits for an in-flight load
    /// first. Never fails; teardown errors are logged.
    pub async fn cleanup(&self) {
        let pending = match &*self.slot.lock() {
            Slot::Loading(load) => Some(load.clone()),
            _ => None,
        };
        if let Some(load) = pending {
            debug!("Waiting for in-flight load before cleanup");
            let _ = load.await;
        }

        let session = {
            let mut slot = self.slot.lock();
            match std::mem::replace(&mut *slot, Slot::Unloaded) {
                Slot::Ready(session) => Some(session),
                loading @ Slot::Loading(_) => {
                    *slot = loading;
                    None
                }
                Slot::Unloaded => None,
            }
        };

        let Some(session) = session else {
            debug!("No model session to clean up");
            return;
        };

        if let Err(e) = session.model().destroy() {
            error!(error = %e, "Failed to destroy model");
        }
        if let Err(e) = self.backend.release_device(session.device()) {
            error!(error = %e, "Failed to release device");
        }
        info!(model_id = %self.model_id, "Model session cleaned up");
    }
}

async fn load_session(
    backend: &dyn InferenceBackend,
    model_id: &str,
    progress: Option<&ProgressCallback>,
) -> Result<ModelSession> {
    let device = backend.acquire_device().await?;

    let loaded = async {
        let mut tokenizer = backend.load_tokenizer(model_id, progress).await?;
        if let Some(template) = ChatTemplate::override_for(model_id) {
            debug!(?template, "Overriding chat template");
            tokenizer.set_chat_template(template);
        }
        let model = backend.load_model(model_id, &device, progress).await?;
        Ok::<_, ChatError>((tokenizer, model))
    }
    .await;

    match loaded {
        Ok((tokenizer, model)) => Ok(ModelSession {
            model_id: model_id.to_string(),
            tokenizer: Arc::from(tokenizer),
            model,
            device,
        }),
        Err(e) => {
            if let Err(release_err) = backend.release_device(&device) {
                warn!(error = %release_err, "Failed to release device after load failure");
            }
            Err(e)
        }
    }
}
