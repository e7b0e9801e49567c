//! Model module: the inference backend seam and its candle implementation

mod loader;
pub(crate) mod runtime;
mod template;
mod tokenizer;

use std::sync::Arc;
use async_trait::async_trait;

use crate::{
    error::Result,
    gpu::ComputeDevice,
    session::TokenSink,
    types::{ConversationTurn, LoadProgress, SamplingParams},
};

// Re-export core types
pub use loader::CandleBackend;
pub use runtime::CandleModel;
pub use template::ChatTemplate;
pub use tokenizer::HfChatTokenizer;

/// Receives load progress notifications
pub type ProgressCallback = Arc<dyn Fn(LoadProgress) + Send + Sync>;

/// Prompt produced by a chat template, ready for the model
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelInput {
    /// Rendered prompt text
    pub prompt: String,
    /// Token ids of `prompt`
    pub token_ids: Vec<u32>,
}

/// Turns a transcript into model input
pub trait ChatTokenizer: Send + Sync {
    /// Render `turns` with the active chat template and tokenize the result
    fn apply_chat_template(
        &self,
        turns: &[ConversationTurn],
        add_generation_prompt: bool,
    ) -> Result<ModelInput>;

    fn chat_template(&self) -> ChatTemplate;

    fn set_chat_template(&mut self, template: ChatTemplate);
}

/// A loaded causal language model
pub trait CausalModel: Send + Sync {
    /// Generate a reply for `input`, pushing decoded text into `sink` as it is
    /// produced. Blocks the calling thread; returns early once the sink's
    /// consumer has gone away.
    fn generate(&self, input: &ModelInput, params: &SamplingParams, sink: &TokenSink) -> Result<()>;

    /// Release the model weights. Generation fails afterwards.
    fn destroy(&self) -> Result<()>;
}

/// Source of devices, tokenizers and models for a session
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Obtain the compute device a model will run on
    async fn acquire_device(&self) -> Result<ComputeDevice>;

    /// Release a device obtained from `acquire_device`
    fn release_device(&self, device: &ComputeDevice) -> Result<()>;

    async fn load_tokenizer(
        &self,
        model_id: &str,
        progress: Option<&ProgressCallback>,
    ) -> Result<Box<dyn ChatTokenizer>>;

    async fn load_model(
        &self,
        model_id: &str,
        device: &ComputeDevice,
        progress: Option<&ProgressCallback>,
    ) -> Result<Arc<dyn CausalModel>>;
}
