use candle_core::{DType, Device, Tensor};
use candle_transformers::generation::{LogitsProcessor, Sampling};
use candle_transformers::models::phi3::Model as Phi3;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::{
    error::{ChatError, Result},
    session::TokenSink,
    types::SamplingParams,
};

use super::{tokenizer::TokenDecoder, CausalModel, ModelInput};

/// Phi-3 model running on a candle device
pub struct CandleModel {
    model_id: String,
    model: Mutex<Option<Phi3>>,
    tokenizer: Arc<Tokenizer>,
    device: Device,
    eos_token_ids: Vec<u32>,
    destroyed: AtomicBool,
}

impl CandleModel {
    pub fn new(
        model_id: impl Into<String>,
        model: Phi3,
        tokenizer: Arc<Tokenizer>,
        device: Device,
        eos_token_ids: Vec<u32>,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            model: Mutex::new(Some(model)),
            tokenizer,
            device,
            eos_token_ids,
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Sampling strategy for the logits processor
pub(crate) fn sampling(params: &SamplingParams) -> Sampling {
    if !params.do_sample || params.temperature <= 0.0 {
        return Sampling::ArgMax;
    }
    Sampling::TopKThenTopP {
        k: params.top_k,
        p: params.top_p,
        temperature: params.temperature,
    }
}

impl CausalModel for CandleModel {
    fn generate(&self, input: &ModelInput, params: &SamplingParams, sink: &TokenSink) -> Result<()> {
        if input.token_ids.is_empty() {
            return Err(ChatError::generation("empty prompt"));
        }

        let mut guard = self.model.lock();
        let model = guard
            .as_mut()
            .ok_or_else(|| ChatError::generation("model has been destroyed"))?;
        model.clear_kv_cache();

        let mut logits_processor = LogitsProcessor::from_sampling(params.seed, sampling(params));
        let mut decoder = TokenDecoder::new(self.tokenizer.clone());
        let mut tokens = input.token_ids.clone();
        let start = std::time::Instant::now();
        let mut generated = 0usize;

        for index in 0..params.max_new_tokens {
            if self.destroyed.load(Ordering::Acquire) {
                debug!(generated, "Model destroyed mid-generation");
                guard.take();
                return Err(ChatError::generation("model destroyed mid-generation"));
            }

            let context_size = if index > 0 { 1 } else { tokens.len() };
            let start_pos = tokens.len().saturating_sub(context_size);
            let input_tensor = Tensor::new(&tokens[start_pos..], &self.device)?.unsqueeze(0)?;

            let logits = model.forward(&input_tensor, start_pos)?;
            let logits = logits.squeeze(0)?.squeeze(0)?.to_dtype(DType::F32)?;

            let next_token = logits_processor.sample(&logits)?;
            tokens.push(next_token);
            generated += 1;

            if self.eos_token_ids.contains(&next_token) {
                break;
            }

            if let Some(text) = decoder.next_token(next_token)? {
                if !sink.emit(text) {
                    debug!(generated, "Token consumer went away");
                    return Ok(());
                }
            }
        }

        if let Some(rest) = decoder.flush()? {
            sink.emit(rest);
        }

        let elapsed = start.elapsed();
        info!(
            prompt_tokens = input.token_ids.len(),
            generated,
            tokens_per_second = generated as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
            "Generation finished"
        );
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        self.destroyed.store(true, Ordering::Release);
        // A running generation drops the weights itself once it notices the flag
        if let Some(mut guard) = self.model.try_lock() {
            guard.take();
        }
        info!(model_id = %self.model_id, "Model destroyed");
        Ok(())
    }
}
