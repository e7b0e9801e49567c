use async_trait::async_trait;
use candle_nn::VarBuilder;
use candle_transformers::models::phi3::{Config as Phi3Config, Model as Phi3};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    config::{DeviceConfig, ModelConfig},
    error::{ChatError, Result},
    gpu::ComputeDevice,
    types::LoadProgress,
};

use super::{
    runtime::CandleModel,
    tokenizer::HfChatTokenizer,
    CausalModel,
    ChatTokenizer,
    InferenceBackend,
    ProgressCallback,
};

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const SINGLE_WEIGHTS_FILE: &str = "model.safetensors";
const WEIGHTS_INDEX_FILE: &str = "model.safetensors.index.json";

#[derive(Deserialize)]
struct WeightIndex {
    weight_map: std::collections::HashMap<String, String>,
}

/// Loads Phi-3 family models from a local directory laid out as
/// `{models_dir}/{model_id}/` with `config.json`, `tokenizer.json` and
/// safetensors weights.
pub struct CandleBackend {
    model_config: ModelConfig,
    device_config: DeviceConfig,
}

impl CandleBackend {
    pub fn new(model_config: ModelConfig, device_config: DeviceConfig) -> Self {
        Self {
            model_config,
            device_config,
        }
    }

    pub fn model_dir(&self, model_id: &str) -> PathBuf {
        self.model_config.models_dir.join(model_id)
    }

    fn required_file(&self, model_id: &str, name: &str) -> Result<PathBuf> {
        let path = self.model_dir(model_id).join(name);
        if path.is_file() {
            Ok(path)
        } else {
            Err(ChatError::ModelLoadFailure {
                model_id: model_id.to_string(),
                message: format!("missing {}", path.display()),
                source: None,
            })
        }
    }

    /// Weight files, either the single safetensors file or every shard named
    /// in the index
    pub(crate) fn weight_files(&self, model_id: &str) -> Result<Vec<PathBuf>> {
        let dir = self.model_dir(model_id);
        let single = dir.join(SINGLE_WEIGHTS_FILE);
        if single.is_file() {
            return Ok(vec![single]);
        }

        let index_path = self.required_file(model_id, WEIGHTS_INDEX_FILE)?;
        let raw = std::fs::read_to_string(&index_path)?;
        let index: WeightIndex = serde_json::from_str(&raw)
            .map_err(|e| ChatError::model_load(model_id, "invalid weight index", e))?;

        let shards: BTreeSet<&String> = index.weight_map.values().collect();
        let files: Vec<PathBuf> = shards.into_iter().map(|shard| dir.join(shard)).collect();
        if let Some(missing) = files.iter().find(|path| !path.is_file()) {
            return Err(ChatError::ModelLoadFailure {
                model_id: model_id.to_string(),
                message: format!("missing weight shard {}", missing.display()),
                source: None,
            });
        }
        Ok(files)
    }

    fn read_config(&self, model_id: &str) -> Result<Phi3Config> {
        let path = self.required_file(model_id, CONFIG_FILE)?;
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| ChatError::model_load(model_id, "invalid config.json", e))
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Report per-file progress for `files`, in bytes when sizes are known
fn report_files(files: &[PathBuf], progress: Option<&ProgressCallback>) {
    let Some(progress) = progress else {
        return;
    };
    let sizes: Vec<u64> = files
        .iter()
        .map(|path| std::fs::metadata(path).map(|m| m.len()).unwrap_or(0))
        .collect();
    let total: u64 = sizes.iter().sum();

    let mut loaded = 0;
    for (index, (path, size)) in files.iter().zip(&sizes).enumerate() {
        loaded += size;
        let event = if total > 0 {
            LoadProgress::bytes(file_label(path), loaded, total)
        } else {
            LoadProgress::fraction(file_label(path), (index + 1) as f64 / files.len() as f64)
        };
        progress(event);
    }
}

#[async_trait]
impl InferenceBackend for CandleBackend {
    async fn acquire_device(&self) -> Result<ComputeDevice> {
        ComputeDevice::acquire(&self.device_config)
    }

    fn release_device(&self, device: &ComputeDevice) -> Result<()> {
        device.release()
    }

    async fn load_tokenizer(
        &self,
        model_id: &str,
        progress: Option<&ProgressCallback>,
    ) -> Result<Box<dyn ChatTokenizer>> {
        let path = self.required_file(model_id, TOKENIZER_FILE)?;
        let owned_id = model_id.to_string();
        let load_path = path.clone();
        let tokenizer = tokio::task::spawn_blocking(move || HfChatTokenizer::from_file(&owned_id, load_path))
            .await
            .map_err(|e| ChatError::model_load(model_id, "tokenizer load task failed", e))??;

        report_files(&[path], progress);
        debug!(model_id, "Tokenizer loaded");
        Ok(Box::new(tokenizer))
    }

    async fn load_model(
        &self,
        model_id: &str,
        device: &ComputeDevice,
        progress: Option<&ProgressCallback>,
    ) -> Result<Arc<dyn CausalModel>> {
        let config = self.read_config(model_id)?;
        let weights = self.weight_files(model_id)?;
        let tokenizer_path = self.required_file(model_id, TOKENIZER_FILE)?;
        let dtype = self.model_config.precision.dtype();

        info!(
            model_id,
            device = %device.label(),
            shards = weights.len(),
            ?dtype,
            "Loading model weights"
        );

        let owned_id = model_id.to_string();
        let candle_device = device.device().clone();
        let files = weights.clone();
        let (model, tokenizer) = tokio::task::spawn_blocking(move || -> Result<(Phi3, HfChatTokenizer)> {
            let tokenizer = HfChatTokenizer::from_file(&owned_id, tokenizer_path)?;
            // Safety: the weight files are not modified while mapped
            let vb = unsafe { VarBuilder::from_mmaped_safetensors(&files, dtype, &candle_device) }
                .map_err(|e| ChatError::model_load(&owned_id, "failed to map weights", e))?;
            let model =
                Phi3::new(&config, vb).map_err(|e| ChatError::model_load(&owned_id, "failed to build model", e))?;
            Ok((model, tokenizer))
        })
        .await
        .map_err(|e| ChatError::model_load(model_id, "model load task failed", e))??;

        report_files(&weights, progress);

        let eos_token_ids = tokenizer.stop_token_ids();
        Ok(Arc::new(CandleModel::new(
            model_id,
            model,
            tokenizer.inner(),
            device.device().clone(),
            eos_token_ids,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DevicePreference, Precision};
    use crate::model::ChatTemplate;
    use crate::testing::write_tokenizer;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn backend(dir: &TempDir) -> CandleBackend {
        let model_config = ModelConfig {
            models_dir: dir.path().to_path_buf(),
            ..ModelConfig::default()
        };
        let device_config = DeviceConfig {
            preference: DevicePreference::Cpu,
            ..DeviceConfig::default()
        };
        CandleBackend::new(model_config, device_config)
    }

    #[test]
    fn test_weight_files_from_index() {
        let dir = TempDir::new().unwrap();
        let model_dir = dir.path().join("org/model");
        std::fs::create_dir_all(&model_dir).unwrap();
        std::fs::write(
            model_dir.join(WEIGHTS_INDEX_FILE),
            r#"{"weight_map": {"a": "model-00002-of-00002.safetensors", "b": "model-00001-of-00002.safetensors", "c": "model-00001-of-00002.safetensors"}}"#,
        )
        .unwrap();
        std::fs::write(model_dir.join("model-00001-of-00002.safetensors"), b"x").unwrap();
        std::fs::write(model_dir.join("model-00002-of-00002.safetensors"), b"y").unwrap();

        let files = backend(&dir).weight_files("org/model").unwrap();
        let names: Vec<_> = files.iter().map(|p| file_label(p)).collect();
        assert_eq!(names, vec![
            "model-00001-of-00002.safetensors".to_string(),
            "model-00002-of-00002.safetensors".to_string(),
        ]);
    }

    #[test]
    fn test_missing_weights_is_load_failure() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("org/model")).unwrap();

        let err = backend(&dir).weight_files("org/model").unwrap_err();
        assert!(matches!(err, ChatError::ModelLoadFailure { ref model_id, .. } if model_id == "org/model"));
    }

    #[test]
    fn test_report_files_in_bytes() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.safetensors");
        let b = dir.path().join("b.safetensors");
        std::fs::write(&a, vec![0u8; 30]).unwrap();
        std::fs::write(&b, vec![0u8; 10]).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ProgressCallback = Arc::new(move |p: LoadProgress| sink.lock().unwrap().push(p));
        report_files(&[a, b], Some(&callback));

        let percents: Vec<_> = seen.lock().unwrap().iter().map(|p| p.percent()).collect();
        assert_eq!(percents, vec![Some(75), Some(100)]);
    }

    #[tokio::test]
    async fn test_load_tokenizer_from_model_dir() {
        let dir = TempDir::new().unwrap();
        let model_dir = dir.path().join("org/model");
        std::fs::create_dir_all(&model_dir).unwrap();
        write_tokenizer(&model_dir.join(TOKENIZER_FILE));

        let backend = backend(&dir);
        let tokenizer = backend.load_tokenizer("org/model", None).await.unwrap();
        assert_eq!(tokenizer.chat_template(), ChatTemplate::ChatMl);

        let missing = backend.load_tokenizer("org/other", None).await;
        assert!(matches!(missing, Err(ChatError::ModelLoadFailure { .. })));
    }

    const TINY_PHI3_CONFIG: &str = r#"{
        "vocab_size": 6,
        "hidden_act": "silu",
        "hidden_size": 8,
        "intermediate_size": 16,
        "num_hidden_layers": 1,
        "num_attention_heads": 2,
        "num_key_value_heads": 2,
        "rms_norm_eps": 1e-5,
        "rope_theta": 10000.0,
        "bos_token_id": 1,
        "eos_token_id": 4,
        "rope_scaling": null,
        "max_position_embeddings": 32
    }"#;

    /// Model dir with a randomly initialized one-layer Phi-3
    fn write_tiny_model(model_dir: &Path) {
        std::fs::create_dir_all(model_dir).unwrap();
        std::fs::write(model_dir.join(CONFIG_FILE), TINY_PHI3_CONFIG).unwrap();
        write_tokenizer(&model_dir.join(TOKENIZER_FILE));

        let config: Phi3Config = serde_json::from_str(TINY_PHI3_CONFIG).unwrap();
        let varmap = candle_nn::VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, candle_core::DType::F32, &candle_core::Device::Cpu);
        Phi3::new(&config, vb).unwrap();
        varmap.save(model_dir.join(SINGLE_WEIGHTS_FILE)).unwrap();
    }

    fn f32_backend(dir: &TempDir) -> CandleBackend {
        let model_config = ModelConfig {
            models_dir: dir.path().to_path_buf(),
            precision: Precision::F32,
            ..ModelConfig::default()
        };
        let device_config = DeviceConfig {
            preference: DevicePreference::Cpu,
            ..DeviceConfig::default()
        };
        CandleBackend::new(model_config, device_config)
    }

    #[tokio::test]
    async fn test_load_model_from_safetensors() {
        let dir = TempDir::new().unwrap();
        write_tiny_model(&dir.path().join("org/tiny"));

        let backend = f32_backend(&dir);
        let device = backend.acquire_device().await.unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ProgressCallback = Arc::new(move |p: LoadProgress| sink.lock().unwrap().push(p));

        let model = backend.load_model("org/tiny", &device, Some(&callback)).await.unwrap();
        assert_eq!(seen.lock().unwrap().last().and_then(|p| p.percent()), Some(100));
        model.destroy().unwrap();
    }

    #[tokio::test]
    async fn test_load_model_rejects_broken_tokenizer() {
        let dir = TempDir::new().unwrap();
        let model_dir = dir.path().join("org/tiny");
        write_tiny_model(&model_dir);
        std::fs::write(model_dir.join(TOKENIZER_FILE), "{ not json").unwrap();

        let backend = f32_backend(&dir);
        let device = backend.acquire_device().await.unwrap();
        let err = backend.load_model("org/tiny", &device, None).await.err().unwrap();
        assert!(matches!(
            err,
            ChatError::ModelLoadFailure { ref message, .. } if message.starts_with("Failed to load tokenizer")
        ));
    }

    #[tokio::test]
    async fn test_cpu_device_acquired() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);
        let device = backend.acquire_device().await.unwrap();
        assert!(device.is_cpu());
        backend.release_device(&device).unwrap();
    }
}
