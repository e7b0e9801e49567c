//! Test doubles shared by unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use crate::{
    config::ChatConfig,
    conversation::{ChatOrchestrator, ChatPresenter},
    error::{ChatError, Result},
    gpu::ComputeDevice,
    metrics::MetricsCollector,
    model::{CausalModel, ChatTemplate, ChatTokenizer, InferenceBackend, ModelInput, ProgressCallback},
    search::{ContextOutcome, SearchTransport, WebContextFetcher},
    session::{SessionManager, TokenSink},
    types::{ConversationTurn, LoadProgress, Role, SamplingParams},
};

/// DuckDuckGo-shaped result page for `(title, snippet, url)` entries
pub(crate) fn ddg_page(results: &[(&str, &str, &str)]) -> String {
    let mut html = String::from("<html><body><div id=\"links\">");
    for (title, snippet, url) in results {
        html.push_str(&format!(
            "<div class=\"result results_links web-result\">\
             <h2 class=\"result__title\"><a class=\"result__a\" href=\"{url}\">{title}</a></h2>\
             <a class=\"result__snippet\" href=\"{url}\">{snippet}</a>\
             </div>"
        ));
    }
    html.push_str("</div></body></html>");
    html
}

const WORD_LEVEL_TOKENIZER: &str = r#"{
  "version": "1.0",
  "truncation": null,
  "padding": null,
  "added_tokens": [
    {"id": 4, "content": "<|endoftext|>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
    {"id": 5, "content": "<|end|>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
  ],
  "normalizer": null,
  "pre_tokenizer": {"type": "Whitespace"},
  "post_processor": null,
  "decoder": null,
  "model": {
    "type": "WordLevel",
    "vocab": {"[UNK]": 0, "Hello": 1, "world": 2, "!": 3, "<|endoftext|>": 4, "<|end|>": 5},
    "unk_token": "[UNK]"
  }
}"#;

/// Tiny word-level tokenizer
pub(crate) fn word_level_tokenizer() -> tokenizers::Tokenizer {
    tokenizers::Tokenizer::from_str(WORD_LEVEL_TOKENIZER).expect("valid tokenizer json")
}

pub(crate) fn write_tokenizer(path: &Path) {
    std::fs::write(path, WORD_LEVEL_TOKENIZER).expect("write tokenizer.json");
}

enum Reply {
    Always(String),
    Failing,
}

/// Transport answering every request the same way, recording targets
pub(crate) struct FakeTransport {
    reply: Reply,
    requests: Mutex<Vec<String>>,
    delay: Duration,
}

impl FakeTransport {
    pub(crate) fn always(body: impl Into<String>) -> Self {
        Self {
            reply: Reply::Always(body.into()),
            requests: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            reply: Reply::Failing,
            requests: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Each request takes `millis` before answering
    pub(crate) fn with_delay(mut self, millis: u64) -> Self {
        self.delay = Duration::from_millis(millis);
        self
    }

    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl SearchTransport for FakeTransport {
    async fn fetch_text(&self, target: &str) -> Result<String> {
        self.requests.lock().push(target.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.reply {
            Reply::Always(body) => Ok(body.clone()),
            Reply::Failing => Err(ChatError::FetchFailure {
                url: target.to_string(),
                message: "connection refused".to_string(),
            }),
        }
    }
}

struct FakeTokenizer {
    template: ChatTemplate,
}

impl ChatTokenizer for FakeTokenizer {
    fn apply_chat_template(&self, turns: &[ConversationTurn], add_generation_prompt: bool) -> Result<ModelInput> {
        let prompt = self.template.render(turns, add_generation_prompt);
        let token_ids = (0..prompt.split_whitespace().count() as u32).collect();
        Ok(ModelInput { prompt, token_ids })
    }

    fn chat_template(&self) -> ChatTemplate {
        self.template
    }

    fn set_chat_template(&mut self, template: ChatTemplate) {
        self.template = template;
    }
}

/// Lets a gated fake model continue past its first chunk
pub(crate) struct Gate(mpsc::Sender<()>);

impl Gate {
    pub(crate) fn open(&self) {
        let _ = self.0.send(());
    }
}

#[derive(Default)]
struct Counters {
    acquired: AtomicUsize,
    released: AtomicUsize,
    destroyed: AtomicUsize,
}

struct FakeModel {
    replies: Arc<Mutex<VecDeque<String>>>,
    prompts: Arc<Mutex<Vec<String>>>,
    gate: Option<Arc<Mutex<mpsc::Receiver<()>>>>,
    counters: Arc<Counters>,
}

impl CausalModel for FakeModel {
    fn generate(&self, input: &ModelInput, _params: &SamplingParams, sink: &TokenSink) -> Result<()> {
        self.prompts.lock().push(input.prompt.clone());
        let reply = self
            .replies
            .lock()
            .pop_front()
            .ok_or_else(|| ChatError::generation("no scripted reply"))?;

        for (index, chunk) in reply.split_inclusive(' ').enumerate() {
            if !sink.emit(chunk) {
                return Ok(());
            }
            if index == 0 {
                if let Some(gate) = &self.gate {
                    let _ = gate.lock().recv_timeout(Duration::from_secs(5));
                }
            }
        }
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        self.counters.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Backend with scripted replies, streamed word by word
pub(crate) struct FakeBackend {
    replies: Arc<Mutex<VecDeque<String>>>,
    prompts: Arc<Mutex<Vec<String>>>,
    gate: Option<Arc<Mutex<mpsc::Receiver<()>>>>,
    counters: Arc<Counters>,
    load_delay: Duration,
    device_available: bool,
    model_loads: bool,
}

impl FakeBackend {
    pub(crate) fn new(replies: Vec<String>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into())),
            prompts: Arc::new(Mutex::new(Vec::new())),
            gate: None,
            counters: Arc::new(Counters::default()),
            load_delay: Duration::ZERO,
            device_available: true,
            model_loads: true,
        }
    }

    pub(crate) fn with_load_delay(mut self, millis: u64) -> Self {
        self.load_delay = Duration::from_millis(millis);
        self
    }

    pub(crate) fn without_device(mut self) -> Self {
        self.device_available = false;
        self
    }

    pub(crate) fn failing_model_load(mut self) -> Self {
        self.model_loads = false;
        self
    }

    /// Generation pauses after the first chunk until the gate opens
    pub(crate) fn gated(mut self) -> (Self, Gate) {
        let (tx, rx) = mpsc::channel();
        self.gate = Some(Arc::new(Mutex::new(rx)));
        (self, Gate(tx))
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub(crate) fn acquire_count(&self) -> usize {
        self.counters.acquired.load(Ordering::SeqCst)
    }

    pub(crate) fn release_count(&self) -> usize {
        self.counters.released.load(Ordering::SeqCst)
    }

    pub(crate) fn destroy_count(&self) -> usize {
        self.counters.destroyed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceBackend for FakeBackend {
    async fn acquire_device(&self) -> Result<ComputeDevice> {
        if !self.device_available {
            return Err(ChatError::DeviceUnavailable {
                message: "no adapter".to_string(),
            });
        }
        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(ComputeDevice::cpu())
    }

    fn release_device(&self, _device: &ComputeDevice) -> Result<()> {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load_tokenizer(
        &self,
        _model_id: &str,
        progress: Option<&ProgressCallback>,
    ) -> Result<Box<dyn ChatTokenizer>> {
        if let Some(progress) = progress {
            progress(LoadProgress::bytes("tokenizer.json", 10, 10));
        }
        Ok(Box::new(FakeTokenizer {
            template: ChatTemplate::ChatMl,
        }))
    }

    async fn load_model(
        &self,
        model_id: &str,
        _device: &ComputeDevice,
        progress: Option<&ProgressCallback>,
    ) -> Result<Arc<dyn CausalModel>> {
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        if !self.model_loads {
            return Err(ChatError::ModelLoadFailure {
                model_id: model_id.to_string(),
                message: "corrupt weights".to_string(),
                source: None,
            });
        }
        if let Some(progress) = progress {
            progress(LoadProgress::bytes("model.safetensors", 50, 100));
            progress(LoadProgress::bytes("model.safetensors", 100, 100));
        }
        Ok(Arc::new(FakeModel {
            replies: self.replies.clone(),
            prompts: self.prompts.clone(),
            gate: self.gate.clone(),
            counters: self.counters.clone(),
        }))
    }
}

/// What a presenter was asked to show
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PresenterEvent {
    Turn(Role, String),
    BeginReply,
    Token(String),
    Finished(String),
    Status(String),
    Progress(LoadProgress),
    /// Whether the context was empty
    Context(bool),
    Cleared,
}

#[derive(Default)]
pub(crate) struct RecordingPresenter {
    events: Mutex<Vec<PresenterEvent>>,
}

impl RecordingPresenter {
    pub(crate) fn events(&self) -> Vec<PresenterEvent> {
        self.events.lock().clone()
    }

    pub(crate) fn statuses(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PresenterEvent::Status(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    /// Concatenated streamed tokens
    pub(crate) fn streamed(&self) -> String {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PresenterEvent::Token(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn finished(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PresenterEvent::Finished(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: PresenterEvent) {
        self.events.lock().push(event);
    }
}

impl ChatPresenter for RecordingPresenter {
    fn show_turn(&self, role: Role, content: &str) {
        self.record(PresenterEvent::Turn(role, content.to_string()));
    }

    fn begin_reply(&self) {
        self.record(PresenterEvent::BeginReply);
    }

    fn draft_token(&self, token: &str) {
        self.record(PresenterEvent::Token(token.to_string()));
    }

    fn finish_reply(&self, content: &str) {
        self.record(PresenterEvent::Finished(content.to_string()));
    }

    fn show_status(&self, status: &str) {
        self.record(PresenterEvent::Status(status.to_string()));
    }

    fn show_progress(&self, progress: &LoadProgress) {
        self.record(PresenterEvent::Progress(progress.clone()));
    }

    fn show_context(&self, outcome: &ContextOutcome) {
        self.record(PresenterEvent::Context(outcome.is_empty()));
    }

    fn clear(&self) {
        self.record(PresenterEvent::Cleared);
    }
}

/// Orchestrator wired to fakes
pub(crate) struct Harness {
    pub(crate) orchestrator: Arc<ChatOrchestrator>,
    pub(crate) presenter: Arc<RecordingPresenter>,
    pub(crate) backend: Arc<FakeBackend>,
    pub(crate) transport: Arc<FakeTransport>,
    pub(crate) config: Arc<ChatConfig>,
}

pub(crate) fn harness(backend: FakeBackend, transport: FakeTransport) -> Harness {
    harness_with_config(ChatConfig::default(), backend, transport)
}

pub(crate) fn harness_with_config(config: ChatConfig, backend: FakeBackend, transport: FakeTransport) -> Harness {
    let config = Arc::new(config);
    let backend = Arc::new(backend);
    let transport = Arc::new(transport);
    let presenter = Arc::new(RecordingPresenter::default());

    let session = Arc::new(SessionManager::new(backend.clone(), &config.model));
    let fetcher = Arc::new(WebContextFetcher::new(transport.clone(), config.search.clone()));
    let orchestrator = Arc::new(ChatOrchestrator::new(
        config.clone(),
        session,
        fetcher,
        presenter.clone(),
        Arc::new(MetricsCollector::new()),
    ));

    Harness {
        orchestrator,
        presenter,
        backend,
        transport,
        config,
    }
}
