use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    config::ChatConfig,
    directive::first_search_query,
    error::{ChatError, ErrorExt, Result},
    metrics::MetricsCollector,
    model::ProgressCallback,
    search::{ContextOutcome, WebContextFetcher},
    session::SessionManager,
    types::{ConversationTurn, GenerationRequest, LoadProgress, Role, TokenEvent},
};

use super::{presenter::ChatPresenter, transcript::Transcript};

/// Wraps fetched context into the user turn of the follow-up pass
pub fn frame_context(context: &str) -> String {
    format!(
        "Here are the search and webpage results:\n\n{}\n\nPlease provide a brief response based on this information.",
        context
    )
}

/// Status line for a failed operation. Errors that are never retried
/// automatically carry `retry_hint`.
fn failure_status(error: &ChatError, retry_hint: &str) -> String {
    if error.requires_explicit_retry() {
        format!("Error: {}. {}", error, retry_hint)
    } else {
        format!("Error: {}", error)
    }
}

/// Where the orchestrator is within a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    Idle,
    AwaitingModel,
    Generating,
    FetchingContext,
    GeneratingFollowUp,
    /// The last turn was stopped by the user; accepts input like `Idle`
    Stopped,
}

impl ConversationState {
    pub fn is_busy(self) -> bool {
        !matches!(self, ConversationState::Idle | ConversationState::Stopped)
    }
}

/// Why a message was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    EmptyMessage,
    Busy,
    ModelNotReady,
}

/// Result of `send_user_message`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Rejected(RejectReason),
    /// The turn ran to completion; `augmented` when a follow-up pass used
    /// fetched web context
    Completed { reply: String, augmented: bool },
    /// The user stopped or cleared the conversation mid-turn
    Stopped,
}

struct ConversationInner {
    transcript: Transcript,
    state: ConversationState,
    /// Streamed text of the initial pass not yet committed
    draft: String,
    /// Bumped whenever the running turn is abandoned
    epoch: u64,
}

/// Drives one conversation: initial pass, search directive, context fetch and
/// follow-up pass, with stop and clear interleaved from other tasks.
pub struct ChatOrchestrator {
    config: Arc<ChatConfig>,
    session: Arc<SessionManager>,
    fetcher: Arc<WebContextFetcher>,
    presenter: Arc<dyn ChatPresenter>,
    metrics: Arc<MetricsCollector>,
    inner: Mutex<ConversationInner>,
}

impl ChatOrchestrator {
    pub fn new(
        config: Arc<ChatConfig>,
        session: Arc<SessionManager>,
        fetcher: Arc<WebContextFetcher>,
        presenter: Arc<dyn ChatPresenter>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let transcript = Transcript::new(&config.conversation);
        Self {
            config,
            session,
            fetcher,
            presenter,
            metrics,
            inner: Mutex::new(ConversationInner {
                transcript,
                state: ConversationState::Idle,
                draft: String::new(),
                epoch: 0,
            }),
        }
    }

    pub fn state(&self) -> ConversationState {
        self.inner.lock().state
    }

    /// Snapshot of the committed transcript
    pub fn transcript(&self) -> Vec<ConversationTurn> {
        self.inner.lock().transcript.turns().to_vec()
    }

    /// Uncommitted text of the reply currently streaming
    pub fn draft(&self) -> String {
        self.inner.lock().draft.clone()
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn fetcher(&self) -> &Arc<WebContextFetcher> {
        &self.fetcher
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Load the model session, reporting progress and status to the presenter
    pub async fn initialize(&self) -> Result<()> {
        self.presenter.show_status("Loading model...");

        let presenter = self.presenter.clone();
        let progress: ProgressCallback = Arc::new(move |p: LoadProgress| presenter.show_progress(&p));
        let started = Instant::now();

        match self.session.get_instance(Some(progress)).await {
            Ok(session) => {
                self.metrics.record_model_load(started.elapsed()).await;
                info!(model_id = %session.model_id(), elapsed = ?started.elapsed(), "Model ready");
                self.presenter.show_status("Model ready!");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Model initialization failed");
                self.metrics.record_error("model_load").await;
                self.presenter
                    .show_status(&failure_status(&e, "Load the model again to retry."));
                Err(e)
            }
        }
    }

    /// Release the model session
    pub async fn shutdown(&self) {
        self.stop();
        self.session.cleanup().await;
    }

    /// Run one user turn. Rejections are reported in the outcome; generation
    /// errors are shown as a status and returned, keeping committed turns.
    #[instrument(skip(self, text), fields(chars = text.len()))]
    pub async fn send_user_message(&self, text: &str) -> Result<TurnOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(TurnOutcome::Rejected(RejectReason::EmptyMessage));
        }
        if !self.session.is_ready() {
            debug!("Message rejected, model not ready");
            return Ok(TurnOutcome::Rejected(RejectReason::ModelNotReady));
        }

        let epoch = {
            let mut inner = self.inner.lock();
            if inner.state.is_busy() {
                debug!(state = ?inner.state, "Message rejected, turn in progress");
                return Ok(TurnOutcome::Rejected(RejectReason::Busy));
            }
            inner.transcript.push_user(text);
            inner.draft.clear();
            inner.epoch += 1;
            inner.state = ConversationState::AwaitingModel;
            inner.epoch
        };
        self.presenter.show_turn(Role::User, text);

        let result = self.run_turn(epoch).await;

        {
            let mut inner = self.inner.lock();
            if inner.epoch == epoch {
                inner.state = ConversationState::Idle;
                inner.draft.clear();
            }
        }

        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if e.is_user_visible() {
                    error!(error = %e, "Turn failed");
                    self.presenter
                        .show_status(&failure_status(&e, "Send the message again to retry."));
                } else {
                    warn!(error = %e, "Turn failed");
                }
                self.metrics.record_error("generation").await;
                Err(e)
            }
        }
    }

    async fn run_turn(&self, epoch: u64) -> Result<TurnOutcome> {
        let Some(request) = self.next_request(epoch, ConversationState::Generating, None) else {
            return Ok(TurnOutcome::Stopped);
        };

        self.presenter.begin_reply();
        let Some(draft) = self.stream_pass(epoch, &request, true).await? else {
            return Ok(TurnOutcome::Stopped);
        };

        let reply_index = {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch {
                return Ok(TurnOutcome::Stopped);
            }
            inner.draft.clear();
            inner.transcript.push(ConversationTurn::assistant(draft.clone()))
        };

        let Some(query) = first_search_query(&draft) else {
            let reply = draft.trim().to_string();
            self.presenter.finish_reply(&reply);
            return Ok(TurnOutcome::Completed { reply, augmented: false });
        };

        if !self.set_state(epoch, ConversationState::FetchingContext) {
            return Ok(TurnOutcome::Stopped);
        }
        self.presenter.show_status(&format!("Searching the web for \"{}\"...", query));
        let outcome = self.fetcher.lookup(&query).await;
        self.metrics.record_lookup(&outcome).await;
        self.presenter.show_context(&outcome);

        let context = match outcome {
            ContextOutcome::Found { context, .. } => context,
            ContextOutcome::Empty { reason } => {
                info!(%query, %reason, "No web context, keeping initial reply");
                let reply = draft.trim().to_string();
                self.presenter.finish_reply(&reply);
                return Ok(TurnOutcome::Completed { reply, augmented: false });
            }
        };

        let framed = ConversationTurn::user(frame_context(&context));
        let Some(request) = self.next_request(epoch, ConversationState::GeneratingFollowUp, Some(framed)) else {
            return Ok(TurnOutcome::Stopped);
        };
        self.presenter.show_status("Reading search results...");

        let Some(follow_up) = self.stream_pass(epoch, &request, false).await? else {
            return Ok(TurnOutcome::Stopped);
        };

        let reply = follow_up.trim().to_string();
        {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch {
                return Ok(TurnOutcome::Stopped);
            }
            inner.transcript.replace_assistant(reply_index, reply.clone());
        }
        self.presenter.finish_reply(&reply);
        Ok(TurnOutcome::Completed { reply, augmented: true })
    }

    /// Enter `state` and snapshot the transcript, appending `extra` first.
    /// None when the turn has been abandoned.
    fn next_request(
        &self,
        epoch: u64,
        state: ConversationState,
        extra: Option<ConversationTurn>,
    ) -> Option<GenerationRequest> {
        let mut inner = self.inner.lock();
        if inner.epoch != epoch {
            return None;
        }
        if let Some(turn) = extra {
            inner.transcript.push(turn);
        }
        inner.state = state;
        Some(GenerationRequest::new(
            inner.transcript.turns().to_vec(),
            self.config.generation.clone(),
        ))
    }

    fn set_state(&self, epoch: u64, state: ConversationState) -> bool {
        let mut inner = self.inner.lock();
        if inner.epoch != epoch {
            return false;
        }
        inner.state = state;
        true
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.inner.lock().epoch == epoch
    }

    /// Run one generation pass to completion. Tokens of a `visible` pass are
    /// accumulated in the draft and forwarded to the presenter. Returns None
    /// when the turn was abandoned; dropping the stream stops the producer.
    async fn stream_pass(
        &self,
        epoch: u64,
        request: &GenerationRequest,
        visible: bool,
    ) -> Result<Option<String>> {
        let started = Instant::now();
        let mut stream = self.session.generate(request)?;
        let mut text = String::new();
        let mut tokens = 0usize;
        let mut finished = false;

        while let Some(event) = stream.next().await {
            match event {
                TokenEvent::Token(token) => {
                    {
                        let mut inner = self.inner.lock();
                        if inner.epoch != epoch {
                            debug!(tokens, "Abandoning generation pass");
                            return Ok(None);
                        }
                        if visible {
                            inner.draft.push_str(&token);
                        }
                    }
                    if visible {
                        self.presenter.draft_token(&token);
                    }
                    text.push_str(&token);
                    tokens += 1;
                }
                TokenEvent::Done => {
                    finished = true;
                    break;
                }
                TokenEvent::Error(message) => return Err(ChatError::generation(message)),
            }
        }

        if !finished {
            return Err(ChatError::generation("token stream closed before completion"));
        }
        if !self.is_current(epoch) {
            return Ok(None);
        }

        self.metrics.record_generation(tokens, started.elapsed()).await;
        debug!(tokens, elapsed = ?started.elapsed(), visible, "Generation pass finished");
        Ok(Some(text))
    }

    /// Abandon the running turn. A partial reply of the initial pass is kept
    /// in the transcript. Returns false when nothing was running.
    pub fn stop(&self) -> bool {
        {
            let mut inner = self.inner.lock();
            if !inner.state.is_busy() {
                return false;
            }
            if inner.state == ConversationState::Generating && !inner.draft.is_empty() {
                let partial = std::mem::take(&mut inner.draft);
                inner.transcript.push(ConversationTurn::assistant(partial));
            }
            inner.draft.clear();
            inner.epoch += 1;
            inner.state = ConversationState::Stopped;
        }
        info!("Generation stopped by user");
        self.presenter.show_status("Generation stopped.");
        true
    }

    /// Forget the conversation. The model session stays loaded.
    pub fn clear_conversation(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.state.is_busy() {
                inner.epoch += 1;
            }
            inner.transcript.reset();
            inner.draft.clear();
            inner.state = ConversationState::Idle;
        }
        self.presenter.clear();
        if self.session.is_ready() {
            self.presenter.show_status("Chat cleared. Model still loaded and ready.");
        } else {
            self.presenter.show_status("Chat cleared.");
        }
    }
}
