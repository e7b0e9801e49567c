use crate::search::ContextOutcome;
use crate::types::{LoadProgress, Role};

/// Display surface driven by the orchestrator. Implementations must be cheap
/// and must not call back into the orchestrator.
pub trait ChatPresenter: Send + Sync {
    /// A committed turn to show as a new message
    fn show_turn(&self, role: Role, content: &str);

    /// An assistant reply is about to stream
    fn begin_reply(&self) {}

    /// Next chunk of the streaming reply
    fn draft_token(&self, token: &str);

    /// Final text of the current reply; replaces what was streamed
    fn finish_reply(&self, content: &str);

    fn show_status(&self, status: &str);

    fn show_progress(&self, _progress: &LoadProgress) {}

    fn show_context(&self, _outcome: &ContextOutcome) {}

    /// Remove all displayed messages
    fn clear(&self) {}
}
