//! Conversation state, turn orchestration and the presenter port

mod builder;
mod orchestrator;
mod presenter;
mod transcript;

pub use builder::ChatBuilder;
pub use orchestrator::{
    frame_context,
    ChatOrchestrator,
    ConversationState,
    RejectReason,
    TurnOutcome,
};
pub use presenter::ChatPresenter;
pub use transcript::Transcript;
