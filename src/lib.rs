//! Search Chat - local language model chat with web search augmentation
//!
//! A locally loaded causal model answers user messages. When a reply contains
//! a `<search>query</search>` directive, the query is run against a web
//! search page through an HTTP proxy, the results are fed back as context,
//! and a follow-up pass produces the final answer.

use std::fmt;

// Public modules
pub mod config;
pub mod conversation;
pub mod directive;
pub mod error;
pub mod gpu;
pub mod metrics;
pub mod model;
pub mod search;
pub mod session;
pub mod types;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-exports for public API
pub use config::ChatConfig;
pub use conversation::{ChatBuilder, ChatOrchestrator, ChatPresenter, ConversationState, TurnOutcome};
pub use error::{ChatError, Result};
pub use search::{ContextOutcome, WebContextFetcher};
pub use session::{SessionManager, SessionState};
pub use types::{ConversationTurn, LoadProgress, Role, SearchResult};

/// Compiled-in accelerator backends
pub struct Features {
    /// Whether CUDA support is enabled
    pub cuda: bool,
    /// Whether Metal support is enabled
    pub metal: bool,
}

impl Features {
    pub fn detect() -> Self {
        Self {
            cuda: candle_core::utils::cuda_is_available(),
            metal: candle_core::utils::metal_is_available(),
        }
    }
}

impl fmt::Display for Features {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CUDA support: {}", if self.cuda { "yes" } else { "no" })?;
        write!(f, "Metal support: {}", if self.metal { "yes" } else { "no" })
    }
}
