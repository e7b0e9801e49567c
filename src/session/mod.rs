//! Model session lifecycle and token streaming

mod manager;
mod stream;

pub use manager::{ModelSession, SessionManager, SessionState};
pub use stream::{token_channel, TokenSink, TokenStream, STREAM_BUFFER};
