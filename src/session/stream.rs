use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::error::{ChatError, Result};
use crate::types::TokenEvent;

/// Buffered events between a generation thread and its consumer
pub const STREAM_BUFFER: usize = 64;

/// Create a connected sink/stream pair
pub fn token_channel(capacity: usize) -> (TokenSink, TokenStream) {
    let (tx, rx) = mpsc::channel(capacity);
    (TokenSink { tx }, TokenStream { rx })
}

/// Producer half, used from the blocking generation thread
#[derive(Debug, Clone)]
pub struct TokenSink {
    tx: mpsc::Sender<TokenEvent>,
}

impl TokenSink {
    /// Push decoded text. Returns false once the consumer has dropped the
    /// stream, at which point the producer should stop.
    pub fn emit(&self, text: impl Into<String>) -> bool {
        self.tx.blocking_send(TokenEvent::Token(text.into())).is_ok()
    }

    /// Terminate the stream with `Done` or `Error`
    pub fn finish(&self, result: Result<()>) {
        let event = match result {
            Ok(()) => TokenEvent::Done,
            Err(ChatError::GenerationFailure { message, .. }) => TokenEvent::Error(message),
            Err(e) => TokenEvent::Error(e.to_string()),
        };
        // Nobody is listening anymore; nothing to report to
        let _ = self.tx.blocking_send(event);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half. Dropping it cancels the producing generation.
#[derive(Debug)]
pub struct TokenStream {
    rx: mpsc::Receiver<TokenEvent>,
}

impl TokenStream {
    /// Drain the stream into a single string
    pub async fn collect_text(mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(event) = self.rx.recv().await {
            match event {
                TokenEvent::Token(token) => text.push_str(&token),
                TokenEvent::Done => return Ok(text),
                TokenEvent::Error(message) => return Err(ChatError::generation(message)),
            }
        }
        Err(ChatError::generation("token stream closed before completion"))
    }
}

impl Stream for TokenStream {
    type Item = TokenEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
