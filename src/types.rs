//! Common type definitions used throughout the crate

use std::fmt;
use serde::{Serialize, Deserialize};

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// A single web search hit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

/// Sampling parameters for a generation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    /// Temperature for sampling
    pub temperature: f64,
    /// Top-k sampling
    pub top_k: usize,
    /// Top-p sampling threshold
    pub top_p: f64,
    /// Maximum number of tokens to generate
    pub max_new_tokens: usize,
    /// Greedy decoding when false
    pub do_sample: bool,
    /// Seed for the logits processor
    pub seed: u64,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_k: 50,
            top_p: 0.95,
            max_new_tokens: 1024,
            do_sample: true,
            seed: 299792458,
        }
    }
}

/// Input of one generation pass, built fresh from the transcript
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    turns: Vec<ConversationTurn>,
    params: SamplingParams,
}

impl GenerationRequest {
    pub fn new(turns: Vec<ConversationTurn>, params: SamplingParams) -> Self {
        Self { turns, params }
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn params(&self) -> &SamplingParams {
        &self.params
    }
}

/// Load progress notification, mirroring the `{status, loaded, total, progress}` shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadProgress {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
}

impl LoadProgress {
    pub fn bytes(file: impl Into<String>, loaded: u64, total: u64) -> Self {
        Self {
            status: "progress".to_string(),
            file: Some(file.into()),
            loaded: Some(loaded),
            total: Some(total),
            progress: None,
        }
    }

    pub fn fraction(file: impl Into<String>, progress: f64) -> Self {
        Self {
            status: "progress".to_string(),
            file: Some(file.into()),
            loaded: None,
            total: None,
            progress: Some(progress),
        }
    }

    /// Percentage in `0..=100`, preferring `loaded/total` over `progress`
    pub fn percent(&self) -> Option<u8> {
        if self.status != "progress" {
            return None;
        }
        let ratio = match (self.loaded, self.total, self.progress) {
            (Some(loaded), Some(total), _) if total > 0 => loaded as f64 / total as f64,
            (_, _, Some(progress)) => progress,
            _ => return None,
        };
        Some((ratio * 100.0).round().clamp(0.0, 100.0) as u8)
    }
}

/// Event emitted by a generation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenEvent {
    /// Decoded text for one or more new tokens
    Token(String),
    /// Producer finished normally
    Done,
    /// Producer failed; no further events follow
    Error(String),
}
