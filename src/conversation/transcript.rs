use crate::config::ConversationConfig;
use crate::types::{ConversationTurn, Role};

/// Ordered conversation history sent to the model on every pass.
///
/// With `prepend_system_to_user` the system prompt is folded into the first
/// user message and the transcript starts empty; otherwise it starts with a
/// single system turn.
#[derive(Debug, Clone)]
pub struct Transcript {
    turns: Vec<ConversationTurn>,
    system_prompt: String,
    prepend_system_to_user: bool,
}

impl Transcript {
    pub fn new(config: &ConversationConfig) -> Self {
        let mut transcript = Self {
            turns: Vec::new(),
            system_prompt: config.system_prompt.clone(),
            prepend_system_to_user: config.prepend_system_to_user,
        };
        transcript.reset();
        transcript
    }

    /// Back to the initial state
    pub fn reset(&mut self) {
        self.turns.clear();
        if !self.prepend_system_to_user {
            self.turns.push(ConversationTurn::system(self.system_prompt.clone()));
        }
    }

    /// Append a turn, returning its index
    pub fn push(&mut self, turn: ConversationTurn) -> usize {
        self.turns.push(turn);
        self.turns.len() - 1
    }

    /// Append a user message, prefixing the system prompt on the first one
    /// when prepending is enabled
    pub fn push_user(&mut self, text: &str) -> usize {
        let content = if self.prepend_system_to_user && self.turns.is_empty() {
            format!("{}\n\n{}", self.system_prompt, text)
        } else {
            text.to_string()
        };
        self.push(ConversationTurn::user(content))
    }

    /// Overwrite the content of the assistant turn at `index`. Returns false
    /// when there is no assistant turn there.
    pub fn replace_assistant(&mut self, index: usize, content: impl Into<String>) -> bool {
        match self.turns.get_mut(index) {
            Some(turn) if turn.role == Role::Assistant => {
                turn.content = content.into();
                true
            }
            _ => false,
        }
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
