use std::path::Path;
use std::sync::Arc;
use tokenizers::Tokenizer as HfTokenizer;

use crate::error::{ChatError, Result};
use crate::types::ConversationTurn;

use super::{ChatTokenizer, ChatTemplate, ModelInput};

/// Special tokens that end a generation, across the supported families
pub(crate) const STOP_TOKENS: [&str; 4] = ["<|endoftext|>", "<|end|>", "<|im_end|>", "</s>"];

/// HuggingFace tokenizer paired with a chat template
pub struct HfChatTokenizer {
    tokenizer: Arc<HfTokenizer>,
    template: ChatTemplate,
}

impl HfChatTokenizer {
    pub fn new(tokenizer: Arc<HfTokenizer>) -> Self {
        Self {
            tokenizer,
            template: ChatTemplate::ChatMl,
        }
    }

    /// Load `tokenizer.json`
    pub fn from_file(model_id: &str, path: impl AsRef<Path>) -> Result<Self> {
        let tokenizer = HfTokenizer::from_file(path).map_err(|e| ChatError::ModelLoadFailure {
            model_id: model_id.to_string(),
            message: format!("Failed to load tokenizer: {}", e),
            source: Some(Arc::from(e)),
        })?;
        Ok(Self::new(Arc::new(tokenizer)))
    }

    pub fn inner(&self) -> Arc<HfTokenizer> {
        self.tokenizer.clone()
    }

    /// Ids of the stop tokens present in the vocabulary
    pub fn stop_token_ids(&self) -> Vec<u32> {
        STOP_TOKENS
            .iter()
            .filter_map(|token| self.tokenizer.token_to_id(token))
            .collect()
    }
}

impl ChatTokenizer for HfChatTokenizer {
    fn apply_chat_template(
        &self,
        turns: &[ConversationTurn],
        add_generation_prompt: bool,
    ) -> Result<ModelInput> {
        let prompt = self.template.render(turns, add_generation_prompt);
        // Special tokens are already part of the rendered prompt
        let encoding = self
            .tokenizer
            .encode(prompt.as_str(), false)
            .map_err(|e| ChatError::generation(format!("Tokenization failed: {}", e)))?;

        Ok(ModelInput {
            token_ids: encoding.get_ids().to_vec(),
            prompt,
        })
    }

    fn chat_template(&self) -> ChatTemplate {
        self.template
    }

    fn set_chat_template(&mut self, template: ChatTemplate) {
        self.template = template;
    }
}

/// Incremental detokenizer. Text is only released once it ends on an
/// alphanumeric character so multi-token graphemes and word pieces are not
/// split across emissions.
pub(crate) struct TokenDecoder {
    tokenizer: Arc<HfTokenizer>,
    tokens: Vec<u32>,
    prev_index: usize,
    current_index: usize,
}

impl TokenDecoder {
    pub(crate) fn new(tokenizer: Arc<HfTokenizer>) -> Self {
        Self {
            tokenizer,
            tokens: Vec::new(),
            prev_index: 0,
            current_index: 0,
        }
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        self.tokenizer
            .decode(tokens, true)
            .map_err(|e| ChatError::generation(format!("Decoding failed: {}", e)))
    }

    /// Push one token, returning newly completed text if any
    pub(crate) fn next_token(&mut self, token: u32) -> Result<Option<String>> {
        let prev_text = if self.tokens.is_empty() {
            String::new()
        } else {
            self.decode(&self.tokens[self.prev_index..self.current_index])?
        };
        self.tokens.push(token);
        let text = self.decode(&self.tokens[self.prev_index..])?;

        let ends_on_word = text.chars().last().is_some_and(|c| c.is_alphanumeric());
        if text.len() > prev_text.len() && ends_on_word {
            let fresh = text.get(prev_text.len()..).unwrap_or_default().to_string();
            self.prev_index = self.current_index;
            self.current_index = self.tokens.len();
            Ok(Some(fresh))
        } else {
            Ok(None)
        }
    }

    /// Text still held back after the last token
    pub(crate) fn flush(&self) -> Result<Option<String>> {
        let prev_text = self.decode(&self.tokens[self.prev_index..self.current_index])?;
        let text = self.decode(&self.tokens[self.prev_index..])?;
        if text.len() > prev_text.len() {
            Ok(text.get(prev_text.len()..).map(str::to_string))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::word_level_tokenizer;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_apply_template_tokenizes_rendered_prompt() {
        let mut tokenizer = HfChatTokenizer::new(Arc::new(word_level_tokenizer()));
        tokenizer.set_chat_template(ChatTemplate::Phi3);
        assert_eq!(tokenizer.chat_template(), ChatTemplate::Phi3);

        let input = tokenizer
            .apply_chat_template(&[ConversationTurn::user("Hello world")], true)
            .unwrap();
        assert_eq!(input.prompt, "<|user|>\nHello world<|end|>\n<|assistant|>\n");
        assert!(!input.token_ids.is_empty());
    }

    #[test]
    fn test_stop_tokens_filtered_by_vocab() {
        let tokenizer = HfChatTokenizer::new(Arc::new(word_level_tokenizer()));
        let ids = tokenizer.stop_token_ids();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_decoder_emits_increments() {
        let tokenizer = Arc::new(word_level_tokenizer());
        let hello = tokenizer.token_to_id("Hello").unwrap();
        let world = tokenizer.token_to_id("world").unwrap();
        let mut decoder = TokenDecoder::new(tokenizer);

        assert_eq!(decoder.next_token(hello).unwrap(), Some("Hello".to_string()));
        assert_eq!(decoder.next_token(world).unwrap(), Some(" world".to_string()));
        assert_eq!(decoder.flush().unwrap(), None);
    }

    #[test]
    fn test_decoder_holds_back_punctuation() {
        let tokenizer = Arc::new(word_level_tokenizer());
        let hello = tokenizer.token_to_id("Hello").unwrap();
        let bang = tokenizer.token_to_id("!").unwrap();
        let mut decoder = TokenDecoder::new(tokenizer);

        assert_eq!(decoder.next_token(hello).unwrap(), Some("Hello".to_string()));
        assert_eq!(decoder.next_token(bang).unwrap(), None);
        assert_eq!(decoder.flush().unwrap(), Some(" !".to_string()));
    }
}
