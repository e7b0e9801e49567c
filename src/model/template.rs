use crate::types::{ConversationTurn, Role};

/// Prompt layouts understood by the supported model families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatTemplate {
    /// `<|im_start|>role\ncontent<|im_end|>` turns
    ChatMl,
    /// `<|role|>\ncontent<|end|>` turns used by Phi-3
    Phi3,
}

impl ChatTemplate {
    /// Template override for model families whose bundled template is unusable.
    /// Only Phi-3-mini is patched.
    pub fn override_for(model_id: &str) -> Option<Self> {
        model_id
            .to_lowercase()
            .contains("phi-3-mini")
            .then_some(ChatTemplate::Phi3)
    }

    pub fn eos_token(self) -> &'static str {
        match self {
            ChatTemplate::ChatMl => "<|im_end|>",
            ChatTemplate::Phi3 => "<|endoftext|>",
        }
    }

    /// Render the transcript. With `add_generation_prompt` the prompt ends with
    /// an open assistant turn, otherwise with the end-of-sequence token.
    pub fn render(self, turns: &[ConversationTurn], add_generation_prompt: bool) -> String {
        let mut prompt = String::new();
        match self {
            ChatTemplate::ChatMl => {
                for turn in turns {
                    prompt.push_str(&format!("<|im_start|>{}\n{}<|im_end|>\n", turn.role, turn.content));
                }
                if add_generation_prompt {
                    prompt.push_str("<|im_start|>assistant\n");
                }
            }
            ChatTemplate::Phi3 => {
                for turn in turns {
                    let tag = match turn.role {
                        Role::System => "<|system|>",
                        Role::User => "<|user|>",
                        Role::Assistant => "<|assistant|>",
                    };
                    prompt.push_str(&format!("{}\n{}<|end|>\n", tag, turn.content));
                }
                if add_generation_prompt {
                    prompt.push_str("<|assistant|>\n");
                }
            }
        }
        if !add_generation_prompt {
            prompt.push_str(self.eos_token());
        }
        prompt
    }
}
