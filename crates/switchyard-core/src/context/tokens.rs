//! Token counting for context budgeting
//!
//! Uses tiktoken when available, falls back to heuristics otherwise.

#[cfg(feature = "tiktoken")]
use std::sync::Arc;

#[cfg(feature = "tiktoken")]
use tiktoken_rs::{cl100k_base, CoreBPE};

use super::ContextMessage;

/// Per-message overhead for role markers and separators
const MESSAGE_OVERHEAD: usize = 3;

/// Token counter for estimating context usage
#[derive(Clone)]
pub struct TokenCounter {
    /// Tiktoken encoder (when feature is enabled)
    #[cfg(feature = "tiktoken")]
    encoder: Option<Arc<CoreBPE>>,
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter")
            .field("tiktoken", &self.is_using_tiktoken())
            .finish()
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter {
    pub fn new() -> Self {
        #[cfg(feature = "tiktoken")]
        {
            // cl100k_base is a close enough approximation for every backend we route to
            Self {
                encoder: cl100k_base().ok().map(Arc::new),
            }
        }

        #[cfg(not(feature = "tiktoken"))]
        {
            Self {}
        }
    }

    /// Counter that always uses the character heuristic
    pub fn heuristic() -> Self {
        #[cfg(feature = "tiktoken")]
        {
            Self { encoder: None }
        }

        #[cfg(not(feature = "tiktoken"))]
        {
            Self {}
        }
    }

    /// Count tokens for a string
    ///
    /// Uses tiktoken when available, otherwise falls back to heuristics:
    /// - For English text: ~4 characters per token
    /// - For code: ~3 characters per token (more symbols)
    pub fn count(&self, text: &str) -> usize {
        #[cfg(feature = "tiktoken")]
        {
            if let Some(ref encoder) = self.encoder {
                return encoder.encode_with_special_tokens(text).len();
            }
        }

        count_heuristic(text)
    }

    /// Count tokens in a list of messages, including per-message overhead
    pub fn count_messages(&self, messages: &[ContextMessage]) -> usize {
        messages
            .iter()
            .map(|m| MESSAGE_OVERHEAD + self.count(&m.content))
            .sum()
    }

    /// Check if tiktoken is being used
    pub fn is_using_tiktoken(&self) -> bool {
        #[cfg(feature = "tiktoken")]
        {
            self.encoder.is_some()
        }

        #[cfg(not(feature = "tiktoken"))]
        {
            false
        }
    }
}

fn count_heuristic(text: &str) -> usize {
    let chars = text.chars().count();
    if chars == 0 {
        return 0;
    }

    let code_chars = text
        .chars()
        .filter(|c| {
            matches!(
                c,
                '{' | '}' | '[' | ']' | '(' | ')' | ';' | ':' | ',' | '=' | '+' | '-' | '*' | '/'
            )
        })
        .count();

    // More than 5% symbols reads as code
    let ratio = if code_chars as f64 / chars as f64 > 0.05 {
        3.0
    } else {
        4.0
    };

    (chars as f64 / ratio).ceil() as usize
}
