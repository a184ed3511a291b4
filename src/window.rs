//! Sliding window over the most recent recognized words.

use std::collections::VecDeque;
use std::fmt;

use crate::models::{phrase, NGram, Token, NGRAM_LEN};

/// FIFO of at most `NGRAM_LEN` tokens, oldest first.
///
/// Owned by the consumer loop alone, so it needs no synchronization.
#[derive(Debug, Clone, Default)]
pub struct SlidingWindow {
    tokens: VecDeque<Token>,
}

impl SlidingWindow {
    pub fn new() -> Self {
        Self {
            tokens: VecDeque::with_capacity(NGRAM_LEN + 1),
        }
    }

    /// Append a token, evicting the oldest once the window is over capacity.
    pub fn push(&mut self, token: Token) -> &Self {
        self.tokens.push_back(token);
        if self.tokens.len() > NGRAM_LEN {
            self.tokens.pop_front();
        }
        self
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.tokens.len() == NGRAM_LEN
    }

    pub fn iter(&self) -> impl Iterator<Item = &Token> {
        self.tokens.iter()
    }

    /// The window as an index key, or `None` until it holds `NGRAM_LEN` tokens.
    pub fn key(&self) -> Option<NGram> {
        if !self.is_full() {
            return None;
        }
        Some(std::array::from_fn(|i| self.tokens[i].clone()))
    }
}

impl fmt::Display for SlidingWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tokens: Vec<Token> = self.tokens.iter().cloned().collect();
        f.write_str(&phrase(&tokens))
    }
}
