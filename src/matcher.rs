//! Exact phrase matching of the sliding window against the lyric index.

use std::sync::Arc;

use crate::index::LyricIndex;
use crate::models::{phrase, NGram, SongId, Token};
use crate::window::SlidingWindow;

/// A window that equals an indexed lyric span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Song chosen to play: the lowest id among `candidates`.
    pub song: SongId,
    /// Every song containing the phrase, lowest id first.
    pub candidates: Vec<SongId>,
    pub phrase: NGram,
}

impl Match {
    pub fn is_ambiguous(&self) -> bool {
        self.candidates.len() > 1
    }

    pub fn phrase_text(&self) -> String {
        phrase(&self.phrase)
    }
}

/// Stateless lookup of windows against a shared, read-only index.
#[derive(Debug, Clone)]
pub struct Matcher {
    index: Arc<LyricIndex>,
}

impl Matcher {
    pub fn new(index: Arc<LyricIndex>) -> Self {
        Self { index }
    }

    /// Look up a full window. Windows with fewer than five tokens never match.
    /// Phrases shared by several songs resolve to the lowest song id.
    pub fn evaluate(&self, window: &SlidingWindow) -> Option<Match> {
        let key = window.key()?;
        let candidates = self.index.lookup(&key)?;
        let song = candidates.iter().min()?.clone();
        Some(Match {
            song,
            candidates: candidates.to_vec(),
            phrase: key,
        })
    }

    /// Slide a fresh window over `tokens`, collecting every match in order.
    pub fn scan(&self, tokens: impl IntoIterator<Item = Token>) -> Vec<Match> {
        let mut window = SlidingWindow::new();
        tokens
            .into_iter()
            .filter_map(|token| self.evaluate(window.push(token)))
            .collect()
    }
}
