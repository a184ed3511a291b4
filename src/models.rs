//! Core data models for lyric matching.
//!
//! Tokens, songs, the corpus they live in, and the statistics reported while
//! loading and indexing it.

use rustc_hash::FxHashMap;
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::error::CorpusError;

// ============================================================================
// Constants
// ============================================================================

/// Number of consecutive words that must match a lyric span exactly.
pub const NGRAM_LEN: usize = 5;

/// Exactly `NGRAM_LEN` ordered tokens, the key type of the lyric index.
pub type NGram = [Token; NGRAM_LEN];

// ============================================================================
// Tokens
// ============================================================================

/// A single normalized word.
///
/// The only way to build one is through [`crate::normalize::normalize_word`]
/// (via [`Token::new`] or [`StringInterner::token`]), so corpus lyrics and live
/// recognizer output always share the same casing and punctuation rules.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(Arc<str>);

impl Token {
    /// Normalize a raw word. Returns `None` if nothing survives normalization
    /// (pure punctuation, empty input).
    pub fn new(word: &str) -> Option<Self> {
        crate::normalize::normalize_word(word).map(|s| Token(Arc::from(s)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Join tokens into a space-separated phrase for logging.
pub fn phrase(tokens: &[Token]) -> String {
    tokens
        .iter()
        .map(Token::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// String Interning
// ============================================================================

/// String interner for deduplicating token storage while loading a corpus.
/// Lyrics repeat the same few hundred words constantly, so every occurrence of
/// "the" shares one allocation.
pub struct StringInterner {
    strings: FxHashMap<Arc<str>, Arc<str>>,
}

impl StringInterner {
    pub fn new() -> Self {
        Self {
            strings: FxHashMap::default(),
        }
    }

    /// Intern a string, returning a reference-counted handle.
    /// If the string was seen before, returns the existing Arc.
    pub fn intern(&mut self, s: &str) -> Arc<str> {
        if let Some(existing) = self.strings.get(s) {
            return Arc::clone(existing);
        }
        let arc: Arc<str> = Arc::from(s);
        self.strings.insert(Arc::clone(&arc), Arc::clone(&arc));
        arc
    }

    /// Normalize a raw word and intern the result.
    pub fn token(&mut self, word: &str) -> Option<Token> {
        let normalized = crate::normalize::normalize_word(word)?;
        Some(Token(self.intern(&normalized)))
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Corpus Models
// ============================================================================

/// Stable song identifier.
///
/// Ordering drives the tie-break between songs sharing a phrase: numeric ids
/// compare by value ("9" < "10") and sort before non-numeric ids, which
/// compare lexicographically.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SongId(String);

impl SongId {
    pub fn new(id: impl Into<String>) -> Self {
        SongId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn numeric(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl Ord for SongId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric(), other.numeric()) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for SongId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SongId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SongId {
    fn from(s: &str) -> Self {
        SongId::new(s)
    }
}

/// One line of lyrics, already tokenized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LyricLine {
    pub tokens: Vec<Token>,
}

impl LyricLine {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Every contiguous `NGRAM_LEN`-token span of this line, in order.
    /// Lines shorter than `NGRAM_LEN` yield nothing.
    pub fn ngrams(&self) -> impl Iterator<Item = NGram> + '_ {
        self.tokens
            .windows(NGRAM_LEN)
            .map(|w| std::array::from_fn(|i| w[i].clone()))
    }
}

#[derive(Clone, Debug)]
pub struct Song {
    pub id: SongId,
    pub title: String,
    pub album: String,
    pub lines: Vec<LyricLine>,
}

impl Song {
    pub fn ngrams(&self) -> impl Iterator<Item = NGram> + '_ {
        self.lines.iter().flat_map(LyricLine::ngrams)
    }
}

/// All songs available for matching. Immutable once built.
#[derive(Debug, Default)]
pub struct Corpus {
    songs: Vec<Song>,
    by_id: FxHashMap<SongId, usize>,
}

impl Corpus {
    /// Build a corpus, ordering songs by id. Fails if two songs share an id.
    pub fn new(mut songs: Vec<Song>) -> Result<Self, CorpusError> {
        songs.sort_by(|a, b| a.id.cmp(&b.id));

        let mut by_id = FxHashMap::default();
        for (idx, song) in songs.iter().enumerate() {
            if by_id.insert(song.id.clone(), idx).is_some() {
                return Err(CorpusError::DuplicateSong {
                    id: song.id.to_string(),
                });
            }
        }

        Ok(Self { songs, by_id })
    }

    pub fn songs(&self) -> &[Song] {
        &self.songs
    }

    pub fn song(&self, id: &SongId) -> Option<&Song> {
        self.by_id.get(id).map(|&idx| &self.songs[idx])
    }

    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    pub fn line_count(&self) -> usize {
        self.songs.iter().map(|s| s.lines.len()).sum()
    }

    /// Distinct album names, sorted.
    pub fn albums(&self) -> Vec<&str> {
        let mut albums: Vec<&str> = self.songs.iter().map(|s| s.album.as_str()).collect();
        albums.sort_unstable();
        albums.dedup();
        albums
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters collected while loading a corpus.
#[derive(Default, Debug, Clone, Serialize)]
pub struct LoadReport {
    pub songs: usize,
    pub albums: usize,
    pub lines: usize,
    pub blank_lines: usize,
    pub annotation_lines: usize,
    pub malformed_lines: usize,
    pub distinct_words: usize,
}

/// Counters collected while building the lyric index.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub songs: usize,
    pub lines: usize,
    pub short_lines: usize,
    pub ngrams: usize,
    pub keys: usize,
    pub ambiguous_keys: usize,
}

impl IndexStats {
    /// Log stats to stderr in JSON format
    pub fn log_phase(&self, phase: &str) {
        if let Ok(json) = serde_json::to_string_pretty(self) {
            eprintln!("[STATS:{}]\n{}", phase, json);
        }
    }
}
