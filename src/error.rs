//! Error types for corpus loading, indexing, ingest and playback.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Fatal failures while reading the lyrics corpus.
#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("Corpus source not found at {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("Failed to read corpus source {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corpus database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Malformed corpus catalog {}: {source}", .path.display())]
    Catalog {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Corpus database has no `{table}` table")]
    MissingTable { table: String },

    #[error("Corpus table `songs` is missing required column `{column}`")]
    MissingColumn { column: String },

    #[error("Duplicate song id `{id}` in corpus")]
    DuplicateSong { id: String },
}

/// One lyric line that could not be tokenized. Logged and skipped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed lyric line {line_no} in song `{song}`: {reason}")]
pub struct MalformedLine {
    pub song: String,
    pub line_no: usize,
    pub reason: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("Corpus is empty: {songs} songs loaded, no 5-word lyric spans to index")]
    EmptyCorpus { songs: usize },
}

/// Failures inside a token source. The pipeline keeps running; the source
/// just produces no words for that input.
#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("Recognizer output line {line_no} is not valid UTF-8")]
    InvalidUtf8 { line_no: usize },

    #[error("Recognizer output line {line_no} is not valid JSON: {source}")]
    Json {
        line_no: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Recognizer result on line {line_no} has no `text` field")]
    MissingText { line_no: usize },

    #[error("Recognizer input failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons the token channel refused a send or receive.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestError {
    #[error("Pipeline cancelled")]
    Cancelled,

    #[error("Token channel disconnected")]
    Disconnected,
}

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Failed to launch playback command `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Playback command for `{song}` exited with {status}{}", fmt_stderr(.stderr))]
    Failed {
        song: String,
        status: String,
        stderr: String,
    },

    #[error("Playback command for `{song}` did not finish within {timeout:?}")]
    Timeout { song: String, timeout: Duration },

    #[error("Playback rejected for `{song}`: {reason}")]
    Rejected { song: String, reason: String },

    #[error("Matched song `{song}` is not in the corpus")]
    UnknownSong { song: String },

    #[error("Playback of `{song}` failed after {attempts} attempts: {last}")]
    Exhausted {
        song: String,
        attempts: u32,
        #[source]
        last: Box<PlaybackError>,
    },
}

/// Failures of a pipeline run as a whole.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to start token source thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error(transparent)]
    Playback(#[from] PlaybackError),
}

fn fmt_stderr(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}
