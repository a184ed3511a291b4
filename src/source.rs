//! Token sources: where recognized words come from.
//!
//! A source runs on its own thread and pushes words into the ingest channel
//! until its input ends or the pipeline is cancelled. Bad input lines are
//! recognition errors: logged, skipped, and the source keeps going.

use serde::Deserialize;
use std::io::BufRead;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{IngestError, RecognitionError};
use crate::ingest::TokenSender;

/// Why a source stopped producing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEnd {
    /// Input ran out.
    Exhausted,
    /// The pipeline no longer wants words.
    Cancelled,
}

/// Produces recognized words. Implementations should return promptly once
/// the sender reports cancellation.
pub trait TokenSource: Send {
    fn run(&mut self, tx: &TokenSender) -> Result<SourceEnd, RecognitionError>;

    fn name(&self) -> &str;
}

/// Map a channel refusal to a clean stop. A disconnected consumer also means
/// nobody is listening any more.
fn stopped(_err: IngestError) -> SourceEnd {
    SourceEnd::Cancelled
}

// ============================================================================
// Line Source
// ============================================================================

/// Wire format of recognizer output lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum InputFormat {
    /// Plain text, any number of words per line.
    Text,
    /// One Vosk recognizer result per line: `{"text": "..."}`.
    Vosk,
}

#[derive(Debug, Deserialize)]
struct VoskResult {
    text: Option<String>,
    partial: Option<String>,
}

/// Reads recognizer output line by line from any buffered reader.
pub struct LineSource<R> {
    reader: R,
    format: InputFormat,
    name: String,
    line_no: usize,
    skipped: usize,
}

impl<R: BufRead + Send> LineSource<R> {
    pub fn new(reader: R, format: InputFormat, name: impl Into<String>) -> Self {
        Self {
            reader,
            format,
            name: name.into(),
            line_no: 0,
            skipped: 0,
        }
    }

    /// Lines skipped as unreadable so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Text carried by one raw line, `None` if the line carries no words.
    fn decode(&self, raw: &[u8]) -> Result<Option<String>, RecognitionError> {
        let line = std::str::from_utf8(raw).map_err(|_| RecognitionError::InvalidUtf8 {
            line_no: self.line_no,
        })?;
        let line = line.trim_end_matches(['\n', '\r']);

        match self.format {
            InputFormat::Text => Ok(Some(line.to_string())),
            InputFormat::Vosk => {
                if line.trim().is_empty() {
                    return Ok(None);
                }
                let result: VoskResult =
                    serde_json::from_str(line).map_err(|source| RecognitionError::Json {
                        line_no: self.line_no,
                        source,
                    })?;
                match (result.text, result.partial) {
                    (Some(text), _) => Ok(Some(text)),
                    // Partial hypotheses get revised; only final results count.
                    (None, Some(_)) => Ok(None),
                    (None, None) => Err(RecognitionError::MissingText {
                        line_no: self.line_no,
                    }),
                }
            }
        }
    }
}

impl<R: BufRead + Send> TokenSource for LineSource<R> {
    fn run(&mut self, tx: &TokenSender) -> Result<SourceEnd, RecognitionError> {
        let mut buf = Vec::new();
        loop {
            if tx.is_cancelled() {
                return Ok(SourceEnd::Cancelled);
            }
            buf.clear();
            if self.reader.read_until(b'\n', &mut buf)? == 0 {
                return Ok(SourceEnd::Exhausted);
            }
            self.line_no += 1;

            let text = match self.decode(&buf) {
                Ok(Some(text)) => text,
                Ok(None) => continue,
                Err(err) => {
                    self.skipped += 1;
                    warn!(source = %self.name, error = %err, "Skipping recognizer output");
                    continue;
                }
            };

            match tx.send_text(&text) {
                Ok(0) => {}
                Ok(n) => debug!(source = %self.name, words = n, text = %text.trim(), "Heard"),
                Err(err) => return Ok(stopped(err)),
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Recorded Source
// ============================================================================

/// Pre-recorded words, optionally paced like live speech.
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    words: Vec<String>,
    delay: Option<Duration>,
}

impl VecSource {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            words: words.into_iter().map(Into::into).collect(),
            delay: None,
        }
    }

    /// Split free text on whitespace.
    pub fn from_text(text: &str) -> Self {
        Self::new(text.split_whitespace())
    }

    /// Wait this long before each word.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl TokenSource for VecSource {
    fn run(&mut self, tx: &TokenSender) -> Result<SourceEnd, RecognitionError> {
        for word in &self.words {
            if let Some(delay) = self.delay {
                if tx.stop_signal().wait_timeout(delay) {
                    return Ok(SourceEnd::Cancelled);
                }
            }
            if let Err(err) = tx.send_text(word) {
                return Ok(stopped(err));
            }
        }
        Ok(SourceEnd::Exhausted)
    }

    fn name(&self) -> &str {
        "recorded"
    }
}
