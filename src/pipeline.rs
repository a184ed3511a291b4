//! The live loop: one producer thread feeding words, one consumer matching
//! them and firing the trigger.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::dispatch::{Dispatch, RetryPolicy, TriggerDispatcher};
use crate::error::{IngestError, PipelineError, PlaybackError};
use crate::index::LyricIndex;
use crate::ingest::{token_channel, StopSignal, TokenReceiver};
use crate::matcher::Matcher;
use crate::models::{Corpus, SongId, Token};
use crate::playback::PlaybackSink;
use crate::source::{SourceEnd, TokenSource};
use crate::window::SlidingWindow;

/// Runtime knobs for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Tokens buffered between recognizer and matcher before the recognizer blocks.
    pub channel_capacity: usize,
    pub retry: RetryPolicy,
    /// How long shutdown waits for the token source thread before detaching it.
    pub join_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            retry: RetryPolicy::default(),
            join_timeout: Duration::from_secs(1),
        }
    }
}

/// How a run ended without a playback error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A phrase matched and playback was confirmed.
    Played {
        song: SongId,
        phrase: String,
        candidates: Vec<SongId>,
        attempts: u32,
    },
    /// The token source ran dry before any phrase matched.
    SourceEnded,
    /// Stopped from outside before any phrase matched.
    Cancelled,
}

// ============================================================================
// Consumer
// ============================================================================

/// Window, matcher and dispatcher, driven one token at a time.
pub struct Consumer {
    window: SlidingWindow,
    matcher: Matcher,
    dispatcher: Arc<TriggerDispatcher>,
    tokens_seen: u64,
}

impl Consumer {
    pub fn new(matcher: Matcher, dispatcher: Arc<TriggerDispatcher>) -> Self {
        Self {
            window: SlidingWindow::new(),
            matcher,
            dispatcher,
            tokens_seen: 0,
        }
    }

    /// Push one token and check the window. Returns the outcome once a match
    /// has fired and playback is confirmed.
    pub fn feed(&mut self, token: Token) -> Result<Option<Outcome>, PlaybackError> {
        self.tokens_seen += 1;
        debug!(word = %token, n = self.tokens_seen, "Token");

        let Some(hit) = self.matcher.evaluate(self.window.push(token)) else {
            return Ok(None);
        };
        info!(
            song = %hit.song,
            phrase = %hit.phrase_text(),
            ambiguous = hit.is_ambiguous(),
            "Lyric match"
        );

        match self.dispatcher.dispatch(&hit)? {
            Dispatch::Played { song, attempts } => Ok(Some(Outcome::Played {
                song,
                phrase: hit.phrase_text(),
                candidates: hit.candidates,
                attempts,
            })),
            Dispatch::Ignored => Ok(None),
        }
    }

    pub fn window(&self) -> &SlidingWindow {
        &self.window
    }

    pub fn dispatcher(&self) -> &TriggerDispatcher {
        &self.dispatcher
    }

    pub fn tokens_seen(&self) -> u64 {
        self.tokens_seen
    }

    /// Pull tokens until a match fires or the channel closes.
    fn drain(&mut self, rx: &TokenReceiver) -> Result<Outcome, PlaybackError> {
        loop {
            match rx.recv() {
                Ok(token) => {
                    if let Some(outcome) = self.feed(token)? {
                        return Ok(outcome);
                    }
                }
                Err(IngestError::Disconnected) => return Ok(Outcome::SourceEnded),
                Err(IngestError::Cancelled) => return Ok(Outcome::Cancelled),
            }
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// A loaded corpus and its index, ready to listen.
pub struct Pipeline {
    corpus: Arc<Corpus>,
    index: Arc<LyricIndex>,
    config: PipelineConfig,
    stop: StopSignal,
}

impl Pipeline {
    pub fn new(corpus: Arc<Corpus>, index: Arc<LyricIndex>, config: PipelineConfig) -> Self {
        Self {
            corpus,
            index,
            config,
            stop: StopSignal::new(),
        }
    }

    /// Handle for stopping a run from another thread.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Run until the first confirmed playback, the end of the source, or
    /// cancellation. A pipeline runs once; its stop signal stays raised.
    ///
    /// The source runs on its own thread; matching and playback run on the
    /// caller's. The source thread is always signalled to stop before this
    /// returns, and is detached if it does not exit within `join_timeout`.
    pub fn run(
        &self,
        mut source: Box<dyn TokenSource>,
        sink: Arc<dyn PlaybackSink>,
    ) -> Result<Outcome, PipelineError> {
        let (tx, rx) = token_channel(self.config.channel_capacity.max(1), &self.stop);
        let dispatcher = Arc::new(TriggerDispatcher::new(
            sink,
            Arc::clone(&self.corpus),
            self.config.retry,
            self.stop.clone(),
        ));

        let producer = thread::Builder::new()
            .name("token-source".to_string())
            .spawn(move || {
                let name = source.name().to_string();
                match source.run(&tx) {
                    Ok(SourceEnd::Exhausted) => info!(source = %name, "Token source finished"),
                    Ok(SourceEnd::Cancelled) => debug!(source = %name, "Token source stopped"),
                    Err(err) => warn!(source = %name, error = %err, "Token source failed"),
                }
            })
            .map_err(PipelineError::Spawn)?;

        info!(
            songs = self.corpus.len(),
            phrases = self.index.len(),
            capacity = self.config.channel_capacity,
            "Listening"
        );

        let matcher = Matcher::new(Arc::clone(&self.index));
        let mut consumer = Consumer::new(matcher, Arc::clone(&dispatcher));
        let result = consumer.drain(&rx);

        self.stop.cancel();
        let unread = rx.pending();
        drop(rx);
        join_with_deadline(producer, self.config.join_timeout);

        info!(
            tokens = consumer.tokens_seen(),
            unread,
            state = %dispatcher.state(),
            "Pipeline stopped"
        );
        result.map_err(PipelineError::from)
    }
}

/// Join `handle`, giving up after `timeout`. A thread still running then is
/// detached and dies with the process.
fn join_with_deadline(handle: JoinHandle<()>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    let poll_interval = Duration::from_millis(10);

    loop {
        if handle.is_finished() {
            if let Err(panic_info) = handle.join() {
                let msg = panic_info
                    .downcast_ref::<&str>()
                    .copied()
                    .or_else(|| panic_info.downcast_ref::<String>().map(|s| s.as_str()))
                    .unwrap_or("unknown panic");
                warn!(panic = msg, "Token source thread panicked");
            }
            return;
        }
        if Instant::now() >= deadline {
            warn!(timeout = ?timeout, "Token source did not stop in time, detaching");
            return;
        }
        thread::sleep(poll_interval);
    }
}
