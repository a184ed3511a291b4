//! One-shot trigger: the first match starts playback, everything after is
//! ignored.
//!
//! State moves `Idle → Triggered → Terminated` and never back. The
//! `Idle → Triggered` step is a compare-and-swap, so even if several threads
//! report matches at once exactly one of them plays a song.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::PlaybackError;
use crate::ingest::StopSignal;
use crate::matcher::Match;
use crate::models::{Corpus, SongId};
use crate::playback::PlaybackSink;

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DispatchState {
    Idle = 0,
    Triggered = 1,
    Terminated = 2,
}

impl DispatchState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => DispatchState::Idle,
            1 => DispatchState::Triggered,
            _ => DispatchState::Terminated,
        }
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DispatchState::Idle => "idle",
            DispatchState::Triggered => "triggered",
            DispatchState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Retry Policy
// ============================================================================

/// Bounded retries with exponential backoff for playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Never less than one in practice.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// What a call to [`TriggerDispatcher::dispatch`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Already triggered; the match was dropped.
    Ignored,
    /// This match fired and playback was confirmed.
    Played { song: SongId, attempts: u32 },
}

pub struct TriggerDispatcher {
    state: AtomicU8,
    sink: Arc<dyn PlaybackSink>,
    corpus: Arc<Corpus>,
    policy: RetryPolicy,
    stop: StopSignal,
}

impl TriggerDispatcher {
    pub fn new(
        sink: Arc<dyn PlaybackSink>,
        corpus: Arc<Corpus>,
        policy: RetryPolicy,
        stop: StopSignal,
    ) -> Self {
        Self {
            state: AtomicU8::new(DispatchState::Idle as u8),
            sink,
            corpus,
            policy,
            stop,
        }
    }

    pub fn state(&self) -> DispatchState {
        DispatchState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Fire on the first match, ignore every later one.
    ///
    /// The winning call raises the stop signal before playing so intake halts,
    /// then retries playback per the policy and always ends in `Terminated`.
    /// An error means playback was never confirmed.
    pub fn dispatch(&self, hit: &Match) -> Result<Dispatch, PlaybackError> {
        if self
            .state
            .compare_exchange(
                DispatchState::Idle as u8,
                DispatchState::Triggered as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Ok(Dispatch::Ignored);
        }

        self.stop.cancel();
        info!(
            song = %hit.song,
            phrase = %hit.phrase_text(),
            candidates = hit.candidates.len(),
            "Triggered"
        );

        let result = self.play_with_retries(&hit.song);
        self.state
            .store(DispatchState::Terminated as u8, Ordering::SeqCst);
        result
    }

    fn play_with_retries(&self, id: &SongId) -> Result<Dispatch, PlaybackError> {
        let song = self
            .corpus
            .song(id)
            .ok_or_else(|| PlaybackError::UnknownSong {
                song: id.to_string(),
            })?;

        let max = self.policy.attempts();
        let mut attempt = 1;
        loop {
            info!(song = %id, title = %song.title, attempt, sink = self.sink.name(), "Starting playback");
            match self.sink.play(song) {
                Ok(()) => {
                    info!(song = %id, attempts = attempt, "Playback confirmed");
                    return Ok(Dispatch::Played {
                        song: id.clone(),
                        attempts: attempt,
                    });
                }
                Err(err) if attempt >= max => {
                    warn!(song = %id, attempt, error = %err, "Playback failed, giving up");
                    return Err(PlaybackError::Exhausted {
                        song: id.to_string(),
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                Err(err) => {
                    let delay = self.policy.backoff_for(attempt);
                    warn!(song = %id, attempt, error = %err, retry_in = ?delay, "Playback failed, retrying");
                    thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

impl fmt::Debug for TriggerDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerDispatcher")
            .field("state", &self.state())
            .field("sink", &self.sink.name())
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LyricLine, Song};
    use crate::normalize::tokenize;
    use crate::playback::DryRunSink;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    /// Fails the first `failures` plays, then succeeds.
    struct FlakySink {
        failures: u32,
        calls: AtomicU32,
        played: Mutex<Vec<String>>,
    }

    impl FlakySink {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                played: Mutex::new(Vec::new()),
            }
        }
    }

    impl PlaybackSink for FlakySink {
        fn play(&self, song: &Song) -> Result<(), PlaybackError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.played.lock().unwrap().push(song.id.to_string());
            if n <= self.failures {
                return Err(PlaybackError::Rejected {
                    song: song.id.to_string(),
                    reason: format!("attempt {} offline", n),
                });
            }
            Ok(())
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    fn corpus() -> Arc<Corpus> {
        let songs = ["A", "B"]
            .iter()
            .map(|id| Song {
                id: SongId::new(*id),
                title: format!("Song {}", id),
                album: "Amnesiac".to_string(),
                lines: vec![LyricLine::new(tokenize("we suck young blood today"))],
            })
            .collect();
        Arc::new(Corpus::new(songs).unwrap())
    }

    fn hit(id: &str) -> Match {
        let tokens = tokenize("we suck young blood today");
        Match {
            song: SongId::new(id),
            candidates: vec![SongId::new(id)],
            phrase: std::array::from_fn(|i| tokens[i].clone()),
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(2000));
        assert_eq!(policy.backoff_for(5), Duration::from_secs(5));
        assert_eq!(policy.backoff_for(100), Duration::from_secs(5));
    }

    #[test]
    fn test_first_match_fires_once() {
        let sink = Arc::new(DryRunSink::new());
        let stop = StopSignal::new();
        let dispatcher =
            TriggerDispatcher::new(sink.clone(), corpus(), fast_policy(3), stop.clone());
        assert_eq!(dispatcher.state(), DispatchState::Idle);

        let first = dispatcher.dispatch(&hit("A")).unwrap();
        assert_eq!(
            first,
            Dispatch::Played {
                song: SongId::new("A"),
                attempts: 1
            }
        );
        assert_eq!(dispatcher.state(), DispatchState::Terminated);
        assert!(stop.is_cancelled());

        assert_eq!(dispatcher.dispatch(&hit("B")).unwrap(), Dispatch::Ignored);
        assert_eq!(dispatcher.dispatch(&hit("A")).unwrap(), Dispatch::Ignored);
        assert_eq!(sink.played(), vec!["A".to_string()]);
    }

    #[test]
    fn test_concurrent_matches_single_winner() {
        let sink = Arc::new(DryRunSink::new());
        let dispatcher = Arc::new(TriggerDispatcher::new(
            sink.clone(),
            corpus(),
            fast_policy(1),
            StopSignal::new(),
        ));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let dispatcher = Arc::clone(&dispatcher);
                let id = if i % 2 == 0 { "A" } else { "B" };
                thread::spawn(move || dispatcher.dispatch(&hit(id)).unwrap())
            })
            .collect();
        let played = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|d| matches!(d, Dispatch::Played { .. }))
            .count();

        assert_eq!(played, 1);
        assert_eq!(sink.played().len(), 1);
    }

    #[test]
    fn test_retries_until_success() {
        let sink = Arc::new(FlakySink::new(2));
        let dispatcher =
            TriggerDispatcher::new(sink.clone(), corpus(), fast_policy(3), StopSignal::new());

        let result = dispatcher.dispatch(&hit("B")).unwrap();
        assert_eq!(
            result,
            Dispatch::Played {
                song: SongId::new("B"),
                attempts: 3
            }
        );
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_exhausted_retries_terminate_with_error() {
        let sink = Arc::new(FlakySink::new(u32::MAX));
        let dispatcher =
            TriggerDispatcher::new(sink.clone(), corpus(), fast_policy(3), StopSignal::new());

        match dispatcher.dispatch(&hit("A")) {
            Err(PlaybackError::Exhausted { song, attempts, last }) => {
                assert_eq!(song, "A");
                assert_eq!(attempts, 3);
                assert!(last.to_string().contains("attempt 3 offline"));
            }
            other => panic!("expected Exhausted, got {:?}", other),
        }
        assert_eq!(dispatcher.state(), DispatchState::Terminated);
        assert_eq!(dispatcher.dispatch(&hit("A")).unwrap(), Dispatch::Ignored);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unknown_song_is_not_retried() {
        let sink = Arc::new(FlakySink::new(0));
        let dispatcher =
            TriggerDispatcher::new(sink.clone(), corpus(), fast_policy(3), StopSignal::new());
        assert!(matches!(
            dispatcher.dispatch(&hit("Z")),
            Err(PlaybackError::UnknownSong { .. })
        ));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.state(), DispatchState::Terminated);
    }
}
