//! Bounded token channel between the recognizer and the matcher, plus the
//! stop signal that tears it down.
//!
//! Cancelling the [`StopSignal`] drops the only sender of an internal
//! zero-capacity channel. Every blocked `select!` on its receiver wakes at
//! once, so a producer stuck on a full queue and a consumer waiting for the
//! next word both return `IngestError::Cancelled` without polling.

use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::error::IngestError;
use crate::models::Token;
use crate::normalize::tokenize;

// ============================================================================
// Stop Signal
// ============================================================================

struct StopInner {
    stopped: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
    wake: Receiver<()>,
}

/// Shared, one-way cancellation flag. Cheap to clone.
#[derive(Clone)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            inner: Arc::new(StopInner {
                stopped: AtomicBool::new(false),
                trigger: Mutex::new(Some(tx)),
                wake: rx,
            }),
        }
    }

    /// Raise the signal. Returns `true` only for the call that raised it.
    pub fn cancel(&self) -> bool {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.inner
            .trigger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for `timeout` or until cancelled. Returns `true` if cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        select! {
            recv(self.inner.wake) -> _ => true,
            default(timeout) => self.is_cancelled(),
        }
    }

    fn wake(&self) -> &Receiver<()> {
        &self.inner.wake
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSignal")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// ============================================================================
// Token Channel
// ============================================================================

/// Create a bounded token channel tied to `stop`.
pub fn token_channel(capacity: usize, stop: &StopSignal) -> (TokenSender, TokenReceiver) {
    let (tx, rx) = bounded(capacity);
    (
        TokenSender {
            tx,
            stop: stop.clone(),
        },
        TokenReceiver {
            rx,
            stop: stop.clone(),
        },
    )
}

/// Producer half, handed to the recognizer.
#[derive(Clone)]
pub struct TokenSender {
    tx: Sender<Token>,
    stop: StopSignal,
}

impl TokenSender {
    /// Send one token, blocking while the queue is full.
    pub fn send(&self, token: Token) -> Result<(), IngestError> {
        if self.stop.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        select! {
            send(self.tx, token) -> res => res.map_err(|_| IngestError::Disconnected),
            recv(self.stop.wake()) -> _ => Err(IngestError::Cancelled),
        }
    }

    /// Normalize free recognizer text and send every resulting token in order.
    /// Returns how many tokens were sent.
    pub fn send_text(&self, text: &str) -> Result<usize, IngestError> {
        let tokens = tokenize(text);
        let count = tokens.len();
        for token in tokens {
            self.send(token)?;
        }
        Ok(count)
    }

    /// True once the pipeline no longer wants words; recognizers should stop
    /// capturing.
    pub fn is_cancelled(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }
}

/// Consumer half, owned by the matcher loop.
pub struct TokenReceiver {
    rx: Receiver<Token>,
    stop: StopSignal,
}

impl TokenReceiver {
    /// Wait for the next token in arrival order.
    pub fn recv(&self) -> Result<Token, IngestError> {
        if self.stop.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        select! {
            recv(self.rx) -> msg => msg.map_err(|_| IngestError::Disconnected),
            recv(self.stop.wake()) -> _ => Err(IngestError::Cancelled),
        }
    }

    /// Tokens queued but not yet received.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn tok(word: &str) -> Token {
        Token::new(word).unwrap()
    }

    #[test]
    fn test_tokens_arrive_in_order() {
        let stop = StopSignal::new();
        let (tx, rx) = token_channel(8, &stop);
        assert_eq!(tx.send_text("Karma police, arrest this man").unwrap(), 5);

        let words: Vec<String> = (0..5).map(|_| rx.recv().unwrap().to_string()).collect();
        assert_eq!(words, vec!["karma", "police", "arrest", "this", "man"]);
        assert_eq!(rx.pending(), 0);
    }

    #[test]
    fn test_disconnect_when_sender_dropped() {
        let stop = StopSignal::new();
        let (tx, rx) = token_channel(2, &stop);
        tx.send(tok("airbag")).unwrap();
        drop(tx);
        assert_eq!(rx.recv().unwrap(), tok("airbag"));
        assert_eq!(rx.recv(), Err(IngestError::Disconnected));
    }

    #[test]
    fn test_cancel_unblocks_full_producer() {
        let stop = StopSignal::new();
        let (tx, _rx) = token_channel(1, &stop);
        tx.send(tok("one")).unwrap();

        let producer = thread::spawn(move || tx.send(tok("two")));
        thread::sleep(Duration::from_millis(50));
        assert!(stop.cancel());
        assert_eq!(producer.join().unwrap(), Err(IngestError::Cancelled));
    }

    #[test]
    fn test_cancel_unblocks_waiting_consumer() {
        let stop = StopSignal::new();
        let (_tx, rx) = token_channel(1, &stop);

        let canceller = stop.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            canceller.cancel()
        });
        assert_eq!(rx.recv(), Err(IngestError::Cancelled));
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_cancel_is_one_shot() {
        let stop = StopSignal::new();
        assert!(!stop.is_cancelled());
        assert!(stop.cancel());
        assert!(!stop.cancel());
        assert!(stop.is_cancelled());
    }

    #[test]
    fn test_wait_timeout() {
        let stop = StopSignal::new();
        let start = Instant::now();
        assert!(!stop.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));

        stop.cancel();
        assert!(stop.wait_timeout(Duration::from_secs(10)));
    }
}
