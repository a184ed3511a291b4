//! Playback sinks: the outbound side that actually starts a song.
//!
//! The dispatcher only knows the [`PlaybackSink`] trait. A sink must return
//! `Ok` only once playback is confirmed; anything it cannot confirm is an
//! error and the dispatcher decides whether to retry.

use crossbeam_channel::{unbounded, Receiver};
use std::io::{BufRead, BufReader};
use std::process::{ChildStderr, Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::PlaybackError;
use crate::models::Song;

/// Default wall-clock limit for one playback command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long a failed command's stderr is collected after it exits. A
/// backgrounded grandchild can hold the pipe open indefinitely.
const STDERR_GRACE: Duration = Duration::from_millis(200);

/// Starts playback of one song and confirms it is playing.
pub trait PlaybackSink: Send + Sync {
    fn play(&self, song: &Song) -> Result<(), PlaybackError>;

    /// Short label for logs.
    fn name(&self) -> &str;
}

// ============================================================================
// Command Sink
// ============================================================================

/// Runs an external command per song. Exit status 0 means playback confirmed.
///
/// Arguments may contain `{id}`, `{title}` and `{album}` placeholders, which
/// are replaced with the matched song's fields. No shell is involved.
#[derive(Debug, Clone)]
pub struct CommandSink {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandSink {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Arguments with placeholders filled in for `song`.
    pub fn render_args(&self, song: &Song) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{id}", song.id.as_str())
                    .replace("{title}", &song.title)
                    .replace("{album}", &song.album)
            })
            .collect()
    }
}

impl PlaybackSink for CommandSink {
    fn play(&self, song: &Song) -> Result<(), PlaybackError> {
        let args = self.render_args(song);
        debug!(program = %self.program, ?args, "Launching playback command");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| PlaybackError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // Drain stderr on the side so a chatty command cannot block on a full pipe.
        let stderr_lines = child.stderr.take().map(spawn_stderr_reader);

        let start = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if start.elapsed() >= self.timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(PlaybackError::Timeout {
                        song: song.id.to_string(),
                        timeout: self.timeout,
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(source) => {
                    let _ = child.kill();
                    return Err(PlaybackError::Spawn {
                        program: self.program.clone(),
                        source,
                    });
                }
            }
        };

        if status.success() {
            info!(song = %song.id, title = %song.title, "Playback command succeeded");
            Ok(())
        } else {
            Err(PlaybackError::Failed {
                song: song.id.to_string(),
                status: status.to_string(),
                stderr: stderr_lines.map(collect_stderr).unwrap_or_default(),
            })
        }
    }

    fn name(&self) -> &str {
        &self.program
    }
}

/// Forward stderr line by line. The thread ends when the last holder of the
/// pipe closes it; nobody joins it.
fn spawn_stderr_reader(pipe: ChildStderr) -> Receiver<String> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        for line in BufReader::new(pipe).split(b'\n') {
            let Ok(line) = line else { break };
            if tx.send(String::from_utf8_lossy(&line).into_owned()).is_err() {
                break;
            }
        }
    });
    rx
}

/// Whatever stderr arrived before the pipe closed or [`STDERR_GRACE`] ran out.
fn collect_stderr(lines: Receiver<String>) -> String {
    let deadline = Instant::now() + STDERR_GRACE;
    let mut collected = Vec::new();
    while let Ok(line) = lines.recv_deadline(deadline) {
        collected.push(line);
    }
    collected.join("\n")
}

// ============================================================================
// Dry Run Sink
// ============================================================================

/// Records what would be played without starting anything. Always succeeds.
#[derive(Debug, Default)]
pub struct DryRunSink {
    played: Mutex<Vec<String>>,
}

impl DryRunSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of every song "played" so far, in order.
    pub fn played(&self) -> Vec<String> {
        self.played
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl PlaybackSink for DryRunSink {
    fn play(&self, song: &Song) -> Result<(), PlaybackError> {
        info!(song = %song.id, title = %song.title, album = %song.album, "Dry run: would play");
        self.played
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(song.id.to_string());
        Ok(())
    }

    fn name(&self) -> &str {
        "dry-run"
    }
}
