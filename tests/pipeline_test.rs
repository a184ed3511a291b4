//! End-to-end runs: corpus file on disk, recorded words in, playback out.

use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lyric_trigger::corpus::load_corpus;
use lyric_trigger::dispatch::RetryPolicy;
use lyric_trigger::error::{PipelineError, PlaybackError};
use lyric_trigger::index::LyricIndex;
use lyric_trigger::models::{Corpus, Song, SongId};
use lyric_trigger::pipeline::{Outcome, Pipeline, PipelineConfig};
use lyric_trigger::playback::PlaybackSink;
use lyric_trigger::source::{InputFormat, LineSource, VecSource};

/// Records every play; fails the first `failures` calls.
struct RecordingSink {
    failures: u32,
    calls: AtomicU32,
    played: Mutex<Vec<String>>,
}

impl RecordingSink {
    fn new() -> Arc<Self> {
        Self::failing(0)
    }

    fn failing(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicU32::new(0),
            played: Mutex::new(Vec::new()),
        })
    }

    fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }
}

impl PlaybackSink for RecordingSink {
    fn play(&self, song: &Song) -> Result<(), PlaybackError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.played.lock().unwrap().push(song.id.to_string());
        if n <= self.failures {
            return Err(PlaybackError::Rejected {
                song: song.id.to_string(),
                reason: "no active device".to_string(),
            });
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

fn write_catalog(dir: &tempfile::TempDir, json: &str) -> std::path::PathBuf {
    let path = dir.path().join("catalog.json");
    std::fs::write(&path, json).unwrap();
    path
}

fn pipeline_from(json: &str, config: PipelineConfig) -> (Pipeline, Arc<Corpus>) {
    let dir = tempfile::tempdir().unwrap();
    let path = write_catalog(&dir, json);
    let (corpus, _) = load_corpus(&path, None).unwrap();
    let index = LyricIndex::build(&corpus).unwrap();
    let corpus = Arc::new(corpus);
    (
        Pipeline::new(Arc::clone(&corpus), Arc::new(index), config),
        corpus,
    )
}

const BODYSNATCHERS: &str = r#"{
    "albums": [{
        "name": "In Rainbows",
        "songs": [{"id": "A", "title": "Bodysnatchers", "lines": ["We suck young blood today, we"]}]
    }]
}"#;

fn fast_config(max_attempts: u32) -> PipelineConfig {
    PipelineConfig {
        retry: RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        },
        ..PipelineConfig::default()
    }
}

#[test]
fn test_exact_phrase_plays_song() {
    let (pipeline, corpus) = pipeline_from(BODYSNATCHERS, fast_config(3));
    let sink = RecordingSink::new();

    let outcome = pipeline
        .run(
            Box::new(VecSource::new(["we", "suck", "young", "blood", "today"])),
            sink.clone(),
        )
        .unwrap();

    match outcome {
        Outcome::Played { song, attempts, .. } => {
            assert_eq!(song, SongId::new("A"));
            assert_eq!(attempts, 1);
            assert_eq!(corpus.song(&song).unwrap().title, "Bodysnatchers");
        }
        other => panic!("expected a play, got {:?}", other),
    }
    assert_eq!(sink.played(), vec!["A".to_string()]);
}

#[test]
fn test_rotated_phrase_never_plays() {
    let (pipeline, _) = pipeline_from(BODYSNATCHERS, fast_config(3));
    let sink = RecordingSink::new();

    let outcome = pipeline
        .run(
            Box::new(VecSource::new(["young", "blood", "today", "we", "suck"])),
            sink.clone(),
        )
        .unwrap();

    assert_eq!(outcome, Outcome::SourceEnded);
    assert!(sink.played().is_empty());
}

#[test]
fn test_shared_phrase_prefers_lowest_id() {
    let catalog = r#"{
        "albums": [
            {"name": "OK Computer", "songs": [
                {"id": "12", "title": "No Surprises", "lines": ["No alarms and no surprises, please"]}
            ]},
            {"name": "Live", "songs": [
                {"id": "7", "title": "No Surprises (Live)", "lines": ["no surprises please no alarms"]},
                {"id": "30", "title": "No Surprises (Demo)", "lines": ["no surprises please no alarms and"]}
            ]}
        ]
    }"#;

    for _ in 0..5 {
        let (pipeline, _) = pipeline_from(catalog, fast_config(1));
        let sink = RecordingSink::new();
        let outcome = pipeline
            .run(
                Box::new(VecSource::from_text("No surprises, please. No alarms")),
                sink.clone(),
            )
            .unwrap();

        match outcome {
            Outcome::Played {
                song, candidates, ..
            } => {
                assert_eq!(song, SongId::new("7"));
                assert_eq!(candidates, vec![SongId::new("7"), SongId::new("30")]);
            }
            other => panic!("expected a play, got {:?}", other),
        }
        assert_eq!(sink.played(), vec!["7".to_string()]);
    }
}

#[test]
fn test_fires_once_for_repeated_matches() {
    let (pipeline, _) = pipeline_from(BODYSNATCHERS, fast_config(3));
    let sink = RecordingSink::new();
    let words = "we suck young blood today we suck young blood today we";

    pipeline
        .run(Box::new(VecSource::from_text(words)), sink.clone())
        .unwrap();

    assert_eq!(sink.played().len(), 1);
}

#[test]
fn test_playback_retried_then_confirmed() {
    let (pipeline, _) = pipeline_from(BODYSNATCHERS, fast_config(3));
    let sink = RecordingSink::failing(2);

    let outcome = pipeline
        .run(
            Box::new(VecSource::from_text("we suck young blood today")),
            sink.clone(),
        )
        .unwrap();

    assert!(matches!(outcome, Outcome::Played { attempts: 3, .. }));
    assert_eq!(sink.played().len(), 3);
}

#[test]
fn test_exhausted_playback_is_an_error() {
    let (pipeline, _) = pipeline_from(BODYSNATCHERS, fast_config(2));
    let sink = RecordingSink::failing(u32::MAX);

    let result = pipeline.run(
        Box::new(VecSource::from_text("we suck young blood today")),
        sink.clone(),
    );

    assert!(matches!(
        result,
        Err(PipelineError::Playback(PlaybackError::Exhausted { attempts: 2, .. }))
    ));
    assert_eq!(sink.played(), vec!["A".to_string(), "A".to_string()]);
}

#[test]
fn test_vosk_stream_end_to_end() {
    let (pipeline, _) = pipeline_from(BODYSNATCHERS, fast_config(1));
    let sink = RecordingSink::new();
    let stream = [
        r#"{"partial": "we suck"}"#,
        r#"{"text": "we suck young"}"#,
        "{broken",
        r#"{"text": "blood today"}"#,
    ]
    .join("\n");

    let outcome = pipeline
        .run(
            Box::new(LineSource::new(Cursor::new(stream), InputFormat::Vosk, "vosk")),
            sink.clone(),
        )
        .unwrap();

    assert!(matches!(outcome, Outcome::Played { .. }));
    assert_eq!(sink.played(), vec!["A".to_string()]);
}

#[test]
fn test_match_never_spans_lyric_lines() {
    let catalog = r#"{
        "albums": [{"name": "OK Computer", "songs": [
            {"id": "1", "title": "Karma Police", "lines": ["Karma police, arrest this man", "He talks in maths"]}
        ]}]
    }"#;
    let (pipeline, _) = pipeline_from(catalog, fast_config(1));
    let sink = RecordingSink::new();

    let outcome = pipeline
        .run(
            Box::new(VecSource::from_text("police arrest this man he talks")),
            sink.clone(),
        )
        .unwrap();

    assert_eq!(outcome, Outcome::SourceEnded);
    assert!(sink.played().is_empty());
}
