use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use lyric_trigger::corpus::{load_corpus, CorpusFormat};
use lyric_trigger::dispatch::RetryPolicy;
use lyric_trigger::error::PipelineError;
use lyric_trigger::index::LyricIndex;
use lyric_trigger::ingest::StopSignal;
use lyric_trigger::matcher::Matcher;
use lyric_trigger::models::{Corpus, LoadReport};
use lyric_trigger::normalize::tokenize;
use lyric_trigger::pipeline::{Outcome, Pipeline, PipelineConfig};
use lyric_trigger::playback::{CommandSink, DryRunSink, PlaybackSink};
use lyric_trigger::progress::{create_spinner, format_duration, set_log_only};
use lyric_trigger::source::{InputFormat, LineSource, TokenSource};

const EXIT_INIT_FAILURE: u8 = 1;
const EXIT_PLAYBACK_FAILED: u8 = 2;
const EXIT_NO_MATCH: u8 = 3;

#[derive(Parser)]
#[command(name = "lyric-trigger")]
#[command(about = "Listen for a sung or spoken lyric phrase and play the song it comes from")]
struct Args {
    /// Lyrics corpus: SQLite database or JSON catalog
    #[arg(long)]
    corpus: PathBuf,

    /// Corpus format (default: from file extension)
    #[arg(long, value_enum)]
    corpus_format: Option<CorpusFormat>,

    /// Recognizer output to read ("-" for stdin)
    #[arg(long, default_value = "-")]
    input: String,

    #[arg(long, value_enum, default_value = "text")]
    input_format: InputFormat,

    /// Playback command; {id}, {title} and {album} in its arguments are filled in
    #[arg(long, required_unless_present_any = ["dry_run", "probe"])]
    play_cmd: Option<String>,

    /// Argument for the playback command (repeatable)
    #[arg(long = "play-arg", allow_hyphen_values = true)]
    play_args: Vec<String>,

    /// Seconds before a playback command counts as failed
    #[arg(long, default_value = "10")]
    play_timeout: u64,

    /// Log the song that would play instead of running a command
    #[arg(long, conflicts_with = "play_cmd")]
    dry_run: bool,

    /// Playback attempts before giving up
    #[arg(long, default_value = "3")]
    retries: u32,

    /// Initial retry backoff in milliseconds (doubles per retry)
    #[arg(long, default_value = "500")]
    backoff_ms: u64,

    /// Maximum retry backoff in milliseconds
    #[arg(long, default_value = "5000")]
    max_backoff_ms: u64,

    /// Words buffered between recognizer and matcher
    #[arg(long, default_value = "64")]
    channel_capacity: usize,

    /// Index-building threads (0 = all cores)
    #[arg(long, default_value = "0")]
    workers: usize,

    /// Print every corpus match for a phrase and exit without listening
    #[arg(long)]
    probe: Option<String>,

    /// Hide progress bars, print periodic progress lines instead
    #[arg(long)]
    log_only: bool,

    /// Debug logging (every recognized word)
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            channel_capacity: self.channel_capacity,
            retry: RetryPolicy {
                max_attempts: self.retries,
                initial_backoff: Duration::from_millis(self.backoff_ms),
                max_backoff: Duration::from_millis(self.max_backoff_ms),
            },
            ..PipelineConfig::default()
        }
    }

    fn sink(&self) -> Arc<dyn PlaybackSink> {
        match &self.play_cmd {
            Some(cmd) if !self.dry_run => Arc::new(
                CommandSink::new(cmd.clone(), self.play_args.clone())
                    .with_timeout(Duration::from_secs(self.play_timeout)),
            ),
            _ => Arc::new(DryRunSink::new()),
        }
    }

    fn source(&self) -> Result<Box<dyn TokenSource>> {
        if self.input == "-" {
            let reader = BufReader::new(std::io::stdin());
            return Ok(Box::new(LineSource::new(reader, self.input_format, "stdin")));
        }
        let file = File::open(&self.input)
            .with_context(|| format!("Failed to open recognizer input {}", self.input))?;
        Ok(Box::new(LineSource::new(
            BufReader::new(file),
            self.input_format,
            self.input.clone(),
        )))
    }
}

/// Parse the command line. Usage errors exit 1 like any other startup
/// failure, keeping 2 for failed playback; `--help` and `--version` exit 0.
fn parse_args<I, T>(argv: I) -> Result<Args, u8>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Args::try_parse_from(argv).map_err(|err| {
        let _ = err.print();
        if err.use_stderr() {
            EXIT_INIT_FAILURE
        } else {
            0
        }
    })
}

/// First Ctrl-C asks the pipeline to stop; later ones are ignored while it
/// winds down. Returns whether this call raised the signal.
fn on_interrupt(stop: &StopSignal) -> bool {
    let first = stop.cancel();
    if first {
        warn!("Interrupted, stopping");
    } else {
        debug!("Interrupted again, already stopping");
    }
    first
}

/// Route Ctrl-C to `stop` from a background thread running a small tokio
/// runtime. The default handler stays in place until the watcher registers.
fn watch_interrupts(stop: StopSignal) -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create signal runtime")?;

    thread::Builder::new()
        .name("ctrl-c".to_string())
        .spawn(move || {
            rt.block_on(async {
                loop {
                    if let Err(err) = tokio::signal::ctrl_c().await {
                        warn!(error = %err, "Failed to listen for Ctrl-C");
                        return;
                    }
                    on_interrupt(&stop);
                }
            })
        })
        .context("Failed to spawn signal thread")?;
    Ok(())
}

fn init_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("LYRIC_TRIGGER_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load(args: &Args) -> Result<(Arc<Corpus>, Arc<LyricIndex>, LoadReport)> {
    if args.workers > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.workers)
            .build_global()
            .context("Failed to set thread pool size")?;
    }

    let spinner = create_spinner("Loading corpus");
    let loaded = load_corpus(&args.corpus, args.corpus_format)
        .with_context(|| format!("Failed to load corpus {}", args.corpus.display()));
    spinner.finish_and_clear();
    let (corpus, report) = loaded?;

    let index = LyricIndex::build(&corpus).context("Failed to build lyric index")?;
    if args.log_only {
        index.stats().log_phase("index");
    }
    Ok((Arc::new(corpus), Arc::new(index), report))
}

/// Offline phrase check: every window of the phrase that hits the corpus.
fn probe(corpus: &Corpus, index: Arc<LyricIndex>, text: &str) -> ExitCode {
    let tokens = tokenize(text);
    let matches = Matcher::new(index).scan(tokens.iter().cloned());

    println!("\n{:=<60}", "");
    println!("Probe: {} words", tokens.len());
    for hit in &matches {
        println!("  \"{}\"", hit.phrase_text());
        for id in &hit.candidates {
            let marker = if *id == hit.song { "*" } else { " " };
            match corpus.song(id) {
                Some(song) => println!("    {} [{}] {} ({})", marker, id, song.title, song.album),
                None => println!("    {} [{}]", marker, id),
            }
        }
    }
    if matches.is_empty() {
        println!("  No 5-word span of this phrase is in the corpus");
    }
    println!("{:=<60}", "");

    if matches.is_empty() {
        ExitCode::from(EXIT_NO_MATCH)
    } else {
        ExitCode::SUCCESS
    }
}

fn run(args: Args) -> Result<ExitCode> {
    let start = Instant::now();
    let (corpus, index, report) = load(&args)?;

    if let Some(text) = &args.probe {
        return Ok(probe(&corpus, index, text));
    }

    let source = args.source()?;
    let sink = args.sink();
    info!(sink = sink.name(), input = %args.input, "Ready");

    let pipeline = Pipeline::new(Arc::clone(&corpus), index, args.pipeline_config());
    watch_interrupts(pipeline.stop_signal())?;
    let outcome = match pipeline.run(source, sink) {
        Ok(outcome) => outcome,
        Err(PipelineError::Playback(err)) => {
            error!(error = %err, "Playback failed");
            return Ok(ExitCode::from(EXIT_PLAYBACK_FAILED));
        }
        Err(err) => return Err(err).context("Pipeline failed to start"),
    };

    println!("\n{:=<60}", "");
    let code = match &outcome {
        Outcome::Played {
            song,
            phrase,
            candidates,
            attempts,
        } => {
            println!("Now playing!");
            if let Some(found) = corpus.song(song) {
                println!("  Song: {} ({})", found.title, found.album);
            }
            println!("  Heard: \"{}\"", phrase);
            if candidates.len() > 1 {
                println!("  Shared by {} songs, lowest id wins", candidates.len());
            }
            println!("  Attempts: {}", attempts);
            ExitCode::SUCCESS
        }
        Outcome::SourceEnded => {
            println!("Input ended without a lyric match");
            ExitCode::from(EXIT_NO_MATCH)
        }
        Outcome::Cancelled => {
            println!("Stopped before a lyric match");
            ExitCode::from(EXIT_NO_MATCH)
        }
    };
    println!("  Corpus: {} songs, {} albums", report.songs, report.albums);
    println!("  Elapsed: {}", format_duration(start.elapsed()));
    println!("{:=<60}", "");

    Ok(code)
}

fn main() -> ExitCode {
    let args = match parse_args(std::env::args_os()) {
        Ok(args) => args,
        Err(code) => return ExitCode::from(code),
    };
    init_logging(args.verbose);
    set_log_only(args.log_only);

    match run(args) {
        Ok(code) => code,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::from(EXIT_INIT_FAILURE)
        }
    }
}
