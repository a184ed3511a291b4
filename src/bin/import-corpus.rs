//! Convert a JSON lyrics catalog into a SQLite corpus database.

use anyhow::{bail, Context, Result};
use clap::Parser;
use rusqlite::{params, Connection};
use std::path::PathBuf;
use std::time::Instant;

use lyric_trigger::corpus::{load_catalog, load_sqlite, read_catalog, Catalog};
use lyric_trigger::progress::{create_progress_bar, format_duration, log_progress, set_log_only};
use lyric_trigger::safety::validate_output_path;

#[derive(Parser)]
#[command(name = "import-corpus")]
#[command(about = "Build a SQLite lyrics corpus from a JSON album catalog")]
struct Args {
    /// JSON catalog: {"albums": [{"name", "songs": [{"id", "title", "lines"}]}]}
    input: PathBuf,

    /// Output database; the filename must contain "corpus"
    output: PathBuf,

    /// Hide progress bars, print periodic progress lines instead
    #[arg(long)]
    log_only: bool,
}

const WRITE_BATCH_SIZE: usize = 500;

struct SongRow<'a> {
    id: &'a str,
    title: &'a str,
    album: &'a str,
    lyrics: String,
}

fn rows(catalog: &Catalog) -> Vec<SongRow<'_>> {
    catalog
        .albums
        .iter()
        .flat_map(|album| {
            album.songs.iter().map(move |song| SongRow {
                id: song.song_id(),
                title: &song.title,
                album: &album.name,
                lyrics: song.lines.join("\n"),
            })
        })
        .collect()
}

fn write_output(conn: &mut Connection, rows: &[SongRow<'_>]) -> Result<()> {
    conn.execute_batch(
        "PRAGMA synchronous = NORMAL;
        PRAGMA temp_store = MEMORY;

        CREATE TABLE songs (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            album TEXT,
            lyrics TEXT NOT NULL
        );",
    )?;

    let total = rows.len() as u64;
    let pb = create_progress_bar(total, "Writing songs", "songs");
    let mut written = 0u64;

    for chunk in rows.chunks(WRITE_BATCH_SIZE) {
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO songs (id, name, album, lyrics) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for row in chunk {
                stmt.execute(params![row.id, row.title, row.album, row.lyrics])
                    .with_context(|| format!("Failed to insert song `{}`", row.id))?;
                pb.inc(1);
                written += 1;
                log_progress("Writing songs", written, total, 100);
            }
        }
        tx.commit()?;
    }

    pb.finish_with_message(format!("Wrote {} songs", rows.len()));
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    set_log_only(args.log_only);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("LYRIC_TRIGGER_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    validate_output_path(&args.output, "corpus", &[&args.input])?;

    let start = Instant::now();

    println!("Reading catalog: {:?}", args.input);
    let catalog = read_catalog(&args.input).context("Failed to read catalog")?;

    // Tokenize once up front so duplicate ids and empty catalogs fail before
    // anything on disk is touched.
    let (parsed, report) = load_catalog(&catalog).context("Catalog is not a valid corpus")?;
    if parsed.is_empty() {
        bail!("Catalog {:?} contains no songs", args.input);
    }
    println!(
        "Found {} songs across {} albums ({} lines, {} skipped)",
        report.songs,
        report.albums,
        report.lines,
        report.malformed_lines + report.annotation_lines
    );

    if args.output.exists() {
        std::fs::remove_file(&args.output).context("Failed to remove existing output file")?;
    }

    println!("Creating corpus database: {:?}", args.output);
    let mut conn = Connection::open(&args.output).context("Failed to create output database")?;
    let rows = rows(&catalog);
    write_output(&mut conn, &rows)?;
    drop(conn);

    let (reloaded, _) = load_sqlite(&args.output).context("Failed to reopen written corpus")?;
    if reloaded.len() != parsed.len() {
        bail!(
            "Verification failed: wrote {} songs but read back {}",
            parsed.len(),
            reloaded.len()
        );
    }

    let file_size = std::fs::metadata(&args.output)?.len();

    println!("\n{:=<60}", "");
    println!("Import complete!");
    println!("  Songs: {}", reloaded.len());
    println!("  Albums: {}", reloaded.albums().len());
    println!("  Lines: {}", reloaded.line_count());
    println!("  Output size: {:.2} KB", file_size as f64 / 1024.0);
    println!("  Elapsed: {}", format_duration(start.elapsed()));
    println!("{:=<60}", "");

    Ok(())
}
