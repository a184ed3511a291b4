//! Corpus loading from SQLite lyric databases and JSON catalogs.
//!
//! ## SQLite schema
//!
//! ```sql
//! CREATE TABLE songs (
//!     id      TEXT,            -- optional, defaults to name
//!     name    TEXT NOT NULL,
//!     album   TEXT,            -- optional, defaults to "unknown"
//!     lyrics  TEXT NOT NULL    -- newline-separated lines
//! );
//! ```
//!
//! Every line goes through [`crate::normalize`] so corpus tokens are
//! byte-identical to tokens produced from recognized speech.

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{CorpusError, MalformedLine};
use crate::models::{Corpus, LoadReport, LyricLine, Song, SongId, StringInterner, Token};
use crate::normalize::{split_words, strip_annotations};

/// Album assigned to songs whose source carries none.
pub const UNKNOWN_ALBUM: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CorpusFormat {
    Sqlite,
    Json,
}

impl CorpusFormat {
    /// `.json` files are catalogs, everything else is treated as SQLite.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => CorpusFormat::Json,
            _ => CorpusFormat::Sqlite,
        }
    }
}

// ============================================================================
// JSON Catalog
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    pub albums: Vec<CatalogAlbum>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogAlbum {
    pub name: String,
    #[serde(default)]
    pub songs: Vec<CatalogSong>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSong {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub lines: Vec<String>,
}

impl CatalogSong {
    pub fn song_id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.title)
    }
}

// ============================================================================
// Line Tokenization
// ============================================================================

enum LineKind {
    Lyric(LyricLine),
    Blank,
    Annotation,
}

/// Tokenize one raw line. `Err` carries the reason the line is malformed.
fn tokenize_raw_line(raw: &[u8], interner: &mut StringInterner) -> Result<LineKind, String> {
    let line = std::str::from_utf8(raw)
        .map_err(|e| format!("invalid UTF-8 at byte {}", e.valid_up_to()))?;

    if line.contains('\u{FFFD}') {
        return Err("contains replacement character (bad encoding)".to_string());
    }
    if let Some(c) = line.chars().find(|c| c.is_control() && *c != '\t') {
        return Err(format!("contains control character U+{:04X}", c as u32));
    }

    let Some(text) = strip_annotations(line) else {
        return Ok(LineKind::Annotation);
    };

    let tokens: Vec<Token> = split_words(text)
        .iter()
        .filter_map(|w| interner.token(w))
        .collect();

    if tokens.is_empty() {
        Ok(LineKind::Blank)
    } else {
        Ok(LineKind::Lyric(LyricLine::new(tokens)))
    }
}

/// Strip a trailing carriage return left over from CRLF lyrics.
fn trim_cr(raw: &[u8]) -> &[u8] {
    raw.strip_suffix(b"\r").unwrap_or(raw)
}

// ============================================================================
// Corpus Builder
// ============================================================================

/// Accumulates songs from any source, sharing one interner and one report.
#[derive(Default)]
pub struct CorpusBuilder {
    interner: StringInterner,
    report: LoadReport,
    songs: Vec<Song>,
    malformed: Vec<MalformedLine>,
}

impl CorpusBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a song from raw line bytes. Malformed lines are logged and skipped.
    pub fn add_song<'a>(
        &mut self,
        id: &str,
        title: &str,
        album: Option<&str>,
        raw_lines: impl IntoIterator<Item = &'a [u8]>,
    ) {
        let mut lines = Vec::new();

        for (idx, raw) in raw_lines.into_iter().enumerate() {
            match tokenize_raw_line(trim_cr(raw), &mut self.interner) {
                Ok(LineKind::Lyric(line)) => lines.push(line),
                Ok(LineKind::Blank) => self.report.blank_lines += 1,
                Ok(LineKind::Annotation) => self.report.annotation_lines += 1,
                Err(reason) => {
                    let err = MalformedLine {
                        song: title.to_string(),
                        line_no: idx + 1,
                        reason,
                    };
                    warn!("{}, skipping", err);
                    self.report.malformed_lines += 1;
                    self.malformed.push(err);
                }
            }
        }

        self.report.lines += lines.len();
        self.songs.push(Song {
            id: SongId::new(id),
            title: title.to_string(),
            album: album
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .unwrap_or(UNKNOWN_ALBUM)
                .to_string(),
            lines,
        });
    }

    /// Lines skipped so far.
    pub fn malformed(&self) -> &[MalformedLine] {
        &self.malformed
    }

    pub fn finish(self) -> Result<(Corpus, LoadReport), CorpusError> {
        let mut report = self.report;
        report.distinct_words = self.interner.len();

        let corpus = Corpus::new(self.songs)?;
        report.songs = corpus.len();
        report.albums = corpus.albums().len();

        info!(
            songs = report.songs,
            albums = report.albums,
            lines = report.lines,
            malformed = report.malformed_lines,
            words = report.distinct_words,
            "Corpus loaded"
        );
        Ok((corpus, report))
    }
}

// ============================================================================
// Loaders
// ============================================================================

/// Load a corpus, picking the format from the file extension unless given.
pub fn load_corpus(
    path: &Path,
    format: Option<CorpusFormat>,
) -> Result<(Corpus, LoadReport), CorpusError> {
    match format.unwrap_or_else(|| CorpusFormat::from_path(path)) {
        CorpusFormat::Sqlite => load_sqlite(path),
        CorpusFormat::Json => load_json(path),
    }
}

fn table_columns(conn: &Connection, table: &str) -> Result<FxHashSet<String>, CorpusError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns.into_iter().map(|c| c.to_lowercase()).collect())
}

/// Load a SQLite lyrics database (read-only).
pub fn load_sqlite(path: &Path) -> Result<(Corpus, LoadReport), CorpusError> {
    if !path.exists() {
        return Err(CorpusError::NotFound {
            path: path.to_path_buf(),
        });
    }

    debug!("Opening corpus database: {:?}", path);
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;

    let columns = table_columns(&conn, "songs")?;
    if columns.is_empty() {
        return Err(CorpusError::MissingTable {
            table: "songs".to_string(),
        });
    }
    for required in ["name", "lyrics"] {
        if !columns.contains(required) {
            return Err(CorpusError::MissingColumn {
                column: required.to_string(),
            });
        }
    }

    let id_expr = if columns.contains("id") {
        "COALESCE(CAST(id AS TEXT), name)"
    } else {
        "name"
    };
    let album_expr = if columns.contains("album") {
        "album"
    } else {
        "NULL"
    };
    let sql = format!(
        "SELECT {}, name, {}, lyrics FROM songs ORDER BY 1",
        id_expr, album_expr
    );

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    let mut builder = CorpusBuilder::new();

    while let Some(row) = rows.next()? {
        let id: String = row.get(0)?;
        let name: String = row.get(1)?;
        let album: Option<String> = row.get(2)?;
        let lyrics: &[u8] = match row.get_ref(3)? {
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => bytes,
            _ => &[],
        };

        builder.add_song(&id, &name, album.as_deref(), lyrics.split(|&b| b == b'\n'));
    }

    builder.finish()
}

/// Read a JSON catalog without tokenizing it.
pub fn read_catalog(path: &Path) -> Result<Catalog, CorpusError> {
    let text = std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            CorpusError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            CorpusError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    serde_json::from_str(&text).map_err(|source| CorpusError::Catalog {
        path: path.to_path_buf(),
        source,
    })
}

/// Load a JSON catalog file.
pub fn load_json(path: &Path) -> Result<(Corpus, LoadReport), CorpusError> {
    load_catalog(&read_catalog(path)?)
}

/// Tokenize an in-memory catalog.
pub fn load_catalog(catalog: &Catalog) -> Result<(Corpus, LoadReport), CorpusError> {
    let mut builder = CorpusBuilder::new();
    for album in &catalog.albums {
        for song in &album.songs {
            builder.add_song(
                song.song_id(),
                &song.title,
                Some(&album.name),
                song.lines.iter().flat_map(|l| l.as_bytes().split(|&b| b == b'\n')),
            );
        }
    }
    builder.finish()
}
