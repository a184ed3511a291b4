//! Precomputed 5-gram index over the lyrics corpus.
//!
//! Every contiguous 5-token span inside a single lyric line becomes a key;
//! spans that would straddle two lines are never emitted. Keys map to the
//! sorted, deduplicated set of songs containing them, so one lookup per
//! recognized word is all the matcher needs.

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

use crate::error::IndexError;
use crate::models::{phrase, Corpus, IndexStats, NGram, SongId, Token, NGRAM_LEN};
use crate::progress::{create_progress_bar, log_progress};

/// Immutable n-gram → songs lookup table. Built once, then shared read-only.
#[derive(Debug, PartialEq)]
pub struct LyricIndex {
    entries: FxHashMap<NGram, Vec<SongId>>,
    stats: IndexStats,
}

impl LyricIndex {
    /// Build the index from a loaded corpus.
    ///
    /// N-gram extraction runs per song in parallel; the merge is sequential and
    /// every song set is sorted, so the result never depends on scheduling.
    pub fn build(corpus: &Corpus) -> Result<Self, IndexError> {
        let songs = corpus.songs();
        if songs.is_empty() {
            return Err(IndexError::EmptyCorpus { songs: 0 });
        }

        let total = songs.len() as u64;
        let pb = create_progress_bar(total, "Indexing lyrics", "songs");
        let done = AtomicU64::new(0);

        // Indexed parallel collect keeps corpus order.
        let per_song: Vec<(&SongId, Vec<NGram>)> = songs
            .par_iter()
            .map(|song| {
                let grams: Vec<NGram> = song.ngrams().collect();
                pb.inc(1);
                let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                log_progress("Indexing lyrics", n, total, 100);
                (&song.id, grams)
            })
            .collect();

        let mut stats = IndexStats {
            songs: songs.len(),
            ..Default::default()
        };
        for song in songs {
            stats.lines += song.lines.len();
            stats.short_lines += song.lines.iter().filter(|l| l.len() < NGRAM_LEN).count();
        }

        let mut entries: FxHashMap<NGram, Vec<SongId>> = FxHashMap::default();
        for (id, grams) in per_song {
            stats.ngrams += grams.len();
            for gram in grams {
                let ids = entries.entry(gram).or_default();
                // A chorus repeats its own phrases; only record the song once.
                if ids.last() != Some(id) {
                    ids.push(id.clone());
                }
            }
        }
        for ids in entries.values_mut() {
            ids.sort();
            ids.dedup();
        }

        stats.keys = entries.len();
        stats.ambiguous_keys = entries.values().filter(|ids| ids.len() > 1).count();
        pb.finish_with_message(format!("Indexed {} phrases", stats.keys));

        if entries.is_empty() {
            return Err(IndexError::EmptyCorpus { songs: songs.len() });
        }

        info!(
            songs = stats.songs,
            lines = stats.lines,
            short_lines = stats.short_lines,
            keys = stats.keys,
            ambiguous = stats.ambiguous_keys,
            "Lyric index built"
        );
        Ok(Self { entries, stats })
    }

    /// Songs containing exactly this 5-token span, lowest id first.
    /// Any other key length finds nothing.
    pub fn lookup(&self, key: &[Token]) -> Option<&[SongId]> {
        if key.len() != NGRAM_LEN {
            return None;
        }
        self.entries.get(key).map(Vec::as_slice)
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }

    /// Every key as a phrase with its songs, sorted by phrase.
    pub fn snapshot(&self) -> Vec<(String, Vec<SongId>)> {
        let mut out: Vec<(String, Vec<SongId>)> = self
            .entries
            .iter()
            .map(|(key, ids)| (phrase(key), ids.clone()))
            .collect();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LyricLine, Song};
    use crate::normalize::tokenize;

    fn song(id: &str, lines: &[&str]) -> Song {
        Song {
            id: SongId::new(id),
            title: id.to_string(),
            album: "OK Computer".to_string(),
            lines: lines.iter().map(|l| LyricLine::new(tokenize(l))).collect(),
        }
    }

    fn ids(index: &LyricIndex, text: &str) -> Option<Vec<String>> {
        index
            .lookup(&tokenize(text))
            .map(|ids| ids.iter().map(|id| id.to_string()).collect())
    }

    #[test]
    fn test_build_indexes_every_in_line_span() {
        let corpus = Corpus::new(vec![song("A", &["we suck young blood today we"])]).unwrap();
        let index = LyricIndex::build(&corpus).unwrap();

        assert_eq!(index.len(), 2);
        assert_eq!(ids(&index, "we suck young blood today"), Some(vec!["A".to_string()]));
        assert_eq!(ids(&index, "suck young blood today we"), Some(vec!["A".to_string()]));
        assert_eq!(ids(&index, "young blood today we suck"), None);
    }

    #[test]
    fn test_spans_never_cross_lines() {
        let corpus = Corpus::new(vec![song(
            "A",
            &["karma police arrest this man", "he talks in maths"],
        )])
        .unwrap();
        let index = LyricIndex::build(&corpus).unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(ids(&index, "police arrest this man he"), None);
        assert_eq!(index.stats().short_lines, 1);
    }

    #[test]
    fn test_shared_phrase_maps_to_sorted_set() {
        let corpus = Corpus::new(vec![
            song("20", &["no surprises please no alarms"]),
            song("3", &["no surprises please no alarms", "no surprises please no alarms"]),
        ])
        .unwrap();
        let index = LyricIndex::build(&corpus).unwrap();

        assert_eq!(
            ids(&index, "no surprises please no alarms"),
            Some(vec!["3".to_string(), "20".to_string()])
        );
        assert_eq!(index.stats().ambiguous_keys, 1);
        assert_eq!(index.stats().ngrams, 3);
    }

    #[test]
    fn test_lookup_rejects_wrong_length() {
        let corpus = Corpus::new(vec![song("A", &["we suck young blood today"])]).unwrap();
        let index = LyricIndex::build(&corpus).unwrap();
        assert_eq!(ids(&index, "we suck young blood"), None);
        assert_eq!(ids(&index, "we suck young blood today we"), None);
    }

    #[test]
    fn test_build_is_idempotent() {
        let corpus = Corpus::new(vec![
            song("1", &["in the next world war", "in a jackknifed juggernaut i am born again"]),
            song("2", &["i am born again today and always"]),
        ])
        .unwrap();

        let first = LyricIndex::build(&corpus).unwrap();
        let second = LyricIndex::build(&corpus).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.snapshot(), second.snapshot());
    }

    #[test]
    fn test_empty_corpus_fails() {
        let empty = Corpus::new(vec![]).unwrap();
        assert_eq!(
            LyricIndex::build(&empty),
            Err(IndexError::EmptyCorpus { songs: 0 })
        );

        let too_short = Corpus::new(vec![song("A", &["karma police"])]).unwrap();
        assert_eq!(
            LyricIndex::build(&too_short),
            Err(IndexError::EmptyCorpus { songs: 1 })
        );
    }
}
