//! Lyric trigger library: listen for a lyric phrase, play the song it belongs to.
//!
//! Shared by the `lyric-trigger` listener and the `import-corpus` tool.

pub mod corpus;
pub mod dispatch;
pub mod error;
pub mod index;
pub mod ingest;
pub mod matcher;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod playback;
pub mod progress;
pub mod safety;
pub mod source;
pub mod window;

pub use corpus::{load_corpus, CorpusFormat};
pub use dispatch::{Dispatch, DispatchState, RetryPolicy, TriggerDispatcher};
pub use error::{
    CorpusError, IndexError, IngestError, MalformedLine, PipelineError, PlaybackError,
    RecognitionError,
};
pub use index::LyricIndex;
pub use matcher::{Match, Matcher};
pub use models::{Corpus, LyricLine, Song, SongId, Token, NGRAM_LEN};
pub use pipeline::{Outcome, Pipeline, PipelineConfig};
pub use playback::{CommandSink, DryRunSink, PlaybackSink};
pub use source::{InputFormat, LineSource, SourceEnd, TokenSource, VecSource};
pub use window::SlidingWindow;
