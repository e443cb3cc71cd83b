//! Bounded-memory construction of a bucketed, disk-resident inverted index.

pub mod bucket;
pub mod builder;
pub mod config;
pub mod error;
pub mod extract;
pub mod index;
pub mod merge;
pub mod persist;
pub mod pipeline;
pub mod report;
pub mod segment;
pub mod tokenizer;

pub use config::IndexerConfig;
pub use error::{IndexError, Result};
pub use index::{DocId, Document, Frequency, Posting, PostingList, Term, EMPHASIS_WEIGHT};
pub use pipeline::Indexer;
pub use report::Report;
