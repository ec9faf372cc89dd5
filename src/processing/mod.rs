//! Text shaping and the document versioning engine.
//!
//! Submodules are layered: [`normalize`] and [`chunking`] are pure text
//! functions, [`filters`] wraps the configured deny rules, and [`processor`]
//! drives them against the store inside per-document transactions.

pub mod chunking;
pub mod filters;
pub mod normalize;
pub mod processor;

pub use chunking::chunk_text;
pub use filters::Filters;
pub use normalize::{clean_wiki_text, defang_markup, normalize};
pub use processor::{DocumentProcessor, ProcessOutcome, ProcessingError, RawDocument};
