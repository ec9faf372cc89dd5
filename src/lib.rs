#![deny(missing_docs)]

//! Core library for the ragmill ingestion pipeline.

/// Post-run integrity auditing of the content store.
pub mod audit;
/// Hashing and compression codecs shared across the store.
pub mod codec;
/// TOML-driven configuration loading and validation.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Structured logging and tracing setup.
pub mod logging;
/// Concurrent ingestion pipeline orchestration.
pub mod pipeline;
/// Text shaping and the document versioning engine.
pub mod processing;
/// Document source adapters.
pub mod sources;
/// SQLite content store.
pub mod store;
