//! # casegen core
//!
//! Pure logic for casegen: document chunk models, text and row chunking,
//! the embedding trait with an offline hashing embedder, a flat vector
//! index with placeholder semantics, the generation pipeline state
//! machine, test-point bookkeeping, and test-case table parsing.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. The
//! application crate supplies persistence, providers, and transports.

pub mod chunk;
pub mod embedding;
pub mod index;
pub mod models;
pub mod pipeline;
pub mod points;
pub mod quality;
pub mod table;
