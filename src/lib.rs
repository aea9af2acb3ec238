//! # casegen
//!
//! AI-assisted test-case generation. A requirements document goes through
//! four stages (document analysis, test point design, test case synthesis,
//! export), each driven by an LLM and optionally grounded with chunks
//! retrieved from a local knowledge base.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ Extractors │──▶│ Chunk+Embed │──▶│ Vector index │
//! │ docx/pdf/… │   │             │   │ (index.json) │
//! └────────────┘   └─────────────┘   └──────┬───────┘
//!                                           │ grounding
//!      ┌──────────────┐   ┌───────────┐     ▼
//!      │ Session store│◀─▶│ Generator │◀── LLM
//!      └──────────────┘   └─────┬─────┘
//!                               ▼
//!                   ┌──────────────────────┐
//!                   │ xlsx export, SQLite  │
//!                   │ records, CLI, HTTP   │
//!                   └──────────────────────┘
//! ```
//!
//! Pure logic (chunking, flat index, pipeline state machine, parsers)
//! lives in the `casegen-core` crate.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] / [`migrate`] | SQLite connection and schema |
//! | [`records`] | Saved runs, knowledge files, Q&A history, feedback |
//! | [`embedding`] | Embedding provider implementations |
//! | [`extract`] | File-type registry of text/row extractors |
//! | [`index`] | Persistent vector index |
//! | [`knowledge`] | Knowledge base service |
//! | [`llm`] / [`prompts`] | Chat-completion client and prompt builders |
//! | [`generate`] | Pipeline runner |
//! | [`session`] | Session store |
//! | [`export`] | Spreadsheet writer |
//! | [`qa`] | Knowledge Q&A |
//! | [`server`] | HTTP API |

pub mod config;
pub mod db;
pub mod embedding;
pub mod export;
pub mod extract;
pub mod generate;
pub mod generate_cmd;
pub mod index;
pub mod kb_cmd;
pub mod knowledge;
pub mod llm;
pub mod migrate;
pub mod prompts;
pub mod qa;
pub mod records;
pub mod records_cmd;
pub mod server;
pub mod session;
