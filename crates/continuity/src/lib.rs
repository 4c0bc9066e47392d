//! Persistent cross-session conversational memory for agent runtimes.
//!
//! The crate observes every exchange a user has with an agent, archives it
//! into per-day JSON files, builds a dual vector + full-text index over paired
//! exchanges, and on each new turn retrieves the most relevant past exchanges
//! and renders them as a first-person recall block the host prepends to the
//! agent prompt.

pub mod archive;
pub mod config;
pub mod context_engine;
pub mod embeddings;
pub mod events;
pub mod memory;
pub mod memory_db;
pub mod runtime;
pub mod session;
pub mod telemetry;
pub mod utils;

// Public API exports
pub use config::Config;
pub use memory::{Content, Message, Part};
pub use memory_db::searcher::{SearchResponse, SearchResultItem};
pub use runtime::MemoryRuntime;
