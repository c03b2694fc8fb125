//! Structural code decomposition and change-aware embedding snapshots.
//!
//! Pipeline: the scanner fingerprints every supported file, the planner
//! compares fingerprints with the previous snapshot, changed files are
//! decomposed into code units with tree-sitter, new units are embedded,
//! and the snapshot store merges and atomically persists the result.

pub mod decomposer;
pub mod embedder;
pub mod error;
pub mod indexer;
pub mod languages;
pub mod planner;
pub mod scanner;
pub mod snapshot;
mod store;
pub mod unit;
pub mod watcher;

pub use error::{IndexError, Result};
