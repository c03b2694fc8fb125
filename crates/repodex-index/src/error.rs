//! Error types for repodex-index.

/// Errors that can occur during indexing.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error reading source files or walking the tree.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The grammar rejected a file.
    #[error("parse failed for {path}: {reason}")]
    Parse { path: String, reason: String },

    /// Unsupported or unrecognized language (callers normally skip silently).
    #[error("unsupported language")]
    UnsupportedLanguage,

    /// Embedding provider exhausted its retries or returned unusable vectors.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// LLM provider error (embedding).
    #[error("LLM error: {0}")]
    Llm(#[from] repodex_llm::LlmError),

    /// Tokenizer construction or decoding error.
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// Snapshot could not be written; the previous snapshot is untouched.
    #[error("snapshot write failed: {0}")]
    StorageWrite(String),

    /// Snapshot table does not carry a required column.
    #[error("snapshot schema invalid: {0}")]
    SnapshotSchema(String),

    /// `SQLite` database error while reading a snapshot.
    #[error("database error: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Ignore-rule compilation error.
    #[error("ignore rules error: {0}")]
    Ignore(#[from] ignore::Error),

    /// File watcher error.
    #[error("watcher error: {0}")]
    Watcher(#[from] notify::Error),

    /// The run was cancelled before the snapshot was committed.
    #[error("indexing cancelled")]
    Cancelled,

    /// A blocking worker task panicked or was aborted.
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
