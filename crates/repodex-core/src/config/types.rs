use serde::{Deserialize, Serialize};

/// Embedding provider backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Ollama,
    OpenAi,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Normally supplied through `REPODEX_OPENAI_API_KEY`.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_provider() -> ProviderKind {
    ProviderKind::OpenAi
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_model() -> String {
    "text-embedding-ada-002".into()
}

fn default_max_tokens() -> usize {
    8191
}

fn default_max_concurrent_requests() -> usize {
    100
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    500
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            max_tokens: default_max_tokens(),
            max_concurrent_requests: default_max_concurrent_requests(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct IndexConfig {
    /// Snapshot database; relative paths resolve against the indexed root.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
    /// Patterns ignored on top of `.gitignore` and `.repodexignore`.
    #[serde(default)]
    pub extra_ignore: Vec<String>,
    /// Parallel decomposition tasks; unset means one per CPU.
    #[serde(default)]
    pub decompose_workers: Option<usize>,
    #[serde(default)]
    pub watch: bool,
}

fn default_snapshot_path() -> String {
    ".repodex/index.db".into()
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            extra_ignore: Vec::new(),
            decompose_workers: None,
            watch: false,
        }
    }
}
