use super::Config;

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("REPODEX_EMBEDDING_PROVIDER") {
            if let Ok(kind) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.embedding.provider = kind;
            } else {
                tracing::warn!("ignoring invalid REPODEX_EMBEDDING_PROVIDER value: {v}");
            }
        }
        if let Ok(v) = std::env::var("REPODEX_EMBEDDING_BASE_URL") {
            self.embedding.base_url = v;
        }
        if let Ok(v) = std::env::var("REPODEX_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Ok(v) = std::env::var("REPODEX_OPENAI_API_KEY") {
            self.embedding.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("REPODEX_MAX_TOKENS")
            && let Ok(tokens) = v.parse::<usize>()
        {
            self.embedding.max_tokens = tokens;
        }
        if let Ok(v) = std::env::var("REPODEX_MAX_CONCURRENT_REQUESTS")
            && let Ok(limit) = v.parse::<usize>()
        {
            self.embedding.max_concurrent_requests = limit;
        }
        if let Ok(v) = std::env::var("REPODEX_MAX_ATTEMPTS")
            && let Ok(attempts) = v.parse::<u32>()
        {
            self.embedding.max_attempts = attempts;
        }
        if let Ok(v) = std::env::var("REPODEX_REQUEST_TIMEOUT")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.embedding.request_timeout_secs = secs;
        }
        if let Ok(v) = std::env::var("REPODEX_SNAPSHOT_PATH") {
            self.index.snapshot_path = v;
        }
        if let Ok(v) = std::env::var("REPODEX_DECOMPOSE_WORKERS")
            && let Ok(workers) = v.parse::<usize>()
        {
            self.index.decompose_workers = Some(workers);
        }
        if let Ok(v) = std::env::var("REPODEX_INDEX_WATCH")
            && let Ok(watch) = v.parse::<bool>()
        {
            self.index.watch = watch;
        }
    }
}
