//! Build the embedding provider and the indexer from a [`Config`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use repodex_index::embedder::EmbedderConfig;
use repodex_index::indexer::{CodeIndexer, IndexerConfig, default_workers};
use repodex_llm::any::AnyProvider;
use repodex_llm::ollama::OllamaProvider;
use repodex_llm::openai::OpenAiProvider;

use crate::config::{Config, ProviderKind};

/// Config file used when neither `--config` nor `REPODEX_CONFIG` is given.
pub const DEFAULT_CONFIG_PATH: &str = "repodex.toml";

/// Priority: explicit path > `REPODEX_CONFIG` env > [`DEFAULT_CONFIG_PATH`].
#[must_use]
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("REPODEX_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

/// # Errors
///
/// Returns an error if the `OpenAI` provider is selected without an API key.
pub fn create_provider(config: &Config) -> anyhow::Result<AnyProvider> {
    let e = &config.embedding;
    match e.provider {
        ProviderKind::Ollama => Ok(AnyProvider::Ollama(OllamaProvider::new(
            &e.base_url,
            e.model.clone(),
        ))),
        ProviderKind::OpenAi => {
            let Some(api_key) = e.api_key.clone() else {
                bail!("openai embedding provider requires REPODEX_OPENAI_API_KEY");
            };
            Ok(AnyProvider::OpenAi(OpenAiProvider::new(
                api_key,
                e.base_url.clone(),
                e.model.clone(),
            )))
        }
    }
}

#[must_use]
pub fn indexer_config(config: &Config) -> IndexerConfig {
    let e = &config.embedding;
    IndexerConfig {
        embedder: EmbedderConfig {
            max_tokens: e.max_tokens,
            max_concurrent: e.max_concurrent_requests,
            max_attempts: e.max_attempts,
            base_backoff_ms: e.base_backoff_ms,
            request_timeout_secs: e.request_timeout_secs,
        },
        decompose_workers: config.index.decompose_workers.unwrap_or_else(default_workers),
        extra_ignore: config.index.extra_ignore.clone(),
    }
}

/// Snapshot location; relative paths resolve against `root`.
#[must_use]
pub fn snapshot_path(config: &Config, root: &Path) -> PathBuf {
    let path = Path::new(&config.index.snapshot_path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Open the snapshot for `root` and wire an indexer around `provider`.
///
/// # Errors
///
/// Returns an error if the snapshot cannot be opened or the tokenizer fails
/// to load.
pub async fn build_indexer<P>(
    config: &Config,
    root: &Path,
    provider: Arc<P>,
) -> anyhow::Result<CodeIndexer<P>>
where
    P: repodex_llm::EmbeddingProvider + 'static,
{
    let path = snapshot_path(config, root);
    tracing::info!(
        provider = provider.name(),
        model = provider.model(),
        snapshot = %path.display(),
        "initializing indexer"
    );
    CodeIndexer::open(&path, provider, indexer_config(config))
        .await
        .with_context(|| format!("failed to open snapshot {}", path.display()))
}

#[cfg(test)]
mod tests {
    use repodex_llm::EmbeddingProvider;
    use serial_test::serial;

    use super::*;

    #[test]
    fn openai_without_key_is_rejected() {
        let config = Config::default();
        let err = create_provider(&config).unwrap_err();
        assert!(err.to_string().contains("REPODEX_OPENAI_API_KEY"));
    }

    #[test]
    fn openai_with_key() {
        let mut config = Config::default();
        config.embedding.api_key = Some("sk-test".into());
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.name(), "openai");
        assert_eq!(provider.model(), "text-embedding-ada-002");
    }

    #[test]
    fn ollama_needs_no_key() {
        let mut config = Config::default();
        config.embedding.provider = ProviderKind::Ollama;
        config.embedding.base_url = "http://localhost:11434".into();
        config.embedding.model = "nomic-embed-text".into();
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.name(), "ollama");
    }

    #[test]
    fn indexer_config_maps_limits() {
        let mut config = Config::default();
        config.embedding.max_concurrent_requests = 7;
        config.embedding.max_tokens = 512;
        config.index.decompose_workers = Some(3);
        config.index.extra_ignore = vec!["dist/".into()];

        let ic = indexer_config(&config);
        assert_eq!(ic.embedder.max_concurrent, 7);
        assert_eq!(ic.embedder.max_tokens, 512);
        assert_eq!(ic.decompose_workers, 3);
        assert_eq!(ic.extra_ignore, vec!["dist/".to_string()]);
    }

    #[test]
    fn default_workers_when_unset() {
        let ic = indexer_config(&Config::default());
        assert_eq!(ic.decompose_workers, default_workers());
        assert!(ic.decompose_workers > 0);
    }

    #[test]
    fn snapshot_path_resolution() {
        let mut config = Config::default();
        let root = Path::new("/repo");
        assert_eq!(
            snapshot_path(&config, root),
            PathBuf::from("/repo/.repodex/index.db")
        );
        config.index.snapshot_path = "/var/snap.db".into();
        assert_eq!(snapshot_path(&config, root), PathBuf::from("/var/snap.db"));
    }

    #[test]
    #[serial]
    fn config_path_priority() {
        unsafe { std::env::remove_var("REPODEX_CONFIG") };
        assert_eq!(
            resolve_config_path(None),
            PathBuf::from(DEFAULT_CONFIG_PATH)
        );

        unsafe { std::env::set_var("REPODEX_CONFIG", "/etc/repodex.toml") };
        assert_eq!(
            resolve_config_path(None),
            PathBuf::from("/etc/repodex.toml")
        );
        assert_eq!(
            resolve_config_path(Some(Path::new("local.toml"))),
            PathBuf::from("local.toml")
        );
        unsafe { std::env::remove_var("REPODEX_CONFIG") };
    }

    #[tokio::test]
    async fn build_indexer_creates_empty_snapshot_state() {
        let root = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.embedding.provider = ProviderKind::Ollama;
        let provider = Arc::new(create_provider(&config).unwrap());

        let indexer = build_indexer(&config, root.path(), provider).await.unwrap();
        assert!(indexer.snapshot().await.is_empty());
    }
}
