use std::io::Write;

use serial_test::serial;

use super::*;

const ENV_KEYS: [&str; 11] = [
    "REPODEX_EMBEDDING_PROVIDER",
    "REPODEX_EMBEDDING_BASE_URL",
    "REPODEX_EMBEDDING_MODEL",
    "REPODEX_OPENAI_API_KEY",
    "REPODEX_MAX_TOKENS",
    "REPODEX_MAX_CONCURRENT_REQUESTS",
    "REPODEX_MAX_ATTEMPTS",
    "REPODEX_REQUEST_TIMEOUT",
    "REPODEX_SNAPSHOT_PATH",
    "REPODEX_DECOMPOSE_WORKERS",
    "REPODEX_INDEX_WATCH",
];

fn clear_env() {
    for key in ENV_KEYS {
        unsafe { std::env::remove_var(key) };
    }
}

#[test]
fn defaults_when_file_missing() {
    let config = Config::default();
    assert_eq!(config.embedding.provider, ProviderKind::OpenAi);
    assert_eq!(config.embedding.base_url, "https://api.openai.com/v1");
    assert_eq!(config.embedding.model, "text-embedding-ada-002");
    assert_eq!(config.embedding.max_tokens, 8191);
    assert_eq!(config.embedding.max_concurrent_requests, 100);
    assert_eq!(config.embedding.max_attempts, 3);
    assert!(config.embedding.api_key.is_none());
    assert_eq!(config.index.snapshot_path, ".repodex/index.db");
    assert!(config.index.extra_ignore.is_empty());
    assert!(config.index.decompose_workers.is_none());
    assert!(!config.index.watch);
    config.validate().unwrap();
}

#[test]
#[serial]
fn load_missing_file_uses_defaults() {
    clear_env();
    let config = Config::load(Path::new("/nonexistent/repodex.toml")).unwrap();
    assert_eq!(config.embedding.max_tokens, 8191);
}

#[test]
#[serial]
fn parse_valid_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("repodex.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    write!(
        f,
        r#"
[embedding]
provider = "ollama"
base_url = "http://localhost:11434"
model = "nomic-embed-text"
max_concurrent_requests = 8

[index]
snapshot_path = "/var/lib/repodex/app.db"
extra_ignore = ["dist/", "*.min.js"]
decompose_workers = 2
"#
    )
    .unwrap();

    clear_env();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.embedding.provider, ProviderKind::Ollama);
    assert_eq!(config.embedding.model, "nomic-embed-text");
    assert_eq!(config.embedding.max_concurrent_requests, 8);
    assert_eq!(config.embedding.max_tokens, 8191);
    assert_eq!(config.index.snapshot_path, "/var/lib/repodex/app.db");
    assert_eq!(config.index.extra_ignore, vec!["dist/", "*.min.js"]);
    assert_eq!(config.index.decompose_workers, Some(2));
}

#[test]
#[serial]
fn invalid_toml_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[embedding\nprovider = ").unwrap();
    clear_env();
    assert!(Config::load(&path).is_err());
}

#[test]
#[serial]
fn env_overrides_file_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("repodex.toml");
    std::fs::write(&path, "[embedding]\nmodel = \"from-file\"\n").unwrap();

    clear_env();
    unsafe {
        std::env::set_var("REPODEX_EMBEDDING_MODEL", "from-env");
        std::env::set_var("REPODEX_OPENAI_API_KEY", "sk-test");
        std::env::set_var("REPODEX_MAX_CONCURRENT_REQUESTS", "12");
        std::env::set_var("REPODEX_SNAPSHOT_PATH", "snap.db");
        std::env::set_var("REPODEX_INDEX_WATCH", "true");
    }

    let config = Config::load(&path).unwrap();
    clear_env();

    assert_eq!(config.embedding.model, "from-env");
    assert_eq!(config.embedding.api_key.as_deref(), Some("sk-test"));
    assert_eq!(config.embedding.max_concurrent_requests, 12);
    assert_eq!(config.index.snapshot_path, "snap.db");
    assert!(config.index.watch);
}

#[test]
#[serial]
fn invalid_env_values_are_ignored() {
    clear_env();
    unsafe {
        std::env::set_var("REPODEX_EMBEDDING_PROVIDER", "claude");
        std::env::set_var("REPODEX_MAX_TOKENS", "lots");
    }

    let config = Config::load(Path::new("/nonexistent/repodex.toml")).unwrap();
    clear_env();

    assert_eq!(config.embedding.provider, ProviderKind::OpenAi);
    assert_eq!(config.embedding.max_tokens, 8191);
}

#[test]
#[serial]
fn provider_env_override() {
    clear_env();
    unsafe { std::env::set_var("REPODEX_EMBEDDING_PROVIDER", "ollama") };
    let config = Config::load(Path::new("/nonexistent/repodex.toml")).unwrap();
    clear_env();
    assert_eq!(config.embedding.provider, ProviderKind::Ollama);
}

#[test]
fn validate_rejects_zero_limits() {
    let mut config = Config::default();
    config.embedding.max_concurrent_requests = 0;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("max_concurrent_requests"));

    let mut config = Config::default();
    config.embedding.max_tokens = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.index.decompose_workers = Some(0);
    assert!(config.validate().is_err());
}

#[test]
fn api_key_is_never_serialized() {
    let mut config = Config::default();
    config.embedding.api_key = Some("sk-secret".into());
    let rendered = toml::to_string(&config).unwrap();
    assert!(!rendered.contains("sk-secret"));
    assert!(rendered.contains("text-embedding-ada-002"));
}

#[test]
fn provider_kind_as_str() {
    assert_eq!(ProviderKind::Ollama.as_str(), "ollama");
    assert_eq!(ProviderKind::OpenAi.as_str(), "openai");
}
