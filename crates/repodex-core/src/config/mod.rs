mod env;
mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use std::path::Path;

use anyhow::{Context, bail};

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Reject settings that would stall or break an indexing run.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        let e = &self.embedding;
        if e.max_tokens == 0 {
            bail!("embedding.max_tokens must be greater than 0");
        }
        if e.max_concurrent_requests == 0 {
            bail!("embedding.max_concurrent_requests must be greater than 0");
        }
        if e.max_attempts == 0 {
            bail!("embedding.max_attempts must be greater than 0");
        }
        if e.request_timeout_secs == 0 {
            bail!("embedding.request_timeout_secs must be greater than 0");
        }
        if e.base_url.trim().is_empty() {
            bail!("embedding.base_url must not be empty");
        }
        if self.index.decompose_workers == Some(0) {
            bail!("index.decompose_workers must be greater than 0");
        }
        if self.index.snapshot_path.trim().is_empty() {
            bail!("index.snapshot_path must not be empty");
        }
        Ok(())
    }
}
