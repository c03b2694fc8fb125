//! Token-bounded chunking and embedding of code units.
//!
//! Text longer than the provider's input limit is split into consecutive
//! token windows. Each window is embedded separately and the results are
//! combined as a token-weighted average, then scaled to unit length. All
//! requests, across chunks and units, share one permit pool so the provider
//! never sees more than `max_concurrent` calls in flight.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use repodex_llm::EmbeddingProvider;
use repodex_llm::retry::{RetryPolicy, retry_transient};
use tiktoken_rs::CoreBPE;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::{IndexError, Result};
use crate::unit::{CodeUnit, FileRecord};

#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    /// Largest token count sent in one request.
    pub max_tokens: usize,
    /// Size of the shared permit pool.
    pub max_concurrent: usize,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            max_tokens: 8191,
            max_concurrent: 100,
            max_attempts: 3,
            base_backoff_ms: 500,
            request_timeout_secs: 30,
        }
    }
}

impl EmbedderConfig {
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_backoff: Duration::from_millis(self.base_backoff_ms),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            ..RetryPolicy::default()
        }
    }
}

/// One window of text and the number of tokens it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub text: String,
    pub tokens: usize,
}

/// `cl100k_base` tokenizer, cheap to clone.
#[derive(Clone)]
pub struct Tokenizer {
    bpe: Arc<CoreBPE>,
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer").finish_non_exhaustive()
    }
}

impl Tokenizer {
    /// # Errors
    ///
    /// Returns [`IndexError::Tokenizer`] if the encoding tables fail to load.
    pub fn cl100k() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| IndexError::Tokenizer(e.to_string()))?;
        Ok(Self { bpe: Arc::new(bpe) })
    }

    #[must_use]
    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    /// Split `text` into consecutive windows of at most `max_tokens` tokens.
    ///
    /// Text that fits comes back as a single chunk equal to the input, and so
    /// does text with no tokens at all (weight 1).
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Tokenizer`] if the token stream does not decode
    /// back to UTF-8.
    pub fn chunk_text(&self, text: &str, max_tokens: usize) -> Result<Vec<TextChunk>> {
        let max_tokens = max_tokens.max(1);
        let tokens = self.bpe.encode_ordinary(text);
        if tokens.len() <= max_tokens {
            return Ok(vec![TextChunk {
                text: text.to_owned(),
                tokens: tokens.len().max(1),
            }]);
        }

        let mut chunks = Vec::with_capacity(tokens.len().div_ceil(max_tokens));
        let mut start = 0;
        while start < tokens.len() {
            let end = (start + max_tokens).min(tokens.len());
            let (end, text) = self.decode_window(&tokens, start, end)?;
            chunks.push(TextChunk {
                text,
                tokens: end - start,
            });
            start = end;
        }
        Ok(chunks)
    }

    /// Decode `tokens[start..end]`, moving `end` back until the window is
    /// valid UTF-8 so no window exceeds the token limit. Only when no earlier
    /// boundary exists (a character spanning more tokens than the window
    /// holds) does `end` move forward to the next one.
    fn decode_window(&self, tokens: &[u32], start: usize, end: usize) -> Result<(usize, String)> {
        let back = (start + 1..=end).rev();
        let forward = end + 1..=tokens.len();

        for candidate in back.chain(forward) {
            if let Ok(text) = self.bpe.decode(tokens[start..candidate].to_vec()) {
                return Ok((candidate, text));
            }
        }
        Err(IndexError::Tokenizer(format!(
            "no valid UTF-8 boundary after token {start}"
        )))
    }
}

/// Token-weighted average of chunk vectors, scaled to unit length.
///
/// With one chunk this is plain L2 normalisation.
///
/// # Errors
///
/// Returns [`IndexError::Embedding`] for empty input, mismatched lengths or
/// dimensions, or a zero-length result.
#[allow(clippy::cast_precision_loss)]
pub fn combine_chunk_embeddings(vectors: &[Vec<f32>], weights: &[usize]) -> Result<Vec<f32>> {
    let Some(first) = vectors.first() else {
        return Err(IndexError::Embedding("no chunk embeddings to combine".into()));
    };
    if vectors.len() != weights.len() {
        return Err(IndexError::Embedding(format!(
            "{} vectors but {} weights",
            vectors.len(),
            weights.len()
        )));
    }
    let dim = first.len();
    if dim == 0 || vectors.iter().any(|v| v.len() != dim) {
        return Err(IndexError::Embedding("chunk dimensions differ".into()));
    }
    let total: usize = weights.iter().sum();
    if total == 0 {
        return Err(IndexError::Embedding("chunk weights sum to zero".into()));
    }

    let mut combined = vec![0.0_f32; dim];
    for (vector, &weight) in vectors.iter().zip(weights) {
        let w = weight as f32 / total as f32;
        for (acc, x) in combined.iter_mut().zip(vector) {
            *acc += x * w;
        }
    }

    let norm = combined.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return Err(IndexError::Embedding("combined embedding has no length".into()));
    }
    for x in &mut combined {
        *x /= norm;
    }
    Ok(combined)
}

/// A unit dropped from a batch because its embedding could not be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingFailure {
    pub filepath: String,
    /// Checksum of the file content the unit came from.
    pub file_checksum: String,
    pub unit: String,
    pub reason: String,
}

impl std::fmt::Display for EmbeddingFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.filepath, self.unit, self.reason)
    }
}

/// Records with embedded units, minus the units that failed.
#[derive(Debug, Default)]
pub struct EmbedOutcome {
    pub records: Vec<FileRecord>,
    pub failures: Vec<EmbeddingFailure>,
}

pub struct Embedder<P> {
    provider: Arc<P>,
    tokenizer: Tokenizer,
    limiter: Arc<Semaphore>,
    config: EmbedderConfig,
}

impl<P: EmbeddingProvider> Embedder<P> {
    /// # Errors
    ///
    /// Returns an error if the tokenizer cannot be loaded.
    pub fn new(provider: Arc<P>, config: EmbedderConfig) -> Result<Self> {
        Ok(Self {
            provider,
            tokenizer: Tokenizer::cl100k()?,
            limiter: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &EmbedderConfig {
        &self.config
    }

    #[must_use]
    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// `provider/model`, stored with the snapshot so that vectors from
    /// different models never mix.
    #[must_use]
    pub fn model_id(&self) -> String {
        format!("{}/{}", self.provider.name(), self.provider.model())
    }

    /// Embed arbitrary text, chunking it when it exceeds `max_tokens`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Embedding`] if any chunk fails after retries.
    pub async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let chunks = self.tokenizer.chunk_text(text, self.config.max_tokens)?;
        if chunks.len() > 1 {
            tracing::debug!(chunks = chunks.len(), "embedding text in chunks");
        }

        let vectors = join_all(chunks.iter().map(|c| self.request(&c.text)))
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?;
        let weights: Vec<usize> = chunks.iter().map(|c| c.tokens).collect();
        combine_chunk_embeddings(&vectors, &weights)
    }

    /// Attach an embedding of `unit.source_text`.
    ///
    /// # Errors
    ///
    /// Same as [`Embedder::embed_text`].
    pub async fn embed(&self, mut unit: CodeUnit) -> Result<CodeUnit> {
        unit.embedding = Some(self.embed_text(&unit.source_text).await?);
        Ok(unit)
    }

    /// Embed every unit of every record concurrently.
    ///
    /// Units that fail are removed from their record and reported; the rest
    /// of the batch is unaffected.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Cancelled`] if `cancel` fires first; in-flight
    /// requests are abandoned.
    pub async fn embed_records(
        &self,
        mut records: Vec<FileRecord>,
        cancel: &CancellationToken,
    ) -> Result<EmbedOutcome> {
        let results = {
            let jobs = records
                .iter()
                .flat_map(|r| r.units.iter())
                .map(|u| self.embed_text(&u.source_text));
            tokio::select! {
                () = cancel.cancelled() => return Err(IndexError::Cancelled),
                results = join_all(jobs) => results,
            }
        };

        let mut results = results.into_iter();
        let mut failures = Vec::new();
        for record in &mut records {
            for mut unit in std::mem::take(&mut record.units) {
                match results.next() {
                    Some(Ok(vector)) => {
                        unit.embedding = Some(vector);
                        record.units.push(unit);
                    }
                    Some(Err(e)) => {
                        let label = unit
                            .qualified_name()
                            .unwrap_or_else(|| unit.kind.to_string());
                        tracing::warn!(file = %record.filepath, unit = %label, "embedding failed: {e}");
                        failures.push(EmbeddingFailure {
                            filepath: record.filepath.clone(),
                            file_checksum: record.checksum.clone(),
                            unit: label,
                            reason: e.to_string(),
                        });
                    }
                    None => {}
                }
            }
        }

        Ok(EmbedOutcome { records, failures })
    }

    async fn request(&self, text: &str) -> Result<Vec<f32>> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| IndexError::Embedding("request limiter closed".into()))?;
        let policy = self.config.retry_policy();
        retry_transient(self.provider.name(), &policy, || self.provider.embed(text))
            .await
            .map_err(|e| IndexError::Embedding(e.to_string()))
    }
}
