//! Test-only mock embedding provider.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::LlmError;
use crate::provider::EmbeddingProvider;

/// Deterministic provider: the vector is derived from the input text, so equal
/// inputs always embed identically.
#[derive(Debug, Clone)]
pub struct MockProvider {
    pub dimensions: usize,
    pub model: String,
    /// Inputs containing this marker fail with a permanent error.
    pub fail_marker: Option<String>,
    /// Number of transient failures returned before each input succeeds.
    pub transient_failures: usize,
    /// Milliseconds to sleep before returning a response.
    pub delay_ms: u64,
    calls: Arc<AtomicUsize>,
    attempts: Arc<Mutex<HashMap<String, usize>>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            dimensions: 8,
            model: "mock-embedding".into(),
            fail_marker: None,
            transient_failures: 0,
            delay_ms: 0,
            calls: Arc::new(AtomicUsize::new(0)),
            attempts: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl MockProvider {
    #[must_use]
    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_marker: Some(marker.to_owned()),
            ..Self::default()
        }
    }

    /// Produce `dimensions`-wide vectors under a model name of their own.
    #[must_use]
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self.model = format!("mock-embedding-{dimensions}");
        self
    }

    #[must_use]
    pub fn with_transient_failures(mut self, n: usize) -> Self {
        self.transient_failures = n;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    /// Total `embed` calls observed, including failed ones.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0_f32; self.dimensions.max(1)];
        for (i, b) in text.bytes().enumerate() {
            let slot = (i + usize::from(b)) % v.len();
            v[slot] += f32::from(b) / 255.0;
        }
        if v.iter().all(|x| *x == 0.0) {
            v[0] = 1.0;
        }
        v
    }
}

impl EmbeddingProvider for MockProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        if let Some(marker) = &self.fail_marker
            && text.contains(marker.as_str())
        {
            return Err(LlmError::Rejected {
                provider: "mock".into(),
                message: "mock rejection".into(),
            });
        }
        if self.transient_failures > 0 {
            let mut attempts = self
                .attempts
                .lock()
                .map_err(|_| LlmError::Other("mock state poisoned".into()))?;
            let seen = attempts.entry(text.to_owned()).or_insert(0);
            if *seen < self.transient_failures {
                *seen += 1;
                return Err(LlmError::Unavailable { status: 503 });
            }
        }
        Ok(self.vector_for(text))
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
