use std::future::Future;

use crate::error::LlmError;

/// Remote text → vector function with a fixed dimensionality per model.
pub trait EmbeddingProvider: Send + Sync {
    /// Request one embedding for `text`.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be reached or the response is invalid.
    /// Use [`LlmError::is_transient`] to decide whether a retry makes sense.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, LlmError>> + Send;

    fn name(&self) -> &str;

    /// Model identifier recorded alongside the snapshot.
    fn model(&self) -> &str;
}
