#[cfg(feature = "mock")]
use crate::mock::MockProvider;
use crate::ollama::OllamaProvider;
use crate::openai::OpenAiProvider;

use crate::error::LlmError;
use crate::provider::EmbeddingProvider;

/// Generates a match over all `AnyProvider` variants, binding the inner provider
/// and evaluating the given closure for each arm.
macro_rules! delegate_provider {
    ($self:expr, |$p:ident| $expr:expr) => {
        match $self {
            AnyProvider::Ollama($p) => $expr,
            AnyProvider::OpenAi($p) => $expr,
            #[cfg(feature = "mock")]
            AnyProvider::Mock($p) => $expr,
        }
    };
}

/// Provider selected at runtime from configuration.
#[derive(Debug, Clone)]
pub enum AnyProvider {
    Ollama(OllamaProvider),
    OpenAi(OpenAiProvider),
    #[cfg(feature = "mock")]
    Mock(MockProvider),
}

impl EmbeddingProvider for AnyProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        delegate_provider!(self, |p| p.embed(text).await)
    }

    fn name(&self) -> &str {
        delegate_provider!(self, |p| p.name())
    }

    fn model(&self) -> &str {
        delegate_provider!(self, |p| p.model())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delegates_name_and_model() {
        let ollama = AnyProvider::Ollama(OllamaProvider::new(
            "http://localhost:11434",
            "nomic-embed-text".into(),
        ));
        assert_eq!(ollama.name(), "ollama");
        assert_eq!(ollama.model(), "nomic-embed-text");

        let openai = AnyProvider::OpenAi(OpenAiProvider::new(
            "k".into(),
            "https://api.openai.com/v1".into(),
            "text-embedding-3-small".into(),
        ));
        assert_eq!(openai.name(), "openai");
        assert_eq!(openai.model(), "text-embedding-3-small");
    }

    #[tokio::test]
    async fn embed_unreachable_propagates_error() {
        let p = AnyProvider::OpenAi(OpenAiProvider::new(
            "k".into(),
            "http://127.0.0.1:1".into(),
            "m".into(),
        ));
        assert!(p.embed("x").await.is_err());
    }
}
