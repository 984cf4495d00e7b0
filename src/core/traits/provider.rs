use crate::core::domain::{Challenge, Difficulty, ExecutionResult, ValidationResult};

/// Produces challenges and reviews solutions.
#[mockall::automock]
#[async_trait::async_trait]
pub trait AiProvider: std::fmt::Debug + Send + Sync {
    async fn generate_challenge(
        &self,
        topic: &str,
        difficulty: Difficulty,
    ) -> Result<Challenge, ProviderError>;

    async fn validate_solution(
        &self,
        challenge: &Challenge,
        code: &str,
        results: &[ExecutionResult],
    ) -> Result<ValidationResult, ProviderError>;
}

/// Raw text completion against a hosted model.
#[mockall::automock]
#[async_trait::async_trait]
pub trait CompletionClient: std::fmt::Debug + Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError>;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("Gemini API not initialized. Please configure your API key.")]
    NotConfigured,
    #[error("request to the model failed: {msg}")]
    Request { msg: String },
    #[error("Invalid response format from AI")]
    InvalidResponseFormat,
}
