use std::sync::Arc;

use serde::Deserialize;
use uuid::Uuid;

use crate::{
    core::{
        domain::{Challenge, Difficulty, Example, ExecutionResult, TestCase, ValidationResult},
        traits::provider::{AiProvider, CompletionClient, ProviderError},
    },
    gemini::prompts,
};

#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: Arc<dyn CompletionClient>,
}

impl GeminiProvider {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }
}

/// The part of a challenge the model writes; identity fields are filled in
/// locally.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChallengeDraft {
    title: String,
    description: String,
    #[serde(default)]
    examples: Vec<Example>,
    #[serde(default)]
    constraints: Vec<String>,
    test_cases: Vec<TestCase>,
    function_signature: String,
}

impl ChallengeDraft {
    fn into_challenge(self, topic: &str, difficulty: Difficulty) -> Challenge {
        Challenge {
            id: challenge_id(),
            title: self.title,
            description: self.description,
            examples: self.examples,
            constraints: self.constraints,
            test_cases: self.test_cases,
            function_signature: self.function_signature,
            difficulty,
            topic: topic.to_string(),
        }
    }
}

/// `<unix millis>-<9 random chars>`
fn challenge_id() -> String {
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(9).collect();
    format!("{}-{}", chrono::Utc::now().timestamp_millis(), suffix)
}

#[async_trait::async_trait]
impl AiProvider for GeminiProvider {
    #[tracing::instrument(skip(self))]
    async fn generate_challenge(
        &self,
        topic: &str,
        difficulty: Difficulty,
    ) -> Result<Challenge, ProviderError> {
        let prompt = prompts::challenge_prompt(topic, difficulty);
        let text = self.client.complete(&prompt).await.inspect_err(|e| {
            tracing::error!("Error generating challenge: {}", e);
        })?;

        let draft: ChallengeDraft = prompts::parse_json(&text)?;
        let challenge = draft.into_challenge(topic, difficulty);
        tracing::info!(
            "Generated challenge {} with {} test cases",
            challenge.id,
            challenge.test_cases.len()
        );
        Ok(challenge)
    }

    #[tracing::instrument(skip_all, fields(challenge = %challenge.id, results = results.len()))]
    async fn validate_solution(
        &self,
        challenge: &Challenge,
        code: &str,
        results: &[ExecutionResult],
    ) -> Result<ValidationResult, ProviderError> {
        let prompt = prompts::review_prompt(challenge, code, results);
        let text = self.client.complete(&prompt).await.inspect_err(|e| {
            tracing::error!("Error validating solution: {}", e);
        })?;

        prompts::parse_json(&text)
    }
}
