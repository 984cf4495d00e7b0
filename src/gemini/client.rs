use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    config::GeminiConfig,
    constants::GEMINI_API_BASE,
    core::traits::provider::{CompletionClient, ProviderError},
};

const API_KEY_HEADER: &str = "x-goog-api-key";
const PROXY_ACTION: &str = "generate";

#[derive(Clone, Debug, PartialEq, Eq)]
enum Endpoint {
    Direct { api_key: String, url: String },
    Proxy { url: String },
}

/// Text completion over HTTP, either straight against the Gemini REST API or
/// through a proxy that holds the key server-side.
#[derive(Clone, Debug)]
pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: Endpoint,
    model: String,
}

impl GeminiClient {
    /// The proxy wins over a local key when both are configured.
    pub fn from_config(config: &GeminiConfig) -> Result<Self, ProviderError> {
        let endpoint = match (&config.proxy_url, &config.api_key) {
            (Some(url), _) => Endpoint::Proxy { url: url.clone() },
            (None, Some(api_key)) => Endpoint::Direct {
                api_key: api_key.clone(),
                url: format!("{}/models/{}:generateContent", GEMINI_API_BASE, config.model),
            },
            (None, None) => return Err(ProviderError::NotConfigured),
        };

        Ok(Self {
            http: reqwest::Client::new(),
            endpoint,
            model: config.model.clone(),
        })
    }

    pub fn is_proxied(&self) -> bool {
        matches!(self.endpoint, Endpoint::Proxy { .. })
    }

    async fn complete_direct(
        &self,
        api_key: &str,
        url: &str,
        prompt: &str,
    ) -> Result<String, ProviderError> {
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": 0.7,
                "topK": 40,
                "topP": 0.95,
                "maxOutputTokens": 8192,
            },
        });

        let response: GenerateContentResponse = self
            .http
            .post(url)
            .header(API_KEY_HEADER, api_key)
            .json(&body)
            .send()
            .await
            .map_err(request_error)?
            .error_for_status()
            .map_err(request_error)?
            .json()
            .await
            .map_err(request_error)?;

        response.text().ok_or(ProviderError::InvalidResponseFormat)
    }

    async fn complete_proxied(&self, url: &str, prompt: &str) -> Result<String, ProviderError> {
        let request = ProxyRequest {
            action: PROXY_ACTION,
            prompt,
            model: &self.model,
        };

        let response: ProxyResponse = self
            .http
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(request_error)?
            .error_for_status()
            .map_err(request_error)?
            .json()
            .await
            .map_err(request_error)?;

        Ok(response.text)
    }
}

#[async_trait::async_trait]
impl CompletionClient for GeminiClient {
    #[tracing::instrument(skip_all, fields(model = %self.model, proxied = self.is_proxied()))]
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        tracing::debug!("Sending prompt of {} bytes", prompt.len());
        let text = match &self.endpoint {
            Endpoint::Direct { api_key, url } => self.complete_direct(api_key, url, prompt).await,
            Endpoint::Proxy { url } => self.complete_proxied(url, prompt).await,
        }?;
        tracing::debug!("Received completion of {} bytes", text.len());
        Ok(text)
    }
}

fn request_error(err: reqwest::Error) -> ProviderError {
    tracing::error!("Gemini request failed: {}", err);
    ProviderError::Request {
        msg: err.to_string(),
    }
}

#[derive(Serialize)]
struct ProxyRequest<'a> {
    action: &'a str,
    prompt: &'a str,
    model: &'a str,
}

#[derive(Deserialize)]
struct ProxyResponse {
    text: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text parts of the first candidate.
    fn text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
        (!text.is_empty()).then_some(text)
    }
}
