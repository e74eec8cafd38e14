//! Anthropic Messages API intent classifier.
//!
//! Asks the model for a single JSON object naming the specialist and a
//! confidence. Calls are rate limited process-wide with `governor`.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};

use crate::domain::models::ClassifierConfig;
use crate::domain::ports::{Classification, ClassifierError, IntentClassifier};

const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 256;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const SYSTEM_PROMPT: &str = "You route requests for a Monte-Carlo simulation service. \
Classify the request into exactly one intent:\n\
- studies: run one simulation study to a target uncertainty\n\
- sweep: vary one parameter over several values and compare the results\n\
- query: look up or list previously stored runs\n\
- analysis: compare two or more existing runs by id\n\
Reply with only a JSON object: {\"intent\": \"<intent>\", \"confidence\": <0..1>, \"reasoning\": \"<one sentence>\"}";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

pub struct AnthropicIntentClassifier {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    limiter: DefaultDirectRateLimiter,
}

impl AnthropicIntentClassifier {
    /// Build from configuration; the API key falls back to `ANTHROPIC_API_KEY`.
    pub fn from_config(config: &ClassifierConfig) -> Result<Self, ClassifierError> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ClassifierError::NotConfigured("ANTHROPIC_API_KEY not set".to_string()))?;
        let rps = NonZeroU32::new(config.requests_per_second).ok_or_else(|| {
            ClassifierError::NotConfigured("requests_per_second must be positive".to_string())
        })?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ClassifierError::Http(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            limiter: RateLimiter::direct(Quota::per_second(rps)),
        })
    }
}

/// Extract the classification object from model text, tolerating code fences
/// and surrounding prose.
pub fn parse_classification(text: &str) -> Result<Classification, ClassifierError> {
    let start = text.find('{');
    let end = text.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => {
            return Err(ClassifierError::InvalidResponse(format!(
                "no JSON object in reply: {text}"
            )))
        }
    };
    serde_json::from_str(json).map_err(|e| ClassifierError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl IntentClassifier for AnthropicIntentClassifier {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn classify(&self, text: &str) -> Result<Classification, ClassifierError> {
        self.limiter.until_ready().await;

        let request = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            system: SYSTEM_PROMPT,
            messages: vec![Message {
                role: "user",
                content: text,
            }],
            temperature: 0.0,
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| ClassifierError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::InvalidResponse(e.to_string()))?;
        let reply = body
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        let classification = parse_classification(&reply)?;
        tracing::debug!(
            model = %self.model,
            intent = %classification.intent,
            confidence = classification.confidence,
            "classifier replied"
        );
        Ok(classification)
    }
}
