//! Language-model classification and reply generation
//!
//! Classification asks the model for a single category token at temperature 0
//! and maps it onto the closed `EmailCategory` set. Anything outside the set,
//! and any failed model call, becomes `Unclassifiable` with confidence 0.
//! Reply generation is conditioned on the category; unrelated mail gets a
//! fixed placeholder so a human answers it.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use crate::client::{with_retry, RetryPolicy};
use crate::config::ClassifierConfig;
use crate::error::{AutomationError, Result};
use crate::models::{Classification, EmailCategory, EmailMessage};

/// Reply body used for mail that needs a human
pub const MANUAL_RESPONSE_PLACEHOLDER: &str = "MANUALLY RESPOND";

#[async_trait]
pub trait Classifier: Send + Sync {
    /// Map a message to one category
    async fn classify(&self, subject: &str, body: &str) -> Result<Classification>;

    /// Reply body for a message of the given category
    async fn generate_reply(&self, message: &EmailMessage, category: EmailCategory) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Classifier backed by an OpenAI-compatible chat completions endpoint
pub struct OpenAiClassifier {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    retry: RetryPolicy,
    config: ClassifierConfig,
}

impl OpenAiClassifier {
    /// Build from config, reading the API key from `config.api_key_env`
    pub fn from_env(config: &ClassifierConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                AutomationError::Config(format!(
                    "{} is not set; the classifier needs an API key",
                    config.api_key_env
                ))
            })?;
        Self::new(config, api_key)
    }

    pub fn new(config: &ClassifierConfig, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.api_base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                base_delay: Duration::from_secs(1),
            },
            config: config.clone(),
        })
    }

    /// Override the backoff between retried model calls
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn complete(&self, model: &str, temperature: f32, max_tokens: u32, prompt: &str) -> Result<String> {
        let payload = json!({
            "model": model,
            "temperature": temperature,
            "max_tokens": max_tokens,
            "messages": [
                { "role": "user", "content": prompt }
            ]
        });

        let (http, endpoint, api_key, payload) = (&self.http, &self.endpoint, &self.api_key, &payload);
        let completion: ChatCompletion = with_retry("chat.completions", self.retry, move || async move {
            let response = http
                .post(endpoint)
                .bearer_auth(api_key)
                .json(payload)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let headers = response.headers().clone();
                let body = response.text().await.unwrap_or_default();
                return Err(AutomationError::from_status(status.as_u16(), &headers, body));
            }
            response
                .json::<ChatCompletion>()
                .await
                .map_err(|e| AutomationError::Parse(e.to_string()))
        })
        .await
        .map_err(|e| AutomationError::Classifier(format!("{} call failed: {}", model, e)))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| AutomationError::Classifier(format!("{} returned no content", model)))
    }
}

#[async_trait]
impl Classifier for OpenAiClassifier {
    async fn classify(&self, subject: &str, body: &str) -> Result<Classification> {
        let prompt = classification_prompt(subject, body);
        let output = match self
            .complete(
                &self.config.classification_model,
                self.config.classification_temperature,
                self.config.classification_max_tokens,
                &prompt,
            )
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!("Classification failed, treating as unclassifiable: {}", e);
                return Ok(Classification::unclassifiable());
            }
        };

        let classification = parse_classification(&output);
        debug!("Model answered '{}' -> {:?}", output, classification.category);
        Ok(classification)
    }

    async fn generate_reply(&self, message: &EmailMessage, category: EmailCategory) -> Result<String> {
        let prompt = match reply_prompt(message, category) {
            ReplyPrompt::Fixed(text) => return Ok(text.to_string()),
            ReplyPrompt::Model(prompt) => prompt,
            ReplyPrompt::Unsupported => {
                return Err(AutomationError::Classifier(format!(
                    "no reply template for category {:?}",
                    category
                )))
            }
        };

        self.complete(
            &self.config.reply_model,
            self.config.reply_temperature,
            self.config.reply_max_tokens,
            &prompt,
        )
        .await
    }
}

/// Closed-set mapping of raw model output
pub fn parse_classification(output: &str) -> Classification {
    match EmailCategory::from_wire(output) {
        EmailCategory::Unclassifiable => Classification::unclassifiable(),
        category => Classification {
            category,
            confidence: 1.0,
        },
    }
}

pub(crate) fn classification_prompt(subject: &str, body: &str) -> String {
    format!(
        "You classify inbound email for a small business. Choose exactly one category:\n\
         \n\
         GENERAL_INQUIRY: a direct question about our offerings, operations or capabilities.\n\
         PRODUCT_SERVICE_OVERVIEW: a request for a high-level summary of our products or services.\n\
         APPOINTMENT_SCHEDULING: a request to book, schedule or confirm a meeting, call or consultation.\n\
         GENERAL_FEEDBACK_SUGGESTIONS: feedback, suggestions or comments about the business.\n\
         UNRELATED: anything that fits none of the above.\n\
         \n\
         Answer with the category name only, in capitals with underscores, and nothing else.\n\
         \n\
         Email subject: {}\n\
         Email text: {}",
        subject, body
    )
}

enum ReplyPrompt {
    Fixed(&'static str),
    Model(String),
    Unsupported,
}

fn reply_prompt(message: &EmailMessage, category: EmailCategory) -> ReplyPrompt {
    let task = match category {
        EmailCategory::GeneralInquiry => {
            "The customer asked a specific question about what we offer or how we operate. \
             Answer it directly in one or two sentences, add any useful next step and invite follow-up questions."
        }
        EmailCategory::ProductOverview => {
            "The customer wants an overview of our products or services. \
             Give a short, friendly summary and offer to send more detail."
        }
        EmailCategory::AppointmentScheduling => {
            "The customer wants to book or confirm a meeting, call or consultation. \
             Acknowledge the request, propose that they share a few times that suit them and confirm we will follow up."
        }
        EmailCategory::Feedback => {
            "The customer shared feedback or a suggestion. \
             Thank them sincerely, acknowledge the specific point they raised and say it has been passed to the team."
        }
        EmailCategory::Unrelated => return ReplyPrompt::Fixed(MANUAL_RESPONSE_PLACEHOLDER),
        EmailCategory::Unclassifiable => return ReplyPrompt::Unsupported,
    };

    ReplyPrompt::Model(format!(
        "You write email replies on behalf of a small business.\n\
         {}\n\
         \n\
         Write in a warm, natural tone with short paragraphs. Open with a greeting, \
         end with a courteous sign-off from the team. Do not repeat the subject line. \
         Keep the reply complete and never cut it off.\n\
         \n\
         The customer is: {}\n\
         We are: {}\n\
         \n\
         Email subject: {}\n\
         Email text: {}",
        task, message.sender, message.recipient, message.subject, message.body
    ))
}
