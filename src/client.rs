//! Gmail API client with quota limiting and retry logic

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use google_gmail1::api::{
    Draft as GmailDraft, ListDraftsResponse, ListMessagesResponse, Message, MessagePart,
};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::compose;
use crate::config::GmailConfig;
use crate::error::{AutomationError, Result};
use crate::models::{Candidate, Draft, EmailMessage, Session};
use crate::rate_limiter::{QuotaCost, QuotaRateLimiter};

/// Gmail REST endpoint for the authenticated user
pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

const MAX_BODY_CHARS: usize = 500;
const MAX_BACKOFF: Duration = Duration::from_secs(30);

static ANGLE_ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(.+?)>").expect("valid address regex"));

/// Mail provider operations used by the automation engine and statistics
#[async_trait]
pub trait MailClient: Send + Sync {
    /// Recent unread inbox messages, newest first, at most `limit`
    ///
    /// Messages that fail to load are dropped; ones that load but cannot be
    /// parsed are returned as `Candidate::Unparseable`.
    async fn list_unread(&self, limit: usize) -> Result<Vec<Candidate>>;

    /// Messages matching an arbitrary Gmail search query
    async fn search_messages(&self, query: &str, limit: usize) -> Result<Vec<EmailMessage>>;

    /// Existing drafts that belong to a conversation
    async fn list_all_drafts(&self) -> Result<Vec<Draft>>;

    /// Number of messages matching `query`, bounded by the page budget
    async fn count_exhaustive(&self, query: &str) -> Result<u64>;

    /// Create a reply draft in the original's conversation, returning the draft id
    async fn create_draft(&self, original: &EmailMessage, body: &str) -> Result<String>;

    /// Remove the UNREAD label
    async fn mark_read(&self, message_id: &str) -> Result<()>;
}

/// Builds a mail client bound to a session's access token
pub trait MailClientFactory: Send + Sync {
    fn connect(&self, session: &Session) -> Result<Arc<dyn MailClient>>;
}

impl<F> MailClientFactory for F
where
    F: Fn(&Session) -> Result<Arc<dyn MailClient>> + Send + Sync,
{
    fn connect(&self, session: &Session) -> Result<Arc<dyn MailClient>> {
        self(session)
    }
}

/// Exponential backoff settings for provider calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &GmailConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Execute an async operation with exponential backoff retry
///
/// Only transient failures are retried. A rate-limited response waits at
/// least as long as its Retry-After asked for.
pub async fn with_retry<T, F, Fut>(operation_name: &str, policy: RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay = policy.base_delay;
    let mut attempts = 0;

    loop {
        attempts += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_transient() && attempts <= policy.max_retries => {
                let wait = match &e {
                    AutomationError::RateLimited { retry_after, .. } => {
                        delay.max(Duration::from_secs(*retry_after))
                    }
                    _ => delay,
                };
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                    operation_name,
                    attempts,
                    policy.max_retries + 1,
                    e,
                    wait
                );
                tokio::time::sleep(wait).await;
                delay = std::cmp::min(delay * 2, MAX_BACKOFF);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Turn a provider response into `T` or a status-carrying error
async fn decode_response<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        return Err(AutomationError::from_status(status.as_u16(), &headers, body));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| AutomationError::Parse(e.to_string()))
}

/// Gmail client over the REST API
///
/// Every request:
/// - acquires Gmail quota units from the shared token bucket
/// - holds one of `max_concurrent_requests` in-flight permits
/// - runs under the exponential backoff retry policy
pub struct GmailApiClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    quota: QuotaRateLimiter,
    in_flight: Arc<Semaphore>,
    retry: RetryPolicy,
    config: GmailConfig,
}

impl GmailApiClient {
    pub fn new(
        http: reqwest::Client,
        access_token: impl Into<String>,
        config: &GmailConfig,
        quota: QuotaRateLimiter,
    ) -> Self {
        Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            quota,
            in_flight: Arc::new(Semaphore::new(config.max_concurrent_requests.max(1))),
            retry: RetryPolicy::from_config(config),
            config: config.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn execute<T, B>(&self, operation: &str, cost: QuotaCost, build: B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let build = &build;
        with_retry(operation, self.retry, move || async move {
            let _permit = self
                .in_flight
                .acquire()
                .await
                .map_err(|e| AutomationError::Network(format!("Failed to acquire permit: {}", e)))?;
            self.quota.acquire(cost).await?;

            let response = build(&self.http)
                .bearer_auth(&self.access_token)
                .send()
                .await?;
            decode_response::<T>(response).await
        })
        .await
    }

    async fn list_page(
        &self,
        query: &str,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<ListMessagesResponse> {
        let url = self.url("messages");
        let mut params = vec![
            ("q".to_string(), query.to_string()),
            ("maxResults".to_string(), max_results.to_string()),
            ("includeSpamTrash".to_string(), "false".to_string()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken".to_string(), token.to_string()));
        }

        self.execute("messages.list", QuotaCost::MessagesList, |http| {
            http.get(&url).query(&params)
        })
        .await
    }

    async fn fetch_message(&self, id: &str) -> Result<Message> {
        let url = self.url(&format!("messages/{}", id));
        self.execute("messages.get", QuotaCost::MessagesGet, |http| {
            http.get(&url).query(&[("format", "full")])
        })
        .await
    }

    /// Fetch ids in listing order, dropping the ones that fail to load
    async fn hydrate_messages(&self, ids: Vec<String>) -> Vec<(String, Message)> {
        let fetched: Vec<(String, Result<Message>)> = stream::iter(ids)
            .map(|id| async move {
                let result = self.fetch_message(&id).await;
                (id, result)
            })
            .buffered(self.config.max_concurrent_requests.max(1))
            .collect()
            .await;

        fetched
            .into_iter()
            .filter_map(|(id, result)| match result {
                Ok(message) => Some((id, message)),
                Err(e) => {
                    warn!("Dropping message {}: {}", id, e);
                    None
                }
            })
            .collect()
    }

    async fn list_ids(&self, query: &str, limit: usize) -> Result<Vec<String>> {
        let page = self.list_page(query, limit.clamp(1, 500) as u32, None).await?;
        let ids: Vec<String> = page
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.id)
            .take(limit)
            .collect();

        debug!("Query '{}' listed {} messages", query, ids.len());
        Ok(ids)
    }

    async fn get_draft(&self, id: &str) -> Result<Draft> {
        let url = self.url(&format!("drafts/{}", id));
        let draft: GmailDraft = self
            .execute("drafts.get", QuotaCost::DraftsGet, |http| {
                http.get(&url).query(&[
                    ("format", "metadata"),
                    ("metadataHeaders", "To"),
                    ("metadataHeaders", "Subject"),
                ])
            })
            .await?;
        parse_draft(draft)
    }
}

#[async_trait]
impl MailClient for GmailApiClient {
    async fn list_unread(&self, limit: usize) -> Result<Vec<Candidate>> {
        let query = format!(
            "in:inbox is:unread newer_than:{}d",
            self.config.unread_window_days
        );
        let ids = self.list_ids(&query, limit).await?;

        Ok(self
            .hydrate_messages(ids)
            .await
            .into_iter()
            .map(|(id, message)| match parse_message(message) {
                Ok(parsed) => Candidate::Parsed(parsed),
                Err(e) => Candidate::Unparseable {
                    id,
                    reason: e.to_string(),
                },
            })
            .collect())
    }

    async fn search_messages(&self, query: &str, limit: usize) -> Result<Vec<EmailMessage>> {
        let ids = self.list_ids(query, limit).await?;

        Ok(self
            .hydrate_messages(ids)
            .await
            .into_iter()
            .filter_map(|(id, message)| match parse_message(message) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    warn!("Skipping unparseable message {}: {}", id, e);
                    None
                }
            })
            .collect())
    }

    async fn list_all_drafts(&self) -> Result<Vec<Draft>> {
        let url = self.url("drafts");
        let cap = self.config.draft_list_cap;
        let listing: ListDraftsResponse = self
            .execute("drafts.list", QuotaCost::DraftsList, |http| {
                http.get(&url).query(&[("maxResults", cap.to_string())])
            })
            .await?;

        let listed = listing.drafts.unwrap_or_default();
        let hydrate_limit = self.config.draft_hydrate_limit.min(listed.len());
        let (to_hydrate, rest) = listed.split_at(hydrate_limit);

        let ids: Vec<String> = to_hydrate.iter().filter_map(|d| d.id.clone()).collect();
        let hydrated: Vec<(String, Result<Draft>)> = stream::iter(ids)
            .map(|id| async move {
                let result = self.get_draft(&id).await;
                (id, result)
            })
            .buffered(self.config.max_concurrent_requests.max(1))
            .collect()
            .await;

        let mut drafts: Vec<Draft> = hydrated
            .into_iter()
            .filter_map(|(id, result)| match result {
                Ok(draft) => Some(draft),
                Err(e) => {
                    warn!("Skipping draft {}: {}", id, e);
                    None
                }
            })
            .collect();

        // Beyond the hydrate limit only the listing's thread id is known
        drafts.extend(rest.iter().cloned().filter_map(|d| parse_draft(d).ok()));

        debug!("Found {} drafts with a conversation", drafts.len());
        Ok(drafts)
    }

    async fn count_exhaustive(&self, query: &str) -> Result<u64> {
        let page_size = self.config.count_page_size.max(1);
        let mut total: u64 = 0;
        let mut page_token: Option<String> = None;
        let mut pages = 0;

        loop {
            let page = self.list_page(query, page_size, page_token.as_deref()).await?;
            pages += 1;

            let returned = page.messages.map(|m| m.len()).unwrap_or(0);
            total += returned as u64;

            if returned < page_size as usize {
                break;
            }
            match page.next_page_token {
                Some(token) if pages < self.config.count_page_budget => page_token = Some(token),
                Some(_) => {
                    debug!(
                        "Count for '{}' reached the page budget ({} pages), reporting {}",
                        query, pages, total
                    );
                    break;
                }
                None => break,
            }
        }

        Ok(total)
    }

    async fn create_draft(&self, original: &EmailMessage, body: &str) -> Result<String> {
        let url = self.url("drafts");
        let raw = compose::encode_raw(&compose::build_reply(original, body));
        let payload = json!({
            "message": {
                "threadId": original.conversation_id,
                "raw": raw,
            }
        });

        let draft: GmailDraft = self
            .execute("drafts.create", QuotaCost::DraftsCreate, |http| {
                http.post(&url).json(&payload)
            })
            .await?;

        draft
            .id
            .ok_or_else(|| AutomationError::Parse("drafts.create returned no draft id".to_string()))
    }

    async fn mark_read(&self, message_id: &str) -> Result<()> {
        let url = self.url(&format!("messages/{}/modify", message_id));
        let payload = json!({ "removeLabelIds": ["UNREAD"] });

        let _: Message = self
            .execute("messages.modify", QuotaCost::MessagesModify, |http| {
                http.post(&url).json(&payload)
            })
            .await?;
        Ok(())
    }
}

/// Builds `GmailApiClient`s that share one HTTP pool and one quota bucket
pub struct GmailClientFactory {
    http: reqwest::Client,
    quota: QuotaRateLimiter,
    config: GmailConfig,
}

impl GmailClientFactory {
    pub fn new(config: GmailConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        let quota = QuotaRateLimiter::per_second(config.quota_units_per_second);
        Ok(Self { http, quota, config })
    }
}

impl MailClientFactory for GmailClientFactory {
    fn connect(&self, session: &Session) -> Result<Arc<dyn MailClient>> {
        Ok(Arc::new(GmailApiClient::new(
            self.http.clone(),
            session.access_token.clone(),
            &self.config,
            self.quota.clone(),
        )))
    }
}

/// Bare address from a `Name <addr>` header value
pub fn extract_address(header: &str) -> String {
    ANGLE_ADDRESS
        .captures(header)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| header.trim().to_string())
}

fn header_value<'a>(part: Option<&'a MessagePart>, name: &str) -> Option<&'a str> {
    part?
        .headers
        .as_ref()?
        .iter()
        .find(|h| h.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(name)))
        .and_then(|h| h.value.as_deref())
}

fn is_plain_text(part: &MessagePart) -> bool {
    part.mime_type
        .as_deref()
        .map_or(true, |m| m.eq_ignore_ascii_case("text/plain"))
}

fn part_text(part: &MessagePart) -> Option<String> {
    part.body
        .as_ref()?
        .data
        .as_ref()
        .filter(|data| !data.is_empty())
        .map(|data| String::from_utf8_lossy(data).into_owned())
}

/// First text/plain part, searched depth-first
fn find_plain_text(parts: &[MessagePart]) -> Option<String> {
    parts.iter().find_map(|part| {
        let own = part
            .mime_type
            .as_deref()
            .filter(|m| m.eq_ignore_ascii_case("text/plain"))
            .and_then(|_| part_text(part));
        own.or_else(|| part.parts.as_deref().and_then(find_plain_text))
    })
}

fn extract_body(payload: Option<&MessagePart>, snippet: &str) -> String {
    let body = payload.and_then(|p| {
        is_plain_text(p)
            .then(|| part_text(p))
            .flatten()
            .or_else(|| p.parts.as_deref().and_then(find_plain_text))
    });

    body.unwrap_or_else(|| snippet.to_string())
        .chars()
        .take(MAX_BODY_CHARS)
        .collect()
}

/// Parse a `format=full` Gmail message into an `EmailMessage`
pub fn parse_message(msg: Message) -> Result<EmailMessage> {
    let id = msg
        .id
        .ok_or_else(|| AutomationError::Parse("Missing message ID".to_string()))?;
    let conversation_id = msg
        .thread_id
        .ok_or_else(|| AutomationError::Parse(format!("Message {} has no thread ID", id)))?;

    let payload = msg.payload.as_ref();
    let snippet = msg.snippet.unwrap_or_default();

    let sender = header_value(payload, "From")
        .map(extract_address)
        .unwrap_or_else(|| "Unknown".to_string());
    let recipient = header_value(payload, "To")
        .map(extract_address)
        .unwrap_or_else(|| "Unknown".to_string());
    let subject = header_value(payload, "Subject")
        .map(str::to_string)
        .unwrap_or_else(|| "No Subject".to_string());
    let message_id_header = header_value(payload, "Message-ID")
        .map(|v| v.trim().trim_start_matches('<').trim_end_matches('>').to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| id.clone());

    let timestamp = msg
        .internal_date
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_else(Utc::now);
    let is_read = !msg
        .label_ids
        .as_ref()
        .is_some_and(|labels| labels.iter().any(|l| l == "UNREAD"));
    let body = extract_body(payload, &snippet);

    Ok(EmailMessage {
        id,
        conversation_id,
        sender,
        recipient,
        subject,
        snippet,
        body,
        timestamp,
        is_read,
        message_id_header,
    })
}

fn parse_draft(draft: GmailDraft) -> Result<Draft> {
    let id = draft
        .id
        .ok_or_else(|| AutomationError::Parse("Missing draft ID".to_string()))?;
    let message = draft.message.unwrap_or_default();
    let conversation_id = message
        .thread_id
        .ok_or_else(|| AutomationError::Parse(format!("Draft {} has no thread ID", id)))?;
    let payload = message.payload.as_ref();

    Ok(Draft {
        id,
        conversation_id,
        recipient: header_value(payload, "To").map(extract_address),
        subject: header_value(payload, "Subject").map(str::to_string),
        body_excerpt: message.snippet.filter(|s| !s.is_empty()),
    })
}
