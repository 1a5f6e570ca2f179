use reqwest::header::HeaderMap;
use thiserror::Error;

/// Type alias for Result with AutomationError
pub type Result<T> = std::result::Result<T, AutomationError>;

/// Error taxonomy for the draft automation system
#[derive(Error, Debug)]
pub enum AutomationError {
    /// Gmail API returned a non-success status
    #[error("Gmail API error (HTTP {status}, {}): {body}", describe_status(*status))]
    Provider { status: u16, body: String },

    /// Gmail answered 429; retry no sooner than `retry_after` seconds
    #[error("Gmail API rate limited, retry after {retry_after} seconds: {body}")]
    RateLimited { retry_after: u64, body: String },

    /// Connection issues, timeouts, TLS failures
    #[error("Network error: {0}")]
    Network(String),

    /// Language model call failed or produced something unusable
    #[error("Classifier error: {0}")]
    Classifier(String),

    /// Malformed provider payload
    #[error("Invalid message format: {0}")]
    Parse(String),

    /// A run is already registered
    #[error("Automation run {active_run} is already in progress")]
    RegistryConflict { active_run: String },

    /// Missing session or failed token exchange
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn describe_status(status: u16) -> &'static str {
    match status {
        401 => "authentication failed, re-authenticate",
        403 => "access forbidden",
        404 => "not found",
        429 => "rate limited",
        400 => "bad request",
        500..=599 => "server error",
        _ => "unexpected status",
    }
}

impl AutomationError {
    /// Check if the error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            AutomationError::RateLimited { .. } | AutomationError::Network(_) => true,
            AutomationError::Provider { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }

    /// The session's access token was rejected
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, AutomationError::Provider { status: 401, .. } | AutomationError::Auth(_))
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AutomationError::RateLimited { .. })
    }

    /// HTTP status carried by provider errors
    pub fn status(&self) -> Option<u16> {
        match self {
            AutomationError::Provider { status, .. } => Some(*status),
            AutomationError::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    /// Build the error for a non-success provider response
    pub fn from_status(status: u16, headers: &HeaderMap, body: String) -> Self {
        if status == 429 {
            AutomationError::RateLimited {
                retry_after: parse_retry_after_header(headers),
                body,
            }
        } else {
            AutomationError::Provider { status, body }
        }
    }
}

impl From<reqwest::Error> for AutomationError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            return AutomationError::Parse(error.to_string());
        }
        match error.status() {
            Some(status) => AutomationError::Provider {
                status: status.as_u16(),
                body: error.to_string(),
            },
            None => AutomationError::Network(error.to_string()),
        }
    }
}

/// Parse the Retry-After header from an HTTP response
///
/// The Retry-After header can be specified in two formats:
/// 1. Delay-seconds: An integer indicating seconds to wait (e.g., "120")
/// 2. HTTP-date: An HTTP date format (e.g., "Wed, 21 Oct 2015 07:28:00 GMT")
///
/// Returns the number of seconds to wait. If the header is missing or invalid,
/// returns a default of 5 seconds.
pub(crate) fn parse_retry_after_header(headers: &HeaderMap) -> u64 {
    const DEFAULT_RETRY_AFTER: u64 = 5;

    if let Some(retry_after_value) = headers.get(reqwest::header::RETRY_AFTER) {
        if let Ok(retry_after_str) = retry_after_value.to_str() {
            if let Ok(seconds) = retry_after_str.parse::<u64>() {
                return seconds;
            }

            if let Ok(http_date) = httpdate::parse_http_date(retry_after_str) {
                let now = std::time::SystemTime::now();
                if let Ok(duration) = http_date.duration_since(now) {
                    return duration.as_secs();
                }
            }
        }
    }

    DEFAULT_RETRY_AFTER
}
