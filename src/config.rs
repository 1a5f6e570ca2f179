use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::client::GMAIL_API_BASE;
use crate::error::{AutomationError, Result};
use crate::rate_limiter::{QuotaCost, QUOTA_BURST_SECONDS};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub gmail: GmailConfig,
    #[serde(default)]
    pub automation: AutomationConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub stats: StatsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GmailConfig {
    #[serde(default = "default_gmail_base_url")]
    pub api_base_url: String,
    /// Unread messages older than this are never drafted
    #[serde(default = "default_unread_window_days")]
    pub unread_window_days: u32,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
    #[serde(default = "default_draft_list_cap")]
    pub draft_list_cap: u32,
    #[serde(default = "default_draft_hydrate_limit")]
    pub draft_hydrate_limit: usize,
    #[serde(default = "default_count_page_size")]
    pub count_page_size: u32,
    /// Pages fetched per count before the result is reported as bounded
    #[serde(default = "default_count_page_budget")]
    pub count_page_budget: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_quota_units_per_second")]
    pub quota_units_per_second: f64,
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_gmail_base_url(),
            unread_window_days: default_unread_window_days(),
            max_concurrent_requests: default_max_concurrent(),
            draft_list_cap: default_draft_list_cap(),
            draft_hydrate_limit: default_draft_hydrate_limit(),
            count_page_size: default_count_page_size(),
            count_page_budget: default_count_page_budget(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            quota_units_per_second: default_quota_units_per_second(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    /// Unread messages considered per cycle
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
    /// Wall-clock budget of one cycle; elapsed budget stops it at the next checkpoint
    #[serde(default = "default_time_budget_secs")]
    pub time_budget_secs: u64,
    #[serde(default = "default_schedule_interval_secs")]
    pub schedule_interval_secs: u64,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            candidate_limit: default_candidate_limit(),
            time_budget_secs: default_time_budget_secs(),
            schedule_interval_secs: default_schedule_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// OpenAI-compatible chat completions base URL
    #[serde(default = "default_classifier_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_classification_model")]
    pub classification_model: String,
    #[serde(default)]
    pub classification_temperature: f32,
    #[serde(default = "default_classification_max_tokens")]
    pub classification_max_tokens: u32,
    #[serde(default = "default_reply_model")]
    pub reply_model: String,
    #[serde(default = "default_reply_temperature")]
    pub reply_temperature: f32,
    #[serde(default = "default_reply_max_tokens")]
    pub reply_max_tokens: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_classifier_base_url(),
            api_key_env: default_api_key_env(),
            classification_model: default_classification_model(),
            classification_temperature: 0.0,
            classification_max_tokens: default_classification_max_tokens(),
            reply_model: default_reply_model(),
            reply_temperature: default_reply_temperature(),
            reply_max_tokens: default_reply_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_session_file")]
    pub session_file: PathBuf,
    /// Google OAuth client credentials; env vars are used when the file is absent
    #[serde(default = "default_credentials_file")]
    pub credentials_file: PathBuf,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default = "default_refresh_threshold_secs")]
    pub refresh_threshold_secs: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_file: default_session_file(),
            credentials_file: default_credentials_file(),
            token_uri: default_token_uri(),
            refresh_threshold_secs: default_refresh_threshold_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
    #[serde(default = "default_breakdown_timeout_secs")]
    pub breakdown_timeout_secs: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            sample_size: default_sample_size(),
            batch_size: default_batch_size(),
            batch_pause_ms: default_batch_pause_ms(),
            breakdown_timeout_secs: default_breakdown_timeout_secs(),
        }
    }
}

fn default_gmail_base_url() -> String {
    GMAIL_API_BASE.to_string()
}

fn default_unread_window_days() -> u32 {
    30
}

fn default_max_concurrent() -> usize {
    10
}

fn default_draft_list_cap() -> u32 {
    500
}

fn default_draft_hydrate_limit() -> usize {
    100
}

fn default_count_page_size() -> u32 {
    500
}

fn default_count_page_budget() -> u32 {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_quota_units_per_second() -> f64 {
    250.0
}

fn default_candidate_limit() -> usize {
    50
}

fn default_time_budget_secs() -> u64 {
    300
}

fn default_schedule_interval_secs() -> u64 {
    45
}

fn default_classifier_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_classification_model() -> String {
    "gpt-4o".to_string()
}

fn default_classification_max_tokens() -> u32 {
    50
}

fn default_reply_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_reply_temperature() -> f32 {
    0.8
}

fn default_reply_max_tokens() -> u32 {
    250
}

fn default_session_file() -> PathBuf {
    PathBuf::from(".inbox-autodraft/session.json")
}

fn default_credentials_file() -> PathBuf {
    PathBuf::from("credentials.json")
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_refresh_threshold_secs() -> i64 {
    300
}

fn default_sample_size() -> usize {
    20
}

fn default_batch_size() -> usize {
    5
}

fn default_batch_pause_ms() -> u64 {
    500
}

fn default_breakdown_timeout_secs() -> u64 {
    15
}

fn config_error(message: impl Into<String>) -> AutomationError {
    AutomationError::Config(message.into())
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| config_error(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| config_error(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| config_error(format!("Failed to create config directory: {}", e)))?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| config_error(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| config_error(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let gmail = &self.gmail;
        if gmail.api_base_url.trim().is_empty() {
            return Err(config_error("gmail.api_base_url cannot be empty"));
        }
        if gmail.unread_window_days == 0 {
            return Err(config_error("gmail.unread_window_days must be at least 1"));
        }
        // Gmail allows 250 units/sec; a get costs 5
        if gmail.max_concurrent_requests == 0 || gmail.max_concurrent_requests > 50 {
            return Err(config_error(
                "gmail.max_concurrent_requests must be between 1 and 50",
            ));
        }
        if gmail.draft_list_cap == 0 || gmail.draft_list_cap > 500 {
            return Err(config_error("gmail.draft_list_cap must be between 1 and 500"));
        }
        if gmail.count_page_size == 0 || gmail.count_page_size > 500 {
            return Err(config_error("gmail.count_page_size must be between 1 and 500"));
        }
        if gmail.count_page_budget == 0 {
            return Err(config_error("gmail.count_page_budget must be at least 1"));
        }
        if gmail.quota_units_per_second * QUOTA_BURST_SECONDS < QuotaCost::MAX_UNITS as f64 {
            return Err(config_error(format!(
                "gmail.quota_units_per_second must be at least {} so a draft ({} units) fits the bucket",
                QuotaCost::MAX_UNITS as f64 / QUOTA_BURST_SECONDS,
                QuotaCost::MAX_UNITS
            )));
        }
        if gmail.request_timeout_secs == 0 {
            return Err(config_error("gmail.request_timeout_secs must be greater than 0"));
        }

        let automation = &self.automation;
        if automation.candidate_limit == 0 || automation.candidate_limit > 500 {
            return Err(config_error(
                "automation.candidate_limit must be between 1 and 500",
            ));
        }
        if automation.time_budget_secs == 0 {
            return Err(config_error("automation.time_budget_secs must be greater than 0"));
        }
        if automation.schedule_interval_secs == 0 {
            return Err(config_error(
                "automation.schedule_interval_secs must be greater than 0",
            ));
        }

        let classifier = &self.classifier;
        if classifier.classification_model.is_empty() || classifier.reply_model.is_empty() {
            return Err(config_error("classifier models cannot be empty"));
        }
        if !(0.0..=2.0).contains(&classifier.classification_temperature)
            || !(0.0..=2.0).contains(&classifier.reply_temperature)
        {
            return Err(config_error("classifier temperatures must be between 0.0 and 2.0"));
        }
        if classifier.classification_max_tokens == 0 || classifier.reply_max_tokens == 0 {
            return Err(config_error("classifier max tokens must be greater than 0"));
        }

        if self.auth.refresh_threshold_secs < 0 {
            return Err(config_error("auth.refresh_threshold_secs cannot be negative"));
        }

        if self.stats.batch_size == 0 {
            return Err(config_error("stats.batch_size must be greater than 0"));
        }
        if self.stats.breakdown_timeout_secs == 0 {
            return Err(config_error("stats.breakdown_timeout_secs must be greater than 0"));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        Self::default().save(path).await
    }
}
