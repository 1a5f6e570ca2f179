//! Inbox Auto-Draft
//!
//! Automation engine that drafts replies to unread Gmail messages. A cycle
//! lists unread inbox mail, skips conversations that already carry a draft,
//! classifies each message with a language model, generates a reply for the
//! category, stores it as a reply draft in the same conversation and marks the
//! original read.
//!
//! # Overview
//!
//! - **Authentication**: session storage and proactive access token refresh
//! - **Mail access**: Gmail REST client with quota limiting and retry logic
//! - **Classification**: chat-completions classifier and reply generator
//! - **Automation**: one cancellable cycle at a time, stopped cooperatively
//! - **Statistics**: exhaustive counts and a sampled category breakdown
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use inbox_autodraft::{
//!     auth, AutomationService, Config, FileSessionStore, GmailClientFactory,
//!     OpenAiClassifier, RunRegistry, TokenLifecycleManager,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!
//!     let secret = auth::load_application_secret(&config.auth).await?;
//!     let store = Arc::new(FileSessionStore::new(&config.auth.session_file));
//!     let tokens = Arc::new(TokenLifecycleManager::new(secret, store, &config.auth)?);
//!
//!     let service = AutomationService::new(
//!         Arc::new(RunRegistry::new()),
//!         tokens,
//!         Arc::new(GmailClientFactory::new(config.gmail.clone())?),
//!         Arc::new(OpenAiClassifier::from_env(&config.classifier)?),
//!         config,
//!     );
//!
//!     let result = service.start().await;
//!     println!("{}", result.message);
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - OAuth client credentials and token refresh
//! - [`classifier`] - Model-backed classification and reply generation
//! - [`cli`] - Command-line interface
//! - [`client`] - Gmail client trait, REST implementation and retry policy
//! - [`compose`] - Reply subjects and RFC 822 reply construction
//! - [`config`] - Configuration management
//! - [`dedup`] - Per-cycle draft deduplication index
//! - [`engine`] - The automation cycle
//! - [`error`] - Error types and result aliases
//! - [`models`] - Core data structures
//! - [`rate_limiter`] - Gmail quota unit limiter
//! - [`registry`] - Active run registry for stop signals
//! - [`service`] - `start`/`stop` triggers and the scheduler
//! - [`session`] - Session persistence
//! - [`stats`] - Mailbox statistics

pub mod auth;
pub mod classifier;
pub mod cli;
pub mod client;
pub mod compose;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod models;
pub mod rate_limiter;
pub mod registry;
pub mod service;
pub mod session;
pub mod stats;

pub use error::{AutomationError, Result};

// Core data models
pub use models::{
    Candidate, Classification, CycleResult, Draft, EmailCategory, EmailMessage, EmailStats,
    RunPhase, RunState, Session, TriggerResult,
};

pub use auth::{TokenLifecycleManager, TokenStatus};
pub use classifier::{Classifier, OpenAiClassifier};
pub use client::{GmailApiClient, GmailClientFactory, MailClient, MailClientFactory, RetryPolicy};
pub use config::Config;
pub use dedup::DeduplicationIndex;
pub use engine::AutomationEngine;
pub use rate_limiter::QuotaRateLimiter;
pub use registry::{RunGuard, RunRegistry, StopOutcome};
pub use service::AutomationService;
pub use session::{FileSessionStore, MemorySessionStore, SessionStore};
pub use stats::StatsAggregator;

// CLI types (for binary usage)
pub use cli::{Cli, Commands, ProgressReporter};
