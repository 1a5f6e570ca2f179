//! Command-line interface

use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::auth::{self, TokenLifecycleManager, TokenStatus};
use crate::classifier::OpenAiClassifier;
use crate::client::GmailClientFactory;
use crate::config::Config;
use crate::error::Result;
use crate::models::{EmailStats, TriggerResult};
use crate::registry::RunRegistry;
use crate::service::AutomationService;
use crate::session::{FileSessionStore, SessionStore};

#[derive(Parser, Debug)]
#[command(name = "inbox-autodraft")]
#[command(version)]
#[command(about = "Drafts replies to unread Gmail messages", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Path to the session file (overrides auth.session_file)
    #[arg(long)]
    pub session_file: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a single automation cycle
    Run,

    /// Run cycles on a schedule until interrupted (Ctrl-C stops the current cycle)
    Watch {
        /// Seconds between cycles (overrides automation.schedule_interval_secs)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Show mailbox statistics
    Stats,

    /// Show the stored session's token expiry
    TokenStatus,

    /// Manage the stored session
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum SessionAction {
    /// Store a session issued by the dashboard's sign-in flow (JSON file)
    Import {
        /// Session JSON with user_email, access_token, refresh_token, access_token_expiry
        file: PathBuf,
    },

    /// Forget the stored session
    Revoke,
}

/// Progress reporter using indicatif
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::with_multi_progress(MultiProgress::new())
    }

    /// Share a `MultiProgress` with the log writer so log lines print above spinners
    pub fn with_multi_progress(multi: MultiProgress) -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        Self {
            multi,
            spinner_style,
        }
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        let _ = self.multi.println(format!("  ✓ {}", msg));
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Session file from the command line or the configuration
pub fn session_store(cli: &Cli, config: &Config) -> FileSessionStore {
    let path = cli
        .session_file
        .clone()
        .unwrap_or_else(|| config.auth.session_file.clone());
    FileSessionStore::new(path)
}

/// Wire the production collaborators into an `AutomationService`
pub async fn build_service(cli: &Cli, config: Config) -> Result<AutomationService> {
    let secret = auth::load_application_secret(&config.auth).await?;
    let store: Arc<dyn SessionStore> = Arc::new(session_store(cli, &config));
    let tokens = Arc::new(TokenLifecycleManager::new(secret, store, &config.auth)?);
    let mail = Arc::new(GmailClientFactory::new(config.gmail.clone())?);
    let classifier = Arc::new(OpenAiClassifier::from_env(&config.classifier)?);

    info!("Automation service ready (candidate limit {})", config.automation.candidate_limit);
    Ok(AutomationService::new(
        Arc::new(RunRegistry::new()),
        tokens,
        mail,
        classifier,
        config,
    ))
}

/// Human-readable summary of a trigger result
pub fn format_trigger_result(result: &TriggerResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "========================================");
    let _ = writeln!(
        out,
        "{} {}",
        if result.success { "✓" } else { "✗" },
        result.message
    );
    let _ = writeln!(out, "========================================");
    let _ = writeln!(out, "Processed: {}", result.processed);
    let _ = writeln!(out, "Skipped:   {}", result.skipped);
    let _ = writeln!(out, "Failed:    {}", result.failed);
    if result.stopped {
        let _ = writeln!(out, "Stopped before all candidates were handled");
    }
    if !result.errors.is_empty() {
        let _ = writeln!(out, "\nErrors:");
        for error in &result.errors {
            let _ = writeln!(out, "  - {}", error);
        }
    }
    let _ = write!(out, "Finished: {}", result.timestamp.format("%Y-%m-%d %H:%M:%S"));
    out
}

/// Markdown table of mailbox statistics
pub fn format_stats(stats: &EmailStats) -> String {
    let mut md = String::new();
    md.push_str("## Mailbox Statistics\n\n");
    md.push_str("| Period | Received | Sent |\n");
    md.push_str("|--------|----------|------|\n");
    let _ = writeln!(
        md,
        "| Last 7 days | {} | {} |",
        stats.last_7_days.received, stats.last_7_days.sent
    );
    let _ = writeln!(
        md,
        "| Last 30 days | {} | {} |",
        stats.last_30_days.received, stats.last_30_days.sent
    );
    let _ = writeln!(md, "\n- **Unread (last 7 days):** {}", stats.unread_emails);

    md.push_str("\n### Categories (sampled)\n\n");
    md.push_str("| Category | Messages |\n");
    md.push_str("|----------|----------|\n");
    for entry in &stats.category_breakdown {
        let _ = writeln!(md, "| {} | {} |", entry.category, entry.count);
    }
    md
}

pub fn format_token_status(status: &TokenStatus) -> String {
    if !status.has_session {
        return "No session stored. Import one with: inbox-autodraft session import <file>".to_string();
    }

    let mut out = String::new();
    if let Some(email) = &status.user_email {
        let _ = writeln!(out, "Account: {}", email);
    }
    if let Some(expires_at) = status.expires_at {
        let _ = writeln!(out, "Access token expires: {}", expires_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    match status.minutes_until_expiry {
        Some(_) if status.is_expired => {
            let _ = writeln!(out, "Status: expired");
        }
        Some(minutes) => {
            let _ = writeln!(out, "Status: valid for {} more minutes", minutes);
        }
        None => {}
    }
    let _ = write!(
        out,
        "Refresh token: {}",
        if status.has_refresh_token { "present" } else { "missing" }
    );
    out
}
