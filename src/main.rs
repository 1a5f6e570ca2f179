use anyhow::{Context, Result};
use clap::Parser;
use inbox_autodraft::auth::{self, TokenLifecycleManager};
use inbox_autodraft::cli::{self, Cli, Commands, ProgressReporter, SessionAction};
use inbox_autodraft::config::Config;
use inbox_autodraft::error::AutomationError;
use inbox_autodraft::models::Session;
use inbox_autodraft::session::SessionStore;
use indicatif::MultiProgress;
use std::io::Write;
use std::process;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// A writer that prints through MultiProgress so log lines don't tear spinners
#[derive(Clone)]
struct MultiProgressWriter {
    multi: MultiProgress,
    buffer: Vec<u8>,
}

impl Write for MultiProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.buffer.is_empty() {
            let msg = String::from_utf8_lossy(&self.buffer);
            let msg = msg.trim_end_matches('\n');
            if !msg.is_empty() {
                let _ = self.multi.println(msg);
            }
            self.buffer.clear();
        }
        Ok(())
    }
}

impl Drop for MultiProgressWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[derive(Clone)]
struct MultiProgressMakeWriter {
    multi: MultiProgress,
}

impl<'a> MakeWriter<'a> for MultiProgressMakeWriter {
    type Writer = MultiProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MultiProgressWriter {
            multi: self.multi.clone(),
            buffer: Vec::new(),
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        display_error(&e);
        eprintln!("\nFor help, run: inbox-autodraft --help");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    // reqwest and yup-oauth2 both link rustls; pick the provider explicitly
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("inbox_autodraft=debug,info"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("inbox_autodraft=info,warn"))
    };

    let multi_progress = MultiProgress::new();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(MultiProgressMakeWriter {
            multi: multi_progress.clone(),
        })
        .with_target(false)
        .with_thread_ids(false)
        .init();

    match &cli.command {
        Commands::Run => {
            let config = Config::load(&cli.config).await?;
            let reporter = ProgressReporter::with_multi_progress(multi_progress);

            let spinner = reporter.add_spinner("Running automation cycle...");
            let service = cli::build_service(&cli, config).await?;
            let result = service.start().await;
            reporter.finish_spinner(&spinner, "Cycle finished");

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", cli::format_trigger_result(&result));
            }
            if !result.success {
                anyhow::bail!("{}", result.message);
            }
            Ok(())
        }

        Commands::Watch { interval } => {
            let mut config = Config::load(&cli.config).await?;
            if let Some(secs) = interval {
                config.automation.schedule_interval_secs = *secs;
                config.validate()?;
            }

            let service = Arc::new(cli::build_service(&cli, config).await?);
            let shutdown = CancellationToken::new();

            // Ctrl-C ends the schedule and lets an in-flight cycle finish at its next checkpoint
            tokio::spawn({
                let service = Arc::clone(&service);
                let shutdown = shutdown.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::info!("Interrupt received, stopping automation");
                        shutdown.cancel();
                        let _ = service.stop();
                    }
                }
            });

            println!("Watching inbox (Ctrl-C to stop)");
            service.run_scheduled(shutdown).await?;
            println!("Automation stopped");
            Ok(())
        }

        Commands::Stats => {
            let config = Config::load(&cli.config).await?;
            let reporter = ProgressReporter::with_multi_progress(multi_progress);

            let spinner = reporter.add_spinner("Counting messages...");
            let service = cli::build_service(&cli, config).await?;
            let stats = service.statistics().await?;
            reporter.finish_spinner(&spinner, "Statistics collected");

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("{}", cli::format_stats(&stats));
            }
            Ok(())
        }

        Commands::TokenStatus => {
            let config = Config::load(&cli.config).await?;
            let secret = auth::load_application_secret(&config.auth).await?;
            let store: Arc<dyn SessionStore> = Arc::new(cli::session_store(&cli, &config));
            let tokens = TokenLifecycleManager::new(secret, store, &config.auth)?;

            let status = tokens.token_status().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("{}", cli::format_token_status(&status));
            }
            Ok(())
        }

        Commands::Session { action } => {
            let config = Config::load(&cli.config).await?;
            let store = cli::session_store(&cli, &config);

            match action {
                SessionAction::Import { file } => {
                    let content = tokio::fs::read_to_string(file)
                        .await
                        .with_context(|| format!("Failed to read session file {:?}", file))?;
                    let session: Session = serde_json::from_str(&content)
                        .with_context(|| format!("Invalid session JSON in {:?}", file))?;

                    store.save(&session).await?;
                    println!("Stored session for {} at {:?}", session.user_email, store.path());
                }
                SessionAction::Revoke => {
                    store.clear().await?;
                    println!("Removed session at {:?}", store.path());
                }
            }
            Ok(())
        }

        Commands::InitConfig { output, force } => {
            if output.exists() && !force {
                return Err(AutomationError::Config(format!(
                    "Configuration file already exists at {:?}. Use --force to overwrite.",
                    output
                ))
                .into());
            }

            Config::create_example(output).await?;

            println!("Created example configuration file at: {:?}", output);
            println!("\nKey settings to review:");
            println!("  - automation.candidate_limit: unread messages handled per cycle");
            println!("  - automation.schedule_interval_secs: pause between cycles in watch mode");
            println!("  - classifier.classification_model / reply_model: model names");
            println!("  - auth.session_file: where the session is stored");
            println!("\nSecrets come from OPENAI_API_KEY, GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET.");
            Ok(())
        }
    }
}

/// Display error with context
fn display_error(error: &anyhow::Error) {
    eprintln!("Error: {}", error);

    let mut cause = error.source();
    while let Some(e) = cause {
        eprintln!("  Caused by: {}", e);
        cause = e.source();
    }

    if let Some(err) = error.downcast_ref::<AutomationError>() {
        if err.is_auth_failure() {
            eprintln!("\nHint: The session is missing or was rejected.");
            eprintln!("      Sign in again and run: inbox-autodraft session import <file>");
        } else if err.is_rate_limited() {
            eprintln!("\nHint: You've hit Gmail API rate limits.");
            eprintln!("      Wait a few seconds and try again.");
            eprintln!("      Consider reducing gmail.max_concurrent_requests in config.");
        } else if matches!(err, AutomationError::Config(_)) {
            eprintln!("\nHint: Check your configuration file and environment variables.");
            eprintln!("      Run: inbox-autodraft init-config --force");
        }
    }
}
