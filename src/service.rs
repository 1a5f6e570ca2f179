//! Trigger surface and scheduler
//!
//! `start()` runs one cycle to completion and `stop()` signals whichever run
//! is registered. Both report a `TriggerResult` and never return an error:
//! failures are soft, with the reason in `message`.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::auth::{TokenLifecycleManager, TokenStatus};
use crate::classifier::Classifier;
use crate::client::MailClientFactory;
use crate::config::Config;
use crate::engine::AutomationEngine;
use crate::error::{AutomationError, Result};
use crate::models::{CycleResult, EmailStats, TriggerResult};
use crate::registry::{RunRegistry, StopOutcome};
use crate::stats::StatsAggregator;

/// How a cycle ended, as seen by the scheduler
struct RunOutcome {
    result: CycleResult,
    /// `stop()` was called, as opposed to the time budget running out
    stop_requested: bool,
}

pub struct AutomationService {
    registry: Arc<RunRegistry>,
    tokens: Arc<TokenLifecycleManager>,
    mail: Arc<dyn MailClientFactory>,
    classifier: Arc<dyn Classifier>,
    config: Config,
}

impl AutomationService {
    pub fn new(
        registry: Arc<RunRegistry>,
        tokens: Arc<TokenLifecycleManager>,
        mail: Arc<dyn MailClientFactory>,
        classifier: Arc<dyn Classifier>,
        config: Config,
    ) -> Self {
        Self {
            registry,
            tokens,
            mail,
            classifier,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    /// Run one automation cycle
    pub async fn start(&self) -> TriggerResult {
        match self.run_once().await {
            Ok(outcome) => TriggerResult::from_cycle(outcome.result),
            Err(e) => TriggerResult::failure(failure_message(&e)),
        }
    }

    /// Ask the registered run to stop at its next checkpoint
    pub fn stop(&self) -> TriggerResult {
        match self.registry.request_stop() {
            StopOutcome::Signalled { run_id } => {
                TriggerResult::acknowledged(format!("Stop signal sent to automation run {}", run_id))
            }
            StopOutcome::NoActiveRun => {
                info!("Stop requested but no automation run is active");
                TriggerResult::failure("No active automation service found")
            }
        }
    }

    async fn run_once(&self) -> Result<RunOutcome> {
        let run_id = Uuid::new_v4().to_string();
        let stop = CancellationToken::new();
        let _guard = self.registry.register(&run_id, stop.clone())?;

        // The budget cancels only the child, so an explicit stop stays distinguishable
        let run_token = stop.child_token();
        let budget = Duration::from_secs(self.config.automation.time_budget_secs);
        let timer = tokio::spawn({
            let run_token = run_token.clone();
            let run_id = run_id.clone();
            async move {
                tokio::select! {
                    _ = tokio::time::sleep(budget) => {
                        warn!("Run {} exceeded its {:?} time budget, stopping", run_id, budget);
                        run_token.cancel();
                    }
                    _ = run_token.cancelled() => {}
                }
            }
        });

        let result = self
            .cycle(&run_token)
            .instrument(info_span!("automation_run", run_id = %run_id))
            .await;
        timer.abort();

        Ok(RunOutcome {
            result: result?,
            stop_requested: stop.is_cancelled(),
        })
    }

    async fn cycle(&self, stop: &CancellationToken) -> Result<CycleResult> {
        let session = self.tokens.load_fresh_session().await?;
        info!("Starting automation cycle for {}", session.user_email);

        let mail = self.mail.connect(&session)?;
        let mut engine = AutomationEngine::new(mail, Arc::clone(&self.classifier), &self.config.automation);
        engine.run_cycle(stop).await
    }

    /// Run cycles now and every `schedule_interval_secs` until stopped
    ///
    /// Exits when `stop()` interrupts a cycle, when the session is rejected
    /// or when `shutdown` is cancelled. Other failures are logged and the
    /// next tick tries again.
    pub async fn run_scheduled(&self, shutdown: CancellationToken) -> Result<()> {
        let period = Duration::from_secs(self.config.automation.schedule_interval_secs);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Scheduling automation every {:?}", period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Scheduler shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            match self.run_once().await {
                Ok(outcome) => {
                    let message = TriggerResult::from_cycle(outcome.result).message;
                    info!("{}", message);
                    if outcome.stop_requested {
                        info!("Automation stopped on request, leaving the scheduler");
                        return Ok(());
                    }
                }
                Err(e) if e.is_auth_failure() => {
                    error!("{}", failure_message(&e));
                    return Err(e);
                }
                Err(e) => warn!("Scheduled cycle failed: {}", e),
            }
        }
    }

    pub async fn statistics(&self) -> Result<EmailStats> {
        let session = self.tokens.load_fresh_session().await?;
        let mail = self.mail.connect(&session)?;
        StatsAggregator::new(mail, Arc::clone(&self.classifier), &self.config.stats)
            .get_statistics()
            .await
    }

    pub async fn token_status(&self) -> Result<TokenStatus> {
        self.tokens.token_status().await
    }
}

fn failure_message(e: &AutomationError) -> String {
    if e.is_auth_failure() {
        format!("Session invalid, re-authenticate: {}", e)
    } else {
        e.to_string()
    }
}
