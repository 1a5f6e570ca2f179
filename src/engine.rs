//! One automation cycle
//!
//! ```text
//! Idle -> Running -> Completed
//!                 -> Stopping -> Completed   (stop token cancelled)
//!                 -> Failed                  (setup call failed)
//! ```
//!
//! Candidates are handled strictly one after another. The stop token is
//! polled at fixed checkpoints only: before classification, before reply
//! generation, before draft creation and after each candidate. An in-flight
//! provider or model call is never interrupted.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::classifier::Classifier;
use crate::client::MailClient;
use crate::config::AutomationConfig;
use crate::dedup::DeduplicationIndex;
use crate::error::{AutomationError, Result};
use crate::models::{Candidate, CycleResult, EmailMessage, RunPhase, RunState};

enum ItemOutcome {
    Drafted { draft_id: String },
    Stopped,
}

pub struct AutomationEngine {
    mail: Arc<dyn MailClient>,
    classifier: Arc<dyn Classifier>,
    candidate_limit: usize,
    state: RunState,
}

impl AutomationEngine {
    pub fn new(
        mail: Arc<dyn MailClient>,
        classifier: Arc<dyn Classifier>,
        config: &AutomationConfig,
    ) -> Self {
        Self {
            mail,
            classifier,
            candidate_limit: config.candidate_limit,
            state: RunState::default(),
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Stop checkpoint: records the request and reports whether to exit
    fn should_stop(&mut self, stop: &CancellationToken) -> bool {
        if stop.is_cancelled() {
            if !self.state.stop_requested {
                info!("Stop requested, leaving the cycle at the next checkpoint");
            }
            self.state.stop_requested = true;
            self.state.phase = RunPhase::Stopping;
            true
        } else {
            false
        }
    }

    fn fail_setup(&mut self, step: &str, e: &AutomationError) {
        error!("Automation cycle failed while {}: {}", step, e);
        self.state.phase = RunPhase::Failed;
        self.state.processed = 0;
        self.state.skipped = 0;
        self.state.failed = 0;
    }

    /// Run one cycle against the mailbox
    ///
    /// Setup failures (listing unread mail or drafts) fail the whole cycle.
    /// Per-candidate failures are counted and the cycle moves on.
    pub async fn run_cycle(&mut self, stop: &CancellationToken) -> Result<CycleResult> {
        self.state = RunState {
            phase: RunPhase::Running,
            ..Default::default()
        };

        let candidates = match self.mail.list_unread(self.candidate_limit).await {
            Ok(candidates) => candidates,
            Err(e) => {
                self.fail_setup("listing unread messages", &e);
                return Err(e);
            }
        };

        if candidates.is_empty() {
            info!("No unread messages to process");
            self.should_stop(stop);
            self.state.phase = RunPhase::Completed;
            return Ok(self.state.clone().into_result());
        }

        let drafts = match self.mail.list_all_drafts().await {
            Ok(drafts) => drafts,
            Err(e) => {
                self.fail_setup("listing drafts", &e);
                return Err(e);
            }
        };
        let mut index = DeduplicationIndex::from_drafts(&drafts);

        info!(
            "Processing {} unread messages ({} conversations already have drafts)",
            candidates.len(),
            index.conversation_count()
        );

        for candidate in candidates {
            if self.should_stop(stop) {
                break;
            }

            let message = match candidate {
                Candidate::Parsed(message) => message,
                Candidate::Unparseable { id, reason } => {
                    debug!("Skipping unparseable message {}: {}", id, reason);
                    self.state.skipped += 1;
                    continue;
                }
            };

            if index.covers(&message.id, &message.conversation_id) {
                debug!(
                    "Skipping {}: conversation {} already has a draft",
                    message.id, message.conversation_id
                );
                self.state.skipped += 1;
                continue;
            }

            match self.process(&message, &mut index, stop).await {
                Ok(ItemOutcome::Drafted { draft_id }) => {
                    self.state.processed += 1;
                    info!(
                        "Drafted reply {} for {} ({})",
                        draft_id, message.id, message.subject
                    );
                }
                Ok(ItemOutcome::Stopped) => break,
                Err(e) => {
                    warn!("Failed to process {}: {}", message.id, e);
                    self.state.failed += 1;
                    self.state.errors.push(format!("Email {}: {}", message.id, e));
                }
            }

            if self.should_stop(stop) {
                break;
            }
        }

        self.state.phase = RunPhase::Completed;
        let result = self.state.clone().into_result();
        info!(
            "Cycle finished: {} processed, {} skipped, {} failed{}",
            result.processed,
            result.skipped,
            result.failed,
            if result.stopped { " (stopped)" } else { "" }
        );
        Ok(result)
    }

    async fn process(
        &mut self,
        message: &EmailMessage,
        index: &mut DeduplicationIndex,
        stop: &CancellationToken,
    ) -> Result<ItemOutcome> {
        let classification = self
            .classifier
            .classify(&message.subject, &message.body)
            .await?;
        debug!(
            "Classified {} as {:?} (confidence {:.2})",
            message.id, classification.category, classification.confidence
        );

        if self.should_stop(stop) {
            return Ok(ItemOutcome::Stopped);
        }
        let body = self
            .classifier
            .generate_reply(message, classification.category)
            .await?;

        if self.should_stop(stop) {
            return Ok(ItemOutcome::Stopped);
        }
        let draft_id = self.mail.create_draft(message, &body).await?;
        // The draft exists now, even if marking read fails below
        index.insert(&message.id, &message.conversation_id);

        self.mail.mark_read(&message.id).await?;
        Ok(ItemOutcome::Drafted { draft_id })
    }
}
