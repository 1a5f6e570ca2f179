//! Mailbox statistics
//!
//! Counts come from `count_exhaustive`, never from Gmail's result size
//! estimate. The category breakdown classifies a small sample of recent inbox
//! mail and is best-effort: it runs alongside the counts under its own
//! timeout and falls back to all zeros.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::classifier::Classifier;
use crate::client::MailClient;
use crate::config::StatsConfig;
use crate::error::{AutomationError, Result};
use crate::models::{CategoryCount, EmailCategory, EmailStats, PeriodCounts};

/// Gmail search date, `YYYY/MM/DD`
pub fn format_gmail_date(date: DateTime<Utc>) -> String {
    date.format("%Y/%m/%d").to_string()
}

/// Reporting bucket for a sampled message; anything unknown counts as unrelated
fn bucket(category: EmailCategory) -> EmailCategory {
    match category {
        EmailCategory::Unclassifiable => EmailCategory::Unrelated,
        other => other,
    }
}

pub struct StatsAggregator {
    mail: Arc<dyn MailClient>,
    classifier: Arc<dyn Classifier>,
    config: StatsConfig,
}

impl StatsAggregator {
    pub fn new(mail: Arc<dyn MailClient>, classifier: Arc<dyn Classifier>, config: &StatsConfig) -> Self {
        Self {
            mail,
            classifier,
            config: config.clone(),
        }
    }

    pub async fn get_statistics(&self) -> Result<EmailStats> {
        self.statistics_at(Utc::now()).await
    }

    /// Statistics with the 7 and 30 day windows ending at `now`
    pub async fn statistics_at(&self, now: DateTime<Utc>) -> Result<EmailStats> {
        let week = format_gmail_date(now - ChronoDuration::days(7));
        let month = format_gmail_date(now - ChronoDuration::days(30));

        let inbox_week_query = format!("in:inbox after:{}", week);
        let unread_week_query = format!("in:inbox is:unread after:{}", week);
        let sent_week_query = format!("in:sent after:{}", week);
        let inbox_month_query = format!("in:inbox after:{}", month);
        let sent_month_query = format!("in:sent after:{}", month);

        let breakdown_timeout = Duration::from_secs(self.config.breakdown_timeout_secs);
        let (inbox_week, unread_week, sent_week, inbox_month, sent_month, breakdown) = tokio::join!(
            self.count("inbox, last 7 days", &inbox_week_query),
            self.count("unread, last 7 days", &unread_week_query),
            self.count("sent, last 7 days", &sent_week_query),
            self.count("inbox, last 30 days", &inbox_month_query),
            self.count("sent, last 30 days", &sent_month_query),
            self.bounded_breakdown(&inbox_week_query, breakdown_timeout),
        );

        let category_breakdown = breakdown.unwrap_or_else(|e| {
            warn!("Category breakdown unavailable, reporting zeros: {}", e);
            EmailStats::empty_breakdown()
        });

        let inbox_week = inbox_week?;
        let sent_week = sent_week?;
        let stats = EmailStats {
            total_emails: inbox_week,
            unread_emails: unread_week?,
            sent_emails: sent_week,
            last_7_days: PeriodCounts {
                received: inbox_week,
                sent: sent_week,
            },
            last_30_days: PeriodCounts {
                received: inbox_month?,
                sent: sent_month?,
            },
            category_breakdown,
        };

        info!(
            "Statistics: {} received / {} unread / {} sent in the last 7 days",
            stats.total_emails, stats.unread_emails, stats.sent_emails
        );
        Ok(stats)
    }

    /// A single count; failures other than authentication degrade to 0
    async fn count(&self, description: &str, query: &str) -> Result<u64> {
        match self.mail.count_exhaustive(query).await {
            Ok(count) => {
                debug!("{}: {} messages", description, count);
                Ok(count)
            }
            Err(e) if e.is_auth_failure() => Err(e),
            Err(e) => {
                warn!("Count for {} failed, reporting 0: {}", description, e);
                Ok(0)
            }
        }
    }

    async fn bounded_breakdown(&self, query: &str, limit: Duration) -> Result<Vec<CategoryCount>> {
        tokio::time::timeout(limit, self.category_breakdown(query))
            .await
            .map_err(|_| AutomationError::Timeout(format!("category breakdown after {:?}", limit)))?
    }

    async fn category_breakdown(&self, query: &str) -> Result<Vec<CategoryCount>> {
        let sample = self.mail.search_messages(query, self.config.sample_size).await?;
        debug!("Classifying {} sampled messages for the breakdown", sample.len());

        let mut counts = [0u64; EmailCategory::DRAFTABLE.len()];
        let batch_size = self.config.batch_size.max(1);
        let batches: Vec<_> = sample.chunks(batch_size).collect();

        for (i, batch) in batches.iter().enumerate() {
            let results = join_all(
                batch
                    .iter()
                    .map(|message| self.classifier.classify(&message.subject, &message.body)),
            )
            .await;

            for (message, result) in batch.iter().zip(results) {
                let category = match result {
                    Ok(classification) => bucket(classification.category),
                    Err(e) => {
                        warn!("Failed to classify {} for statistics: {}", message.id, e);
                        EmailCategory::Unrelated
                    }
                };
                if let Some(slot) = EmailCategory::DRAFTABLE.iter().position(|c| *c == category) {
                    counts[slot] += 1;
                }
            }

            if i + 1 < batches.len() {
                tokio::time::sleep(Duration::from_millis(self.config.batch_pause_ms)).await;
            }
        }

        Ok(EmailCategory::DRAFTABLE
            .iter()
            .zip(counts)
            .map(|(category, count)| CategoryCount {
                category: category.display_name().to_string(),
                count,
            })
            .collect())
    }
}
