use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A normalized inbound message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmailMessage {
    pub id: String,
    pub conversation_id: String,
    /// Bare sender address
    pub sender: String,
    /// Bare recipient address
    pub recipient: String,
    pub subject: String,
    pub snippet: String,
    /// Plain-text body, at most 500 characters
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
    /// RFC 822 Message-ID without angle brackets, or the provider id
    pub message_id_header: String,
}

/// An unread message offered to the engine
#[derive(Debug, Clone, PartialEq)]
pub enum Candidate {
    Parsed(EmailMessage),
    /// Loaded but malformed; skipped, never drafted
    Unparseable { id: String, reason: String },
}

impl Candidate {
    pub fn id(&self) -> &str {
        match self {
            Candidate::Parsed(message) => &message.id,
            Candidate::Unparseable { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Classification {
    pub category: EmailCategory,
    pub confidence: f32,
}

impl Classification {
    pub fn unclassifiable() -> Self {
        Self {
            category: EmailCategory::Unclassifiable,
            confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EmailCategory {
    GeneralInquiry,
    ProductOverview,
    AppointmentScheduling,
    Feedback,
    Unrelated,
    Unclassifiable,
}

impl EmailCategory {
    /// Categories a message can be drafted for, in reporting order
    pub const DRAFTABLE: [EmailCategory; 5] = [
        EmailCategory::GeneralInquiry,
        EmailCategory::ProductOverview,
        EmailCategory::AppointmentScheduling,
        EmailCategory::Feedback,
        EmailCategory::Unrelated,
    ];

    /// Map a model output token to a category
    pub fn from_wire(token: &str) -> Self {
        match token.trim().to_ascii_uppercase().as_str() {
            "GENERAL_INQUIRY" => EmailCategory::GeneralInquiry,
            "PRODUCT_OVERVIEW" | "PRODUCT_SERVICE_OVERVIEW" => EmailCategory::ProductOverview,
            "APPOINTMENT_SCHEDULING" => EmailCategory::AppointmentScheduling,
            "FEEDBACK" | "GENERAL_FEEDBACK_SUGGESTIONS" => EmailCategory::Feedback,
            "UNRELATED" => EmailCategory::Unrelated,
            _ => EmailCategory::Unclassifiable,
        }
    }

    pub fn wire_token(&self) -> &'static str {
        match self {
            EmailCategory::GeneralInquiry => "GENERAL_INQUIRY",
            EmailCategory::ProductOverview => "PRODUCT_SERVICE_OVERVIEW",
            EmailCategory::AppointmentScheduling => "APPOINTMENT_SCHEDULING",
            EmailCategory::Feedback => "GENERAL_FEEDBACK_SUGGESTIONS",
            EmailCategory::Unrelated => "UNRELATED",
            EmailCategory::Unclassifiable => "UNABLE_TO_CLASSIFY",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            EmailCategory::GeneralInquiry => "General Inquiry",
            EmailCategory::ProductOverview => "Product/Service Overview",
            EmailCategory::AppointmentScheduling => "Appointment Scheduling",
            EmailCategory::Feedback => "Feedback & Suggestions",
            EmailCategory::Unrelated => "Unrelated",
            EmailCategory::Unclassifiable => "Unable to Classify",
        }
    }
}

impl fmt::Display for EmailCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// An existing reply draft in the mailbox
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Draft {
    pub id: String,
    pub conversation_id: String,
    pub recipient: Option<String>,
    pub subject: Option<String>,
    pub body_excerpt: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum RunPhase {
    #[default]
    Idle,
    Running,
    Stopping,
    Completed,
    Failed,
}

/// Progress of a single automation cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunState {
    pub phase: RunPhase,
    pub stop_requested: bool,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl RunState {
    pub fn into_result(self) -> CycleResult {
        CycleResult {
            processed: self.processed,
            skipped: self.skipped,
            failed: self.failed,
            errors: self.errors,
            stopped: self.stop_requested,
        }
    }
}

/// Outcome of one engine cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CycleResult {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    pub stopped: bool,
}

/// What the trigger surface reports back to its caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerResult {
    pub success: bool,
    pub message: String,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    pub stopped: bool,
    pub timestamp: DateTime<Utc>,
}

impl TriggerResult {
    pub fn from_cycle(result: CycleResult) -> Self {
        let message = if result.stopped {
            format!(
                "Automation stopped: {} processed, {} skipped, {} failed",
                result.processed, result.skipped, result.failed
            )
        } else {
            format!(
                "Automation completed: {} processed, {} skipped, {} failed",
                result.processed, result.skipped, result.failed
            )
        };

        Self {
            success: true,
            message,
            processed: result.processed,
            skipped: result.skipped,
            failed: result.failed,
            errors: result.errors,
            stopped: result.stopped,
            timestamp: Utc::now(),
        }
    }

    /// A failure reported to the caller without counters
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            processed: 0,
            skipped: 0,
            failed: 0,
            errors: Vec::new(),
            stopped: false,
            timestamp: Utc::now(),
        }
    }

    pub fn acknowledged(message: impl Into<String>) -> Self {
        Self {
            success: true,
            ..Self::failure(message)
        }
    }
}

/// Authenticated mailbox session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub user_email: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub access_token_expiry: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PeriodCounts {
    pub received: u64,
    pub sent: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryCount {
    pub category: String,
    pub count: u64,
}

/// Mailbox statistics for the dashboard
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmailStats {
    pub total_emails: u64,
    pub unread_emails: u64,
    pub sent_emails: u64,
    pub last_7_days: PeriodCounts,
    pub last_30_days: PeriodCounts,
    pub category_breakdown: Vec<CategoryCount>,
}

impl EmailStats {
    /// Breakdown with every reporting category at zero
    pub fn empty_breakdown() -> Vec<CategoryCount> {
        EmailCategory::DRAFTABLE
            .iter()
            .map(|category| CategoryCount {
                category: category.display_name().to_string(),
                count: 0,
            })
            .collect()
    }
}
