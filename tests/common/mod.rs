//! Common test utilities and fixtures
#![allow(dead_code)]

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use chrono::{Duration, Utc};
use inbox_autodraft::classifier::Classifier;
use inbox_autodraft::client::MailClient;
use inbox_autodraft::error::Result;
use inbox_autodraft::models::{
    Candidate, Classification, Draft, EmailCategory, EmailMessage, Session,
};
use mockall::mock;
use serde_json::json;

/// Create a test message with default values
pub fn create_test_message(id: &str, conversation_id: &str, subject: &str) -> EmailMessage {
    EmailMessage {
        id: id.to_string(),
        conversation_id: conversation_id.to_string(),
        sender: "customer@example.com".to_string(),
        recipient: "owner@example.com".to_string(),
        subject: subject.to_string(),
        snippet: "Hello, I have a question".to_string(),
        body: "Hello, I have a question about your opening hours.".to_string(),
        timestamp: Utc::now(),
        is_read: false,
        message_id_header: format!("{}@mail.example.com", id),
    }
}

/// An unread candidate in its own conversation
pub fn candidate(id: &str, conversation_id: &str) -> Candidate {
    Candidate::Parsed(create_test_message(id, conversation_id, "Question"))
}

pub fn unparseable(id: &str) -> Candidate {
    Candidate::Unparseable {
        id: id.to_string(),
        reason: "missing threadId".to_string(),
    }
}

/// An existing reply draft in a conversation
pub fn draft_for(conversation_id: &str) -> Draft {
    Draft {
        id: format!("draft_{}", conversation_id),
        conversation_id: conversation_id.to_string(),
        recipient: Some("customer@example.com".to_string()),
        subject: Some("Re: Question".to_string()),
        body_excerpt: None,
    }
}

pub fn classified(category: EmailCategory) -> Classification {
    Classification {
        category,
        confidence: 1.0,
    }
}

/// A session whose access token is good for another hour
pub fn fresh_session() -> Session {
    Session {
        user_email: "owner@example.com".to_string(),
        access_token: "ya29.test-token".to_string(),
        refresh_token: Some("1//refresh-token".to_string()),
        access_token_expiry: Utc::now() + Duration::hours(1),
    }
}

/// Create mock Gmail API message response (JSON)
pub fn mock_gmail_message_response(
    id: &str,
    thread_id: &str,
    from: &str,
    subject: &str,
    body: &str,
) -> serde_json::Value {
    json!({
        "id": id,
        "threadId": thread_id,
        "labelIds": ["INBOX", "UNREAD"],
        "snippet": "Email snippet",
        "payload": {
            "mimeType": "text/plain",
            "headers": [
                {"name": "From", "value": from},
                {"name": "To", "value": "Owner <owner@example.com>"},
                {"name": "Subject", "value": subject},
                {"name": "Message-ID", "value": format!("<{}@mail.example.com>", id)}
            ],
            "body": {
                "size": body.len(),
                "data": URL_SAFE.encode(body)
            }
        },
        "internalDate": "1704124800000",
        "sizeEstimate": 1234
    })
}

/// Create mock Gmail list messages response (JSON)
pub fn mock_gmail_list_response(
    message_ids: Vec<&str>,
    next_page_token: Option<&str>,
) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = message_ids
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "threadId": format!("thread_{}", id)
            })
        })
        .collect();

    let mut response = json!({
        "messages": messages,
        "resultSizeEstimate": messages.len()
    });

    if let Some(token) = next_page_token {
        response["nextPageToken"] = json!(token);
    }

    response
}

mock! {
    pub MailClient {}

    #[async_trait::async_trait]
    impl MailClient for MailClient {
        async fn list_unread(&self, limit: usize) -> Result<Vec<Candidate>>;
        async fn search_messages(&self, query: &str, limit: usize) -> Result<Vec<EmailMessage>>;
        async fn list_all_drafts(&self) -> Result<Vec<Draft>>;
        async fn count_exhaustive(&self, query: &str) -> Result<u64>;
        async fn create_draft(&self, original: &EmailMessage, body: &str) -> Result<String>;
        async fn mark_read(&self, message_id: &str) -> Result<()>;
    }
}

mock! {
    pub Classifier {}

    #[async_trait::async_trait]
    impl Classifier for Classifier {
        async fn classify(&self, subject: &str, body: &str) -> Result<Classification>;
        async fn generate_reply(&self, message: &EmailMessage, category: EmailCategory) -> Result<String>;
    }
}

/// Classifier that files everything as a general inquiry and always answers
pub fn agreeable_classifier() -> MockClassifier {
    let mut classifier = MockClassifier::new();
    classifier
        .expect_classify()
        .returning(|_, _| Ok(classified(EmailCategory::GeneralInquiry)));
    classifier
        .expect_generate_reply()
        .returning(|_, _| Ok("Thanks for reaching out!".to_string()));
    classifier
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_message() {
        let msg = create_test_message("msg1", "thread1", "Test Subject");
        assert_eq!(msg.id, "msg1");
        assert_eq!(msg.conversation_id, "thread1");
        assert_eq!(msg.subject, "Test Subject");
        assert!(!msg.is_read);
    }

    #[test]
    fn test_mock_gmail_list_response() {
        let response = mock_gmail_list_response(vec!["msg1", "msg2"], Some("token123"));
        assert_eq!(response["messages"].as_array().unwrap().len(), 2);
        assert_eq!(response["nextPageToken"], "token123");
    }
}
