//! HTTP-level tests of the Gmail REST client

mod common;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use common::*;
use inbox_autodraft::client::{GmailApiClient, MailClient};
use inbox_autodraft::config::GmailConfig;
use inbox_autodraft::models::Candidate;
use inbox_autodraft::rate_limiter::QuotaRateLimiter;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API: &str = "/gmail/v1/users/me";

fn config(server: &MockServer) -> GmailConfig {
    GmailConfig {
        api_base_url: format!("{}{}", server.uri(), API),
        max_retries: 2,
        retry_base_delay_ms: 1,
        ..Default::default()
    }
}

fn client_with(config: &GmailConfig) -> GmailApiClient {
    GmailApiClient::new(
        reqwest::Client::new(),
        "ya29.test-token",
        config,
        QuotaRateLimiter::new(),
    )
}

fn client(server: &MockServer) -> GmailApiClient {
    client_with(&config(server))
}

async fn mount_message(server: &MockServer, id: &str, thread_id: &str) {
    Mock::given(method("GET"))
        .and(path(format!("{}/messages/{}", API, id)))
        .and(query_param("format", "full"))
        .respond_with(ResponseTemplate::new(200).set_body_json(mock_gmail_message_response(
            id,
            thread_id,
            "Alice Example <alice@example.com>",
            "Opening hours",
            "Are you open on Sundays?",
        )))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_list_unread_hydrates_in_listing_order() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{}/messages", API)))
        .and(query_param("q", "in:inbox is:unread newer_than:30d"))
        .and(query_param("maxResults", "50"))
        .and(header("authorization", "Bearer ya29.test-token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(mock_gmail_list_response(vec!["m1", "m2", "m3"], None)),
        )
        .expect(1)
        .mount(&server)
        .await;
    mount_message(&server, "m1", "t1").await;
    mount_message(&server, "m3", "t3").await;
    Mock::given(method("GET"))
        .and(path(format!("{}/messages/m2", API)))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": {"code": 404}})))
        .mount(&server)
        .await;

    let candidates = client(&server).list_unread(50).await.unwrap();

    let ids: Vec<&str> = candidates.iter().map(|c| c.id()).collect();
    assert_eq!(ids, vec!["m1", "m3"]);
    match &candidates[0] {
        Candidate::Parsed(message) => {
            assert_eq!(message.conversation_id, "t1");
            assert_eq!(message.sender, "alice@example.com");
            assert_eq!(message.recipient, "owner@example.com");
            assert_eq!(message.body, "Are you open on Sundays?");
            assert_eq!(message.message_id_header, "m1@mail.example.com");
            assert!(!message.is_read);
        }
        other => panic!("expected a parsed candidate, got {:?}", other),
    }
}

#[tokio::test]
async fn test_message_without_thread_is_unparseable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{}/messages", API)))
        .respond_with(ResponseTemplate::new(200).set_body_json(mock_gmail_list_response(vec!["m1"], None)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{}/messages/m1", API)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "m1",
            "labelIds": ["INBOX", "UNREAD"],
            "snippet": "orphan"
        })))
        .mount(&server)
        .await;

    let candidates = client(&server).list_unread(10).await.unwrap();
    assert_eq!(candidates.len(), 1);
    assert!(matches!(&candidates[0], Candidate::Unparseable { id, .. } if id == "m1"));
}

#[tokio::test]
async fn test_count_exhaustive_sums_every_page() {
    let server = MockServer::start().await;
    let config = GmailConfig {
        count_page_size: 2,
        ..config(&server)
    };

    Mock::given(method("GET"))
        .and(path(format!("{}/messages", API)))
        .and(query_param("q", "in:sent after:2026/01/01"))
        .and(query_param_is_missing("pageToken"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(mock_gmail_list_response(vec!["a", "b"], Some("p2"))),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{}/messages", API)))
        .and(query_param("pageToken", "p2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(mock_gmail_list_response(vec!["c"], None)))
        .expect(1)
        .mount(&server)
        .await;

    let count = client_with(&config)
        .count_exhaustive("in:sent after:2026/01/01")
        .await
        .unwrap();
    assert_eq!(count, 3);
}

#[tokio::test]
async fn test_count_exhaustive_empty_result() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{}/messages", API)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"resultSizeEstimate": 0})))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(client(&server).count_exhaustive("in:inbox").await.unwrap(), 0);
}

#[tokio::test]
async fn test_count_exhaustive_stops_at_page_budget() {
    let server = MockServer::start().await;
    let config = GmailConfig {
        count_page_size: 2,
        count_page_budget: 3,
        ..config(&server)
    };

    // Every page is full and points at another one
    Mock::given(method("GET"))
        .and(path(format!("{}/messages", API)))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(mock_gmail_list_response(vec!["a", "b"], Some("more"))),
        )
        .expect(3)
        .mount(&server)
        .await;

    let client = client_with(&config);
    assert_eq!(client.count_exhaustive("in:inbox").await.unwrap(), 6);
}

#[tokio::test]
async fn test_create_draft_replies_in_thread() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("{}/drafts", API)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "r-123",
            "message": {"id": "x1", "threadId": "t1", "labelIds": ["DRAFT"]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let original = create_test_message("m1", "t1", "Question");
    let draft_id = client(&server)
        .create_draft(&original, "Thanks for writing.\nWe open at 9.")
        .await
        .unwrap();
    assert_eq!(draft_id, "r-123");

    let requests = server.received_requests().await.unwrap();
    let payload: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(payload["message"]["threadId"], "t1");

    let raw = URL_SAFE_NO_PAD
        .decode(payload["message"]["raw"].as_str().unwrap())
        .unwrap();
    let raw = String::from_utf8(raw).unwrap();
    assert!(raw.contains("In-Reply-To: <m1@mail.example.com>\r\n"));
    assert!(raw.contains("References: <m1@mail.example.com>\r\n"));
    assert!(raw.contains("To: customer@example.com\r\n"));
    assert!(raw.contains("Subject: Re: Question\r\n"));
    assert!(raw.ends_with("\r\n\r\nThanks for writing.\r\nWe open at 9."));
}

#[tokio::test]
async fn test_mark_read_removes_unread_label() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("{}/messages/m1/modify", API)))
        .and(body_json(json!({"removeLabelIds": ["UNREAD"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "m1",
            "threadId": "t1",
            "labelIds": ["INBOX"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).mark_read("m1").await.unwrap();
}

#[tokio::test]
async fn test_rejected_token_is_an_auth_failure_without_retry() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{}/messages", API)))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"code": 401, "message": "Invalid Credentials"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).list_unread(5).await.unwrap_err();
    assert!(err.is_auth_failure());
    assert_eq!(err.status(), Some(401));
    assert!(err.to_string().contains("re-authenticate"));
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("{}/messages/m1/modify", API)))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({"error": {"code": 503}})))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{}/messages/m1/modify", API)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "m1", "threadId": "t1"})))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).mark_read("m1").await.unwrap();
}

#[tokio::test]
async fn test_list_all_drafts_hydrates_up_to_limit() {
    let server = MockServer::start().await;
    let config = GmailConfig {
        draft_hydrate_limit: 1,
        ..config(&server)
    };

    Mock::given(method("GET"))
        .and(path(format!("{}/drafts", API)))
        .and(query_param("maxResults", "500"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "drafts": [
                {"id": "d1", "message": {"id": "x1", "threadId": "t1"}},
                {"id": "d2", "message": {"id": "x2", "threadId": "t2"}},
                {"id": "d3", "message": {"id": "x3"}}
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{}/drafts/d1", API)))
        .and(query_param("format", "metadata"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "d1",
            "message": {
                "id": "x1",
                "threadId": "t1",
                "snippet": "Thanks for reaching out",
                "payload": {
                    "headers": [
                        {"name": "To", "value": "Alice <alice@example.com>"},
                        {"name": "Subject", "value": "Re: Opening hours"}
                    ]
                }
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let drafts = client_with(&config).list_all_drafts().await.unwrap();

    // d3 has no conversation and is left out
    assert_eq!(drafts.len(), 2);
    assert_eq!(drafts[0].id, "d1");
    assert_eq!(drafts[0].recipient.as_deref(), Some("alice@example.com"));
    assert_eq!(drafts[0].subject.as_deref(), Some("Re: Opening hours"));
    assert_eq!(drafts[1].conversation_id, "t2");
    assert_eq!(drafts[1].recipient, None);
}
