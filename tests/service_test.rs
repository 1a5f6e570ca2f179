//! Trigger surface, run registry and scheduler

mod common;

use common::*;
use async_trait::async_trait;
use inbox_autodraft::auth::TokenLifecycleManager;
use inbox_autodraft::classifier::Classifier;
use inbox_autodraft::client::MailClient;
use inbox_autodraft::config::{AuthConfig, Config};
use inbox_autodraft::error::{AutomationError, Result};
use inbox_autodraft::models::{Classification, EmailCategory, EmailMessage, Session};
use inbox_autodraft::registry::RunRegistry;
use inbox_autodraft::service::AutomationService;
use inbox_autodraft::session::MemorySessionStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use yup_oauth2::ApplicationSecret;

fn tokens(session: Option<Session>) -> Arc<TokenLifecycleManager> {
    let secret = ApplicationSecret {
        client_id: "client".to_string(),
        client_secret: "secret".to_string(),
        token_uri: "http://127.0.0.1:9/token".to_string(),
        ..Default::default()
    };
    Arc::new(
        TokenLifecycleManager::new(
            secret,
            Arc::new(MemorySessionStore::new(session)),
            &AuthConfig::default(),
        )
        .unwrap(),
    )
}

/// Takes `delay` to classify each message
struct SlowClassifier {
    delay: Duration,
}

#[async_trait]
impl Classifier for SlowClassifier {
    async fn classify(&self, _subject: &str, _body: &str) -> Result<Classification> {
        tokio::time::sleep(self.delay).await;
        Ok(classified(EmailCategory::GeneralInquiry))
    }

    async fn generate_reply(&self, _message: &EmailMessage, _category: EmailCategory) -> Result<String> {
        Ok("Thanks for reaching out!".to_string())
    }
}

fn service_with(
    registry: Arc<RunRegistry>,
    session: Option<Session>,
    mail: MockMailClient,
    classifier: impl Classifier + 'static,
) -> AutomationService {
    let mail: Arc<dyn MailClient> = Arc::new(mail);
    let factory = move |_: &Session| -> Result<Arc<dyn MailClient>> { Ok(Arc::clone(&mail)) };
    AutomationService::new(
        registry,
        tokens(session),
        Arc::new(factory),
        Arc::new(classifier),
        Config::default(),
    )
}

#[tokio::test]
async fn test_start_runs_a_cycle() {
    let mut mail = MockMailClient::new();
    mail.expect_list_unread()
        .returning(|_| Ok(vec![candidate("m1", "t1"), candidate("m2", "t2")]));
    mail.expect_list_all_drafts().returning(|| Ok(vec![draft_for("t2")]));
    mail.expect_create_draft().times(1).returning(|_, _| Ok("d1".to_string()));
    mail.expect_mark_read().times(1).returning(|_| Ok(()));

    let registry = Arc::new(RunRegistry::new());
    let service = service_with(
        Arc::clone(&registry),
        Some(fresh_session()),
        mail,
        agreeable_classifier(),
    );

    let result = service.start().await;
    assert!(result.success);
    assert_eq!(result.message, "Automation completed: 1 processed, 1 skipped, 0 failed");
    assert!(!result.stopped);
    assert!(!registry.has_active());
}

#[tokio::test]
async fn test_stop_without_active_run_is_a_soft_failure() {
    let service = service_with(
        Arc::new(RunRegistry::new()),
        Some(fresh_session()),
        MockMailClient::new(),
        MockClassifier::new(),
    );

    let result = service.stop();
    assert!(!result.success);
    assert_eq!(result.message, "No active automation service found");
    assert_eq!(result.processed, 0);
}

#[tokio::test]
async fn test_start_while_running_is_rejected() {
    let registry = Arc::new(RunRegistry::new());
    let _busy = registry.register("busy-run", CancellationToken::new()).unwrap();

    let mut mail = MockMailClient::new();
    mail.expect_list_unread().never();
    let service = service_with(
        Arc::clone(&registry),
        Some(fresh_session()),
        mail,
        MockClassifier::new(),
    );

    let result = service.start().await;
    assert!(!result.success);
    assert!(result.message.contains("busy-run"));
    assert_eq!(registry.active_run_id().as_deref(), Some("busy-run"));
}

#[tokio::test]
async fn test_stop_reaches_the_running_cycle() {
    let registry = Arc::new(RunRegistry::new());

    let mut mail = MockMailClient::new();
    mail.expect_list_unread()
        .returning(|_| Ok(vec![candidate("m1", "t1"), candidate("m2", "t2"), candidate("m3", "t3")]));
    mail.expect_list_all_drafts().returning(|| Ok(vec![]));
    mail.expect_create_draft().times(1).returning(|_, _| Ok("d1".to_string()));
    // Another caller asks to stop while the first candidate is being finished
    let stopper = Arc::clone(&registry);
    mail.expect_mark_read().times(1).returning(move |_| {
        stopper.request_stop();
        Ok(())
    });

    let service = service_with(
        Arc::clone(&registry),
        Some(fresh_session()),
        mail,
        agreeable_classifier(),
    );

    let result = service.start().await;
    assert!(result.success);
    assert!(result.stopped);
    assert_eq!(result.processed, 1);
    assert!(result.message.starts_with("Automation stopped"));
    assert!(!registry.has_active());
}

#[tokio::test]
async fn test_missing_session_asks_for_reauthentication() {
    let mut mail = MockMailClient::new();
    mail.expect_list_unread().never();

    let registry = Arc::new(RunRegistry::new());
    let service = service_with(Arc::clone(&registry), None, mail, MockClassifier::new());

    let result = service.start().await;
    assert!(!result.success);
    assert!(result.message.starts_with("Session invalid, re-authenticate"));
    assert!(!registry.has_active());
}

#[tokio::test]
async fn test_scheduler_exits_on_stop() {
    let registry = Arc::new(RunRegistry::new());

    let mut mail = MockMailClient::new();
    mail.expect_list_unread()
        .times(1)
        .returning(|_| Ok(vec![candidate("m1", "t1"), candidate("m2", "t2")]));
    mail.expect_list_all_drafts().returning(|| Ok(vec![]));
    mail.expect_create_draft().returning(|_, _| Ok("d".to_string()));
    let stopper = Arc::clone(&registry);
    mail.expect_mark_read().times(1).returning(move |_| {
        stopper.request_stop();
        Ok(())
    });

    let service = service_with(registry, Some(fresh_session()), mail, agreeable_classifier());
    service.run_scheduled(CancellationToken::new()).await.unwrap();
}

#[tokio::test]
async fn test_scheduler_exits_on_rejected_session() {
    let mut mail = MockMailClient::new();
    mail.expect_list_unread().times(1).returning(|_| {
        Err(AutomationError::Provider {
            status: 401,
            body: "Invalid Credentials".to_string(),
        })
    });

    let service = service_with(
        Arc::new(RunRegistry::new()),
        Some(fresh_session()),
        mail,
        MockClassifier::new(),
    );

    let err = service.run_scheduled(CancellationToken::new()).await.unwrap_err();
    assert!(err.is_auth_failure());
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_keeps_going_after_transient_failure() {
    let mut mail = MockMailClient::new();
    let mut seq = mockall::Sequence::new();
    mail.expect_list_unread()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Err(AutomationError::Network("connection reset".to_string())));
    mail.expect_list_unread()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(vec![]));

    let shutdown = CancellationToken::new();
    let service = Arc::new(service_with(
        Arc::new(RunRegistry::new()),
        Some(fresh_session()),
        mail,
        MockClassifier::new(),
    ));

    let handle = tokio::spawn({
        let service = Arc::clone(&service);
        let shutdown = shutdown.clone();
        async move { service.run_scheduled(shutdown).await }
    });

    // Two ticks: the failed cycle and the empty one after it
    tokio::time::sleep(std::time::Duration::from_secs(50)).await;
    shutdown.cancel();

    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_statistics_use_the_session_client() {
    let mut mail = MockMailClient::new();
    mail.expect_count_exhaustive().returning(|query| {
        Ok(if query.starts_with("in:sent") { 2 } else { 7 })
    });
    mail.expect_search_messages().returning(|_, _| Ok(vec![]));

    let service = service_with(
        Arc::new(RunRegistry::new()),
        Some(fresh_session()),
        mail,
        MockClassifier::new(),
    );

    let stats = service.statistics().await.unwrap();
    assert_eq!(stats.total_emails, 7);
    assert_eq!(stats.sent_emails, 2);
    assert_eq!(stats.category_breakdown.iter().map(|c| c.count).sum::<u64>(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_time_budget_stops_the_cycle() {
    let mut mail = MockMailClient::new();
    mail.expect_list_unread()
        .returning(|_| Ok(vec![candidate("m1", "t1"), candidate("m2", "t2"), candidate("m3", "t3")]));
    mail.expect_list_all_drafts().returning(|| Ok(vec![]));
    mail.expect_create_draft().times(1).returning(|_, _| Ok("d1".to_string()));
    mail.expect_mark_read().times(1).returning(|_| Ok(()));

    let registry = Arc::new(RunRegistry::new());
    // Default budget is 300s: the second classification runs past it
    let service = service_with(
        Arc::clone(&registry),
        Some(fresh_session()),
        mail,
        SlowClassifier {
            delay: Duration::from_secs(200),
        },
    );

    let result = service.start().await;
    assert!(result.success);
    assert!(result.stopped);
    assert_eq!(result.processed, 1);
    assert!(result.message.starts_with("Automation stopped"));
    assert!(!registry.has_active());
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_keeps_going_after_time_budget() {
    let shutdown = CancellationToken::new();

    let mut mail = MockMailClient::new();
    let mut seq = mockall::Sequence::new();
    mail.expect_list_unread()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(vec![candidate("m1", "t1"), candidate("m2", "t2"), candidate("m3", "t3")]));
    let finished = shutdown.clone();
    mail.expect_list_unread()
        .times(1)
        .in_sequence(&mut seq)
        .returning(move |_| {
            finished.cancel();
            Ok(vec![])
        });
    mail.expect_list_all_drafts().returning(|| Ok(vec![]));
    mail.expect_create_draft().times(1).returning(|_, _| Ok("d1".to_string()));
    mail.expect_mark_read().times(1).returning(|_| Ok(()));

    let service = service_with(
        Arc::new(RunRegistry::new()),
        Some(fresh_session()),
        mail,
        SlowClassifier {
            delay: Duration::from_secs(200),
        },
    );

    service.run_scheduled(shutdown).await.unwrap();
}
