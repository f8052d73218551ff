//! Session lifecycle tests driven through the controller against the
//! in-memory store, a recording mailer, and a disabled reply engine.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use clearclaim_server::app::{end_session, send_message, start_session};
use clearclaim_server::error::ApiError;
use clearclaim_server::notify::{MailError, Mailer};
use clearclaim_server::reply::{GeminiModel, ReplyEngine, MAINTENANCE_NOTICE};
use clearclaim_server::store::{MemoryStore, SessionStore};
use clearclaim_server::types::{
    ChatMessage, ChatSession, MessageRole, SessionStatus, StartSessionBody,
};

#[derive(Default)]
struct RecordingMailer {
    team_calls: AtomicUsize,
    client_calls: AtomicUsize,
    fail: bool,
}

impl RecordingMailer {
    fn failing() -> Self {
        RecordingMailer {
            fail: true,
            ..RecordingMailer::default()
        }
    }

    fn team_count(&self) -> usize {
        self.team_calls.load(Ordering::SeqCst)
    }

    fn client_count(&self) -> usize {
        self.client_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_team_notification(
        &self,
        _session: &ChatSession,
        _messages: &[ChatMessage],
    ) -> Result<(), MailError> {
        self.team_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(MailError("smtp relay unavailable".to_string()));
        }
        Ok(())
    }

    async fn send_visitor_follow_up(&self, _session: &ChatSession) -> Result<(), MailError> {
        self.client_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(MailError("smtp relay unavailable".to_string()));
        }
        Ok(())
    }
}

// No API key configured: every reply is the fixed maintenance notice,
// which keeps these tests deterministic and offline.
fn disabled_engine() -> ReplyEngine<GeminiModel> {
    ReplyEngine::new(None, "primary".to_string(), "secondary".to_string())
}

fn start_body(name: &str, email: &str) -> StartSessionBody {
    StartSessionBody {
        name: name.to_string(),
        email: email.to_string(),
        phone: None,
    }
}

async fn started(store: &MemoryStore) -> String {
    start_session(store, start_body("Alex Rivera", "alex@example.com"))
        .await
        .expect("start_session failed")
}

#[tokio::test]
async fn start_requires_name_and_email() {
    let store = MemoryStore::new();

    let missing_name = start_session(&store, start_body("  ", "alex@example.com")).await;
    assert!(matches!(missing_name, Err(ApiError::Validation(_))));

    let missing_email = start_session(&store, start_body("Alex", "")).await;
    assert!(matches!(missing_email, Err(ApiError::Validation(_))));
}

#[tokio::test]
async fn start_creates_active_session() {
    let store = MemoryStore::new();
    let id = started(&store).await;

    let session = store.get_session(&id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(session.message_count, 0);
    assert_eq!(session.name, "Alex Rivera");
    assert!(session.ended_at.is_none());
    assert!(!session.email_sent_to_team);
    assert!(!session.email_sent_to_client);
}

#[tokio::test]
async fn send_message_pairs_user_and_assistant() {
    let store = MemoryStore::new();
    let engine = disabled_engine();
    let id = started(&store).await;

    let reply = send_message(&store, &engine, &id, "What are your fees?")
        .await
        .unwrap();
    assert_eq!(reply, MAINTENANCE_NOTICE);

    let messages = store.list_messages(&id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, MessageRole::User);
    assert_eq!(messages[0].content, "What are your fees?");
    assert_eq!(messages[1].role, MessageRole::Assistant);
    assert_eq!(messages[1].content, MAINTENANCE_NOTICE);

    let session = store.get_session(&id).await.unwrap().unwrap();
    assert_eq!(session.message_count, 2);
}

#[tokio::test]
async fn send_message_unknown_session_is_not_found() {
    let store = MemoryStore::new();
    let engine = disabled_engine();

    let result = send_message(&store, &engine, "no-such-session", "hi").await;
    assert!(matches!(result, Err(ApiError::NotFound)));
}

#[tokio::test]
async fn send_message_rejected_after_end() {
    let store = MemoryStore::new();
    let engine = disabled_engine();
    let mailer = RecordingMailer::default();
    let id = started(&store).await;

    end_session(&store, &mailer, &id).await.unwrap();

    let result = send_message(&store, &engine, &id, "hi").await;
    assert!(matches!(result, Err(ApiError::InvalidState)));

    // Nothing was persisted by the rejected call.
    assert!(store.list_messages(&id).await.unwrap().is_empty());
}

#[tokio::test]
async fn end_unknown_session_is_not_found() {
    let store = MemoryStore::new();
    let mailer = RecordingMailer::default();

    let result = end_session(&store, &mailer, "no-such-session").await;
    assert!(matches!(result, Err(ApiError::NotFound)));
}

#[tokio::test]
async fn end_session_notifies_team_and_interested_visitor() {
    let store = MemoryStore::new();
    let engine = disabled_engine();
    let mailer = RecordingMailer::default();
    let id = started(&store).await;

    send_message(&store, &engine, &id, "hello").await.unwrap();
    send_message(&store, &engine, &id, "I'd like to book a consultation")
        .await
        .unwrap();

    let outcome = end_session(&store, &mailer, &id).await.unwrap();
    assert!(outcome.success);
    assert!(outcome.email_sent_to_team);
    assert!(outcome.email_sent_to_client);
    assert_eq!(mailer.team_count(), 1);
    assert_eq!(mailer.client_count(), 1);

    let session = store.get_session(&id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Ended);
    assert_eq!(session.message_count, 4);
    assert!(session.email_sent_to_team);
    assert!(session.email_sent_to_client);
}

#[tokio::test]
async fn end_session_is_idempotent() {
    let store = MemoryStore::new();
    let engine = disabled_engine();
    let mailer = RecordingMailer::default();
    let id = started(&store).await;

    send_message(&store, &engine, &id, "tell me about pricing")
        .await
        .unwrap();

    let first = end_session(&store, &mailer, &id).await.unwrap();
    let after_first = store.get_session(&id).await.unwrap().unwrap();

    let second = end_session(&store, &mailer, &id).await.unwrap();
    let after_second = store.get_session(&id).await.unwrap().unwrap();

    assert!(first.success);
    assert!(second.success);
    assert_eq!(first, second);
    assert_eq!(after_first.ended_at, after_second.ended_at);
    // The second call produced no additional sends.
    assert_eq!(mailer.team_count(), 1);
    assert_eq!(mailer.client_count(), 1);
}

#[tokio::test]
async fn short_session_skips_team_notification() {
    let store = MemoryStore::new();
    let mailer = RecordingMailer::default();
    let id = started(&store).await;

    let outcome = end_session(&store, &mailer, &id).await.unwrap();
    assert!(outcome.success);
    assert!(!outcome.email_sent_to_team);
    assert!(!outcome.email_sent_to_client);
    assert_eq!(mailer.team_count(), 0);
    assert_eq!(mailer.client_count(), 0);
}

#[tokio::test]
async fn no_interest_keyword_skips_follow_up() {
    let store = MemoryStore::new();
    let engine = disabled_engine();
    let mailer = RecordingMailer::default();
    let id = started(&store).await;

    send_message(&store, &engine, &id, "hello there").await.unwrap();

    let outcome = end_session(&store, &mailer, &id).await.unwrap();
    assert!(outcome.email_sent_to_team);
    assert!(!outcome.email_sent_to_client);
    assert_eq!(mailer.client_count(), 0);
}

#[tokio::test]
async fn failed_sends_leave_flags_false_but_end_succeeds() {
    let store = MemoryStore::new();
    let engine = disabled_engine();
    let mailer = RecordingMailer::failing();
    let id = started(&store).await;

    send_message(&store, &engine, &id, "what does denial management cost?")
        .await
        .unwrap();

    let outcome = end_session(&store, &mailer, &id).await.unwrap();
    assert!(outcome.success);
    assert!(!outcome.email_sent_to_team);
    assert!(!outcome.email_sent_to_client);
    // Both sends were attempted despite failing.
    assert_eq!(mailer.team_count(), 1);
    assert_eq!(mailer.client_count(), 1);

    let session = store.get_session(&id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Ended);
    assert!(!session.email_sent_to_team);
    assert!(!session.email_sent_to_client);
}

#[tokio::test]
async fn end_session_reconciles_drifted_message_count() {
    let store = MemoryStore::new();
    let engine = disabled_engine();
    let mailer = RecordingMailer::default();
    let id = started(&store).await;

    send_message(&store, &engine, &id, "hi").await.unwrap();

    // Simulate a partial-write race leaving the stored counter wrong.
    let mut drifted = store.get_session(&id).await.unwrap().unwrap();
    drifted.message_count = 99;
    store.put_session(drifted);

    end_session(&store, &mailer, &id).await.unwrap();

    let session = store.get_session(&id).await.unwrap().unwrap();
    assert_eq!(session.message_count, 2);
}

#[tokio::test]
async fn ending_already_resolved_session_echoes_stored_flags() {
    let store = MemoryStore::new();
    let mailer = RecordingMailer::default();

    store.put_session(ChatSession {
        id: "resolved-1".to_string(),
        name: "Sam".to_string(),
        email: "sam@example.com".to_string(),
        phone: None,
        status: SessionStatus::Resolved,
        started_at: "2026-08-20T09:00:00+00:00".to_string(),
        ended_at: Some("2026-08-20T09:10:00+00:00".to_string()),
        message_count: 6,
        email_sent_to_team: true,
        email_sent_to_client: false,
    });

    let outcome = end_session(&store, &mailer, "resolved-1").await.unwrap();
    assert!(outcome.success);
    assert!(outcome.email_sent_to_team);
    assert!(!outcome.email_sent_to_client);
    assert_eq!(mailer.team_count(), 0);
}
