use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::types::{ChatMessage, ChatSession, MessageRole, SessionStatus};

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct StoreError(pub String);

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError(err.to_string())
    }
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Gateway to the session tables. Every method is an independent atomic
/// call; the controller never asks for a multi-row transaction.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: &ChatSession) -> Result<(), StoreError>;

    async fn get_session(&self, id: &str) -> Result<Option<ChatSession>, StoreError>;

    async fn insert_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<(), StoreError>;

    /// Messages for a session, oldest first.
    async fn list_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>, StoreError>;

    async fn bump_message_count(&self, id: &str, delta: i32) -> Result<(), StoreError>;

    async fn mark_ended(
        &self,
        id: &str,
        ended_at: &str,
        message_count: i32,
    ) -> Result<(), StoreError>;

    async fn set_notification_flags(
        &self,
        id: &str,
        team: bool,
        client: bool,
    ) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }
}

fn session_from_row(row: sqlx::postgres::PgRow) -> ChatSession {
    ChatSession {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        phone: row.get("phone"),
        status: SessionStatus::parse(&row.get::<String, _>("status")),
        started_at: row.get("started_at"),
        ended_at: row.get("ended_at"),
        message_count: row.get("message_count"),
        email_sent_to_team: row.get("email_sent_to_team"),
        email_sent_to_client: row.get("email_sent_to_client"),
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn insert_session(&self, session: &ChatSession) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO chat_sessions \
             (id, name, email, phone, status, started_at, ended_at, message_count, \
              email_sent_to_team, email_sent_to_client) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)",
        )
        .bind(&session.id)
        .bind(&session.name)
        .bind(&session.email)
        .bind(&session.phone)
        .bind(session.status.as_str())
        .bind(&session.started_at)
        .bind(&session.ended_at)
        .bind(session.message_count)
        .bind(session.email_sent_to_team)
        .bind(session.email_sent_to_client)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<ChatSession>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, email, phone, status, started_at, ended_at, message_count, \
                    email_sent_to_team, email_sent_to_client \
             FROM chat_sessions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(session_from_row))
    }

    async fn insert_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO chat_messages (id, session_id, role, content, created_at) \
             VALUES ($1,$2,$3,$4,$5)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(session_id)
        .bind(role.as_str())
        .bind(content)
        .bind(now_iso())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, session_id, role, content, created_at \
             FROM chat_messages WHERE session_id = $1 ORDER BY created_at ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| ChatMessage {
                id: row.get("id"),
                session_id: row.get("session_id"),
                role: MessageRole::parse(&row.get::<String, _>("role")),
                content: row.get("content"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn bump_message_count(&self, id: &str, delta: i32) -> Result<(), StoreError> {
        sqlx::query("UPDATE chat_sessions SET message_count = message_count + $1 WHERE id = $2")
            .bind(delta)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_ended(
        &self,
        id: &str,
        ended_at: &str,
        message_count: i32,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE chat_sessions \
             SET status = 'ended', ended_at = $1, message_count = $2 \
             WHERE id = $3",
        )
        .bind(ended_at)
        .bind(message_count)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_notification_flags(
        &self,
        id: &str,
        team: bool,
        client: bool,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE chat_sessions \
             SET email_sent_to_team = $1, email_sent_to_client = $2 \
             WHERE id = $3",
        )
        .bind(team)
        .bind(client)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// In-process store keeping sessions in a mutex-guarded map. Used by the
/// integration tests; message order is insertion order, which matches the
/// created_at ordering the Postgres store produces.
#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<String, ChatSession>>,
    messages: Mutex<Vec<ChatMessage>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Overwrite a stored session, for seeding test fixtures such as a
    /// drifted message_count or a manually ended status.
    pub fn put_session(&self, session: ChatSession) {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.insert(session.id.clone(), session);
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: &ChatSession) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().unwrap();
        if sessions.contains_key(&session.id) {
            return Err(StoreError(format!("duplicate session id {}", session.id)));
        }
        sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<ChatSession>, StoreError> {
        let sessions = self.sessions.lock().unwrap();
        Ok(sessions.get(id).cloned())
    }

    async fn insert_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<(), StoreError> {
        let sessions = self.sessions.lock().unwrap();
        if !sessions.contains_key(session_id) {
            return Err(StoreError(format!("unknown session {session_id}")));
        }
        drop(sessions);
        let mut messages = self.messages.lock().unwrap();
        messages.push(ChatMessage {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            created_at: now_iso(),
        });
        Ok(())
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>, StoreError> {
        let messages = self.messages.lock().unwrap();
        Ok(messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn bump_message_count(&self, id: &str, delta: i32) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| StoreError(format!("unknown session {id}")))?;
        session.message_count += delta;
        Ok(())
    }

    async fn mark_ended(
        &self,
        id: &str,
        ended_at: &str,
        message_count: i32,
    ) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| StoreError(format!("unknown session {id}")))?;
        session.status = SessionStatus::Ended;
        session.ended_at = Some(ended_at.to_string());
        session.message_count = message_count;
        Ok(())
    }

    async fn set_notification_flags(
        &self,
        id: &str,
        team: bool,
        client: bool,
    ) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| StoreError(format!("unknown session {id}")))?;
        session.email_sent_to_team = team;
        session.email_sent_to_client = client;
        Ok(())
    }
}
