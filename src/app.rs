use std::sync::Arc;

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::classifier::shows_service_interest;
use crate::error::ApiError;
use crate::notify::{Mailer, ResendMailer};
use crate::reply::{ChatModel, GeminiModel, ReplyEngine};
use crate::store::{now_iso, PgStore, SessionStore};
use crate::types::{
    ChatSession, EndSessionBody, EndSessionOutcome, MessageRole, SendMessageBody, SessionStatus,
    StartSessionBody,
};

pub struct AppState {
    pub store: PgStore,
    pub reply: ReplyEngine<GeminiModel>,
    pub mailer: ResendMailer,
}

/// Create an active session for a visitor. Name and email are required;
/// phone is optional. Contact data is immutable after this point.
pub async fn start_session<S: SessionStore>(
    store: &S,
    body: StartSessionBody,
) -> Result<String, ApiError> {
    let name = body.name.trim();
    let email = body.email.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("name is required".to_string()));
    }
    if email.is_empty() {
        return Err(ApiError::Validation("email is required".to_string()));
    }

    let session = ChatSession {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        email: email.to_string(),
        phone: body
            .phone
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string),
        status: SessionStatus::Active,
        started_at: now_iso(),
        ended_at: None,
        message_count: 0,
        email_sent_to_team: false,
        email_sent_to_client: false,
    };
    store.insert_session(&session).await?;
    tracing::info!("chat session {} started for {}", session.id, session.email);
    Ok(session.id)
}

/// One visitor/assistant exchange. The user message is durably persisted
/// before the reply engine is invoked, and the history handed to the engine
/// is the prior conversation only, so the in-flight message never appears
/// twice. The three writes are independent calls, in order; no transaction.
pub async fn send_message<S: SessionStore, M: ChatModel>(
    store: &S,
    engine: &ReplyEngine<M>,
    session_id: &str,
    message: &str,
) -> Result<String, ApiError> {
    if session_id.trim().is_empty() {
        return Err(ApiError::Validation("sessionId is required".to_string()));
    }
    if message.trim().is_empty() {
        return Err(ApiError::Validation("message is required".to_string()));
    }

    let session = store
        .get_session(session_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    if session.status != SessionStatus::Active {
        return Err(ApiError::InvalidState);
    }

    let history = store.list_messages(session_id).await?;
    store
        .insert_message(session_id, MessageRole::User, message)
        .await?;

    let reply = engine
        .generate_reply(message, session.first_name(), &history)
        .await;

    store
        .insert_message(session_id, MessageRole::Assistant, &reply)
        .await?;
    store.bump_message_count(session_id, 2).await?;

    Ok(reply)
}

/// Terminate a session and run the notification policy. Idempotent: ending
/// a session that is already ended or resolved is a no-op success that
/// returns the stored flags. The stored message_count is treated as a cache
/// and reconciled from the actual message list here.
pub async fn end_session<S: SessionStore, Ma: Mailer>(
    store: &S,
    mailer: &Ma,
    session_id: &str,
) -> Result<EndSessionOutcome, ApiError> {
    if session_id.trim().is_empty() {
        return Err(ApiError::Validation("sessionId is required".to_string()));
    }

    let session = store
        .get_session(session_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    if session.status != SessionStatus::Active {
        return Ok(EndSessionOutcome {
            success: true,
            email_sent_to_team: session.email_sent_to_team,
            email_sent_to_client: session.email_sent_to_client,
        });
    }

    let messages = store.list_messages(session_id).await?;
    let ended_at = now_iso();
    store
        .mark_ended(session_id, &ended_at, messages.len() as i32)
        .await?;

    let ended = ChatSession {
        status: SessionStatus::Ended,
        ended_at: Some(ended_at),
        message_count: messages.len() as i32,
        ..session
    };

    // At least one real exchange beyond a possible greeting.
    let email_sent_to_team = if messages.len() >= 2 {
        match mailer.send_team_notification(&ended, &messages).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!("team notification for session {session_id} failed: {err}");
                false
            }
        }
    } else {
        false
    };

    let email_sent_to_client = if shows_service_interest(&messages) {
        match mailer.send_visitor_follow_up(&ended).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!("visitor follow-up for session {session_id} failed: {err}");
                false
            }
        }
    } else {
        false
    };

    store
        .set_notification_flags(session_id, email_sent_to_team, email_sent_to_client)
        .await?;
    tracing::info!(
        "chat session {session_id} ended with {} messages (team={email_sent_to_team}, client={email_sent_to_client})",
        messages.len()
    );

    Ok(EndSessionOutcome {
        success: true,
        email_sent_to_team,
        email_sent_to_client,
    })
}

async fn post_start(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StartSessionBody>,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = start_session(&state.store, body).await?;
    Ok(Json(json!({ "sessionId": session_id })))
}

async fn post_message(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SendMessageBody>,
) -> Result<impl IntoResponse, ApiError> {
    let reply = send_message(&state.store, &state.reply, &body.session_id, &body.message).await?;
    Ok(Json(json!({ "reply": reply })))
}

async fn post_end(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EndSessionBody>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = end_session(&state.store, &state.mailer, &body.session_id).await?;
    Ok(Json(outcome))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true, "now": now_iso() }))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chat/start", post(post_start))
        .route("/chat/message", post(post_message))
        .route("/chat/end", post(post_end))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn resolve_database_url() -> String {
    if let Ok(url) = std::env::var("DATABASE_URL") {
        if !url.trim().is_empty() {
            return url;
        }
    }
    let host = std::env::var("POSTGRES_HOST")
        .or_else(|_| std::env::var("PGHOST"))
        .unwrap_or_else(|_| "localhost".to_string());
    let port = std::env::var("POSTGRES_PORT")
        .or_else(|_| std::env::var("PGPORT"))
        .unwrap_or_else(|_| "5432".to_string());
    let user = std::env::var("POSTGRES_USER")
        .or_else(|_| std::env::var("PGUSER"))
        .unwrap_or_else(|_| "postgres".to_string());
    let password = std::env::var("POSTGRES_PASSWORD")
        .or_else(|_| std::env::var("PGPASSWORD"))
        .unwrap_or_else(|_| "postgres".to_string());
    let db = std::env::var("POSTGRES_DB")
        .or_else(|_| std::env::var("PGDATABASE"))
        .unwrap_or_else(|_| "clearclaim".to_string());
    format!("postgres://{user}:{password}@{host}:{port}/{db}")
}

pub async fn run() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(4000);
    let database_url = resolve_database_url();

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("failed to connect to postgres (set DATABASE_URL or POSTGRES_* env vars)");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run sqlx migrations");

    let state = Arc::new(AppState {
        store: PgStore::new(pool),
        reply: ReplyEngine::from_env(),
        mailer: ResendMailer::from_env(),
    });

    let app = router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind TCP listener");

    tracing::info!("clearclaim chat server running at http://localhost:{port}");
    axum::serve(listener, app)
        .await
        .expect("server runtime failure");
}
