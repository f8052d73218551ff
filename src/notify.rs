use async_trait::async_trait;
use minijinja::{context, Environment};
use serde::Serialize;
use serde_json::json;

use crate::types::{ChatMessage, ChatSession, MessageRole};

const TEAM_NOTIFICATION_TEMPLATE: &str = include_str!("templates/team_notification.j2");
const VISITOR_FOLLOW_UP_TEMPLATE: &str = include_str!("templates/visitor_follow_up.j2");

const RESEND_API_URL: &str = "https://api.resend.com/emails";

const DEFAULT_FROM_ADDRESS: &str = "ClearClaim Chat <chat@clearclaimbilling.com>";
const DEFAULT_TEAM_INBOX: &str = "team@clearclaimbilling.com";

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct MailError(pub String);

/// Outbound mail, fire-and-forget from the controller's perspective: a
/// failed send is logged by the caller and leaves the corresponding flag
/// false, it never fails session termination.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_team_notification(
        &self,
        session: &ChatSession,
        messages: &[ChatMessage],
    ) -> Result<(), MailError>;

    async fn send_visitor_follow_up(&self, session: &ChatSession) -> Result<(), MailError>;
}

fn render_template<C: Serialize>(name: &str, source: &str, ctx: C) -> Result<String, MailError> {
    let mut env = Environment::new();
    env.add_template(name, source)
        .map_err(|err| MailError(format!("template {name} failed to load: {err}")))?;
    let template = env
        .get_template(name)
        .map_err(|err| MailError(format!("template {name} missing: {err}")))?;
    template
        .render(ctx)
        .map_err(|err| MailError(format!("template {name} failed to render: {err}")))
}

fn transcript_text(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| {
            let label = match m.role {
                MessageRole::User => "Visitor",
                MessageRole::Assistant => "Assistant",
            };
            format!("{label}: {}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_team_notification(
    session: &ChatSession,
    messages: &[ChatMessage],
) -> Result<String, MailError> {
    render_template(
        "team_notification",
        TEAM_NOTIFICATION_TEMPLATE,
        context! {
            name => session.name,
            email => session.email,
            phone => session.phone.clone().unwrap_or_else(|| "not provided".to_string()),
            started_at => session.started_at,
            ended_at => session.ended_at.clone().unwrap_or_default(),
            message_count => messages.len(),
            transcript => transcript_text(messages),
        },
    )
}

pub fn render_visitor_follow_up(session: &ChatSession) -> Result<String, MailError> {
    render_template(
        "visitor_follow_up",
        VISITOR_FOLLOW_UP_TEMPLATE,
        context! { first_name => session.first_name() },
    )
}

/// Sends through the Resend REST API. A missing key makes every send fail,
/// which the controller absorbs fail-soft.
pub struct ResendMailer {
    client: reqwest::Client,
    api_key: String,
    from_address: String,
    team_inbox: String,
}

impl ResendMailer {
    pub fn from_env() -> Self {
        let api_key = std::env::var("RESEND_API_KEY").unwrap_or_default();
        if api_key.trim().is_empty() {
            tracing::warn!("RESEND_API_KEY not configured, session notifications disabled");
        }
        ResendMailer {
            client: reqwest::Client::new(),
            api_key: api_key.trim().to_string(),
            from_address: std::env::var("NOTIFY_FROM_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_FROM_ADDRESS.to_string()),
            team_inbox: std::env::var("TEAM_INBOX")
                .unwrap_or_else(|_| DEFAULT_TEAM_INBOX.to_string()),
        }
    }

    async fn deliver(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        if self.api_key.is_empty() {
            return Err(MailError("RESEND_API_KEY not configured".to_string()));
        }
        let response = self
            .client
            .post(RESEND_API_URL)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "from": self.from_address,
                "to": [to],
                "subject": subject,
                "text": body
            }))
            .send()
            .await
            .map_err(|err| MailError(format!("resend request failed: {err}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MailError(format!("resend returned {status}: {body}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send_team_notification(
        &self,
        session: &ChatSession,
        messages: &[ChatMessage],
    ) -> Result<(), MailError> {
        let body = render_team_notification(session, messages)?;
        let subject = format!("Chat session ended: {}", session.name);
        self.deliver(&self.team_inbox, &subject, &body).await
    }

    async fn send_visitor_follow_up(&self, session: &ChatSession) -> Result<(), MailError> {
        let body = render_visitor_follow_up(session)?;
        self.deliver(
            &session.email,
            "Following up on your ClearClaim chat",
            &body,
        )
        .await
    }
}
