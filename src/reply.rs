use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::prompting::render_system_prompt;
use crate::types::ChatMessage;

/// Returned when no API key is configured, so the widget keeps working
/// without ever touching the network.
pub const MAINTENANCE_NOTICE: &str = "Our chat assistant is briefly offline for maintenance. \
     Please call us at (877) 555-0119 or email support@clearclaimbilling.com and a billing \
     specialist will help you right away.";

/// Returned when a model call succeeds but comes back with no text.
pub const EMPTY_REPLY_APOLOGY: &str =
    "I'm sorry, I wasn't able to come up with an answer to that. Could you rephrase your question?";

/// Returned when both the primary and the fallback model fail.
pub const NETWORK_TROUBLE: &str = "We're having network trouble on our end right now. Please call \
     us at (877) 555-0119 or email support@clearclaimbilling.com and a billing specialist will \
     get back to you shortly.";

// A hung provider call surfaces as a timeout error and flows into the
// escalation path instead of stalling the request forever.
const MODEL_CALL_TIMEOUT: Duration = Duration::from_secs(30);

// Low temperature for a factual, deterministic tone on both models.
const MODEL_TEMPERATURE: f64 = 0.2;

const DEFAULT_PRIMARY_MODEL: &str = "gemini-1.5-pro";
const DEFAULT_SECONDARY_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ModelError(pub String);

/// One raw generation call. `Ok` with an empty string means the provider
/// answered but produced no text; that is not an error and must not
/// trigger the model escalation.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn generate(
        &self,
        model: &str,
        system_prompt: &str,
        contents: &[Value],
    ) -> Result<String, ModelError>;
}

pub struct GeminiModel {
    client: reqwest::Client,
    api_key: String,
}

impl GeminiModel {
    pub fn new(api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(MODEL_CALL_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        GeminiModel { client, api_key }
    }
}

#[async_trait]
impl ChatModel for GeminiModel {
    async fn generate(
        &self,
        model: &str,
        system_prompt: &str,
        contents: &[Value],
    ) -> Result<String, ModelError> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{model}:generateContent?key={}",
            self.api_key
        );
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "systemInstruction": { "parts": [{ "text": system_prompt }] },
                "contents": contents,
                "generationConfig": { "temperature": MODEL_TEMPERATURE }
            }))
            .send()
            .await
            .map_err(|err| ModelError(format!("gemini request failed: {err}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError(format!("gemini returned {status}: {body}")));
        }
        let payload = response
            .json::<Value>()
            .await
            .map_err(|err| ModelError(format!("gemini parse failed: {err}")))?;
        let text = payload
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|candidates| candidates.first())
            .and_then(|candidate| candidate.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .and_then(|parts| parts.first())
            .and_then(|part| part.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        Ok(text)
    }
}

/// Conversation history in the provider's role vocabulary, with the new
/// message appended as the final user turn. History never contains the
/// in-flight message; the controller passes it separately.
pub fn build_contents(message: &str, history: &[ChatMessage]) -> Vec<Value> {
    let mut contents = history
        .iter()
        .map(|m| {
            json!({
                "role": m.role.gemini_role(),
                "parts": [{ "text": m.content }]
            })
        })
        .collect::<Vec<_>>();
    contents.push(json!({
        "role": "user",
        "parts": [{ "text": message }]
    }));
    contents
}

/// Reply generation with primary-then-secondary model escalation. Holds no
/// cross-request state: every call independently attempts primary first.
pub struct ReplyEngine<M> {
    model: Option<M>,
    primary: String,
    secondary: String,
}

impl ReplyEngine<GeminiModel> {
    /// Build from `GEMINI_API_KEY` / `GEMINI_CHAT_MODEL` /
    /// `GEMINI_FALLBACK_MODEL`. A missing key degrades the engine to the
    /// fixed maintenance notice instead of failing startup.
    pub fn from_env() -> Self {
        let api_key = std::env::var("GEMINI_API_KEY").unwrap_or_default();
        let model = if api_key.trim().is_empty() {
            tracing::warn!("GEMINI_API_KEY not configured, chat replies degraded to maintenance notice");
            None
        } else {
            Some(GeminiModel::new(api_key.trim().to_string()))
        };
        let primary = std::env::var("GEMINI_CHAT_MODEL")
            .unwrap_or_else(|_| DEFAULT_PRIMARY_MODEL.to_string());
        let secondary = std::env::var("GEMINI_FALLBACK_MODEL")
            .unwrap_or_else(|_| DEFAULT_SECONDARY_MODEL.to_string());
        ReplyEngine::new(model, primary, secondary)
    }
}

impl<M: ChatModel> ReplyEngine<M> {
    pub fn new(model: Option<M>, primary: String, secondary: String) -> Self {
        ReplyEngine {
            model,
            primary,
            secondary,
        }
    }

    /// Turn a visitor message plus prior history into assistant text. Never
    /// fails: every provider problem collapses into one of the three fixed
    /// fallback strings.
    pub async fn generate_reply(
        &self,
        message: &str,
        visitor_name: &str,
        history: &[ChatMessage],
    ) -> String {
        let Some(model) = &self.model else {
            return MAINTENANCE_NOTICE.to_string();
        };

        let system_prompt = render_system_prompt(visitor_name);
        let contents = build_contents(message, history);

        match model.generate(&self.primary, &system_prompt, &contents).await {
            Ok(text) => finish_reply(text),
            Err(err) => {
                tracing::warn!(
                    "primary model {} failed ({err}), retrying on {}",
                    self.primary,
                    self.secondary
                );
                match model
                    .generate(&self.secondary, &system_prompt, &contents)
                    .await
                {
                    Ok(text) => finish_reply(text),
                    Err(err) => {
                        tracing::warn!("secondary model {} failed: {err}", self.secondary);
                        NETWORK_TROUBLE.to_string()
                    }
                }
            }
        }
    }
}

fn finish_reply(text: String) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        EMPTY_REPLY_APOLOGY.to_string()
    } else {
        trimmed.to_string()
    }
}
