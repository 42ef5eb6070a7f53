//! Telegram Bot API implementation of [`Transport`].

use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};

use super::transport::{MessageHandle, SendOptions, Transport, TransportError};
use crate::dao::models::ChatId;

const API_BASE: &str = "https://api.telegram.org";
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);
const TOO_MANY_REQUESTS: u16 = 429;

#[derive(Clone)]
pub struct TelegramTransport {
    client: Client,
    endpoint: Arc<str>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<u16>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

impl TelegramTransport {
    pub fn new(token: &str) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| TransportError::Network {
                message: err.to_string(),
            })?;

        Ok(Self {
            client,
            endpoint: Arc::from(format!("{API_BASE}/bot{token}")),
        })
    }

    /// Read the bot token from `TELEGRAM_BOT_TOKEN`.
    pub fn from_env() -> Result<Self, TransportError> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN").map_err(|_| TransportError::Network {
            message: "missing TELEGRAM_BOT_TOKEN".into(),
        })?;
        Self::new(&token)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T, TransportError> {
        let url = format!("{}/{method}", self.endpoint);
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|err| TransportError::Network {
                message: err.without_url().to_string(),
            })?;

        let status = response.status().as_u16();
        let payload: ApiResponse<T> =
            response.json().await.map_err(|err| TransportError::Network {
                message: err.without_url().to_string(),
            })?;

        into_result(method, status, payload)
    }
}

/// Map a Bot API reply onto the transport's error model.
fn into_result<T>(method: &str, status: u16, payload: ApiResponse<T>) -> Result<T, TransportError> {
    if payload.ok {
        return payload.result.ok_or_else(|| TransportError::Network {
            message: format!("`{method}` returned ok without result"),
        });
    }

    let code = payload.error_code.unwrap_or(status);
    if code == TOO_MANY_REQUESTS {
        let retry_after = payload
            .parameters
            .and_then(|parameters| parameters.retry_after)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RETRY_AFTER);
        return Err(TransportError::RateLimited { retry_after });
    }

    Err(TransportError::Rejected {
        code,
        description: payload.description.unwrap_or_default(),
    })
}

fn message_body(chat_id: ChatId, text: String, options: &SendOptions) -> Value {
    let mut body = json!({
        "chat_id": chat_id,
        "text": text,
        "parse_mode": "HTML",
        "disable_notification": options.silent,
    });
    if !options.keyboard.is_empty() {
        body["reply_markup"] = json!({ "inline_keyboard": options.keyboard });
    }
    body
}

impl Transport for TelegramTransport {
    fn verify(&self) -> BoxFuture<'static, Result<(), TransportError>> {
        let transport = self.clone();
        Box::pin(async move {
            transport.call::<Value>("getMe", json!({})).await?;
            Ok(())
        })
    }

    fn send(
        &self,
        chat_id: ChatId,
        text: String,
        options: SendOptions,
    ) -> BoxFuture<'static, Result<MessageHandle, TransportError>> {
        let transport = self.clone();
        Box::pin(async move {
            let body = message_body(chat_id, text, &options);
            let sent: SentMessage = transport.call("sendMessage", body).await?;
            Ok(MessageHandle {
                chat_id,
                message_id: sent.message_id,
            })
        })
    }

    fn edit_text(
        &self,
        handle: MessageHandle,
        text: String,
        options: SendOptions,
    ) -> BoxFuture<'static, Result<(), TransportError>> {
        let transport = self.clone();
        Box::pin(async move {
            let mut body = message_body(handle.chat_id, text, &options);
            body["message_id"] = json!(handle.message_id);
            transport.call::<Value>("editMessageText", body).await?;
            Ok(())
        })
    }

    fn pin(&self, handle: MessageHandle) -> BoxFuture<'static, Result<(), TransportError>> {
        let transport = self.clone();
        Box::pin(async move {
            let body = json!({
                "chat_id": handle.chat_id,
                "message_id": handle.message_id,
                "disable_notification": true,
            });
            transport.call::<Value>("pinChatMessage", body).await?;
            Ok(())
        })
    }

    fn unpin(&self, handle: MessageHandle) -> BoxFuture<'static, Result<(), TransportError>> {
        let transport = self.clone();
        Box::pin(async move {
            let body = json!({
                "chat_id": handle.chat_id,
                "message_id": handle.message_id,
            });
            transport.call::<Value>("unpinChatMessage", body).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(raw: Value) -> ApiResponse<SentMessage> {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn rate_limits_carry_the_advertised_wait() {
        let payload = reply(json!({
            "ok": false,
            "error_code": 429,
            "description": "Too Many Requests: retry after 17",
            "parameters": { "retry_after": 17 }
        }));
        let err = into_result("sendMessage", 429, payload).unwrap_err();
        assert!(matches!(
            err,
            TransportError::RateLimited { retry_after } if retry_after == Duration::from_secs(17)
        ));
    }

    #[test]
    fn rate_limits_without_a_wait_use_the_default() {
        let payload = reply(json!({ "ok": false, "description": "Too Many Requests" }));
        let err = into_result("sendMessage", 429, payload).unwrap_err();
        assert!(matches!(
            err,
            TransportError::RateLimited { retry_after } if retry_after == DEFAULT_RETRY_AFTER
        ));
    }

    #[test]
    fn other_failures_are_rejections() {
        let payload = reply(json!({
            "ok": false,
            "error_code": 400,
            "description": "Bad Request: chat not found"
        }));
        let err = into_result("sendMessage", 400, payload).unwrap_err();
        assert!(matches!(
            err,
            TransportError::Rejected { code: 400, ref description } if description.contains("chat not found")
        ));
    }

    #[test]
    fn successful_replies_yield_their_result() {
        let payload = reply(json!({ "ok": true, "result": { "message_id": 42 } }));
        let sent = into_result("sendMessage", 200, payload).unwrap();
        assert_eq!(sent.message_id, 42);
    }
}
