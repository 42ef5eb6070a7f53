//! Narrow contract the delivery queue needs from the chat platform.

use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;

use crate::dao::models::{ChatId, MessageId};

/// Handle to a message already delivered to a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHandle {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// Inline keyboard button; the chat adapter turns presses into webhook calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

/// Presentation options for a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Rows of inline buttons.
    pub keyboard: Vec<Vec<InlineButton>>,
    /// Deliver without a notification sound.
    pub silent: bool,
}

impl SendOptions {
    pub fn with_keyboard(keyboard: Vec<Vec<InlineButton>>) -> Self {
        Self {
            keyboard,
            silent: false,
        }
    }
}

/// Failures surfaced by a transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The platform asked us to slow down.
    #[error("rate limited; retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
    /// The platform refused the request.
    #[error("request rejected ({code}): {description}")]
    Rejected { code: u16, description: String },
    /// The request never got a usable answer.
    #[error("transport failure: {message}")]
    Network { message: String },
}

/// Chat platform operations used by the delivery queue.
pub trait Transport: Send + Sync {
    /// Check credentials and connectivity.
    fn verify(&self) -> BoxFuture<'static, Result<(), TransportError>>;
    fn send(
        &self,
        chat_id: ChatId,
        text: String,
        options: SendOptions,
    ) -> BoxFuture<'static, Result<MessageHandle, TransportError>>;
    fn edit_text(
        &self,
        handle: MessageHandle,
        text: String,
        options: SendOptions,
    ) -> BoxFuture<'static, Result<(), TransportError>>;
    fn pin(&self, handle: MessageHandle) -> BoxFuture<'static, Result<(), TransportError>>;
    fn unpin(&self, handle: MessageHandle) -> BoxFuture<'static, Result<(), TransportError>>;
}
