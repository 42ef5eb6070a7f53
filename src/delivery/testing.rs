//! In-memory transport used by the test suite.

use std::{
    sync::{
        Mutex,
        atomic::{AtomicI64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::future::{BoxFuture, ready};
use tokio::time::Instant;

use super::transport::{MessageHandle, SendOptions, Transport, TransportError};
use crate::dao::models::ChatId;

#[derive(Debug, Clone)]
pub struct RecordedMessage {
    pub handle: MessageHandle,
    pub text: String,
    pub options: SendOptions,
    pub at: Instant,
}

/// Records every delivered message and can be scripted to fail.
#[derive(Default)]
pub struct RecordingTransport {
    next_id: AtomicI64,
    attempts: AtomicUsize,
    sent: Mutex<Vec<RecordedMessage>>,
    edits: Mutex<Vec<(MessageHandle, String)>>,
    pinned: Mutex<Vec<MessageHandle>>,
    rate_limits: Mutex<Vec<Duration>>,
    failing_texts: Mutex<Vec<String>>,
    fail_pins: Mutex<bool>,
}

impl RecordingTransport {
    /// Answer the next `count` sends with a rate limit of `retry_after`.
    pub fn rate_limit_next(&self, count: usize, retry_after: Duration) {
        let mut rate_limits = self.rate_limits.lock().unwrap();
        rate_limits.extend(std::iter::repeat_n(retry_after, count));
    }

    /// Reject every send whose text contains `needle`.
    pub fn fail_texts_containing(&self, needle: &str) {
        self.failing_texts.lock().unwrap().push(needle.to_string());
    }

    pub fn fail_pins(&self) {
        *self.fail_pins.lock().unwrap() = true;
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<RecordedMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, chat_id: ChatId) -> Vec<RecordedMessage> {
        self.sent()
            .into_iter()
            .filter(|message| message.handle.chat_id == chat_id)
            .collect()
    }

    pub fn edits(&self) -> Vec<(MessageHandle, String)> {
        self.edits.lock().unwrap().clone()
    }

    pub fn pinned(&self) -> Vec<MessageHandle> {
        self.pinned.lock().unwrap().clone()
    }
}

impl Transport for RecordingTransport {
    fn verify(&self) -> BoxFuture<'static, Result<(), TransportError>> {
        Box::pin(ready(Ok(())))
    }

    fn send(
        &self,
        chat_id: ChatId,
        text: String,
        options: SendOptions,
    ) -> BoxFuture<'static, Result<MessageHandle, TransportError>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let rate_limited = {
            let mut rate_limits = self.rate_limits.lock().unwrap();
            (!rate_limits.is_empty()).then(|| rate_limits.remove(0))
        };
        if let Some(retry_after) = rate_limited {
            return Box::pin(ready(Err(TransportError::RateLimited { retry_after })));
        }

        let rejected = self
            .failing_texts
            .lock()
            .unwrap()
            .iter()
            .any(|needle| text.contains(needle.as_str()));
        if rejected {
            return Box::pin(ready(Err(TransportError::Rejected {
                code: 400,
                description: "Bad Request: scripted failure".into(),
            })));
        }

        let handle = MessageHandle {
            chat_id,
            message_id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
        };
        self.sent.lock().unwrap().push(RecordedMessage {
            handle,
            text,
            options,
            at: Instant::now(),
        });
        Box::pin(ready(Ok(handle)))
    }

    fn edit_text(
        &self,
        handle: MessageHandle,
        text: String,
        _options: SendOptions,
    ) -> BoxFuture<'static, Result<(), TransportError>> {
        self.edits.lock().unwrap().push((handle, text));
        Box::pin(ready(Ok(())))
    }

    fn pin(&self, handle: MessageHandle) -> BoxFuture<'static, Result<(), TransportError>> {
        if *self.fail_pins.lock().unwrap() {
            return Box::pin(ready(Err(TransportError::Rejected {
                code: 400,
                description: "Bad Request: not enough rights".into(),
            })));
        }
        self.pinned.lock().unwrap().push(handle);
        Box::pin(ready(Ok(())))
    }

    fn unpin(&self, handle: MessageHandle) -> BoxFuture<'static, Result<(), TransportError>> {
        if *self.fail_pins.lock().unwrap() {
            return Box::pin(ready(Err(TransportError::Rejected {
                code: 400,
                description: "Bad Request: not enough rights".into(),
            })));
        }
        self.pinned.lock().unwrap().retain(|pinned| *pinned != handle);
        Box::pin(ready(Ok(())))
    }
}
