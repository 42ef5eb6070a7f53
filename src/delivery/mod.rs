//! Rate-limited outbound delivery.
//!
//! Every destination owns a FIFO lane drained by a single worker task that
//! keeps at least `min_interval` between two operations on that destination.
//! Lanes are independent, so a lane waiting on a backoff never holds up
//! another destination.

pub mod telegram;
#[cfg(test)]
pub mod testing;
pub mod transport;

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    time::{Instant, sleep, sleep_until},
};
use tracing::{debug, warn};

use crate::dao::models::{ChatId, MessageId};

pub use self::transport::{InlineButton, MessageHandle, SendOptions, Transport, TransportError};

/// Failure of a single queued operation.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The lane worker is gone; the operation was never attempted.
    #[error("delivery lane for chat `{chat_id}` is closed")]
    QueueClosed { chat_id: ChatId },
}

enum Operation {
    Send { text: String, options: SendOptions },
    Edit {
        message_id: MessageId,
        text: String,
        options: SendOptions,
    },
    Pin { message_id: MessageId },
    Unpin { message_id: MessageId },
}

enum Outcome {
    Sent(MessageHandle),
    Done,
}

struct Job {
    operation: Operation,
    reply: oneshot::Sender<Result<Outcome, TransportError>>,
}

/// Cloneable handle to the per-destination delivery lanes.
#[derive(Clone)]
pub struct DeliveryQueue {
    inner: Arc<DeliveryInner>,
}

struct DeliveryInner {
    transport: Arc<dyn Transport>,
    min_interval: Duration,
    lanes: DashMap<ChatId, mpsc::UnboundedSender<Job>>,
}

impl DeliveryQueue {
    pub fn new(transport: Arc<dyn Transport>, min_interval: Duration) -> Self {
        Self {
            inner: Arc::new(DeliveryInner {
                transport,
                min_interval,
                lanes: DashMap::new(),
            }),
        }
    }

    /// Check that the underlying transport is reachable.
    pub async fn verify(&self) -> Result<(), TransportError> {
        self.inner.transport.verify().await
    }

    /// Queue a message and wait until it has been delivered.
    pub async fn send(
        &self,
        chat_id: ChatId,
        text: String,
        options: SendOptions,
    ) -> Result<MessageHandle, DeliveryError> {
        match self
            .submit(chat_id, Operation::Send { text, options })
            .await?
        {
            Outcome::Sent(handle) => Ok(handle),
            Outcome::Done => Err(DeliveryError::QueueClosed { chat_id }),
        }
    }

    /// Queue a text edit of an earlier message and wait for it.
    pub async fn edit(
        &self,
        handle: MessageHandle,
        text: String,
        options: SendOptions,
    ) -> Result<(), DeliveryError> {
        let operation = Operation::Edit {
            message_id: handle.message_id,
            text,
            options,
        };
        self.submit(handle.chat_id, operation).await.map(|_| ())
    }

    /// Pin a message. Failures are logged and swallowed.
    pub async fn pin(&self, handle: MessageHandle) {
        let operation = Operation::Pin {
            message_id: handle.message_id,
        };
        if let Err(err) = self.submit(handle.chat_id, operation).await {
            warn!(chat_id = handle.chat_id, message_id = handle.message_id, error = %err, "failed to pin message");
        }
    }

    /// Unpin a message. Failures are logged and swallowed.
    pub async fn unpin(&self, handle: MessageHandle) {
        let operation = Operation::Unpin {
            message_id: handle.message_id,
        };
        if let Err(err) = self.submit(handle.chat_id, operation).await {
            warn!(chat_id = handle.chat_id, message_id = handle.message_id, error = %err, "failed to unpin message");
        }
    }

    /// Queue a message without waiting; delivery failures are only logged.
    pub fn dispatch(&self, chat_id: ChatId, text: String, options: SendOptions) {
        let queue = self.clone();
        tokio::spawn(async move {
            if let Err(err) = queue.send(chat_id, text, options).await {
                warn!(chat_id, error = %err, "failed to deliver message");
            }
        });
    }

    /// Queue an edit without waiting; failures are only logged.
    pub fn dispatch_edit(&self, handle: MessageHandle, text: String, options: SendOptions) {
        let queue = self.clone();
        tokio::spawn(async move {
            if let Err(err) = queue.edit(handle, text, options).await {
                debug!(chat_id = handle.chat_id, message_id = handle.message_id, error = %err, "failed to edit message");
            }
        });
    }

    /// Queue an unpin without waiting.
    pub fn dispatch_unpin(&self, handle: MessageHandle) {
        let queue = self.clone();
        tokio::spawn(async move { queue.unpin(handle).await });
    }

    async fn submit(&self, chat_id: ChatId, operation: Operation) -> Result<Outcome, DeliveryError> {
        let (reply, receiver) = oneshot::channel();
        let job = Job { operation, reply };

        if let Err(mpsc::error::SendError(job)) = self.lane(chat_id).send(job) {
            // The worker died; replace the lane and try once more.
            self.inner.lanes.remove(&chat_id);
            self.lane(chat_id)
                .send(job)
                .map_err(|_| DeliveryError::QueueClosed { chat_id })?;
        }

        match receiver.await {
            Ok(result) => result.map_err(DeliveryError::from),
            Err(_) => Err(DeliveryError::QueueClosed { chat_id }),
        }
    }

    fn lane(&self, chat_id: ChatId) -> mpsc::UnboundedSender<Job> {
        self.inner
            .lanes
            .entry(chat_id)
            .or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(run_lane(
                    chat_id,
                    self.inner.transport.clone(),
                    self.inner.min_interval,
                    rx,
                ));
                debug!(chat_id, "opened delivery lane");
                tx
            })
            .clone()
    }
}

async fn run_lane(
    chat_id: ChatId,
    transport: Arc<dyn Transport>,
    min_interval: Duration,
    mut jobs: mpsc::UnboundedReceiver<Job>,
) {
    let mut last_finished: Option<Instant> = None;

    while let Some(job) = jobs.recv().await {
        if let Some(previous) = last_finished {
            sleep_until(previous + min_interval).await;
        }

        let result = execute_with_retry(transport.as_ref(), chat_id, &job.operation).await;
        last_finished = Some(Instant::now());

        if let Err(err) = &result {
            debug!(chat_id, error = %err, "delivery operation failed");
        }
        // The caller may have stopped waiting; the operation still happened.
        let _ = job.reply.send(result);
    }
}

/// Run the operation, retrying exactly once after a rate-limit backoff.
async fn execute_with_retry(
    transport: &dyn Transport,
    chat_id: ChatId,
    operation: &Operation,
) -> Result<Outcome, TransportError> {
    match execute(transport, chat_id, operation).await {
        Err(TransportError::RateLimited { retry_after }) => {
            warn!(chat_id, ?retry_after, "rate limited by transport; backing off");
            sleep(retry_after).await;
            execute(transport, chat_id, operation).await
        }
        other => other,
    }
}

async fn execute(
    transport: &dyn Transport,
    chat_id: ChatId,
    operation: &Operation,
) -> Result<Outcome, TransportError> {
    match operation {
        Operation::Send { text, options } => transport
            .send(chat_id, text.clone(), options.clone())
            .await
            .map(Outcome::Sent),
        Operation::Edit {
            message_id,
            text,
            options,
        } => {
            let handle = MessageHandle {
                chat_id,
                message_id: *message_id,
            };
            transport
                .edit_text(handle, text.clone(), options.clone())
                .await
                .map(|_| Outcome::Done)
        }
        Operation::Pin { message_id } => transport
            .pin(MessageHandle {
                chat_id,
                message_id: *message_id,
            })
            .await
            .map(|_| Outcome::Done),
        Operation::Unpin { message_id } => transport
            .unpin(MessageHandle {
                chat_id,
                message_id: *message_id,
            })
            .await
            .map(|_| Outcome::Done),
    }
}
