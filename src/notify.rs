use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::model::{DATETIME_FORMAT, Timestamp};

/// Payload emitted after a reservation commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationCreated {
    pub reservation_id: Ulid,
    pub room_name: String,
    pub reserved_by: String,
    pub reserved_by_email: Option<String>,
    pub start_date_time: Timestamp,
    pub end_date_time: Timestamp,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum Notification {
    ReservationCreated(ReservationCreated),
    ReservationCancelled {
        reservation_id: Ulid,
        room_name: String,
    },
}

impl Notification {
    pub fn reservation_id(&self) -> Ulid {
        match self {
            Notification::ReservationCreated(n) => n.reservation_id,
            Notification::ReservationCancelled { reservation_id, .. } => *reservation_id,
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification queue is full")]
    QueueFull,
    #[error("notification worker is not running")]
    Closed,
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Sending side of the notification channel.
///
/// `send` never waits: a full or closed queue is reported to the caller,
/// which logs it and carries on.
#[derive(Clone)]
pub struct NotifyHub {
    tx: mpsc::Sender<Notification>,
}

impl NotifyHub {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// A hub whose receiver is already gone. Every send fails with `Closed`.
    pub fn disconnected() -> Self {
        let (hub, _rx) = Self::new(1);
        hub
    }

    pub fn send(&self, notification: Notification) -> Result<(), NotifyError> {
        self.tx.try_send(notification).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NotifyError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => NotifyError::Closed,
        })
    }
}

/// Consumer of notifications; invoked by the worker, possibly more than
/// once for the same message.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Default consumer: records each delivery step in the log.
#[derive(Debug, Default)]
pub struct LoggingHandler;

#[async_trait]
impl NotificationHandler for LoggingHandler {
    async fn handle(&self, notification: &Notification) -> Result<(), NotifyError> {
        match notification {
            Notification::ReservationCreated(n) => {
                info!(
                    reservation_id = %n.reservation_id,
                    room_name = %n.room_name,
                    reserved_by = %n.reserved_by,
                    start = %n.start_date_time.format(DATETIME_FORMAT),
                    end = %n.end_date_time.format(DATETIME_FORMAT),
                    "processing reservation created notification"
                );
                if let Some(email) = n.reserved_by_email.as_deref().filter(|e| !e.is_empty()) {
                    info!(to = %email, reservation_id = %n.reservation_id, "sending email notification");
                }
                info!(reservation_id = %n.reservation_id, room_name = %n.room_name, "sending in-app notification");
                info!(
                    reservation_id = %n.reservation_id,
                    created_at = %n.created_at.format(DATETIME_FORMAT),
                    "updating reservation statistics"
                );
            }
            Notification::ReservationCancelled {
                reservation_id,
                room_name,
            } => {
                info!(%reservation_id, %room_name, "processing reservation cancelled notification");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before the second attempt; grows linearly per attempt.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: crate::limits::DEFAULT_NOTIFY_MAX_ATTEMPTS,
            backoff: Duration::from_millis(200),
        }
    }
}

/// Background task draining the notification queue until every hub is dropped.
pub async fn run_notification_worker(
    mut rx: mpsc::Receiver<Notification>,
    handler: Arc<dyn NotificationHandler>,
    policy: RetryPolicy,
) {
    let max_attempts = policy.max_attempts.max(1);
    while let Some(notification) = rx.recv().await {
        let reservation_id = notification.reservation_id();
        let mut attempt = 1;
        loop {
            match handler.handle(&notification).await {
                Ok(()) => {
                    metrics::counter!(crate::observability::NOTIFICATIONS_PROCESSED_TOTAL)
                        .increment(1);
                    debug!(%reservation_id, attempt, "notification processed");
                    break;
                }
                Err(e) if attempt < max_attempts => {
                    warn!(%reservation_id, attempt, "notification handler failed, retrying: {e}");
                    tokio::time::sleep(policy.backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    metrics::counter!(crate::observability::NOTIFICATIONS_FAILED_TOTAL, "stage" => "handler")
                        .increment(1);
                    error!(%reservation_id, attempts = attempt, "dropping notification: {e}");
                    break;
                }
            }
        }
    }
    debug!("notification worker stopped");
}
