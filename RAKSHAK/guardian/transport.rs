use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    runtime::{Builder, Handle},
    sync::mpsc::{self, error::TrySendError},
};

/// Delivery outcome for one recipient.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Accepted by the far end.
    Delivered,
    /// Not delivered.
    Failed,
}

/// Per-recipient status returned by [`Transport::send_sos`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecipientStatus {
    /// Recipient (service name or contact).
    pub recipient: String,
    /// Outcome.
    pub status: DeliveryStatus,
    /// Extra information from the transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Errors surfaced by transports.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Network or gateway failure.
    #[error("transport unreachable: {0}")]
    Unreachable(String),
    /// The far end refused the message.
    #[error("message to {recipient} rejected: {reason}")]
    Rejected {
        /// Recipient that refused.
        recipient: String,
        /// Reason given.
        reason: String,
    },
}

/// Outbound capability used to reach emergency services and fleet operators
/// (SMS gateway, CAD system, e-mail relay, ...).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends an SOS message to every recipient.
    async fn send_sos(
        &self,
        recipients: &[String],
        message: &str,
    ) -> Result<Vec<RecipientStatus>, TransportError>;

    /// Sends a notification to a single contact.
    async fn notify(&self, contact: &str, message: &str) -> Result<DeliveryStatus, TransportError>;
}

/// In-memory transport that reports every message as delivered.
#[derive(Debug, Default)]
pub struct LoopbackTransport;

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send_sos(
        &self,
        recipients: &[String],
        message: &str,
    ) -> Result<Vec<RecipientStatus>, TransportError> {
        tracing::debug!(recipients = recipients.len(), "loopback sos: {message}");
        Ok(recipients
            .iter()
            .map(|recipient| RecipientStatus {
                recipient: recipient.clone(),
                status: DeliveryStatus::Delivered,
                detail: Some("loopback".to_string()),
            })
            .collect())
    }

    async fn notify(&self, contact: &str, message: &str) -> Result<DeliveryStatus, TransportError> {
        tracing::debug!(contact, "loopback notify: {message}");
        Ok(DeliveryStatus::Delivered)
    }
}

/// Work item handed to the outbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryJob {
    /// SOS to emergency services.
    Sos {
        /// Dispatch the job belongs to.
        dispatch_id: String,
        /// Services to reach.
        recipients: Vec<String>,
        /// Message body.
        message: String,
    },
    /// Notification to a single contact.
    Notify {
        /// Dispatch the job belongs to.
        dispatch_id: String,
        /// Contact address.
        contact: String,
        /// Message body.
        message: String,
    },
}

impl DeliveryJob {
    /// Dispatch the job belongs to.
    #[must_use]
    pub fn dispatch_id(&self) -> &str {
        match self {
            Self::Sos { dispatch_id, .. } | Self::Notify { dispatch_id, .. } => dispatch_id,
        }
    }
}

/// Failure to hand a dispatch over to the outbox.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchError {
    /// The bounded queue is saturated.
    #[error("dispatch outbox full, {dispatch_id} not queued")]
    OutboxFull {
        /// Dispatch that was dropped.
        dispatch_id: String,
    },
    /// The delivery worker is gone.
    #[error("dispatch outbox closed, {dispatch_id} not queued")]
    OutboxClosed {
        /// Dispatch that was dropped.
        dispatch_id: String,
    },
}

/// Outcome of delivering one dispatch to one recipient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Dispatch the receipt belongs to.
    pub dispatch_id: String,
    /// Recipient.
    pub recipient: String,
    /// Outcome.
    pub status: DeliveryStatus,
    /// Transport detail or captured error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// When the worker finished the delivery.
    pub timestamp: DateTime<Utc>,
}

type ReceiptLog = Arc<RwLock<Vec<DeliveryReceipt>>>;

/// Bounded queue drained by a background worker calling the [`Transport`].
///
/// Enqueueing never blocks; when the queue is full the job is refused.
#[derive(Debug, Clone)]
pub struct DispatchOutbox {
    sender: mpsc::Sender<DeliveryJob>,
    receipts: ReceiptLog,
}

impl DispatchOutbox {
    /// Starts the worker on the current tokio runtime, or on a dedicated
    /// thread with its own runtime when called outside one.
    #[must_use]
    pub fn spawn(transport: Arc<dyn Transport>, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receipts = ReceiptLog::default();
        spawn_worker("rakshak-outbox", deliver(transport, receiver, Arc::clone(&receipts)));
        Self { sender, receipts }
    }

    /// Queues a job without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] when the queue is full or the worker has stopped.
    pub fn enqueue(&self, job: DeliveryJob) -> Result<(), DispatchError> {
        self.sender.try_send(job).map_err(|err| match err {
            TrySendError::Full(job) => DispatchError::OutboxFull {
                dispatch_id: job.dispatch_id().to_string(),
            },
            TrySendError::Closed(job) => DispatchError::OutboxClosed {
                dispatch_id: job.dispatch_id().to_string(),
            },
        })
    }

    /// Receipts recorded so far, in completion order.
    #[must_use]
    pub fn receipts(&self) -> Vec<DeliveryReceipt> {
        self.receipts.read().clone()
    }
}

/// Runs a background worker on the current runtime, or on a named thread
/// with its own current-thread runtime when called outside one.
pub(crate) fn spawn_worker(name: &str, worker: impl Future<Output = ()> + Send + 'static) {
    if let Ok(handle) = Handle::try_current() {
        handle.spawn(worker);
        return;
    }
    let spawned = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || match Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime.block_on(worker),
            Err(err) => tracing::error!(%err, "failed to build worker runtime"),
        });
    if let Err(err) = spawned {
        tracing::error!(%err, worker = name, "failed to start worker thread");
    }
}

async fn deliver(
    transport: Arc<dyn Transport>,
    mut receiver: mpsc::Receiver<DeliveryJob>,
    receipts: ReceiptLog,
) {
    while let Some(job) = receiver.recv().await {
        let batch: Vec<DeliveryReceipt> = match job {
            DeliveryJob::Sos {
                dispatch_id,
                recipients,
                message,
            } => match transport.send_sos(&recipients, &message).await {
                Ok(statuses) => statuses
                    .into_iter()
                    .map(|status| receipt(&dispatch_id, status.recipient, status.status, status.detail))
                    .collect(),
                Err(err) => {
                    tracing::error!(%err, dispatch_id = dispatch_id.as_str(), "sos delivery failed");
                    recipients
                        .into_iter()
                        .map(|recipient| {
                            receipt(&dispatch_id, recipient, DeliveryStatus::Failed, Some(err.to_string()))
                        })
                        .collect()
                }
            },
            DeliveryJob::Notify {
                dispatch_id,
                contact,
                message,
            } => {
                let (status, detail) = match transport.notify(&contact, &message).await {
                    Ok(status) => (status, None),
                    Err(err) => {
                        tracing::error!(%err, dispatch_id = dispatch_id.as_str(), "notification delivery failed");
                        (DeliveryStatus::Failed, Some(err.to_string()))
                    }
                };
                vec![receipt(&dispatch_id, contact, status, detail)]
            }
        };
        receipts.write().extend(batch);
    }
}

fn receipt(
    dispatch_id: &str,
    recipient: String,
    status: DeliveryStatus,
    detail: Option<String>,
) -> DeliveryReceipt {
    DeliveryReceipt {
        dispatch_id: dispatch_id.to_string(),
        recipient,
        status,
        detail,
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Notify;

    struct GatedTransport {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl Transport for GatedTransport {
        async fn send_sos(
            &self,
            recipients: &[String],
            _message: &str,
        ) -> Result<Vec<RecipientStatus>, TransportError> {
            self.gate.notified().await;
            Err(TransportError::Unreachable(format!("{} services", recipients.len())))
        }

        async fn notify(&self, _contact: &str, _message: &str) -> Result<DeliveryStatus, TransportError> {
            self.gate.notified().await;
            Ok(DeliveryStatus::Delivered)
        }
    }

    fn sos(id: &str) -> DeliveryJob {
        DeliveryJob::Sos {
            dispatch_id: id.to_string(),
            recipients: vec!["highway_control".to_string(), "police".to_string()],
            message: "crash reported".to_string(),
        }
    }

    async fn wait_for_receipts(outbox: &DispatchOutbox, count: usize) -> Vec<DeliveryReceipt> {
        for _ in 0..200 {
            let receipts = outbox.receipts();
            if receipts.len() >= count {
                return receipts;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        outbox.receipts()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn loopback_deliveries_become_receipts() {
        let outbox = DispatchOutbox::spawn(Arc::new(LoopbackTransport), 8);
        outbox.enqueue(sos("SOS_BUS-1_1")).unwrap();
        outbox
            .enqueue(DeliveryJob::Notify {
                dispatch_id: "FLEET_BUS-1_1".to_string(),
                contact: "fleet.manager@example.com".to_string(),
                message: "overspeed".to_string(),
            })
            .unwrap();

        let receipts = wait_for_receipts(&outbox, 3).await;
        assert_eq!(receipts.len(), 3);
        assert!(receipts.iter().all(|r| r.status == DeliveryStatus::Delivered));
        assert_eq!(receipts[2].recipient, "fleet.manager@example.com");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn saturated_outbox_refuses_without_blocking() {
        let gate = Arc::new(Notify::new());
        let outbox = DispatchOutbox::spawn(
            Arc::new(GatedTransport {
                gate: Arc::clone(&gate),
            }),
            1,
        );

        let refused: Vec<_> = ["A", "B", "C"]
            .into_iter()
            .filter_map(|id| outbox.enqueue(sos(id)).err())
            .collect();
        assert!(!refused.is_empty());
        assert!(matches!(refused[0], DispatchError::OutboxFull { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn transport_errors_become_failed_receipts() {
        let gate = Arc::new(Notify::new());
        let outbox = DispatchOutbox::spawn(
            Arc::new(GatedTransport {
                gate: Arc::clone(&gate),
            }),
            4,
        );
        outbox.enqueue(sos("SOS_TRK-7_1")).unwrap();
        gate.notify_one();

        let receipts = wait_for_receipts(&outbox, 2).await;
        assert_eq!(receipts.len(), 2);
        assert!(receipts.iter().all(|r| r.status == DeliveryStatus::Failed));
        assert!(receipts[0]
            .detail
            .as_deref()
            .is_some_and(|d| d.contains("unreachable")));
    }

    #[test]
    fn works_outside_a_runtime() {
        let outbox = DispatchOutbox::spawn(Arc::new(LoopbackTransport), 2);
        outbox.enqueue(sos("SOS_VAN-2_1")).unwrap();
        for _ in 0..200 {
            if outbox.receipts().len() == 2 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(outbox.receipts().len(), 2);
    }
}
