//! Best-effort asynchronous audit outbox.
//!
//! `emit` never blocks and never fails from the caller's point of view.
//! A background task drains the queue into the sink; write failures are
//! logged and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use super::events::{AuditEvent, AuditSink};

enum OutboxMessage {
    Event(AuditEvent),
    Flush(oneshot::Sender<()>),
}

/// Handle used by the engines to record audit events.
#[derive(Clone)]
pub struct AuditTrail {
    tx: mpsc::UnboundedSender<OutboxMessage>,
    failed: Arc<AtomicU64>,
}

impl AuditTrail {
    /// Start the drain task on the current tokio runtime.
    pub fn spawn(sink: Arc<dyn AuditSink>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let failed = Arc::new(AtomicU64::new(0));
        let failed_counter = Arc::clone(&failed);

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    OutboxMessage::Event(event) => {
                        if let Err(e) = sink.record(&event).await {
                            failed_counter.fetch_add(1, Ordering::Relaxed);
                            log::error!(
                                "AUDIT_WRITE_FAILED type={} actor={} error={}",
                                event.event_type,
                                event.actor,
                                e
                            );
                        }
                    }
                    OutboxMessage::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            log::debug!("AUDIT_OUTBOX_CLOSED");
        });

        Self { tx, failed }
    }

    /// Queue an event for the sink.
    pub fn emit(&self, event: AuditEvent) {
        let event_type = event.event_type;
        if self.tx.send(OutboxMessage::Event(event)).is_err() {
            self.failed.fetch_add(1, Ordering::Relaxed);
            log::error!("AUDIT_OUTBOX_CLOSED dropped_type={}", event_type);
        }
    }

    /// Wait until every event emitted before this call reached the sink.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(OutboxMessage::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Number of events the sink failed to persist.
    pub fn failed_writes(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}
