//! Queue Adapter (C8): long-polls the request queue, decodes requests,
//! dispatches to the Session Manager, and settles each message per outcome
//! (§4.7). Generalizes the `Daemon::start` accept-and-dispatch loop shape
//! to a queue-poll loop.

pub mod local;
pub mod sqs;

use crate::error::{Disposition, LauncherError};
use crate::manager::SessionManager;
use crate::model::Request;
use crate::timeouts::ms;
use std::sync::Arc;
use std::time::Duration;

/// A received message, opaque beyond its body and an adapter-specific
/// receipt handle used to settle it.
pub struct QueueMessage {
    pub id: String,
    pub body: String,
    pub receipt: String,
}

/// How the adapter wants a message disposed of after handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    AckDelete,
    SetVisibility(i32),
}

#[async_trait::async_trait]
pub trait QueueSource: Send + Sync {
    async fn receive(&self, max_messages: i32) -> crate::error::Result<Vec<QueueMessage>>;
    async fn settle(&self, message: &QueueMessage, settlement: Settlement) -> crate::error::Result<()>;
}

fn settlement_for(error: &LauncherError) -> Settlement {
    match error.disposition() {
        Disposition::SlotFull => Settlement::SetVisibility(30),
        Disposition::RollbackFailed => Settlement::SetVisibility(10),
        Disposition::PoisonMessage => Settlement::AckDelete,
        Disposition::DeleteNotFound => Settlement::SetVisibility(0),
        Disposition::Transient => Settlement::SetVisibility(15),
    }
}

/// Handles one message: decode, route by `action`, and decide its settlement.
/// Never panics on malformed input; a non-object/invalid body is a poison
/// message and is ack-deleted.
pub async fn handle_message(manager: &Arc<SessionManager>, message: &QueueMessage) -> Settlement {
    let parsed: Result<serde_json::Value, _> = serde_json::from_str(&message.body);
    let Ok(value) = parsed else {
        return Settlement::AckDelete;
    };
    if !value.is_object() {
        return Settlement::AckDelete;
    }

    let request: Request = match serde_json::from_value(value) {
        Ok(r) => r,
        Err(_) => return Settlement::AckDelete,
    };

    match manager.dispatch(request).await {
        Ok(Some(response)) => match response.status {
            crate::model::ResponseStatus::Completed => Settlement::AckDelete,
            crate::model::ResponseStatus::SlotFull => Settlement::SetVisibility(30),
            crate::model::ResponseStatus::Failed | crate::model::ResponseStatus::Rejected => {
                Settlement::SetVisibility(10)
            }
        },
        Ok(None) => Settlement::AckDelete, // delete action succeeded
        Err(err) => settlement_for(&err),
    }
}

/// Main poll loop (§4.7): gates on free slots/ports, long-polls for up to
/// `min(available, batch_size)` messages, and dispatches each concurrently.
pub async fn run(
    manager: Arc<SessionManager>,
    source: Arc<dyn QueueSource>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let status_interval = Duration::from_secs(manager.config().queue.status_log_interval_secs.max(1));
    let mut last_status = tokio::time::Instant::now() - status_interval;

    loop {
        if *shutdown.borrow() {
            return;
        }

        let available = manager.config().pool.max_browser_instances as i64 - manager.live_session_count().await as i64;
        let has_capacity = manager.has_free_capacity().await;

        if tokio::time::Instant::now().duration_since(last_status) >= status_interval {
            let live_sessions = manager.live_session_count().await;
            tracing::info!(live_sessions, available, has_capacity, "queue adapter status");
            last_status = tokio::time::Instant::now();
        }

        if available <= 0 || !has_capacity {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(ms::QUEUE_BACKPRESSURE_SLEEP)) => {}
                _ = shutdown.changed() => {}
            }
            continue;
        }

        let batch = available.min(manager.config().queue.sqs_max_batch_size as i64).max(1) as i32;
        let messages = match source.receive(batch).await {
            Ok(m) => m,
            Err(err) => {
                tracing::warn!(error = %err, "queue receive failed, backing off");
                tokio::time::sleep(Duration::from_millis(ms::QUEUE_BACKPRESSURE_SLEEP)).await;
                continue;
            }
        };

        let mut tasks = Vec::new();
        for message in messages {
            let manager = Arc::clone(&manager);
            let source = Arc::clone(&source);
            tasks.push(tokio::spawn(async move {
                let settlement = handle_message(&manager, &message).await;
                if let Err(err) = source.settle(&message, settlement).await {
                    tracing::warn!(error = %err, message_id = %message.id, "failed to settle queue message");
                }
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_full_disposition_requeues_with_30s_delay() {
        let err = LauncherError::NoSlotsAvailable;
        assert_eq!(settlement_for(&err), Settlement::SetVisibility(30));
    }

    #[test]
    fn poison_message_disposition_ack_deletes() {
        let err = LauncherError::PoisonMessage("bad".into());
        assert_eq!(settlement_for(&err), Settlement::AckDelete);
    }

    #[test]
    fn delete_not_found_disposition_returns_immediately() {
        let err = LauncherError::DeleteTargetNotFound("w1".into());
        assert_eq!(settlement_for(&err), Settlement::SetVisibility(0));
    }

    #[tokio::test]
    async fn non_object_body_is_ack_deleted() {
        let manager = Arc::new(SessionManager::new(crate::config::Config::default()));
        let message = QueueMessage {
            id: "m1".into(),
            body: "\"just a string\"".into(),
            receipt: "r1".into(),
        };
        assert_eq!(handle_message(&manager, &message).await, Settlement::AckDelete);
    }

    #[tokio::test]
    async fn malformed_json_is_ack_deleted() {
        let manager = Arc::new(SessionManager::new(crate::config::Config::default()));
        let message = QueueMessage {
            id: "m2".into(),
            body: "{not json".into(),
            receipt: "r2".into(),
        };
        assert_eq!(handle_message(&manager, &message).await, Settlement::AckDelete);
    }

    #[tokio::test]
    async fn delete_without_session_id_is_poison() {
        let manager = Arc::new(SessionManager::new(crate::config::Config::default()));
        let message = QueueMessage {
            id: "m3".into(),
            body: r#"{"action":"delete"}"#.into(),
            receipt: "r3".into(),
        };
        assert_eq!(handle_message(&manager, &message).await, Settlement::AckDelete);
    }

    #[tokio::test]
    async fn delete_with_unknown_session_returns_to_queue_immediately() {
        let manager = Arc::new(SessionManager::new(crate::config::Config::default()));
        let message = QueueMessage {
            id: "m4".into(),
            body: format!(r#"{{"action":"delete","session_id":"{}"}}"#, uuid::Uuid::new_v4()),
            receipt: "r4".into(),
        };
        assert_eq!(handle_message(&manager, &message).await, Settlement::SetVisibility(0));
    }
}
