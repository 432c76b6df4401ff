//! File-polling `QueueSource` for local-test mode (§6), used when
//! `SQS_REQUEST_QUEUE_URL` is unset or `"local"`. Grounded on the branch in
//! `original_source/src/main.py` that polls a directory instead of SQS.

use super::{QueueMessage, QueueSource, Settlement};
use crate::error::Result;
use std::path::PathBuf;
use tokio::fs;

const REQUEST_FILE: &str = "test_request.json";
const STATUS_REQUEST_FILE: &str = "test_status_request.json";
const STATUS_RESPONSE_FILE: &str = "test_status_response.json";

pub struct LocalQueueSource {
    dir: PathBuf,
}

impl LocalQueueSource {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    async fn read_and_claim(&self, name: &str) -> Option<String> {
        let path = self.dir.join(name);
        let body = fs::read_to_string(&path).await.ok()?;
        Some(body)
    }
}

#[async_trait::async_trait]
impl QueueSource for LocalQueueSource {
    /// Polls for `test_request.json` (launch/delete) and returns it as a
    /// single message; settlement deletes the request file. Status queries
    /// (`test_status_request.json`) are handled separately by
    /// [`poll_status_requests`] since they never flow through the
    /// launch/delete `Request` model.
    async fn receive(&self, _max_messages: i32) -> Result<Vec<QueueMessage>> {
        let mut found = Vec::new();
        if let Some(body) = self.read_and_claim(REQUEST_FILE).await {
            found.push(QueueMessage {
                id: REQUEST_FILE.to_string(),
                body,
                receipt: REQUEST_FILE.to_string(),
            });
        }
        if found.is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        }
        Ok(found)
    }

    async fn settle(&self, message: &QueueMessage, settlement: Settlement) -> Result<()> {
        match settlement {
            Settlement::AckDelete => {
                let _ = fs::remove_file(self.dir.join(&message.receipt)).await;
            }
            Settlement::SetVisibility(_) => {
                // Local mode has no visibility timeout; leaving the file in
                // place means it will be picked up again on the next poll.
            }
        }
        Ok(())
    }
}

/// Supplemented feature (§10.5): serves `SessionManager::status(worker_id)`
/// to the local-test harness via `test_status_request.json` →
/// `test_status_response.json`, independent of the launch/delete queue loop.
pub async fn poll_status_requests(
    manager: std::sync::Arc<crate::manager::SessionManager>,
    dir: PathBuf,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let request_path = dir.join(STATUS_REQUEST_FILE);
    let response_path = dir.join(STATUS_RESPONSE_FILE);

    loop {
        if *shutdown.borrow() {
            return;
        }
        if let Ok(body) = fs::read_to_string(&request_path).await {
            if let Ok(query) = serde_json::from_str::<StatusQuery>(&body) {
                let info = manager.status(query.worker_id).await;
                let response = serde_json::to_string(&info).unwrap_or_else(|_| "null".to_string());
                let _ = fs::write(&response_path, response).await;
            }
            let _ = fs::remove_file(&request_path).await;
        }
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_millis(500)) => {}
            _ = shutdown.changed() => {}
        }
    }
}

#[derive(serde::Deserialize)]
struct StatusQuery {
    worker_id: uuid::Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn receive_returns_empty_when_no_files_present() {
        let dir = tempfile::tempdir().unwrap();
        let source = LocalQueueSource::new(dir.path().to_path_buf());
        let messages = source.receive(1).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn receive_picks_up_a_pending_request_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(REQUEST_FILE), r#"{"id":"r1"}"#).await.unwrap();
        let source = LocalQueueSource::new(dir.path().to_path_buf());
        let messages = source.receive(1).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].body, r#"{"id":"r1"}"#);
    }

    #[tokio::test]
    async fn ack_delete_removes_the_request_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(REQUEST_FILE);
        fs::write(&path, r#"{"id":"r1"}"#).await.unwrap();
        let source = LocalQueueSource::new(dir.path().to_path_buf());
        let message = QueueMessage {
            id: REQUEST_FILE.into(),
            body: String::new(),
            receipt: REQUEST_FILE.into(),
        };
        source.settle(&message, Settlement::AckDelete).await.unwrap();
        assert!(!path.exists());
    }
}
