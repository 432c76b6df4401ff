//! SQS-backed `QueueSource`. Grounded on `original_source/src/utils/sqs_utils.py`;
//! the `aws-sdk-sqs`/`aws-config` pairing is the idiomatic AWS access pattern
//! this retrieval pack uses elsewhere for AWS services (see DESIGN.md).

use super::{QueueMessage, QueueSource, Settlement};
use crate::error::{LauncherError, Result};
use aws_sdk_sqs::Client;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::RwLock;

const CIRCUIT_TRIP_THRESHOLD: u32 = 3;
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Wraps the real client behind a circuit breaker: after 3 consecutive
/// failures the client is dropped and rebuilt before the next poll, backing
/// off exponentially (capped at 30s) on credential-class errors.
pub struct SqsQueueSource {
    queue_url: String,
    client: RwLock<Client>,
    consecutive_failures: AtomicU32,
    backoff: Mutex<Duration>,
    wait_time_seconds: i32,
}

impl SqsQueueSource {
    pub async fn new(queue_url: String, region: Option<String>, wait_time_seconds: i32) -> Result<Self> {
        let client = build_client(region.as_deref()).await;
        Ok(Self {
            queue_url,
            client: RwLock::new(client),
            consecutive_failures: AtomicU32::new(0),
            backoff: Mutex::new(Duration::from_millis(500)),
            wait_time_seconds,
        })
    }

    async fn record_failure(&self, region: Option<&str>) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= CIRCUIT_TRIP_THRESHOLD {
            tracing::warn!(failures, "sqs circuit tripped, rebuilding client");
            let fresh = build_client(region).await;
            *self.client.write().await = fresh;
            self.consecutive_failures.store(0, Ordering::SeqCst);
        }
        let current = *self.backoff.lock().unwrap();
        let next = (current * 2).min(MAX_BACKOFF);
        tokio::time::sleep(current).await;
        *self.backoff.lock().unwrap() = next;
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        *self.backoff.lock().unwrap() = Duration::from_millis(500);
    }
}

async fn build_client(region: Option<&str>) -> Client {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
    if let Some(region) = region {
        loader = loader.region(aws_config::Region::new(region.to_string()));
    }
    let sdk_config = loader.load().await;
    Client::new(&sdk_config)
}

#[async_trait::async_trait]
impl QueueSource for SqsQueueSource {
    async fn receive(&self, max_messages: i32) -> Result<Vec<QueueMessage>> {
        let client = self.client.read().await;
        let result = client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages.clamp(1, 10))
            .wait_time_seconds(self.wait_time_seconds)
            .visibility_timeout(120)
            .send()
            .await;
        drop(client);

        match result {
            Ok(output) => {
                self.record_success();
                Ok(output
                    .messages
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|m| {
                        Some(QueueMessage {
                            id: m.message_id?,
                            body: m.body?,
                            receipt: m.receipt_handle?,
                        })
                    })
                    .collect())
            }
            Err(err) => {
                self.record_failure(None).await;
                Err(LauncherError::QueueTransient(err.to_string()))
            }
        }
    }

    async fn settle(&self, message: &QueueMessage, settlement: Settlement) -> Result<()> {
        let client = self.client.read().await;
        let outcome = match settlement {
            Settlement::AckDelete => client
                .delete_message()
                .queue_url(&self.queue_url)
                .receipt_handle(&message.receipt)
                .send()
                .await
                .map(|_| ())
                .map_err(|err| err.to_string()),
            Settlement::SetVisibility(secs) => client
                .change_message_visibility()
                .queue_url(&self.queue_url)
                .receipt_handle(&message.receipt)
                .visibility_timeout(secs)
                .send()
                .await
                .map(|_| ())
                .map_err(|err| err.to_string()),
        };
        outcome.map_err(LauncherError::QueueTransient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps_at_thirty_seconds() {
        let mut backoff = Duration::from_millis(500);
        for _ in 0..20 {
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
        assert_eq!(backoff, MAX_BACKOFF);
    }
}
