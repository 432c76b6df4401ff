//! Callback Emitter (C9): optional fire-and-forget POST of the launch
//! response. Generalizes the `reqwest` GET usage seen elsewhere to a POST
//! that never blocks the launch path on network failure.

use crate::model::Response;
use crate::timeouts::secs;
use std::time::Duration;

pub struct CallbackEmitter {
    client: reqwest::Client,
    enabled: bool,
    url: Option<String>,
}

impl CallbackEmitter {
    pub fn new(enabled: bool, url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(secs::CALLBACK))
                .build()
                .unwrap_or_default(),
            enabled,
            url,
        }
    }

    /// Spawns the POST as a detached task; the launch pipeline never awaits it.
    pub fn emit(&self, response: &Response) {
        if !self.enabled {
            return;
        }
        let Some(url) = self.url.clone() else {
            return;
        };
        let client = self.client.clone();
        let body = response.clone();
        tokio::spawn(async move {
            match client.post(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!(worker_id = %body.worker_id, "callback delivered");
                }
                Ok(resp) => {
                    tracing::warn!(worker_id = %body.worker_id, status = %resp.status(), "callback rejected");
                }
                Err(err) => {
                    tracing::warn!(worker_id = %body.worker_id, error = %err, "callback failed");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResponseStatus;
    use uuid::Uuid;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_response() -> Response {
        Response {
            status: ResponseStatus::Completed,
            worker_id: Uuid::new_v4(),
            machine_ip: "127.0.0.1".into(),
            debug_port: 9222,
            session_id: Some(Uuid::new_v4()),
            requester_id: Some("u1".into()),
            websocket_url: None,
            debug_url: None,
            proxy_config: None,
            ttl_minutes: Some(30),
            expires_at: None,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn disabled_emitter_does_not_spawn_a_request() {
        let emitter = CallbackEmitter::new(false, Some("http://127.0.0.1:1/unreachable".into()));
        emitter.emit(&sample_response());
        // no panic, no hang: disabled emitter is a no-op.
    }

    #[tokio::test]
    async fn enabled_emitter_posts_to_the_configured_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

        let emitter = CallbackEmitter::new(true, Some(server.uri()));
        emitter.emit(&sample_response());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }
}
