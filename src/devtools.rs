//! DevTools Probe (C4): readiness and activity inspection against the
//! Chrome DevTools HTTP surface. Grounded on the
//! `check_existing_chrome`/`Session::is_alive` probes.

use crate::timeouts::{ms, secs};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
pub struct Activity {
    pub has_pages: bool,
    pub has_real_content: bool,
    pub has_websocket: bool,
}

fn is_blank_url(url: &str) -> bool {
    matches!(url, "about:blank" | "chrome://newtab/" | "chrome://new-tab-page/" | "")
        || url.starts_with("data:")
}

/// Waits for `GET /json/version` to return 200, backing off from 100ms to a
/// 2s cap (factor 1.7), bounded by `min(90s, browser_timeout)`.
pub async fn reachable(client: &reqwest::Client, port: u16, browser_timeout: Duration) -> bool {
    let deadline = browser_timeout.min(Duration::from_secs(secs::DEVTOOLS_READY_CAP));
    let start = tokio::time::Instant::now();
    let mut interval = Duration::from_millis(ms::DEVTOOLS_POLL_INITIAL);
    let url = format!("http://127.0.0.1:{port}/json/version");

    loop {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return true;
            }
        }
        if tokio::time::Instant::now().duration_since(start) >= deadline {
            return false;
        }
        tokio::time::sleep(interval).await;
        interval = next_backoff(interval);
    }
}

fn next_backoff(current: Duration) -> Duration {
    let grown = current.max(Duration::from_millis(ms::DEVTOOLS_POLL_BACKOFF_START)).mul_f64(ms::DEVTOOLS_POLL_BACKOFF_FACTOR);
    grown.min(Duration::from_millis(ms::DEVTOOLS_POLL_BACKOFF_CAP))
}

/// Inspects `/json/list`; any transport or parse failure is treated as "no
/// activity" rather than propagated, per §4.3.
pub async fn activity(client: &reqwest::Client, port: u16) -> Activity {
    let url = format!("http://127.0.0.1:{port}/json/list");
    let Ok(resp) = client.get(&url).send().await else {
        return Activity::default();
    };
    let Ok(body) = resp.json::<Value>().await else {
        return Activity::default();
    };
    let Some(targets) = body.as_array() else {
        return Activity::default();
    };

    let pages: Vec<&Value> = targets
        .iter()
        .filter(|t| t.get("type").and_then(Value::as_str) == Some("page"))
        .collect();

    let has_real_content = pages.iter().any(|p| {
        p.get("url")
            .and_then(Value::as_str)
            .map(|u| !is_blank_url(u))
            .unwrap_or(false)
    });
    let has_websocket = pages
        .iter()
        .any(|p| p.get("webSocketDebuggerUrl").and_then(Value::as_str).is_some());

    Activity {
        has_pages: !pages.is_empty(),
        has_real_content,
        has_websocket,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn reachable_succeeds_on_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json/version"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let port = server.address().port();
        let client = reqwest::Client::new();
        assert!(reachable(&client, port, Duration::from_millis(500)).await);
    }

    #[tokio::test]
    async fn reachable_times_out_when_nothing_listens() {
        let client = reqwest::Client::new();
        // Port 1 is privileged/unassigned in test sandboxes; connection fails fast.
        assert!(!reachable(&client, 1, Duration::from_millis(300)).await);
    }

    #[tokio::test]
    async fn activity_detects_real_content_and_websocket() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"type": "page", "url": "https://example.com", "webSocketDebuggerUrl": "ws://x"}
            ])))
            .mount(&server)
            .await;

        let port = server.address().port();
        let client = reqwest::Client::new();
        let act = activity(&client, port).await;
        assert!(act.has_pages);
        assert!(act.has_real_content);
        assert!(act.has_websocket);
    }

    #[tokio::test]
    async fn activity_treats_blank_only_pages_as_no_real_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"type": "page", "url": "about:blank"}
            ])))
            .mount(&server)
            .await;

        let port = server.address().port();
        let client = reqwest::Client::new();
        let act = activity(&client, port).await;
        assert!(act.has_pages);
        assert!(!act.has_real_content);
    }

    #[tokio::test]
    async fn activity_transport_failure_is_no_activity() {
        let client = reqwest::Client::new();
        let act = activity(&client, 1).await;
        assert!(!act.has_pages && !act.has_real_content && !act.has_websocket);
    }
}
