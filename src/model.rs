//! Wire types and the in-memory session record (§3 Data Model).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ProxyConfig {
    pub server: String,
    #[serde(default)]
    pub bypass_list: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    #[default]
    Launch,
    Delete,
}

/// A request as decoded from a queue message body. Unknown fields are
/// tolerated (`serde`'s default behavior for structs without `deny_unknown_fields`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Request {
    pub id: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    pub session_id: Option<Uuid>,
    pub requester_id: Option<String>,
    #[serde(default)]
    pub action: Action,
    pub user_data_dir: Option<String>,
    pub profile_name: Option<String>,
    pub proxy_config: Option<ProxyConfig>,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub chrome_args: Vec<String>,
    pub ttl_minutes: Option<u64>,
}

impl Request {
    /// First present of `id`, `request_id`, `requester_id`, else a
    /// synthesized identifier (caller supplies the message-id fallback).
    pub fn task_identifier(&self, message_id_fallback: &str) -> String {
        self.id
            .clone()
            .or_else(|| self.request_id.clone())
            .or_else(|| self.requester_id.clone())
            .unwrap_or_else(|| format!("msg-{}", &message_id_fallback[..message_id_fallback.len().min(8)]))
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Completed,
    Failed,
    SlotFull,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub status: ResponseStatus,
    pub worker_id: Uuid,
    pub machine_ip: String,
    pub debug_port: u16,
    pub session_id: Option<Uuid>,
    pub requester_id: Option<String>,
    pub websocket_url: Option<String>,
    pub debug_url: Option<String>,
    pub proxy_config: Option<ProxyConfig>,
    pub ttl_minutes: Option<u64>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Response {
    pub fn slot_full(worker_id: Uuid, requester_id: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::SlotFull,
            worker_id,
            machine_ip: String::new(),
            debug_port: 0,
            session_id: None,
            requester_id,
            websocket_url: None,
            debug_url: None,
            proxy_config: None,
            ttl_minutes: None,
            expires_at: None,
            error_message: Some(reason.into()),
        }
    }

    pub fn failed(worker_id: Uuid, requester_id: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Failed,
            worker_id,
            machine_ip: String::new(),
            debug_port: 0,
            session_id: None,
            requester_id,
            websocket_url: None,
            debug_url: None,
            proxy_config: None,
            ttl_minutes: None,
            expires_at: None,
            error_message: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Expired,
    HardTtlExceeded,
    Crashed,
    Closed,
    NeverUsed,
    DeleteAction,
    Killed,
    Shutdown,
}

/// A live browser session. `created` is monotonic (for TTL/sweep math);
/// `created_at` is wall-clock (for the caller-visible `Response`/record).
#[derive(Debug, Clone)]
pub struct Session {
    pub worker_id: Uuid,
    pub session_id: Uuid,
    pub request_id: Option<String>,
    pub requester_id: Option<String>,
    pub debug_port: u16,
    pub process_id: u32,
    pub process_create_time: Option<f64>,
    pub user_data_dir: std::path::PathBuf,
    pub profile_is_synthesized: bool,
    pub machine_ip: String,
    pub public_ip: String,
    pub created: Instant,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub has_navigated_away: bool,
    pub proxy_config: Option<ProxyConfig>,
    pub ttl_minutes: u64,
}

impl Session {
    pub fn to_info(&self) -> SessionInfo {
        SessionInfo {
            worker_id: self.worker_id,
            session_id: self.session_id,
            debug_port: self.debug_port,
            process_id: self.process_id,
            created_at: self.created_at,
            expires_at: self.expires_at,
            has_navigated_away: self.has_navigated_away,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub worker_id: Uuid,
    pub session_id: Uuid,
    pub debug_port: u16,
    pub process_id: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub has_navigated_away: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminatedSessionRecord {
    pub worker_id: Uuid,
    pub request_id: Option<String>,
    pub machine_ip: String,
    pub debug_port: u16,
    pub process_id: u32,
    pub termination_time: DateTime<Utc>,
    pub termination_reason: TerminationReason,
    pub exit_code: Option<i32>,
    pub session_duration_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_identifier_prefers_id_then_request_id_then_requester() {
        let req = Request {
            id: Some("r1".into()),
            request_id: Some("ignored".into()),
            session_id: None,
            requester_id: Some("also-ignored".into()),
            action: Action::Launch,
            user_data_dir: None,
            profile_name: None,
            proxy_config: None,
            extensions: vec![],
            chrome_args: vec![],
            ttl_minutes: None,
        };
        assert_eq!(req.task_identifier("deadbeef1234"), "r1");
    }

    #[test]
    fn task_identifier_falls_back_to_message_id_prefix() {
        let req = Request {
            id: None,
            request_id: None,
            session_id: None,
            requester_id: None,
            action: Action::Launch,
            user_data_dir: None,
            profile_name: None,
            proxy_config: None,
            extensions: vec![],
            chrome_args: vec![],
            ttl_minutes: None,
        };
        assert_eq!(req.task_identifier("deadbeef1234"), "msg-deadbeef");
    }

    #[test]
    fn action_defaults_to_launch() {
        let parsed: Request = serde_json::from_str(r#"{"id":"r1"}"#).unwrap();
        assert_eq!(parsed.action, Action::Launch);
    }
}
