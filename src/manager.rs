//! Session Manager (C6): the core orchestrator. Owns the Port Registry,
//! Process Supervisor and Session Store and runs the strict
//! reserve→launch→probe→insert→activate launch pipeline with full reverse
//! rollback on failure (§4.5). Generalizes the
//! `SessionPool::create_ephemeral`/`ensure_capacity`/`destroy` orchestration.

use crate::callback::CallbackEmitter;
use crate::clock::{new_session_id, new_worker_id};
use crate::config::Config;
use crate::devtools;
use crate::error::{LauncherError, Result};
use crate::model::{Action, Request, Response, ResponseStatus, Session, SessionInfo, TerminatedSessionRecord, TerminationReason};
use crate::ports::{PortRegistry, ProbeMode};
use crate::process::{self, LaunchSpec, ProcessHandle, ProcessSupervisor};
use crate::scripts;
use crate::store::SessionStore;
use crate::timeouts::secs;
use chrono::Utc;
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use uuid::Uuid;

static PROFILE_DIR_NAME: once_cell::sync::Lazy<Regex> =
    once_cell::sync::Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-]+$").unwrap());

pub struct SessionManager {
    config: Config,
    ports: PortRegistry,
    store: SessionStore,
    supervisor: ProcessSupervisor,
    http: reqwest::Client,
    callback: CallbackEmitter,
    handles: Mutex<HashMap<Uuid, Box<dyn ProcessHandle>>>,
    machine_ip: String,
    public_ip: String,
}

impl SessionManager {
    pub fn new(config: Config) -> Self {
        let machine_ip = local_ip();
        let public_ip = machine_ip.clone();
        let supervisor = ProcessSupervisor::new(&config);
        let probe_mode = if config.browser.use_custom_chrome_launcher {
            ProbeMode::ExpectLoopbackBound
        } else {
            ProbeMode::BindCheck
        };
        let ports = PortRegistry::new(config.browser.chrome_port_start, config.browser.chrome_port_end, probe_mode);
        let store = SessionStore::new(config.pool.max_browser_instances);
        let callback = CallbackEmitter::new(config.callback.enabled, config.callback.url.clone());

        Self {
            config,
            ports,
            store,
            supervisor,
            http: reqwest::Client::new(),
            callback,
            handles: Mutex::new(HashMap::new()),
            machine_ip,
            public_ip,
        }
    }

    pub async fn has_free_capacity(&self) -> bool {
        self.ports.has_free_capacity().await && self.store.has_available_slots().await
    }

    pub async fn live_session_count(&self) -> usize {
        self.store.count().await
    }

    pub async fn status(&self, worker_id: Uuid) -> Option<SessionInfo> {
        self.store.get_info(worker_id).await
    }

    pub async fn lookup_by_session_id(&self, session_id: Uuid) -> Option<Uuid> {
        self.store.lookup_by_session_id(session_id).await
    }

    /// Entry point for `action=launch`. Handles admission, reservation,
    /// launch, probe, recording and activation; rolls back in reverse on
    /// any failure after the port was reserved.
    pub async fn launch(&self, request: Request) -> Response {
        let worker_id = new_worker_id();
        let requester_id = request.requester_id.clone();

        if !self.ports.has_free_capacity().await {
            return self.emit(Response::slot_full(worker_id, requester_id, "no free debug ports"));
        }
        if !self.store.has_available_slots().await {
            return self.emit(Response::slot_full(worker_id, requester_id, "no available session slots"));
        }

        let port = match self.ports.reserve(worker_id).await {
            Ok(p) => p,
            Err(_) => {
                return self.emit(Response::slot_full(worker_id, requester_id, "port reservation failed"))
            }
        };

        match self.launch_inner(worker_id, port, &request).await {
            Ok(response) => self.emit(response),
            Err(err) => {
                tracing::warn!(%worker_id, port, error = %err, "launch failed, rolling back");
                self.rollback(worker_id, port).await;
                self.emit(Response::failed(worker_id, requester_id, err.to_string()))
            }
        }
    }

    fn emit(&self, response: Response) -> Response {
        self.callback.emit(&response);
        response
    }

    async fn launch_inner(&self, worker_id: Uuid, port: u16, request: &Request) -> Result<Response> {
        let (user_data_dir, synthesized) = self.resolve_profile_dir(request, port)?;
        std::fs::create_dir_all(&user_data_dir).map_err(LauncherError::from)?;

        let spec = LaunchSpec {
            port,
            user_data_dir: &user_data_dir,
            proxy: request.proxy_config.as_ref(),
            extensions: &request.extensions,
            chrome_args: &request.chrome_args,
            machine_ip: &self.machine_ip,
        };

        let handle = self.supervisor.launch(&spec).await?;
        self.handles.lock().await.insert(worker_id, handle);

        let timeout = Duration::from_millis(self.config.browser.browser_timeout_ms);
        if !devtools::reachable(&self.http, port, timeout).await {
            self.handles.lock().await.remove(&worker_id);
            return Err(LauncherError::DevToolsNotReady(timeout.min(Duration::from_secs(secs::DEVTOOLS_READY_CAP))));
        }

        let process_id = {
            let handles = self.handles.lock().await;
            handles.get(&worker_id).map(|h| h.pid()).unwrap_or(0)
        };
        let process_create_time = {
            let handles = self.handles.lock().await;
            handles.get(&worker_id).and_then(|h| h.create_time())
        };

        let ttl_minutes = request.ttl_minutes.unwrap_or(self.config.pool.default_ttl_minutes).min(self.config.pool.hard_ttl_minutes);
        let now = Utc::now();
        let expires_at = now + chrono::Duration::minutes(ttl_minutes as i64);
        let session_id = request.session_id.unwrap_or_else(new_session_id);

        let session = Session {
            worker_id,
            session_id,
            request_id: request.id.clone().or_else(|| request.request_id.clone()),
            requester_id: request.requester_id.clone(),
            debug_port: port,
            process_id,
            process_create_time,
            user_data_dir: user_data_dir.clone(),
            profile_is_synthesized: synthesized,
            machine_ip: self.machine_ip.clone(),
            public_ip: self.public_ip.clone(),
            created: std::time::Instant::now(),
            created_at: now,
            expires_at,
            has_navigated_away: false,
            proxy_config: request.proxy_config.clone(),
            ttl_minutes,
        };

        if !self.store.insert_if_capacity(session).await {
            self.handles.lock().await.remove(&worker_id);
            return Err(LauncherError::StoreRace);
        }

        self.ports.activate(worker_id, port).await;

        Ok(Response {
            status: ResponseStatus::Completed,
            worker_id,
            machine_ip: self.public_ip.clone(),
            debug_port: port,
            session_id: Some(session_id),
            requester_id: request.requester_id.clone(),
            websocket_url: Some(format!("ws://{}:{}/devtools/browser", self.public_ip, port)),
            debug_url: Some(format!("http://{}:{}", self.public_ip, port)),
            proxy_config: request.proxy_config.clone(),
            ttl_minutes: Some(ttl_minutes),
            expires_at: Some(expires_at),
            error_message: None,
        })
    }

    /// Resolves the `user_data_dir` for a launch: synthesizes one under the
    /// appropriate base directory if omitted, else canonicalizes and
    /// validates the caller-supplied path against the allow-list (§4.5).
    fn resolve_profile_dir(&self, request: &Request, port: u16) -> Result<(PathBuf, bool)> {
        if let Some(supplied) = &request.user_data_dir {
            let canonical = std::fs::canonicalize(supplied)
                .map_err(|_| LauncherError::InvalidUserDataDir(format!("cannot resolve {supplied}")))?;
            let roots = crate::utils::allowed_profile_roots(self.launcher_basedir().as_deref());
            if !roots.iter().any(|root| canonical.starts_with(root)) {
                return Err(LauncherError::InvalidUserDataDir(format!(
                    "{} is outside the allowed profile roots",
                    canonical.display()
                )));
            }
            let name = canonical
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| LauncherError::InvalidUserDataDir("profile dir has no name".into()))?;
            if !PROFILE_DIR_NAME.is_match(name) {
                return Err(LauncherError::InvalidUserDataDir(format!(
                    "profile directory name '{name}' contains disallowed characters"
                )));
            }
            return Ok((canonical, false));
        }

        let dir = if self.config.browser.use_custom_chrome_launcher {
            self.launcher_basedir()
                .unwrap_or_else(std::env::temp_dir)
                .join(format!("p{port}"))
        } else {
            std::env::temp_dir().join(format!("chrome_profile_p{port}"))
        };
        Ok((dir, true))
    }

    fn launcher_basedir(&self) -> Option<PathBuf> {
        self.config.browser.chrome_launcher_cmd.as_ref().and_then(|cmd| {
            std::path::Path::new(cmd).parent().map(|p| p.to_path_buf())
        })
    }

    /// Full reverse rollback (§4.5): kill the process if launched, drop any
    /// inserted session, release the port, and best-effort delete a
    /// synthesized profile directory.
    async fn rollback(&self, worker_id: Uuid, port: u16) {
        if let Some(mut handle) = self.handles.lock().await.remove(&worker_id) {
            if handle.poll().await.is_none() {
                let _ = handle.kill().await;
            }
        }
        if let Some(session) = self.store.remove_and_snapshot(worker_id).await {
            if session.profile_is_synthesized {
                let _ = std::fs::remove_dir_all(&session.user_data_dir);
            }
        }
        self.ports.rollback(worker_id, port).await;
        self.ports.release(port).await;
    }

    /// Invoked for `action=delete` and by the Cleanup Loop. Returns `None`
    /// if no live session matches `worker_id`.
    pub async fn terminate(&self, worker_id: Uuid, reason: TerminationReason) -> Option<TerminatedSessionRecord> {
        let session = self.store.remove_and_snapshot(worker_id).await?;
        let mut handle = self.handles.lock().await.remove(&worker_id);

        let exit_code = if let Some(h) = handle.as_mut() {
            match h.poll().await {
                Some(code) => Some(code),
                None => {
                    let _ = h.kill().await;
                    h.poll().await
                }
            }
        } else if process::pid_reuse_guard_passes(session.process_id, session.process_create_time, session.debug_port) {
            let _ = process::aggressive_kill_if_safe(session.process_id, session.process_create_time, session.debug_port).await;
            None
        } else {
            None
        };

        self.ports.release(session.debug_port).await;

        let duration = (Utc::now() - session.created_at).num_seconds().max(0) as u64;
        let record = TerminatedSessionRecord {
            worker_id: session.worker_id,
            request_id: session.request_id.clone(),
            machine_ip: session.machine_ip.clone(),
            debug_port: session.debug_port,
            process_id: session.process_id,
            termination_time: Utc::now(),
            termination_reason: reason,
            exit_code: process::reason_exit_code(reason, exit_code),
            session_duration_seconds: duration,
        };
        self.store.record_terminated(record.clone()).await;

        let profile_dir = session.profile_is_synthesized.then_some(session.user_data_dir.as_path());
        match reason {
            TerminationReason::Expired | TerminationReason::HardTtlExceeded | TerminationReason::NeverUsed => {
                scripts::cleanup_expired_session(session.process_id, session.debug_port, profile_dir).await;
            }
            _ => {
                if let Some(dir) = profile_dir {
                    scripts::cleanup_profile(dir).await;
                }
                scripts::cleanup_port(session.debug_port).await;
            }
        }

        Some(record)
    }

    /// Handles an `action=delete` request per §4.7.
    pub async fn handle_delete(&self, request: &Request) -> Result<Option<TerminatedSessionRecord>> {
        let Some(session_id) = request.session_id else {
            return Err(LauncherError::PoisonMessage("delete action missing session_id".into()));
        };
        let Some(worker_id) = self.lookup_by_session_id(session_id).await else {
            return Err(LauncherError::DeleteTargetNotFound(session_id.to_string()));
        };
        Ok(self.terminate(worker_id, TerminationReason::DeleteAction).await)
    }

    pub async fn dispatch(&self, request: Request) -> Result<Option<Response>> {
        match request.action {
            Action::Delete => {
                self.handle_delete(&request).await?;
                Ok(None)
            }
            Action::Launch => Ok(Some(self.launch(request).await)),
        }
    }

    pub async fn snapshot_active(&self) -> Vec<Session> {
        self.store.snapshot_active().await
    }

    pub async fn devtools_activity(&self, port: u16) -> devtools::Activity {
        devtools::activity(&self.http, port).await
    }

    /// Polls the stored process handle for `worker_id` without removing it.
    /// `None` while still alive or if there is no handle on record (e.g. a
    /// delegated session this host never directly spawned); `Some(code)`
    /// once the process has exited.
    pub async fn poll_process(&self, worker_id: Uuid) -> Option<i32> {
        let mut handles = self.handles.lock().await;
        handles.get_mut(&worker_id)?.poll().await
    }

    pub async fn devtools_client(&self) -> &reqwest::Client {
        &self.http
    }

    pub async fn mark_navigated(&self, worker_id: Uuid) {
        self.store.mark_navigated(worker_id).await;
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Cooperative shutdown: terminate every live session, capped at 3
    /// concurrent kills (§5).
    pub async fn shutdown(self: &Arc<Self>) {
        let sessions = self.store.snapshot_active().await;
        let semaphore = Arc::new(Semaphore::new(3));
        let mut tasks = Vec::new();
        for session in sessions {
            let manager = Arc::clone(self);
            let permit = Arc::clone(&semaphore);
            tasks.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await;
                manager.terminate(session.worker_id, TerminationReason::Shutdown).await;
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
    }
}

fn local_ip() -> String {
    std::env::var("MACHINE_IP").unwrap_or_else(|_| "127.0.0.1".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.browser.chrome_port_start = 19222;
        config.browser.chrome_port_end = 19222;
        config.pool.max_browser_instances = 1;
        config
    }

    #[tokio::test]
    async fn launch_reports_slot_full_when_no_ports_free() {
        let manager = SessionManager::new(test_config());
        let worker = crate::clock::new_worker_id();
        manager.ports.reserve(worker).await.unwrap();

        let request = Request {
            id: Some("r1".into()),
            request_id: None,
            session_id: None,
            requester_id: Some("u1".into()),
            action: Action::Launch,
            user_data_dir: None,
            profile_name: None,
            proxy_config: None,
            extensions: vec![],
            chrome_args: vec![],
            ttl_minutes: Some(10),
        };

        let response = manager.launch(request).await;
        assert_eq!(response.status, ResponseStatus::SlotFull);
        assert_eq!(response.debug_port, 0);
    }

    #[tokio::test]
    async fn delete_action_without_matching_session_is_not_found() {
        let manager = SessionManager::new(test_config());
        let request = Request {
            id: Some("r2".into()),
            request_id: None,
            session_id: Some(Uuid::new_v4()),
            requester_id: None,
            action: Action::Delete,
            user_data_dir: None,
            profile_name: None,
            proxy_config: None,
            extensions: vec![],
            chrome_args: vec![],
            ttl_minutes: None,
        };
        let err = manager.handle_delete(&request).await.unwrap_err();
        assert!(matches!(err, LauncherError::DeleteTargetNotFound(_)));
    }

    #[tokio::test]
    async fn profile_dir_outside_allow_list_is_rejected() {
        let manager = SessionManager::new(test_config());
        let outside = PathBuf::from("/var/lib/not-allowed-test-dir");
        let _ = std::fs::remove_dir_all(&outside);
        std::fs::create_dir_all(&outside).unwrap();

        let request = Request {
            id: Some("r3".into()),
            request_id: None,
            session_id: None,
            requester_id: None,
            action: Action::Launch,
            user_data_dir: Some(outside.to_string_lossy().to_string()),
            profile_name: None,
            proxy_config: None,
            extensions: vec![],
            chrome_args: vec![],
            ttl_minutes: None,
        };

        let result = manager.resolve_profile_dir(&request, 19222);
        assert!(result.is_err());
        let _ = std::fs::remove_dir_all(&outside);
    }
}
