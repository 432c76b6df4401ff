//! Session Store (C5): bounded live-session map plus a bounded terminated
//! ring. Grounded on the `SessionPool` map/`max_sessions` pattern, extended
//! with the terminated-record ring from the data model.

use crate::model::{Session, SessionInfo, TerminatedSessionRecord};
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use uuid::Uuid;

pub const DEFAULT_TERMINATED_RING_CAPACITY: usize = 50;

pub struct SessionStore {
    capacity: usize,
    ring_capacity: usize,
    sessions: Mutex<HashMap<Uuid, Session>>,
    terminated: Mutex<VecDeque<TerminatedSessionRecord>>,
}

impl SessionStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ring_capacity: DEFAULT_TERMINATED_RING_CAPACITY,
            sessions: Mutex::new(HashMap::new()),
            terminated: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn has_available_slots(&self) -> bool {
        self.sessions.lock().await.len() < self.capacity
    }

    /// The single admission point; must be called after DevTools-ready.
    /// Atomically re-checks capacity so a caller who lost a capacity race
    /// gets `false` and rolls back.
    pub async fn insert_if_capacity(&self, session: Session) -> bool {
        let mut sessions = self.sessions.lock().await;
        if sessions.len() >= self.capacity {
            return false;
        }
        sessions.insert(session.worker_id, session);
        true
    }

    pub async fn remove_and_snapshot(&self, worker_id: Uuid) -> Option<Session> {
        self.sessions.lock().await.remove(&worker_id)
    }

    pub async fn snapshot_active(&self) -> Vec<Session> {
        self.sessions.lock().await.values().cloned().collect()
    }

    pub async fn get_info(&self, worker_id: Uuid) -> Option<SessionInfo> {
        self.sessions.lock().await.get(&worker_id).map(Session::to_info)
    }

    pub async fn lookup_by_session_id(&self, session_id: Uuid) -> Option<Uuid> {
        self.sessions
            .lock()
            .await
            .values()
            .find(|s| s.session_id == session_id)
            .map(|s| s.worker_id)
    }

    pub async fn mark_navigated(&self, worker_id: Uuid) {
        if let Some(session) = self.sessions.lock().await.get_mut(&worker_id) {
            session.has_navigated_away = true;
        }
    }

    /// Appends a terminated-session record, evicting the oldest if the ring
    /// is full.
    pub async fn record_terminated(&self, record: TerminatedSessionRecord) {
        let mut ring = self.terminated.lock().await;
        if ring.len() >= self.ring_capacity {
            ring.pop_front();
        }
        ring.push_back(record);
    }

    pub async fn terminated_len(&self) -> usize {
        self.terminated.lock().await.len()
    }

    pub async fn terminated_records(&self) -> Vec<TerminatedSessionRecord> {
        self.terminated.lock().await.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TerminationReason;
    use chrono::Utc;
    use std::path::PathBuf;
    use std::time::Instant;

    fn sample_session(worker_id: Uuid) -> Session {
        Session {
            worker_id,
            session_id: Uuid::new_v4(),
            request_id: None,
            requester_id: None,
            debug_port: 9222,
            process_id: 123,
            process_create_time: None,
            user_data_dir: PathBuf::from("/tmp/x"),
            profile_is_synthesized: true,
            machine_ip: "127.0.0.1".into(),
            public_ip: "127.0.0.1".into(),
            created: Instant::now(),
            created_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::minutes(30),
            has_navigated_away: false,
            proxy_config: None,
            ttl_minutes: 30,
        }
    }

    #[tokio::test]
    async fn insert_respects_capacity() {
        let store = SessionStore::new(1);
        assert!(store.insert_if_capacity(sample_session(Uuid::new_v4())).await);
        assert!(!store.insert_if_capacity(sample_session(Uuid::new_v4())).await);
    }

    #[tokio::test]
    async fn remove_and_snapshot_returns_the_session() {
        let store = SessionStore::new(2);
        let worker = Uuid::new_v4();
        store.insert_if_capacity(sample_session(worker)).await;
        let removed = store.remove_and_snapshot(worker).await;
        assert!(removed.is_some());
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn terminated_ring_evicts_oldest_past_capacity() {
        let store = SessionStore::new(1);
        for _ in 0..(DEFAULT_TERMINATED_RING_CAPACITY + 5) {
            store
                .record_terminated(TerminatedSessionRecord {
                    worker_id: Uuid::new_v4(),
                    request_id: None,
                    machine_ip: "127.0.0.1".into(),
                    debug_port: 9222,
                    process_id: 1,
                    termination_time: Utc::now(),
                    termination_reason: TerminationReason::Closed,
                    exit_code: Some(0),
                    session_duration_seconds: 1,
                })
                .await;
        }
        assert_eq!(store.terminated_len().await, DEFAULT_TERMINATED_RING_CAPACITY);
    }

    #[tokio::test]
    async fn lookup_by_session_id_finds_the_worker() {
        let store = SessionStore::new(2);
        let worker = Uuid::new_v4();
        let session = sample_session(worker);
        let session_id = session.session_id;
        store.insert_if_capacity(session).await;
        assert_eq!(store.lookup_by_session_id(session_id).await, Some(worker));
    }
}
