//! Port Registry (C2): a single-mutex state machine over the debug-port
//! range. Mirrors the `SessionPool::allocate_port`/`release_port` shape,
//! generalized into the RESERVED/ACTIVE states the launch pipeline needs
//! to roll back cleanly.

use crate::error::{LauncherError, Result};
use crate::timeouts::secs;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    Reserved,
    Active,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    state: PortState,
    owner: Uuid,
    at: Instant,
}

/// Whether Chrome is expected to bind its debug port to `127.0.0.1` via an
/// external launcher (probe by connect) or whether this process owns the
/// bind check itself (probe by attempting to bind `0.0.0.0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
    ExpectLoopbackBound,
    BindCheck,
}

pub struct PortRegistry {
    start: u16,
    end: u16,
    probe_mode: ProbeMode,
    state: Mutex<HashMap<u16, Entry>>,
}

impl PortRegistry {
    pub fn new(start: u16, end: u16, probe_mode: ProbeMode) -> Self {
        Self {
            start,
            end,
            probe_mode,
            state: Mutex::new(HashMap::new()),
        }
    }

    fn range_size(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }

    pub async fn has_free_capacity(&self) -> bool {
        let state = self.state.lock().await;
        state.len() < self.range_size()
    }

    /// Reserves a free port for `worker_id`, expiring stale RESERVED entries
    /// first. The socket freshness probe runs while holding the lock (§5):
    /// it is capped at 100ms so reserve-and-probe stays atomic.
    pub async fn reserve(&self, worker_id: Uuid) -> Result<u16> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.retain(|_, e| {
            !(e.state == PortState::Reserved
                && now.duration_since(e.at) > Duration::from_secs(secs::PORT_RESERVATION))
        });

        let mut candidates: Vec<u16> = (self.start..=self.end).collect();
        candidates.shuffle(&mut rand::thread_rng());

        for port in candidates {
            if state.contains_key(&port) {
                continue;
            }
            if self.probe_is_free(port) {
                state.insert(
                    port,
                    Entry {
                        state: PortState::Reserved,
                        owner: worker_id,
                        at: now,
                    },
                );
                return Ok(port);
            }
        }

        Err(LauncherError::NoPortsAvailable)
    }

    /// Transitions a RESERVED port to ACTIVE. Idempotent if already ACTIVE
    /// for the same owner; logs and no-ops on any other mismatch.
    pub async fn activate(&self, worker_id: Uuid, port: u16) {
        let mut state = self.state.lock().await;
        match state.get_mut(&port) {
            Some(e) if e.owner == worker_id && e.state == PortState::Reserved => {
                e.state = PortState::Active;
                e.at = Instant::now();
            }
            Some(e) if e.owner == worker_id && e.state == PortState::Active => {}
            _ => {
                tracing::warn!(port, %worker_id, "activate called on port not reserved by this worker");
            }
        }
    }

    /// Drops a RESERVED entry owned by `worker_id`. Idempotent.
    pub async fn rollback(&self, worker_id: Uuid, port: u16) {
        let mut state = self.state.lock().await;
        if let Some(e) = state.get(&port) {
            if e.owner == worker_id && e.state == PortState::Reserved {
                state.remove(&port);
            }
        }
    }

    /// Frees a port regardless of state. Idempotent and safe if untracked.
    pub async fn release(&self, port: u16) {
        let mut state = self.state.lock().await;
        state.remove(&port);
    }

    #[cfg(test)]
    pub async fn state_of(&self, port: u16) -> Option<PortState> {
        self.state.lock().await.get(&port).map(|e| e.state)
    }

    #[cfg(test)]
    pub async fn active_count(&self) -> usize {
        self.state
            .lock()
            .await
            .values()
            .filter(|e| e.state == PortState::Active)
            .count()
    }

    fn probe_is_free(&self, port: u16) -> bool {
        match self.probe_mode {
            ProbeMode::ExpectLoopbackBound => {
                match TcpStream::connect_timeout(
                    &([127, 0, 0, 1], port).into(),
                    Duration::from_millis(crate::timeouts::ms::PORT_PROBE),
                ) {
                    Ok(_) => false,
                    Err(_) => true,
                }
            }
            ProbeMode::BindCheck => TcpListener::bind(("0.0.0.0", port)).is_ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PortRegistry {
        PortRegistry::new(20000, 20004, ProbeMode::BindCheck)
    }

    #[tokio::test]
    async fn reserve_then_activate_then_release_roundtrip() {
        let reg = registry();
        let worker = Uuid::new_v4();
        let port = reg.reserve(worker).await.unwrap();
        assert_eq!(reg.state_of(port).await, Some(PortState::Reserved));
        reg.activate(worker, port).await;
        assert_eq!(reg.state_of(port).await, Some(PortState::Active));
        reg.release(port).await;
        assert_eq!(reg.state_of(port).await, None);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let reg = registry();
        let worker = Uuid::new_v4();
        let port = reg.reserve(worker).await.unwrap();
        reg.release(port).await;
        reg.release(port).await;
        assert_eq!(reg.state_of(port).await, None);
    }

    #[tokio::test]
    async fn activate_is_idempotent_for_same_owner() {
        let reg = registry();
        let worker = Uuid::new_v4();
        let port = reg.reserve(worker).await.unwrap();
        reg.activate(worker, port).await;
        reg.activate(worker, port).await;
        assert_eq!(reg.state_of(port).await, Some(PortState::Active));
    }

    #[tokio::test]
    async fn rollback_drops_only_matching_reservation() {
        let reg = registry();
        let worker = Uuid::new_v4();
        let other = Uuid::new_v4();
        let port = reg.reserve(worker).await.unwrap();
        reg.rollback(other, port).await;
        assert_eq!(reg.state_of(port).await, Some(PortState::Reserved));
        reg.rollback(worker, port).await;
        assert_eq!(reg.state_of(port).await, None);
    }

    #[tokio::test]
    async fn exhausted_range_reports_no_ports_available() {
        let reg = PortRegistry::new(21000, 21000, ProbeMode::BindCheck);
        let w1 = Uuid::new_v4();
        let w2 = Uuid::new_v4();
        reg.reserve(w1).await.unwrap();
        let err = reg.reserve(w2).await;
        assert!(matches!(err, Err(LauncherError::NoPortsAvailable)));
    }

    #[tokio::test]
    async fn has_free_capacity_reflects_occupied_ports() {
        let reg = PortRegistry::new(22000, 22000, ProbeMode::BindCheck);
        assert!(reg.has_free_capacity().await);
        let worker = Uuid::new_v4();
        reg.reserve(worker).await.unwrap();
        assert!(!reg.has_free_capacity().await);
    }
}
