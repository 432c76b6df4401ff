//! Named timing constants pulled out of the component design so call sites
//! read as intent rather than magic numbers.

pub mod ms {
    /// Socket freshness probe connect/bind timeout (Port Registry).
    pub const PORT_PROBE: u64 = 100;
    /// Initial DevTools readiness poll interval before backoff kicks in.
    pub const DEVTOOLS_POLL_INITIAL: u64 = 100;
    /// Starting interval for the DevTools readiness exponential backoff.
    pub const DEVTOOLS_POLL_BACKOFF_START: u64 = 250;
    /// Growth factor applied to the DevTools readiness poll interval.
    pub const DEVTOOLS_POLL_BACKOFF_FACTOR: f64 = 1.7;
    /// Ceiling on the DevTools readiness poll interval.
    pub const DEVTOOLS_POLL_BACKOFF_CAP: u64 = 2000;
    /// Poll interval while waiting for a delegated launcher's PID to appear.
    pub const LAUNCHER_PID_POLL: u64 = 250;
    /// Queue poll loop idle sleep when no slots or ports are free.
    pub const QUEUE_BACKPRESSURE_SLEEP: u64 = 2000;
}

pub mod secs {
    /// RESERVED port entries older than this are expired on next reservation.
    pub const PORT_RESERVATION: u64 = 90;
    /// Ceiling on DevTools readiness, independent of `browser_timeout_ms`.
    pub const DEVTOOLS_READY_CAP: u64 = 90;
    /// Aggregate deadline while reading a delegated launcher's PID from stdout.
    pub const LAUNCHER_PID_READ: u64 = 2;
    /// Deadline for the PID-by-port-scan fallback.
    pub const LAUNCHER_PID_SCAN: u64 = 8;
    /// Ceiling on a single process kill attempt (graceful or force).
    pub const PROCESS_KILL: u64 = 10;
    /// Interval between Cleanup Loop sweeps.
    pub const CLEANUP_TICK: u64 = 20;
    /// Per-session budget within a single cleanup sweep.
    pub const CLEANUP_PER_SESSION: u64 = 10;
    /// Whole-sweep budget for the Cleanup Loop.
    pub const CLEANUP_SWEEP: u64 = 120;
    /// Session age threshold past which an un-navigated session is reclaimed.
    pub const NEVER_USED_GRACE: u64 = 90;
    /// Allowed drift between a stored and a freshly read process create_time.
    pub const CREATE_TIME_GUARD: u64 = 1;
    /// Callback HTTP POST timeout.
    pub const CALLBACK: u64 = 30;
    /// Grace period given to background tasks on shutdown before abort.
    pub const SHUTDOWN_GRACE: u64 = 1;
}
