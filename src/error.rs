use thiserror::Error;

/// How the Queue Adapter should dispose of the source message after an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Roll the launch back locally and hand the caller a `failed` response.
    RollbackFailed,
    /// No capacity; hand the caller a `slot_full` response, 30s requeue.
    SlotFull,
    /// Message body could not be parsed; ack-delete it.
    PoisonMessage,
    /// `action=delete` named a session this host doesn't have; visibility 0.
    DeleteNotFound,
    /// Queue/credential/network hiccup; back off and retry, no response.
    Transient,
}

#[derive(Error, Debug)]
pub enum LauncherError {
    #[error("no free debug ports in range")]
    NoPortsAvailable,

    #[error("no available session slots")]
    NoSlotsAvailable,

    #[error("user_data_dir rejected: {0}")]
    InvalidUserDataDir(String),

    #[error("chrome_args entry rejected: {0}")]
    DangerousChromeArg(String),

    #[error("failed to spawn chrome process: {0}")]
    ProcessSpawnFailed(String),

    #[error("chrome exited immediately with status {0}")]
    ChromeExited(String),

    #[error("DevTools did not become ready within {0:?}")]
    DevToolsNotReady(std::time::Duration),

    #[error("queue transient error: {0}")]
    QueueTransient(String),

    #[error("malformed queue message: {0}")]
    PoisonMessage(String),

    #[error("delete target not found: {0}")]
    DeleteTargetNotFound(String),

    #[error("cleanup sweep exceeded its budget")]
    CleanupTimeout,

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session store is full")]
    StoreRace,

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("callback delivery failed: {0}")]
    CallbackFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

impl LauncherError {
    /// Maps the error to how the Queue Adapter should settle the source message.
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::NoSlotsAvailable | Self::NoPortsAvailable | Self::StoreRace => {
                Disposition::SlotFull
            }
            Self::InvalidUserDataDir(_)
            | Self::ProcessSpawnFailed(_)
            | Self::ChromeExited(_)
            | Self::DevToolsNotReady(_)
            | Self::ConfigError(_)
            | Self::CallbackFailed(_)
            | Self::Io(_)
            | Self::SessionNotFound(_)
            | Self::Other(_) => Disposition::RollbackFailed,
            Self::PoisonMessage(_) | Self::Json(_) => Disposition::PoisonMessage,
            Self::DeleteTargetNotFound(_) => Disposition::DeleteNotFound,
            Self::QueueTransient(_) | Self::Http(_) | Self::CleanupTimeout => {
                Disposition::Transient
            }
            Self::DangerousChromeArg(_) => Disposition::RollbackFailed,
        }
    }
}

pub type Result<T> = std::result::Result<T, LauncherError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_exhaustion_maps_to_slot_full() {
        assert_eq!(LauncherError::NoPortsAvailable.disposition(), Disposition::SlotFull);
        assert_eq!(LauncherError::NoSlotsAvailable.disposition(), Disposition::SlotFull);
    }

    #[test]
    fn poison_message_is_ack_deleted() {
        let err = LauncherError::PoisonMessage("not an object".into());
        assert_eq!(err.disposition(), Disposition::PoisonMessage);
    }

    #[test]
    fn delete_target_not_found_returns_to_queue() {
        let err = LauncherError::DeleteTargetNotFound("w-1".into());
        assert_eq!(err.disposition(), Disposition::DeleteNotFound);
    }

    #[test]
    fn transient_errors_do_not_produce_a_response() {
        assert_eq!(LauncherError::CleanupTimeout.disposition(), Disposition::Transient);
    }
}
