/// Error handling for the synchronization layer
///
/// Runtime failures inside the channel and pollers are reported through
/// events and notices, never returned to UI code. `SyncResult` is only
/// surfaced synchronously for lifecycle misuse and configuration problems.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Authentication rejected: {0}")]
    Auth(String),

    #[error("Timeout error: operation timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("HTTP {status} from {endpoint}")]
    Http { status: u16, endpoint: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Coordinator is already initialized")]
    AlreadyInitialized,

    #[error("Coordinator is not initialized")]
    NotInitialized,
}

/// Error taxonomy used when reporting failures to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Drops and timeouts, retried automatically
    Transient,
    /// Expired or rejected credential, retries suspended until refresh
    Auth,
    /// Malformed responses and other failures retrying will not fix
    Permanent,
    /// Programming errors such as double initialization
    Misuse,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Transport(_) | SyncError::Timeout { .. } | SyncError::Io(_) => {
                ErrorKind::Transient
            }
            SyncError::Http { status, .. } => match status {
                401 | 403 => ErrorKind::Auth,
                408 | 429 => ErrorKind::Transient,
                s if *s >= 500 => ErrorKind::Transient,
                _ => ErrorKind::Permanent,
            },
            SyncError::Auth(_) => ErrorKind::Auth,
            SyncError::Malformed(_) | SyncError::Serialization(_) | SyncError::Config(_) => {
                ErrorKind::Permanent
            }
            SyncError::AlreadyInitialized | SyncError::NotInitialized => ErrorKind::Misuse,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn is_auth(&self) -> bool {
        self.kind() == ErrorKind::Auth
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
