//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// State document could not be serialized or deserialized.
    Store(String),
    /// Store lock was not acquired within the allowed wait.
    LockTimeout(String),
    /// Operation referenced a session that was never registered.
    UnknownSession(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Caller supplied input that cannot be accepted.
    InvalidInput(String),
    /// Hook payload could not be interpreted.
    Hook(String),
    /// Handing a message to the delivery mechanism failed.
    Delivery(String),
}

impl AppError {
    /// Whether this error means the store lock was never obtained.
    ///
    /// Hooks use this to pick a distinct exit status: no state change was
    /// made, the invocation simply gave up waiting.
    #[must_use]
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::LockTimeout(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Store(msg) => write!(f, "store: {msg}"),
            Self::LockTimeout(msg) => write!(f, "lock timeout: {msg}"),
            Self::UnknownSession(msg) => write!(f, "unknown session: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Self::Hook(msg) => write!(f, "hook: {msg}"),
            Self::Delivery(msg) => write!(f, "delivery: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}
