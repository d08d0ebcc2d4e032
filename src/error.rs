//! Error taxonomy shared by the runtime, the rule engine and the hub
//!
//! Structural failures (unknown actor or chain ids) are returned to the
//! caller. Local failures (bad payloads, a single broken alarm rule) are
//! logged where they happen and never reach this type.

use crate::alarm::EvaluationError;
use crate::storage::StorageError;
use crate::telemetry::TelemetryParseError;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("actor '{0}' not found")]
    ActorNotFound(String),

    #[error("actor '{0}' is already registered")]
    DuplicateActor(String),

    #[error("rule chain '{0}' not found")]
    ChainNotFound(String),

    #[error(transparent)]
    TelemetryParse(#[from] TelemetryParseError),

    #[error("mailbox of actor '{0}' is full")]
    MailboxFull(String),

    #[error("actor system is stopped")]
    SystemStopped,

    #[error("device '{0}' not found")]
    DeviceNotFound(String),

    #[error("unknown access token")]
    UnknownAccessToken,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error("alarm '{0}' not found")]
    AlarmNotFound(String),

    #[error("invalid device profile: {0}")]
    InvalidProfile(String),
}
