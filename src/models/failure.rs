use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Why a generation job reached the Failed state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    ValidationError,
    CredentialsError,
    AccessDenied,
    ModelNotFound,
    BackendTimeout,
    BackendReportedFailure,
    UnknownError,
}

impl FailureKind {
    /// Whether resubmitting the same request may succeed.
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::BackendTimeout | Self::UnknownError)
    }
}

/// Structured failure attached to a Failed job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureRecord {
    pub kind: FailureKind,
    pub message: String,
    pub retriable: bool,
}

impl FailureRecord {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retriable: kind.is_retriable(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FailureKind::ValidationError, message)
    }

    pub fn backend_reported(message: impl Into<String>) -> Self {
        Self::new(FailureKind::BackendReportedFailure, message)
    }

    pub fn timeout(attempts: u32) -> Self {
        Self::new(
            FailureKind::BackendTimeout,
            format!("backend job did not finish after {} status checks", attempts),
        )
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(FailureKind::UnknownError, message)
    }
}
