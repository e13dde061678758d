//! Error taxonomy surfaced by the assistant core.

use std::fmt;

/// Errors returned by every public operation of the core.
#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    /// Missing or malformed caller input.
    #[error("{0}")]
    InvalidInput(String),
    /// Content or function policy refused the request.
    #[error("{0}")]
    PolicyViolation(String),
    /// Trade rejected by risk checks.
    #[error("{0}")]
    RiskBlocked(String),
    /// Operation not valid for the current state.
    #[error("{0}")]
    StateConflict(String),
    /// Referenced record does not exist.
    #[error("{0}")]
    NotFound(String),
    /// Provider, persistence or crypto failure.
    #[error("{0:#}")]
    External(anyhow::Error),
    /// Caller context was cancelled or its deadline passed.
    #[error("operation cancelled: {0}")]
    Cancelled(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    PolicyViolation,
    RiskBlocked,
    StateConflict,
    NotFound,
    External,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::PolicyViolation => "policy_violation",
            ErrorKind::RiskBlocked => "risk_blocked",
            ErrorKind::StateConflict => "state_conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::External => "external",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl AssistantError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AssistantError::InvalidInput(_) => ErrorKind::InvalidInput,
            AssistantError::PolicyViolation(_) => ErrorKind::PolicyViolation,
            AssistantError::RiskBlocked(_) => ErrorKind::RiskBlocked,
            AssistantError::StateConflict(_) => ErrorKind::StateConflict,
            AssistantError::NotFound(_) => ErrorKind::NotFound,
            AssistantError::External(_) => ErrorKind::External,
            AssistantError::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        AssistantError::InvalidInput(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AssistantError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        AssistantError::StateConflict(msg.into())
    }
}

impl From<anyhow::Error> for AssistantError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<AssistantError>() {
            Ok(inner) => inner,
            Err(err) => AssistantError::External(err),
        }
    }
}

pub type Result<T, E = AssistantError> = std::result::Result<T, E>;

/// Tags adapter failures as [`AssistantError::External`] with context attached.
pub trait ResultExt<T> {
    fn external(self, context: &'static str) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn external(self, context: &'static str) -> Result<T> {
        self.map_err(|e| AssistantError::External(e.into().context(context)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anyhow_wrapping_preserves_typed_errors() {
        let err = anyhow::Error::new(AssistantError::conflict("confirmation has expired"));
        let back: AssistantError = err.into();
        assert_eq!(back.kind(), ErrorKind::StateConflict);
        assert_eq!(back.to_string(), "confirmation has expired");
    }

    #[test]
    fn external_keeps_cause_chain() {
        let res: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "socket closed"));
        let err = res.external("load conversation failed").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::External);
        assert_eq!(err.to_string(), "load conversation failed: socket closed");
    }
}
