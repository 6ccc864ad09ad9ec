//! Typed error hierarchy for the packaging engine.
//!
//! Uses `thiserror` for library-grade errors.  Application code should wrap
//! these in `anyhow::Result` at call sites.
//!
//! Each variant maps to a stable integer code via [`PackagerError::error_code`]
//! for structured telemetry without string parsing.

/// All errors surfaced by the vessel packaging engine.
#[derive(Debug, thiserror::Error)]
pub enum PackagerError {
    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    // ── I/O and collaborators ────────────────────────────────────────
    #[error("File failure: {0}")]
    FileFailure(String),

    #[error("Parser failure: {0}")]
    ParserFailure(String),

    #[error("Mux failure: {0}")]
    MuxFailure(String),

    #[error("Key source failure: {0}")]
    KeyFailure(String),

    // ── Graph wiring ─────────────────────────────────────────────────
    #[error("Chain error: {0}")]
    Chain(String),

    // ── Runtime ──────────────────────────────────────────────────────
    #[error("Cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PackagerError {
    /// Stable integer error code for structured telemetry.
    ///
    /// Codes are grouped by category:
    /// - 1xx: validation
    /// - 2xx: I/O
    /// - 3xx: collaborators
    /// - 4xx: graph wiring / runtime
    pub fn error_code(&self) -> u32 {
        match self {
            Self::InvalidArgument(_) => 100,
            Self::Unimplemented(_) => 101,
            Self::FileFailure(_) => 200,
            Self::ParserFailure(_) => 300,
            Self::MuxFailure(_) => 301,
            Self::KeyFailure(_) => 302,
            Self::Chain(_) => 400,
            Self::Cancelled => 401,
            Self::Internal(_) => 402,
        }
    }

    /// Whether this error was produced by cooperative cancellation rather
    /// than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Convenience alias used throughout the engine crates.
pub type Result<T> = std::result::Result<T, PackagerError>;

#[cfg(test)]
mod tests {
    use super::PackagerError;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(
            PackagerError::InvalidArgument("x".into()).error_code(),
            100
        );
        assert_eq!(PackagerError::FileFailure("x".into()).error_code(), 200);
        assert_eq!(PackagerError::Cancelled.error_code(), 401);
    }

    #[test]
    fn cancellation_is_not_a_failure() {
        assert!(PackagerError::Cancelled.is_cancellation());
        assert!(!PackagerError::Internal("x".into()).is_cancellation());
    }
}
