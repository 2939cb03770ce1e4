// ── Engine error types ──
//
// Every fallible engine operation returns `Result<T, EngineError>`.
// Primitive-layer failures arrive as `RadioError` and are translated at
// the boundary: the "invalid operating state" status becomes
// `AlreadyInState`, which callers may fold into success.

use thiserror::Error;

use crate::radio::RadioError;

/// Vendor status codes reported by the stack when a commissioning step
/// times out (positive and negated errno flavours).
pub const TIMEOUT_STATUSES: [i32; 4] = [110, 116, -110, -116];

/// Returns `true` when a signal status denotes a timeout.
pub fn is_timeout_status(status: i32) -> bool {
    TIMEOUT_STATUSES.contains(&status)
}

/// Unified error type for the engine crate.
#[derive(Debug, Error)]
pub enum EngineError {
    // ── Capability errors ────────────────────────────────────────────
    #[error("Primitive layer does not provide {operation}")]
    ProtocolUnavailable { operation: String },

    #[error("Primitive layer already in requested state")]
    AlreadyInState,

    // ── Timing errors ────────────────────────────────────────────────
    #[error("Timed out waiting for {step} after {waited_ms}ms")]
    Timeout { step: String, waited_ms: u64 },

    #[error("Cached value for cluster 0x{cluster:04x} attr 0x{attr:04x} is stale ({age_ms}ms old)")]
    StaleState { cluster: u16, attr: u16, age_ms: u64 },

    // ── Lookup errors ────────────────────────────────────────────────
    #[error("{what} is ambiguous (candidates: {candidates:?}); pass an endpoint selector")]
    Ambiguous { what: String, candidates: Vec<u8> },

    #[error("Not found: {what}")]
    NotFound { what: String },

    // ── Input errors ─────────────────────────────────────────────────
    #[error("Invalid {field}: {reason}")]
    InvalidRange { field: String, reason: String },

    // ── Primitive-layer faults ───────────────────────────────────────
    #[error("{operation} failed with status {status}")]
    Radio { operation: String, status: i32 },

    #[error("{operation} failed: {message}")]
    RadioFailed { operation: String, message: String },

    // ── Persistence errors ───────────────────────────────────────────
    #[error("Persistence path not configured")]
    PersistenceUnconfigured,

    #[error("Snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot encoding failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Translate a primitive-layer failure for a named operation.
    pub fn from_radio(operation: &str, err: RadioError) -> Self {
        match err {
            RadioError::InvalidState => Self::AlreadyInState,
            RadioError::Unsupported => Self::ProtocolUnavailable {
                operation: operation.into(),
            },
            RadioError::Status(status) => Self::Radio {
                operation: operation.into(),
                status,
            },
            RadioError::Failed(message) => Self::RadioFailed {
                operation: operation.into(),
                message,
            },
        }
    }

    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidRange {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub(crate) fn unavailable(operation: &str) -> Self {
        Self::ProtocolUnavailable {
            operation: operation.into(),
        }
    }

    /// Idempotent no-op reported by the primitive layer.
    pub fn is_already_in_state(&self) -> bool {
        matches!(self, Self::AlreadyInState)
    }

    /// Status code carried by a primitive-layer failure.
    pub fn radio_status(&self) -> Option<i32> {
        match self {
            Self::Radio { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Transient faults are recovered by the retry budgets; everything
    /// else is a capability or caller problem.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Radio { .. } | Self::RadioFailed { .. }
        )
    }
}

impl From<RadioError> for EngineError {
    fn from(err: RadioError) -> Self {
        Self::from_radio("primitive call", err)
    }
}

// ── Result helpers ───────────────────────────────────────────────────

/// Extension methods for primitive-layer results.
pub(crate) trait RadioResultExt<T> {
    /// Attach the operation name to a failure.
    fn op(self, operation: &str) -> Result<T, EngineError>;
}

impl<T> RadioResultExt<T> for Result<T, RadioError> {
    fn op(self, operation: &str) -> Result<T, EngineError> {
        self.map_err(|e| EngineError::from_radio(operation, e))
    }
}

/// Fold `AlreadyInState` into success.
pub(crate) fn tolerate_already(result: Result<(), EngineError>) -> Result<(), EngineError> {
    match result {
        Err(EngineError::AlreadyInState) => Ok(()),
        other => other,
    }
}
