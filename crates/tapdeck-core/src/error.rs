// ── Core error types ──
//
// Errors surfaced to façade callers. Recoverable device conditions are
// resolved locally into alerts and never appear here -- only setup
// errors, non-retryable failures, and unclassified conditions propagate
// out of `connect_reader` / `collect_payment`.

use thiserror::Error;

use tapdeck_hw::ServiceError;

/// Unified error type for the orchestration core.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ── Setup errors (surfaced before any hardware call) ────────────
    #[error("Order amount is invalid: {reason}")]
    InvalidAmount { reason: String },

    #[error("Currency '{code}' is not supported for card-present payments")]
    UnsupportedCurrency { code: String },

    #[error("Readiness check failed: {message}")]
    Readiness { message: String },

    // ── Hardware-phase errors (after alert mediation) ───────────────
    #[error("Reader discovery failed")]
    Discovery { source: ServiceError },

    #[error("Reader connection failed")]
    Connection { source: ServiceError },

    #[error("Payment failed")]
    Payment { source: ServiceError },

    #[error("Payment capture failed")]
    PaymentCapture { source: ServiceError },

    // ── Internal errors ─────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// The device-layer failure behind this error, when there is one.
    pub fn service_error(&self) -> Option<&ServiceError> {
        match self {
            Self::Discovery { source }
            | Self::Connection { source }
            | Self::Payment { source }
            | Self::PaymentCapture { source } => Some(source),
            Self::InvalidAmount { .. }
            | Self::UnsupportedCurrency { .. }
            | Self::Readiness { .. }
            | Self::Internal(_) => None,
        }
    }
}
