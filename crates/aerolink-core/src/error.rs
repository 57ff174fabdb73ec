// ── Core error types ──
//
// Consumer-facing errors from aerolink-core. These are NOT API-specific --
// accessory adapters never see HTTP status codes or JSON parse failures
// directly. The `From<aerolink_api::Error>` impl translates transport-layer
// errors into domain-appropriate variants.
//
// The three state-conflict variants (Overridden, CommandInFlight,
// RateLimited) are never retried automatically; adapters surface them
// immediately so the control surface can revert its optimistic input.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Communication errors ─────────────────────────────────────────
    #[error("Communication with the cloud service failed: {message}")]
    Communication { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    // ── State-conflict errors (surfaced immediately, never retried) ──
    #[error("Device is under external control -- local commands disabled")]
    Overridden,

    #[error("Another command is already in flight")]
    CommandInFlight,

    #[error("Commands arriving too quickly -- try again shortly")]
    RateLimited,

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Device identity not resolved yet")]
    NotReady,

    #[error("No ventilation unit found on this account")]
    NoDevice,

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<aerolink_api::Error> for CoreError {
    fn from(err: aerolink_api::Error) -> Self {
        match err {
            aerolink_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            aerolink_api::Error::ModeLocked => CoreError::Overridden,
            aerolink_api::Error::NoDevice => CoreError::NoDevice,
            aerolink_api::Error::Transport(e) => CoreError::Communication {
                message: e.to_string(),
            },
            aerolink_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            aerolink_api::Error::Api { message, status } => CoreError::Communication {
                message: format!("HTTP {status}: {message}"),
            },
            aerolink_api::Error::Deserialization { message, .. } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
            aerolink_api::Error::SessionStore { message } => {
                CoreError::Internal(format!("Session store error: {message}"))
            }
        }
    }
}
