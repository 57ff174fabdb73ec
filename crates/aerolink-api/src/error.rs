use thiserror::Error;

/// Top-level error type for the `aerolink-api` crate.
///
/// Covers every failure mode across the cloud API surface: token
/// exchange, transport, payload decoding, and command rejection.
/// `aerolink-core` maps these into consumer-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Token exchange failed or the bearer token was rejected (401).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout).
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── Cloud API ───────────────────────────────────────────────────
    /// Non-success response from the cloud API.
    #[error("Cloud API error (HTTP {status}): {message}")]
    Api { message: String, status: u16 },

    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Account / device ────────────────────────────────────────────
    /// The account has no ventilation unit registered.
    #[error("No ventilation unit found on this account")]
    NoDevice,

    /// The device reports an external override -- mode commands are
    /// rejected until the override clears.
    #[error("Device is under external control -- mode command refused")]
    ModeLocked,

    // ── Session persistence ─────────────────────────────────────────
    /// Reading or writing the persisted session file failed.
    #[error("Session store error: {message}")]
    SessionStore { message: String },
}

impl Error {
    /// Returns `true` if this error indicates the bearer token has
    /// expired or been rejected, and re-acquisition might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Returns `true` if this is a transient error worth retrying.
    /// Anything else fails the call on the first attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
