// Cloud API HTTP client
//
// Wraps `reqwest::Client` with bearer-token injection, a fixed retry
// loop for the two hot-path operations, soft request pacing, and
// rolling health bookkeeping. The remote device takes seconds to act
// and the provider throttles bursts, so every outgoing call is paced
// and failures are counted rather than escalated.

use std::sync::Mutex as StdMutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use secrecy::ExposeSecret;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::error::Error;
use crate::models::{CommandRequest, ProductDetails, ProductSummary, VENTILATION_PRODUCT_KIND};
use crate::session::SessionManager;
use crate::transport::TransportConfig;

/// Attempts per `fetch_status` / `apply_mode` call.
const MAX_ATTEMPTS: u32 = 3;

/// Fixed delay between attempts.
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Soft rate limit: minimum spacing between outgoing requests.
/// Applied as a transparent delay, never surfaced as an error.
const MIN_CALL_SPACING: Duration = Duration::from_secs(1);

/// Consecutive failures at or above this count mark the client unhealthy.
const HEALTH_FAILURE_THRESHOLD: u32 = 5;

/// A success older than this no longer counts as healthy.
const HEALTH_SUCCESS_WINDOW: Duration = Duration::from_secs(60);

/// Typed client for the vendor cloud API.
///
/// One instance is shared by the poller (read path) and every command
/// dispatcher (write path); the pacing lock below is what serializes
/// their outgoing traffic.
pub struct CloudClient {
    http: reqwest::Client,
    base_url: Url,
    session: SessionManager,
    /// Rolling count of consecutive failed operations.
    consecutive_failures: AtomicU32,
    /// Timestamp of the last successful operation.
    last_success: StdMutex<Option<Instant>>,
    /// Timestamp of the last dispatched request, for pacing.
    /// Held across the pacing sleep so concurrent callers queue.
    last_call: Mutex<Option<tokio::time::Instant>>,
    /// Override flag from the most recent successful status fetch.
    reported_forced: AtomicBool,
}

impl CloudClient {
    /// Create a client against the given API origin.
    pub fn new(
        base_url: Url,
        session: SessionManager,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            base_url,
            session,
            consecutive_failures: AtomicU32::new(0),
            last_success: StdMutex::new(None),
            last_call: Mutex::new(None),
            reported_forced: AtomicBool::new(false),
        })
    }

    /// The session manager backing this client.
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    // ── Operations ───────────────────────────────────────────────────

    /// Resolve the account's ventilation unit identity.
    ///
    /// `GET /api/v5/users/me/products` -- returns the id of the first
    /// ventilation product (or the only product). Called once at
    /// startup; the identity is then cached by the poller for the
    /// process lifetime.
    pub async fn resolve_identity(&self) -> Result<String, Error> {
        let url = self.base_url.join("api/v5/users/me/products")?;
        let token = self.session.token().await?;
        self.pace().await;
        debug!("resolving device identity");

        let resp = self
            .http
            .get(url)
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.session.invalidate().await;
            self.record_failure();
            return Err(Error::Authentication {
                message: "bearer token rejected during identity resolution".into(),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            self.record_failure();
            return Err(Error::Api {
                message: body,
                status: status.as_u16(),
            });
        }

        let body = resp.text().await.map_err(Error::Transport)?;
        let products: Vec<ProductSummary> =
            serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body,
            })?;

        let unit = products
            .iter()
            .find(|p| p.kind.as_deref() == Some(VENTILATION_PRODUCT_KIND))
            .or_else(|| products.first())
            .ok_or(Error::NoDevice)?;

        self.record_success();
        debug!(id = %unit.id, name = ?unit.name, "resolved ventilation unit");
        Ok(unit.id.clone())
    }

    /// Fetch the device-details payload for the given product.
    ///
    /// `GET /api/v5/users/me/products/{id}`, with up to 3 attempts at a
    /// fixed delay. Only transient failures and rejected credentials
    /// are retried; a 401 invalidates the session so the next attempt
    /// exchanges afresh, and permanent errors surface immediately.
    pub async fn fetch_status(&self, product_id: &str) -> Result<ProductDetails, Error> {
        let url = self
            .base_url
            .join(&format!("api/v5/users/me/products/{product_id}"))?;
        let mut last_err = retries_exhausted();

        for attempt in 1..=MAX_ATTEMPTS {
            if attempt > 1 {
                tokio::time::sleep(RETRY_DELAY).await;
            }

            let body = match self.authorized_get(url.clone(), attempt).await {
                Ok(body) => body,
                Err(e) if e.is_transient() || e.is_auth_expired() => {
                    last_err = e;
                    continue;
                }
                Err(e) => {
                    self.record_failure();
                    return Err(e);
                }
            };

            // A malformed body is not transient -- fail the call now.
            let details: ProductDetails = match serde_json::from_str(&body) {
                Ok(details) => details,
                Err(e) => {
                    self.record_failure();
                    return Err(Error::Deserialization {
                        message: e.to_string(),
                        body,
                    });
                }
            };

            self.reported_forced
                .store(details.is_forced(), Ordering::Relaxed);
            self.record_success();
            return Ok(details);
        }

        self.record_failure();
        Err(last_err)
    }

    /// Ask the device to switch operating mode.
    ///
    /// `POST /api/v5/users/me/products/{id}/commands` with a JSON-RPC
    /// shaped `changeMode` body. Refused outright while the most recent
    /// status fetch reported the external override -- callers are
    /// expected to have checked already; this is the second gate.
    pub async fn apply_mode(&self, product_id: &str, mode_code: &str) -> Result<(), Error> {
        if self.reported_forced.load(Ordering::Relaxed) {
            return Err(Error::ModeLocked);
        }

        let url = self
            .base_url
            .join(&format!("api/v5/users/me/products/{product_id}/commands"))?;
        let command = CommandRequest::change_mode(mode_code);
        let mut last_err = retries_exhausted();

        for attempt in 1..=MAX_ATTEMPTS {
            if attempt > 1 {
                tokio::time::sleep(RETRY_DELAY).await;
            }

            let token = match self.session.token().await {
                Ok(t) => t,
                Err(e) if e.is_transient() || e.is_auth_expired() => {
                    last_err = e;
                    continue;
                }
                Err(e) => {
                    self.record_failure();
                    return Err(e);
                }
            };
            self.pace().await;
            debug!(mode = mode_code, attempt, "sending mode command");

            let resp = match self
                .http
                .post(url.clone())
                .bearer_auth(token.expose_secret())
                .json(&command)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    debug!(error = %e, attempt, "mode command transport failure");
                    last_err = Error::Transport(e);
                    continue;
                }
            };

            let status = resp.status();
            if status == reqwest::StatusCode::UNAUTHORIZED {
                self.session.invalidate().await;
                last_err = Error::Authentication {
                    message: "bearer token rejected".into(),
                };
                continue;
            }
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                let err = Error::Api {
                    message: body,
                    status: status.as_u16(),
                };
                if !err.is_transient() {
                    self.record_failure();
                    return Err(err);
                }
                last_err = err;
                continue;
            }

            self.record_success();
            return Ok(());
        }

        self.record_failure();
        Err(last_err)
    }

    // ── Health bookkeeping ───────────────────────────────────────────

    /// Derived health flag: recent success and failures below threshold.
    ///
    /// Dependents use this to short-circuit calls that are doomed
    /// anyway while the provider is unreachable.
    pub fn healthy(&self) -> bool {
        if self.consecutive_failures.load(Ordering::Relaxed) >= HEALTH_FAILURE_THRESHOLD {
            return false;
        }
        self.last_success
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some_and(|t| t.elapsed() <= HEALTH_SUCCESS_WINDOW)
    }

    /// Rolling count of consecutive failed operations.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Manual health reset: clears the failure counter and treats the
    /// reset itself as a fresh start so dependents resume calling.
    pub fn reset_health(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        *self
            .last_success
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        debug!("client health manually reset");
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        *self
            .last_success
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures == HEALTH_FAILURE_THRESHOLD {
            warn!(failures, "cloud client marked unhealthy");
        }
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// One paced, authorized GET attempt, returning the response body.
    async fn authorized_get(&self, url: Url, attempt: u32) -> Result<String, Error> {
        let token = self.session.token().await?;
        self.pace().await;
        debug!(%url, attempt, "GET");

        let resp = self
            .http
            .get(url)
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.session.invalidate().await;
            return Err(Error::Authentication {
                message: "bearer token rejected".into(),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                message: body,
                status: status.as_u16(),
            });
        }

        resp.text().await.map_err(Error::Transport)
    }

    /// Delay until the minimum inter-call spacing has elapsed.
    ///
    /// The lock is held across the sleep so a burst of callers leaves
    /// the provider one paced request at a time.
    async fn pace(&self) {
        let mut guard = self.last_call.lock().await;
        if let Some(prev) = *guard {
            let elapsed = prev.elapsed();
            if elapsed < MIN_CALL_SPACING {
                tokio::time::sleep(MIN_CALL_SPACING - elapsed).await;
            }
        }
        *guard = Some(tokio::time::Instant::now());
    }
}

fn retries_exhausted() -> Error {
    Error::Api {
        message: "all attempts failed before a request was issued".into(),
        status: 0,
    }
}
