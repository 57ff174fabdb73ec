// Cloud session management
//
// Acquires a bearer token via the OAuth2 password grant, caches it in
// memory for the process lifetime, and mirrors it to a JSON file under
// the host-provided storage directory so restarts skip the exchange.
// Expiry is detected reactively: a downstream 401 calls `invalidate()`
// and the next `token()` performs a fresh exchange.

use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::error::Error;
use crate::models::TokenResponse;
use crate::transport::TransportConfig;

/// Fixed file name for the persisted session under the storage dir.
const SESSION_FILE: &str = "session.json";

/// On-disk mirror of the in-memory credential.
///
/// Unknown fields are ignored on read so older files survive upgrades.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedSession {
    access_token: String,
}

/// Manages the account's bearer credential.
///
/// At most one valid credential is tracked at a time; there is no
/// refresh-token rotation. Concurrent `token()` callers serialize on an
/// internal mutex so a burst of 401-triggered re-acquisitions performs
/// a single exchange.
pub struct SessionManager {
    http: reqwest::Client,
    base_url: Url,
    username: String,
    password: SecretString,
    cache_path: PathBuf,
    token: Mutex<Option<SecretString>>,
}

impl SessionManager {
    /// Create a session manager for the given account.
    ///
    /// `storage_dir` is the host-provided writable directory; the
    /// persisted session lives at `{storage_dir}/session.json`.
    pub fn new(
        base_url: Url,
        username: String,
        password: SecretString,
        storage_dir: &Path,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            base_url,
            username,
            password,
            cache_path: storage_dir.join(SESSION_FILE),
            token: Mutex::new(None),
        })
    }

    /// Path of the persisted session file.
    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Return the current bearer token, acquiring one if necessary.
    ///
    /// Resolution order: in-memory cache, persisted file, password-grant
    /// exchange (persisting the result).
    pub async fn token(&self) -> Result<SecretString, Error> {
        let mut guard = self.token.lock().await;

        if let Some(ref token) = *guard {
            return Ok(token.clone());
        }

        if let Some(token) = self.load_persisted() {
            debug!("restored session from disk");
            *guard = Some(token.clone());
            return Ok(token);
        }

        let token = self.exchange().await?;
        self.persist(&token);
        *guard = Some(token.clone());
        Ok(token)
    }

    /// Drop the current credential from memory and disk.
    ///
    /// Called when a downstream request is rejected with 401; the next
    /// `token()` call performs a fresh exchange.
    pub async fn invalidate(&self) {
        *self.token.lock().await = None;

        match std::fs::remove_file(&self.cache_path) {
            Ok(()) => debug!("removed persisted session"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, "failed to remove persisted session"),
        }
    }

    // ── Token acquisition ────────────────────────────────────────────

    /// Perform the OAuth2 password-grant exchange.
    async fn exchange(&self) -> Result<SecretString, Error> {
        let url = self.base_url.join("oauth2/token")?;
        debug!("requesting token at {}", url);

        let form = [
            ("grant_type", "password"),
            ("username", self.username.as_str()),
            ("password", self.password.expose_secret()),
        ];

        let resp = self
            .http
            .post(url)
            .form(&form)
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Authentication {
                message: format!("token exchange failed (HTTP {status}): {body}"),
            });
        }

        let body = resp.text().await.map_err(Error::Transport)?;
        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body,
            })?;

        debug!("token exchange successful");
        Ok(SecretString::from(token.access_token))
    }

    // ── Persistence ──────────────────────────────────────────────────

    fn load_persisted(&self) -> Option<SecretString> {
        let raw = std::fs::read_to_string(&self.cache_path).ok()?;
        match serde_json::from_str::<PersistedSession>(&raw) {
            Ok(session) => Some(SecretString::from(session.access_token)),
            Err(e) => {
                warn!(error = %e, "persisted session unreadable -- ignoring");
                None
            }
        }
    }

    fn persist(&self, token: &SecretString) {
        let session = PersistedSession {
            access_token: token.expose_secret().to_owned(),
        };

        let write = || -> std::io::Result<()> {
            if let Some(parent) = self.cache_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let json = serde_json::to_string(&session)
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            std::fs::write(&self.cache_path, json)
        };

        // Persistence failure is non-fatal: the in-memory credential
        // still serves this process; the next restart re-exchanges.
        if let Err(e) = write() {
            warn!(error = %e, path = %self.cache_path.display(), "failed to persist session");
        }
    }
}
