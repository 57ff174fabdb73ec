// ── Device API seam ──
//
// The poller and dispatcher talk to the cloud through this trait
// rather than the concrete client, so the timing-sensitive engine
// logic is testable against fakes. The production impl below decodes
// raw payloads and maps wire codes at the boundary.

use std::sync::Arc;

use async_trait::async_trait;

use aerolink_api::{CloudClient, SessionManager, TransportConfig};

use crate::config::BridgeConfig;
use crate::decode::decode_status;
use crate::error::CoreError;
use crate::model::{DeviceId, DeviceStatus, OperatingMode};

/// Typed operations against the one ventilation unit.
#[async_trait]
pub trait DeviceApi: Send + Sync {
    /// Resolve the account's ventilation unit identity.
    async fn resolve_identity(&self) -> Result<DeviceId, CoreError>;

    /// Fetch and normalize the current device status.
    async fn fetch_status(&self, id: &DeviceId) -> Result<DeviceStatus, CoreError>;

    /// Ask the device to switch operating mode.
    async fn apply_mode(&self, id: &DeviceId, mode: OperatingMode) -> Result<(), CoreError>;

    /// Derived health flag; dependents short-circuit doomed calls
    /// while this is `false`.
    fn healthy(&self) -> bool;

    /// Clear the health counters after a manual recovery.
    fn reset_health(&self);
}

#[async_trait]
impl DeviceApi for CloudClient {
    async fn resolve_identity(&self) -> Result<DeviceId, CoreError> {
        let id = CloudClient::resolve_identity(self).await?;
        Ok(DeviceId::from(id))
    }

    async fn fetch_status(&self, id: &DeviceId) -> Result<DeviceStatus, CoreError> {
        let raw = CloudClient::fetch_status(self, id.as_str()).await?;
        Ok(decode_status(&raw))
    }

    async fn apply_mode(&self, id: &DeviceId, mode: OperatingMode) -> Result<(), CoreError> {
        CloudClient::apply_mode(self, id.as_str(), mode.wire_code()).await?;
        Ok(())
    }

    fn healthy(&self) -> bool {
        CloudClient::healthy(self)
    }

    fn reset_health(&self) {
        CloudClient::reset_health(self);
    }
}

/// Build the shared cloud client from a bridge configuration.
///
/// One client instance serves both the read path (poller) and the
/// write path (dispatchers); its internal pacing serializes their
/// outgoing traffic.
pub fn build_client(config: &BridgeConfig) -> Result<Arc<CloudClient>, CoreError> {
    let transport = TransportConfig {
        timeout: config.timeout,
    };
    let session = SessionManager::new(
        config.api_url.clone(),
        config.username.clone(),
        config.password.clone(),
        &config.storage_dir,
        &transport,
    )?;
    let client = CloudClient::new(config.api_url.clone(), session, &transport)?;
    Ok(Arc::new(client))
}
