// ── Runtime bridge configuration ──
//
// These types describe *how* to reach the vendor cloud and how often
// to poll. They carry credential data and tuning, but never touch
// disk; the config crate constructs a `BridgeConfig` and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

/// Default vendor cloud origin.
pub const DEFAULT_API_URL: &str = "https://cloud.airvent-connect.example";

/// Which room probes the host wants exposed.
///
/// The main unit probe is always on; room probes default to off since
/// most installations have none fitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeRooms {
    pub room1: bool,
    pub room2: bool,
    pub room3: bool,
    pub room4: bool,
}

/// Configuration for bridging a single account's ventilation unit.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Vendor cloud origin.
    pub api_url: Url,
    /// Account identity. Required -- absence is a permanent startup
    /// failure enforced by the config crate.
    pub username: String,
    pub password: SecretString,
    /// Host-provided writable directory for the persisted session.
    pub storage_dir: PathBuf,
    /// How often the central poller fetches device state.
    pub device_poll_interval: Duration,
    /// Poll interval for sensor-only consumers. The central poller
    /// fans one fetch out to everyone, so this never multiplies
    /// provider calls; it is kept for host-config compatibility.
    pub sensor_poll_interval: Duration,
    /// Expose the air-quality/CO2/climate sensors at all.
    pub sensors_enabled: bool,
    /// Which room probes to expose.
    pub probe_rooms: ProbeRooms,
    /// Client-side HTTP timeout.
    pub timeout: Duration,
}

impl BridgeConfig {
    /// Config for the given account with all defaults.
    pub fn new(username: String, password: SecretString, storage_dir: PathBuf) -> Self {
        Self {
            api_url: default_api_url(),
            username,
            password,
            storage_dir,
            device_poll_interval: Duration::from_secs(60),
            sensor_poll_interval: Duration::from_secs(60),
            sensors_enabled: true,
            probe_rooms: ProbeRooms::default(),
            timeout: Duration::from_secs(10),
        }
    }
}

fn default_api_url() -> Url {
    #[allow(clippy::unwrap_used)]
    Url::parse(DEFAULT_API_URL).unwrap()
}
