//! Synchronization engine between a vendor ventilation cloud and a
//! smart-home host.
//!
//! The engine keeps one authoritative picture of the device: a central
//! [`Poller`] fetches status on a schedule and fans it out to
//! subscribers, while a [`CommandDispatcher`] serializes mode commands,
//! applies them optimistically, and verifies the outcome against the
//! device. The cloud is reached through the [`DeviceApi`] seam so the
//! timing-sensitive pieces stay testable.

pub mod api;
pub mod config;
pub mod control;
pub mod decode;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod poller;

pub use api::{DeviceApi, build_client};
pub use config::{BridgeConfig, DEFAULT_API_URL, ProbeRooms};
pub use control::ControlState;
pub use decode::decode_status;
pub use dispatch::CommandDispatcher;
pub use error::CoreError;
pub use model::{
    ControlValues, DeviceId, DeviceStatus, OperatingMode, ProbeLocation, ProbeReadings, SpeedStep,
};
pub use poller::{Poller, StatusCallback};
