// aerolink-api: Async Rust client for the ventilation vendor's cloud API

pub mod client;
pub mod error;
pub mod models;
pub mod session;
pub mod transport;

pub use client::CloudClient;
pub use error::Error;
pub use models::{CommandRequest, Indicator, IndicatorObject, ProductDetails, ProductSummary};
pub use session::SessionManager;
pub use transport::TransportConfig;
