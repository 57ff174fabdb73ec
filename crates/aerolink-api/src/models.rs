// Wire types for the vendor cloud API.
//
// The device-details payload carries two overlapping encodings of the
// same readings: a flat list of typed indicator tuples and a nested
// object keyed by short field codes. Both are preserved here verbatim;
// normalization lives in aerolink-core's decoder.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Token endpoint ──────────────────────────────────────────────────

/// Response from the OAuth2 password-grant token endpoint.
///
/// The vendor does not reliably supply an expiry, so none is modeled;
/// expiry is detected reactively via 401.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
}

// ── Product listing ─────────────────────────────────────────────────

/// One entry from the account's product listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductSummary {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Product `type` value identifying a ventilation unit.
pub const VENTILATION_PRODUCT_KIND: &str = "VENT";

// ── Device details ──────────────────────────────────────────────────

/// One tuple from the flat indicator list, e.g. `{"type": "CO2",
/// "value": 450}`. Values are heterogeneous (string mode codes,
/// numbers, booleans), so they stay as raw JSON here.
#[derive(Debug, Clone, Deserialize)]
pub struct Indicator {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub value: Value,
}

/// The nested indicator object, keyed by short field codes.
///
/// `tmp` and `t1`-`t4` are fixed-point: raw value is degrees x10.
/// Unknown keys the firmware may add are ignored on deserialization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndicatorObject {
    /// Operating mode wire code ("V", "Y", "X").
    #[serde(default)]
    pub md: Option<String>,
    /// External override ("forced") flag.
    #[serde(default)]
    pub frc: Option<bool>,
    /// Air-quality index, 0-100.
    #[serde(default)]
    pub qai: Option<f64>,
    /// CO2 concentration in ppm.
    #[serde(default)]
    pub co2: Option<f64>,
    /// Main unit temperature, degrees x10.
    #[serde(default)]
    pub tmp: Option<f64>,
    /// Main unit relative humidity, percent.
    #[serde(default)]
    pub hum: Option<f64>,
    #[serde(default)]
    pub t1: Option<f64>,
    #[serde(default)]
    pub t2: Option<f64>,
    #[serde(default)]
    pub t3: Option<f64>,
    #[serde(default)]
    pub t4: Option<f64>,
    #[serde(default)]
    pub h1: Option<f64>,
    #[serde(default)]
    pub h2: Option<f64>,
    #[serde(default)]
    pub h3: Option<f64>,
    #[serde(default)]
    pub h4: Option<f64>,
}

/// Full device-details payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductDetails {
    #[serde(default)]
    pub id: Option<String>,
    /// Flat indicator list (older encoding).
    #[serde(default)]
    pub indicators: Vec<Indicator>,
    /// Nested indicator object (newer encoding; wins on conflict).
    #[serde(default)]
    pub indicator: Option<IndicatorObject>,
}

impl ProductDetails {
    /// Raw-level check for the external-override flag, consulting both
    /// encodings. The client consults this before issuing a mode
    /// command; the full normalization lives in the core decoder.
    pub fn is_forced(&self) -> bool {
        if let Some(frc) = self.indicator.as_ref().and_then(|i| i.frc) {
            return frc;
        }
        self.indicators
            .iter()
            .find(|i| i.kind == "FORCED")
            .map(|i| match &i.value {
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
                _ => false,
            })
            .unwrap_or(false)
    }
}

// ── Command endpoint ────────────────────────────────────────────────

/// JSON-RPC shaped body accepted by the command endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CommandRequest {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    pub params: Vec<String>,
    pub id: u32,
}

impl CommandRequest {
    /// Build a mode-change command for the given wire code.
    pub fn change_mode(code: &str) -> Self {
        Self {
            jsonrpc: "2.0",
            method: "changeMode",
            params: vec![code.to_owned()],
            id: 1,
        }
    }
}
