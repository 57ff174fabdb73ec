// ── Status decoding ──
//
// Pure transform from the vendor's device-details payload to the
// normalized DeviceStatus. The provider ships two overlapping
// encodings of the same readings; the flat indicator list is read
// first, then the nested short-code object overrides field by field.
// Raw temperatures are fixed-point x10 in both encodings.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::warn;

use aerolink_api::models::ProductDetails;

use crate::model::{DeviceStatus, OperatingMode, ProbeLocation, ProbeReadings};

/// Decode a raw device-details payload into a normalized status.
///
/// Never fails: unknown indicator types are ignored, and a payload
/// with no mode indicator in either encoding defaults to
/// [`OperatingMode::Min`] with a logged warning.
pub fn decode_status(details: &ProductDetails) -> DeviceStatus {
    let mut mode: Option<OperatingMode> = None;
    let mut forced = false;
    let mut air_quality: Option<u8> = None;
    let mut co2_ppm: Option<u16> = None;
    let mut probes: BTreeMap<ProbeLocation, ProbeReadings> = BTreeMap::new();

    // ── Flat indicator list (older encoding) ─────────────────────────

    for indicator in &details.indicators {
        match indicator.kind.as_str() {
            "MODE" => {
                if let Some(code) = indicator.value.as_str() {
                    mode = OperatingMode::from_wire(code).or(mode);
                }
            }
            "FORCED" => forced = truthy(&indicator.value),
            "QAI" => air_quality = number(&indicator.value).map(as_index),
            "CO2" => co2_ppm = number(&indicator.value).map(as_ppm),
            "TMP" => set_temperature(&mut probes, ProbeLocation::Main, &indicator.value),
            "HUM" => set_humidity(&mut probes, ProbeLocation::Main, &indicator.value),
            "TMP1" => set_temperature(&mut probes, ProbeLocation::Room1, &indicator.value),
            "TMP2" => set_temperature(&mut probes, ProbeLocation::Room2, &indicator.value),
            "TMP3" => set_temperature(&mut probes, ProbeLocation::Room3, &indicator.value),
            "TMP4" => set_temperature(&mut probes, ProbeLocation::Room4, &indicator.value),
            "HUM1" => set_humidity(&mut probes, ProbeLocation::Room1, &indicator.value),
            "HUM2" => set_humidity(&mut probes, ProbeLocation::Room2, &indicator.value),
            "HUM3" => set_humidity(&mut probes, ProbeLocation::Room3, &indicator.value),
            "HUM4" => set_humidity(&mut probes, ProbeLocation::Room4, &indicator.value),
            // Unsupported indicator types are not errors.
            _ => {}
        }
    }

    // ── Nested short-code object (newer encoding, wins on conflict) ──

    if let Some(obj) = &details.indicator {
        if let Some(code) = obj.md.as_deref() {
            match OperatingMode::from_wire(code) {
                Some(m) => mode = Some(m),
                None => warn!(code, "unknown mode code in nested indicator"),
            }
        }
        if let Some(frc) = obj.frc {
            forced = frc;
        }
        if let Some(v) = obj.qai {
            air_quality = Some(as_index(v));
        }
        if let Some(v) = obj.co2 {
            co2_ppm = Some(as_ppm(v));
        }

        let nested_probes = [
            (ProbeLocation::Main, obj.tmp, obj.hum),
            (ProbeLocation::Room1, obj.t1, obj.h1),
            (ProbeLocation::Room2, obj.t2, obj.h2),
            (ProbeLocation::Room3, obj.t3, obj.h3),
            (ProbeLocation::Room4, obj.t4, obj.h4),
        ];
        for (location, temperature, humidity) in nested_probes {
            let entry = probes.entry(location).or_default();
            if let Some(raw) = temperature {
                entry.temperature = Some(scale_temperature(raw));
            }
            if let Some(h) = humidity {
                entry.humidity = Some(h as f32);
            }
        }
    }

    probes.retain(|_, readings| !readings.is_empty());

    let mode = mode.unwrap_or_else(|| {
        warn!("no mode indicator in either encoding -- defaulting to baseline");
        OperatingMode::Min
    });

    DeviceStatus {
        mode,
        forced,
        air_quality,
        co2_ppm,
        probes,
    }
}

// ── Value helpers ───────────────────────────────────────────────────

/// Raw temperatures are degrees x10.
fn scale_temperature(raw: f64) -> f32 {
    (raw / 10.0) as f32
}

fn number(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        _ => false,
    }
}

fn as_index(v: f64) -> u8 {
    v.clamp(0.0, 100.0) as u8
}

fn as_ppm(v: f64) -> u16 {
    v.clamp(0.0, f64::from(u16::MAX)) as u16
}

fn set_temperature(
    probes: &mut BTreeMap<ProbeLocation, ProbeReadings>,
    location: ProbeLocation,
    value: &Value,
) {
    if let Some(raw) = number(value) {
        probes.entry(location).or_default().temperature = Some(scale_temperature(raw));
    }
}

fn set_humidity(
    probes: &mut BTreeMap<ProbeLocation, ProbeReadings>,
    location: ProbeLocation,
    value: &Value,
) {
    if let Some(h) = number(value) {
        probes.entry(location).or_default().humidity = Some(h as f32);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn details(payload: serde_json::Value) -> ProductDetails {
        serde_json::from_value(payload).unwrap()
    }

    #[test]
    fn decodes_the_nested_encoding() {
        let raw = details(json!({
            "indicator": { "md": "V", "co2": 450, "tmp": 213 }
        }));

        let status = decode_status(&raw);

        assert_eq!(status.mode, OperatingMode::Min);
        assert_eq!(status.co2_ppm, Some(450));
        assert_eq!(status.temperature(ProbeLocation::Main), Some(21.3));
        assert!(!status.forced);
    }

    #[test]
    fn nested_values_win_over_flat() {
        let raw = details(json!({
            "indicators": [
                { "type": "MODE", "value": "X" },
                { "type": "CO2", "value": 800 }
            ],
            "indicator": { "md": "Y", "co2": 450 }
        }));

        let status = decode_status(&raw);

        assert_eq!(status.mode, OperatingMode::Boost);
        assert_eq!(status.co2_ppm, Some(450));
    }

    #[test]
    fn flat_encoding_alone_is_sufficient() {
        let raw = details(json!({
            "indicators": [
                { "type": "MODE", "value": "Y" },
                { "type": "FORCED", "value": 1 },
                { "type": "QAI", "value": 82 },
                { "type": "TMP2", "value": 195 },
                { "type": "HUM2", "value": 61 }
            ]
        }));

        let status = decode_status(&raw);

        assert_eq!(status.mode, OperatingMode::Boost);
        assert!(status.forced);
        assert_eq!(status.air_quality, Some(82));
        assert_eq!(status.temperature(ProbeLocation::Room2), Some(19.5));
        assert_eq!(status.humidity(ProbeLocation::Room2), Some(61.0));
    }

    #[test]
    fn missing_mode_defaults_to_min() {
        let raw = details(json!({
            "indicator": { "co2": 600 }
        }));

        let status = decode_status(&raw);

        assert_eq!(status.mode, OperatingMode::Min);
        assert_eq!(status.co2_ppm, Some(600));
    }

    #[test]
    fn unknown_indicator_types_are_ignored() {
        let raw = details(json!({
            "indicators": [
                { "type": "MODE", "value": "X" },
                { "type": "FILTER_WEAR", "value": 73 },
                { "type": "WIFI_RSSI", "value": -60 }
            ]
        }));

        let status = decode_status(&raw);

        assert_eq!(status.mode, OperatingMode::Max);
        assert!(status.probes.is_empty());
    }

    #[test]
    fn empty_payload_is_a_baseline_status() {
        let status = decode_status(&ProductDetails::default());

        assert_eq!(status.mode, OperatingMode::Min);
        assert!(!status.forced);
        assert!(status.air_quality.is_none());
        assert!(status.co2_ppm.is_none());
        assert!(status.probes.is_empty());
    }
}
