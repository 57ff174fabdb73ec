// ── Domain model ──
//
// Normalized types shared by the poller, the state machine, and the
// dispatcher. The hardware exposes exactly three discrete operating
// modes; the hub's control surface sees an on/off switch plus a speed
// dial restricted to three canonical steps. The bijection between the
// two lives here.

use std::collections::BTreeMap;
use std::fmt;

use strum::{Display, EnumIter};

// ── Device identity ─────────────────────────────────────────────────

/// Opaque identity of the account's single ventilation unit.
///
/// Resolved once via the product listing and cached for the process
/// lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Operating mode ──────────────────────────────────────────────────

/// One of the device's three discrete hardware states.
///
/// Ordered here for UI mapping purposes only -- the hardware treats
/// them as categorical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter)]
pub enum OperatingMode {
    /// Baseline ventilation. Maps to "inactive" on the control surface.
    Min,
    /// Temporary boost. The default mode when the surface turns "on".
    Boost,
    /// Maximum throughput.
    Max,
}

impl OperatingMode {
    /// The wire code the cloud API uses for this mode.
    pub const fn wire_code(self) -> &'static str {
        match self {
            Self::Min => "V",
            Self::Boost => "Y",
            Self::Max => "X",
        }
    }

    /// Parse a wire code. Unknown codes return `None`.
    pub fn from_wire(code: &str) -> Option<Self> {
        match code {
            "V" => Some(Self::Min),
            "Y" => Some(Self::Boost),
            "X" => Some(Self::Max),
            _ => None,
        }
    }

    /// The canonical control-surface values for this mode.
    ///
    /// Fixed bijection: Min is inactive/0, Boost active/50, Max
    /// active/100. No other control value may be requested.
    pub const fn control_values(self) -> ControlValues {
        match self {
            Self::Min => ControlValues {
                active: false,
                speed: SpeedStep::Off,
            },
            Self::Boost => ControlValues {
                active: true,
                speed: SpeedStep::Half,
            },
            Self::Max => ControlValues {
                active: true,
                speed: SpeedStep::Full,
            },
        }
    }

    /// Map control-surface values back to a mode.
    ///
    /// Total over the whole input domain: inactive always means Min;
    /// the non-canonical active/0 combination resolves to Boost, the
    /// default active mode.
    pub const fn from_control(values: ControlValues) -> Self {
        if !values.active {
            return Self::Min;
        }
        match values.speed {
            SpeedStep::Full => Self::Max,
            SpeedStep::Off | SpeedStep::Half => Self::Boost,
        }
    }
}

// ── Control-surface values ──────────────────────────────────────────

/// The three canonical speed steps the dial may request.
///
/// Restricting the input domain at the type level is what enforces the
/// mode/control bijection -- there is no runtime "nearest value"
/// search to get wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
pub enum SpeedStep {
    Off,
    Half,
    Full,
}

impl SpeedStep {
    pub const fn percent(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::Half => 50,
            Self::Full => 100,
        }
    }

    /// Parse a percentage. Only the three canonical values are valid.
    pub fn from_percent(percent: u8) -> Option<Self> {
        match percent {
            0 => Some(Self::Off),
            50 => Some(Self::Half),
            100 => Some(Self::Full),
            _ => None,
        }
    }
}

/// Fan-like control surface state: active flag plus speed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlValues {
    pub active: bool,
    pub speed: SpeedStep,
}

impl ControlValues {
    pub const INACTIVE: Self = Self {
        active: false,
        speed: SpeedStep::Off,
    };
}

// ── Device status ───────────────────────────────────────────────────

/// Climate probe locations: the main unit plus up to four room probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter)]
pub enum ProbeLocation {
    Main,
    Room1,
    Room2,
    Room3,
    Room4,
}

/// Temperature/humidity readings for one probe location.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProbeReadings {
    /// Degrees Celsius (already scale-corrected).
    pub temperature: Option<f32>,
    /// Relative humidity, percent.
    pub humidity: Option<f32>,
}

impl ProbeReadings {
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.humidity.is_none()
    }
}

/// Normalized device status, recomputed every poll cycle.
///
/// Absent optional fields mean "unknown -- retain the previous cached
/// value", not zero; subscribers decide what retention means for them.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatus {
    pub mode: OperatingMode,
    /// `true` when an external controller (wall switch or vendor app)
    /// has seized control; local commands are rejected while it holds.
    pub forced: bool,
    /// Air-quality index, 0-100.
    pub air_quality: Option<u8>,
    pub co2_ppm: Option<u16>,
    /// Readings per probe location; locations with no data are absent.
    pub probes: BTreeMap<ProbeLocation, ProbeReadings>,
}

impl DeviceStatus {
    /// A status with the given mode and nothing else known.
    pub fn with_mode(mode: OperatingMode) -> Self {
        Self {
            mode,
            forced: false,
            air_quality: None,
            co2_ppm: None,
            probes: BTreeMap::new(),
        }
    }

    pub fn temperature(&self, location: ProbeLocation) -> Option<f32> {
        self.probes.get(&location).and_then(|p| p.temperature)
    }

    pub fn humidity(&self, location: ProbeLocation) -> Option<f32> {
        self.probes.get(&location).and_then(|p| p.humidity)
    }
}
