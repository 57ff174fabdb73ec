// ── Mode/control state machine ──
//
// Per-control cache of what the device is believed to be doing.
// Transitions come from exactly two places: poller broadcasts
// (authoritative, always applied) and accepted dispatcher commands
// (optimistic, corrected by verification if the device disagrees).
// The `forced` sub-state disables outbound commands entirely while
// still tracking the device's actual mode.

use tokio::time::Instant;

use crate::model::{ControlValues, DeviceStatus, OperatingMode};

/// Local cache of the last-applied mode and command bookkeeping.
#[derive(Debug)]
pub struct ControlState {
    mode: OperatingMode,
    forced: bool,
    /// A command has been applied optimistically and not yet verified.
    pending: bool,
    /// When the last command was accepted, for anti-thrash spacing.
    last_command: Option<Instant>,
}

impl ControlState {
    pub fn new() -> Self {
        Self {
            mode: OperatingMode::Min,
            forced: false,
            pending: false,
            last_command: None,
        }
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    pub fn forced(&self) -> bool {
        self.forced
    }

    pub fn pending(&self) -> bool {
        self.pending
    }

    /// The canonical control-surface values for the cached mode.
    pub fn values(&self) -> ControlValues {
        self.mode.control_values()
    }

    /// Apply an authoritative status broadcast. Always wins; an
    /// optimistic value may be transiently overwritten and restored
    /// by the verification loop.
    pub fn observe(&mut self, status: &DeviceStatus) {
        self.mode = status.mode;
        self.forced = status.forced;
    }

    /// Record an accepted command: optimistic mode plus bookkeeping.
    pub fn begin_command(&mut self, target: OperatingMode) {
        self.mode = target;
        self.pending = true;
        self.last_command = Some(Instant::now());
    }

    /// Stamp the command timestamp without changing the mode
    /// (idempotent re-assert counts as an accepted command).
    pub fn stamp(&mut self) {
        self.last_command = Some(Instant::now());
    }

    /// Conclude verification with the mode the device actually holds.
    pub fn settle(&mut self, observed: OperatingMode) {
        self.mode = observed;
        self.pending = false;
    }

    /// Clear the pending flag without learning anything (verification
    /// was inconclusive).
    pub fn clear_pending(&mut self) {
        self.pending = false;
    }

    /// `true` while the last accepted command is newer than `window`.
    pub fn within_spacing(&self, window: std::time::Duration) -> bool {
        self.last_command.is_some_and(|at| at.elapsed() < window)
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new()
    }
}
