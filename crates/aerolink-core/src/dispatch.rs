// ── Command dispatcher ──
//
// Serializes mode commands for the one device: one in-flight command
// at a time, minimum spacing between accepted commands, optimistic
// control-surface updates, and a bounded background verification loop
// that reconciles the cache with what the device actually did.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::PoisonError;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::DeviceApi;
use crate::control::ControlState;
use crate::error::CoreError;
use crate::model::{ControlValues, DeviceId, DeviceStatus, OperatingMode, SpeedStep};
use crate::poller::Poller;

/// Minimum spacing between accepted commands. Control surfaces tend
/// to emit bursts (a dial drag produces several writes); anything
/// inside this window is rejected rather than queued.
const MIN_COMMAND_SPACING: Duration = Duration::from_secs(2);

/// Upper bound on how long the in-flight lock may be held. A wedged
/// verification task must not brick the control surface.
const BUSY_CEILING: Duration = Duration::from_secs(30);

/// Bounded verification: number of read-back passes after a command.
const VERIFY_PASSES: u32 = 3;
/// Delay before the first read-back; the unit takes a few seconds to
/// report a mode change.
const VERIFY_INITIAL_DELAY: Duration = Duration::from_secs(5);
const VERIFY_RETRY_DELAY: Duration = Duration::from_secs(4);

/// Accepts control-surface writes, translates them into mode
/// commands, and keeps the published [`ControlValues`] honest.
///
/// Cheaply cloneable; clones share the state and the watch channel.
#[derive(Clone)]
pub struct CommandDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    api: Arc<dyn DeviceApi>,
    poller: Poller,
    state: StdMutex<ControlState>,
    /// Set while a command is being applied and verified.
    busy_since: StdMutex<Option<Instant>>,
    values_tx: watch::Sender<ControlValues>,
}

impl CommandDispatcher {
    pub fn new(api: Arc<dyn DeviceApi>, poller: Poller) -> Self {
        let (values_tx, _) = watch::channel(ControlValues::INACTIVE);
        Self {
            inner: Arc::new(DispatcherInner {
                api,
                poller,
                state: StdMutex::new(ControlState::new()),
                busy_since: StdMutex::new(None),
                values_tx,
            }),
        }
    }

    /// Subscribe this dispatcher to poller broadcasts under the given
    /// accessory identity.
    pub fn attach(&self, accessory_id: impl Into<String>) {
        let this = self.clone();
        self.inner
            .poller
            .register(accessory_id, Box::new(move |status| this.apply_broadcast(&status)));
    }

    /// Watch channel carrying the canonical control-surface values.
    pub fn values(&self) -> watch::Receiver<ControlValues> {
        self.inner.values_tx.subscribe()
    }

    pub fn mode(&self) -> OperatingMode {
        lock(&self.inner.state).mode()
    }

    pub fn is_forced(&self) -> bool {
        lock(&self.inner.state).forced()
    }

    // ── Control-surface writes ───────────────────────────────────────

    /// Turn the unit "on" or "off".
    ///
    /// There is no true off state: "off" maps to the baseline mode,
    /// and "on" from baseline picks the default active mode rather
    /// than the strongest one.
    pub fn set_active(&self, active: bool) -> Result<(), CoreError> {
        let current = lock(&self.inner.state).mode();
        let target = match (active, current) {
            (false, _) => OperatingMode::Min,
            (true, OperatingMode::Min) => OperatingMode::Boost,
            (true, other) => other,
        };
        self.submit(target)
    }

    /// Set the unit's speed step directly.
    pub fn set_speed(&self, speed: SpeedStep) -> Result<(), CoreError> {
        let values = ControlValues {
            active: speed != SpeedStep::Off,
            speed,
        };
        self.submit(OperatingMode::from_control(values))
    }

    // ── Broadcast ingestion ──────────────────────────────────────────

    /// Apply an authoritative status snapshot from the poller.
    ///
    /// The broadcast always wins; the canonical values are re-sent so
    /// the control surface converges on the device's real state even
    /// when the change was made out-of-band.
    pub fn apply_broadcast(&self, status: &DeviceStatus) {
        let values = {
            let mut state = lock(&self.inner.state);
            let was_forced = state.forced();
            state.observe(status);
            if state.forced() != was_forced {
                info!(forced = state.forced(), "override state changed");
            }
            state.values()
        };
        let _ = self.inner.values_tx.send(values);
    }

    // ── Command path ─────────────────────────────────────────────────

    /// Validate, accept, and optimistically apply a mode command.
    ///
    /// Gate order: device readiness, override lock, in-flight lock,
    /// spacing window, then the idempotence check. An accepted command
    /// updates the cache and the watch channel immediately and spawns
    /// the apply-and-verify task.
    fn submit(&self, target: OperatingMode) -> Result<(), CoreError> {
        let Some(device_id) = self.inner.poller.device_id().cloned() else {
            return Err(CoreError::NotReady);
        };

        let latest_forced = self
            .inner
            .poller
            .latest()
            .is_some_and(|status| status.forced);

        {
            let mut state = lock(&self.inner.state);
            if state.forced() || latest_forced {
                debug!(%target, "command refused while the device override is active");
                return Err(CoreError::Overridden);
            }

            let mut busy = lock(&self.inner.busy_since);
            if let Some(since) = *busy {
                if since.elapsed() < BUSY_CEILING {
                    debug!(%target, "command refused while another is in flight");
                    return Err(CoreError::CommandInFlight);
                }
                warn!("in-flight lock held past ceiling -- force releasing");
                *busy = None;
            }

            if state.within_spacing(MIN_COMMAND_SPACING) {
                debug!(%target, "command refused inside the spacing window");
                return Err(CoreError::RateLimited);
            }

            if state.mode() == target {
                // Idempotent write: re-assert the canonical values and
                // count it toward spacing, but send nothing upstream.
                state.stamp();
                let values = state.values();
                drop(busy);
                drop(state);
                let _ = self.inner.values_tx.send(values);
                debug!(%target, "target equals cached mode -- re-asserted");
                return Ok(());
            }

            if !self.inner.api.healthy() {
                debug!(%target, "command refused while the cloud client is unhealthy");
                return Err(CoreError::Communication {
                    message: "cloud client is unhealthy".to_owned(),
                });
            }

            *busy = Some(Instant::now());
            state.begin_command(target);
        }

        let _ = self.inner.values_tx.send(target.control_values());
        info!(%target, "mode command accepted");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(apply_and_verify(inner, device_id, target));
        Ok(())
    }
}

/// Push the command upstream, trigger a shared refresh, then read the
/// device back a bounded number of times. On a confirmed mismatch the
/// cache and control surface are corrected to the observed mode; if
/// every read-back fails the optimistic value stands until the next
/// poll.
async fn apply_and_verify(inner: Arc<DispatcherInner>, device_id: DeviceId, target: OperatingMode) {
    match inner.api.apply_mode(&device_id, target).await {
        Ok(()) => debug!(%target, "mode command dispatched"),
        Err(e) => warn!(%target, error = %e, "mode command failed -- verification will reconcile"),
    }

    inner.poller.request_refresh("mode command issued");

    let mut observed: Option<OperatingMode> = None;
    for pass in 1..=VERIFY_PASSES {
        let delay = if pass == 1 {
            VERIFY_INITIAL_DELAY
        } else {
            VERIFY_RETRY_DELAY
        };
        tokio::time::sleep(delay).await;

        match inner.api.fetch_status(&device_id).await {
            Ok(status) => {
                observed = Some(status.mode);
                if status.mode == target {
                    break;
                }
                debug!(pass, observed = %status.mode, %target, "verification pass disagrees");
            }
            Err(e) => warn!(pass, error = %e, "verification fetch failed"),
        }
    }

    let correction = {
        let mut state = lock(&inner.state);
        match observed {
            Some(mode) if mode == target => {
                state.settle(target);
                debug!(%target, "mode command verified");
                None
            }
            Some(mode) => {
                warn!(requested = %target, observed = %mode, "device settled on a different mode -- correcting");
                state.settle(mode);
                Some(mode.control_values())
            }
            None => {
                warn!(%target, "verification inconclusive -- keeping the optimistic value");
                state.clear_pending();
                None
            }
        }
    };
    if let Some(values) = correction {
        let _ = inner.values_tx.send(values);
    }

    *lock(&inner.busy_since) = None;
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
