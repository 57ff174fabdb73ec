//! Engine-level tests for the poller and command dispatcher, driven
//! through a scripted in-memory device API with a paused clock.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use aerolink_core::{
    CommandDispatcher, ControlValues, CoreError, DeviceApi, DeviceId, DeviceStatus, OperatingMode,
    Poller, SpeedStep,
};

// ── Scripted device API ─────────────────────────────────────────────

struct FakeApi {
    fetch_calls: AtomicU32,
    apply_calls: AtomicU32,
    applied: Mutex<Vec<OperatingMode>>,
    reported: Mutex<DeviceStatus>,
    fail_fetch: AtomicBool,
    healthy: AtomicBool,
}

impl FakeApi {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            fetch_calls: AtomicU32::new(0),
            apply_calls: AtomicU32::new(0),
            applied: Mutex::new(Vec::new()),
            reported: Mutex::new(DeviceStatus::with_mode(OperatingMode::Min)),
            fail_fetch: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
        })
    }

    fn report(&self, status: DeviceStatus) {
        *self.reported.lock().unwrap() = status;
    }

    fn fetch_calls(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    fn apply_calls(&self) -> u32 {
        self.apply_calls.load(Ordering::SeqCst)
    }

    fn applied(&self) -> Vec<OperatingMode> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceApi for FakeApi {
    async fn resolve_identity(&self) -> Result<DeviceId, CoreError> {
        Ok(DeviceId::from("unit-1".to_owned()))
    }

    async fn fetch_status(&self, _id: &DeviceId) -> Result<DeviceStatus, CoreError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(CoreError::Communication {
                message: "scripted failure".to_owned(),
            });
        }
        Ok(self.reported.lock().unwrap().clone())
    }

    async fn apply_mode(&self, _id: &DeviceId, mode: OperatingMode) -> Result<(), CoreError> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        self.applied.lock().unwrap().push(mode);
        Ok(())
    }

    fn healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    fn reset_health(&self) {
        self.healthy.store(true, Ordering::SeqCst);
    }
}

const POLL_INTERVAL: Duration = Duration::from_secs(300);

async fn started(api: &Arc<FakeApi>) -> Poller {
    let poller = Poller::new(Arc::clone(api) as Arc<dyn DeviceApi>);
    poller.start(POLL_INTERVAL).await.unwrap();
    // Let the loop run its immediate first fetch.
    tokio::time::sleep(Duration::from_millis(1)).await;
    poller
}

fn dispatcher(api: &Arc<FakeApi>, poller: &Poller) -> CommandDispatcher {
    CommandDispatcher::new(Arc::clone(api) as Arc<dyn DeviceApi>, poller.clone())
}

// ── Poller ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn poller_fans_one_fetch_out_to_all_subscribers() {
    let api = FakeApi::new();
    api.report(DeviceStatus::with_mode(OperatingMode::Boost));

    let poller = Poller::new(Arc::clone(&api) as Arc<dyn DeviceApi>);
    let first = Arc::new(AtomicU32::new(0));
    let second = Arc::new(AtomicU32::new(0));
    {
        let first = Arc::clone(&first);
        poller.register("fan", Box::new(move |_| {
            first.fetch_add(1, Ordering::SeqCst);
        }));
    }
    {
        let second = Arc::clone(&second);
        poller.register("sensors", Box::new(move |_| {
            second.fetch_add(1, Ordering::SeqCst);
        }));
    }

    poller.start(POLL_INTERVAL).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert_eq!(api.fetch_calls(), 1);
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 1);
    assert_eq!(poller.latest().unwrap().mode, OperatingMode::Boost);
}

#[tokio::test(start_paused = true)]
async fn refresh_bursts_collapse_into_one_fetch() {
    let api = FakeApi::new();
    let poller = started(&api).await;
    assert_eq!(api.fetch_calls(), 1);

    for _ in 0..5 {
        poller.request_refresh("burst");
    }
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(api.fetch_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_fetch_skips_fan_out_and_keeps_polling() {
    let api = FakeApi::new();
    let poller = Poller::new(Arc::clone(&api) as Arc<dyn DeviceApi>);
    let seen = Arc::new(AtomicU32::new(0));
    {
        let seen = Arc::clone(&seen);
        poller.register("fan", Box::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
    }

    api.fail_fetch.store(true, Ordering::SeqCst);
    poller.start(POLL_INTERVAL).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert_eq!(api.fetch_calls(), 1);
    assert_eq!(seen.load(Ordering::SeqCst), 0);
    assert!(poller.latest().is_none());

    api.fail_fetch.store(false, Ordering::SeqCst);
    poller.request_refresh("recovery");
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(api.fetch_calls(), 2);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_clears_the_subscriber_registry() {
    let api = FakeApi::new();
    let poller = started(&api).await;
    poller.register("fan", Box::new(|_| {}));
    assert_eq!(poller.subscriber_count(), 1);

    poller.stop().await;
    assert_eq!(poller.subscriber_count(), 0);
}

// ── Dispatcher: broadcasts ──────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn broadcasts_drive_the_control_surface() {
    let api = FakeApi::new();
    api.report(DeviceStatus::with_mode(OperatingMode::Max));

    let poller = Poller::new(Arc::clone(&api) as Arc<dyn DeviceApi>);
    let dispatcher = dispatcher(&api, &poller);
    dispatcher.attach("fan");

    poller.start(POLL_INTERVAL).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert_eq!(dispatcher.mode(), OperatingMode::Max);
    assert_eq!(
        *dispatcher.values().borrow(),
        ControlValues {
            active: true,
            speed: SpeedStep::Full
        }
    );
}

// ── Dispatcher: command gating ──────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn commands_require_a_resolved_identity() {
    let api = FakeApi::new();
    let poller = Poller::new(Arc::clone(&api) as Arc<dyn DeviceApi>);
    let dispatcher = dispatcher(&api, &poller);

    assert!(matches!(
        dispatcher.set_active(true),
        Err(CoreError::NotReady)
    ));
}

#[tokio::test(start_paused = true)]
async fn command_refused_while_override_active() {
    let api = FakeApi::new();
    let mut forced = DeviceStatus::with_mode(OperatingMode::Max);
    forced.forced = true;
    api.report(forced);

    let poller = Poller::new(Arc::clone(&api) as Arc<dyn DeviceApi>);
    let dispatcher = dispatcher(&api, &poller);
    dispatcher.attach("fan");
    poller.start(POLL_INTERVAL).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert!(dispatcher.is_forced());
    assert!(matches!(
        dispatcher.set_active(false),
        Err(CoreError::Overridden)
    ));
    assert_eq!(api.apply_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn second_command_rejected_while_one_in_flight() {
    let api = FakeApi::new();
    let poller = started(&api).await;
    let dispatcher = dispatcher(&api, &poller);

    dispatcher.set_active(true).unwrap();
    assert!(matches!(
        dispatcher.set_speed(SpeedStep::Full),
        Err(CoreError::CommandInFlight)
    ));
}

#[tokio::test(start_paused = true)]
async fn command_refused_while_client_unhealthy() {
    let api = FakeApi::new();
    let poller = started(&api).await;
    let dispatcher = dispatcher(&api, &poller);

    api.healthy.store(false, Ordering::SeqCst);
    assert!(matches!(
        dispatcher.set_active(true),
        Err(CoreError::Communication { .. })
    ));
    assert_eq!(api.apply_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn idempotent_write_reasserts_and_counts_toward_spacing() {
    let api = FakeApi::new();
    let poller = started(&api).await;
    let dispatcher = dispatcher(&api, &poller);

    // Cached mode is already the baseline.
    dispatcher.set_active(false).unwrap();
    assert_eq!(api.apply_calls(), 0);

    assert!(matches!(
        dispatcher.set_speed(SpeedStep::Full),
        Err(CoreError::RateLimited)
    ));

    tokio::time::sleep(Duration::from_secs(3)).await;
    dispatcher.set_speed(SpeedStep::Full).unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(api.applied(), vec![OperatingMode::Max]);
}

// ── Dispatcher: mode translation ────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn turning_on_from_baseline_picks_boost() {
    let api = FakeApi::new();
    api.report(DeviceStatus::with_mode(OperatingMode::Boost));
    let poller = started(&api).await;
    let dispatcher = dispatcher(&api, &poller);

    dispatcher.set_active(true).unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert_eq!(api.applied(), vec![OperatingMode::Boost]);
    assert_eq!(dispatcher.mode(), OperatingMode::Boost);
    assert_eq!(
        *dispatcher.values().borrow(),
        ControlValues {
            active: true,
            speed: SpeedStep::Half
        }
    );
}

#[tokio::test(start_paused = true)]
async fn turning_off_targets_baseline() {
    let api = FakeApi::new();
    api.report(DeviceStatus::with_mode(OperatingMode::Min));
    let poller = started(&api).await;
    let dispatcher = dispatcher(&api, &poller);

    dispatcher.apply_broadcast(&DeviceStatus::with_mode(OperatingMode::Boost));
    dispatcher.set_active(false).unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert_eq!(api.applied(), vec![OperatingMode::Min]);
    assert_eq!(*dispatcher.values().borrow(), ControlValues::INACTIVE);
}

// ── Dispatcher: verification ────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn verification_confirms_an_applied_command() {
    let api = FakeApi::new();
    api.report(DeviceStatus::with_mode(OperatingMode::Boost));
    let poller = started(&api).await;
    let dispatcher = dispatcher(&api, &poller);

    dispatcher.set_speed(SpeedStep::Full).unwrap();
    api.report(DeviceStatus::with_mode(OperatingMode::Max));
    tokio::time::sleep(Duration::from_secs(20)).await;

    assert_eq!(dispatcher.mode(), OperatingMode::Max);
    assert_eq!(
        *dispatcher.values().borrow(),
        ControlValues {
            active: true,
            speed: SpeedStep::Full
        }
    );
}

#[tokio::test(start_paused = true)]
async fn verification_corrects_an_unconfirmed_command() {
    // The device keeps reporting the baseline mode no matter what is
    // commanded, as it does when a wall switch snaps the mode back.
    let api = FakeApi::new();
    let poller = started(&api).await;
    let dispatcher = dispatcher(&api, &poller);

    dispatcher.set_active(true).unwrap();
    // Optimistic value is visible immediately.
    assert_eq!(dispatcher.mode(), OperatingMode::Boost);
    assert_eq!(
        *dispatcher.values().borrow(),
        ControlValues {
            active: true,
            speed: SpeedStep::Half
        }
    );

    tokio::time::sleep(Duration::from_secs(20)).await;

    assert_eq!(api.apply_calls(), 1);
    assert_eq!(dispatcher.mode(), OperatingMode::Min);
    assert_eq!(*dispatcher.values().borrow(), ControlValues::INACTIVE);
}
