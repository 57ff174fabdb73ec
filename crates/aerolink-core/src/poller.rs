// ── Central poller ──
//
// One recurring fetch serves every subscriber: each tick pulls the
// device status once and fans the same snapshot out to all registered
// callbacks, bounding provider call volume regardless of how many
// accessories are listening. Command writers ask for an out-of-band
// refresh through `request_refresh`, which debounces bursts into a
// single fetch and resets the recurring timer.

use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::DeviceApi;
use crate::error::CoreError;
use crate::model::{DeviceId, DeviceStatus};

/// Window within which refresh requests collapse into one fetch.
/// Command-driven requests arrive close together (one per control
/// write) and must not multiply provider calls.
const REFRESH_DEBOUNCE: Duration = Duration::from_millis(500);

/// Callback invoked with each polled status snapshot.
pub type StatusCallback = Box<dyn Fn(Arc<DeviceStatus>) + Send + Sync>;

/// Owns the authoritative device identity and the recurring fetch loop.
///
/// Cheaply cloneable; all clones share one loop and one registry.
#[derive(Clone)]
pub struct Poller {
    inner: Arc<PollerInner>,
}

struct PollerInner {
    api: Arc<dyn DeviceApi>,
    /// Resolved once at startup; polling does not begin before this.
    identity: OnceLock<DeviceId>,
    /// Subscriber callbacks keyed by accessory identity.
    subscribers: DashMap<String, StatusCallback>,
    /// Most recent successfully decoded status.
    latest: ArcSwapOption<DeviceStatus>,
    /// Set while a debounced refresh is queued; extra requests in the
    /// window are coalesced by this flag.
    refresh_pending: AtomicBool,
    refresh_notify: Notify,
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Poller {
    pub fn new(api: Arc<dyn DeviceApi>) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                api,
                identity: OnceLock::new(),
                subscribers: DashMap::new(),
                latest: ArcSwapOption::const_empty(),
                refresh_pending: AtomicBool::new(false),
                refresh_notify: Notify::new(),
                cancel: Mutex::new(None),
                task: Mutex::new(None),
            }),
        }
    }

    /// The resolved device identity, if startup has completed.
    pub fn device_id(&self) -> Option<&DeviceId> {
        self.inner.identity.get()
    }

    /// The most recent successfully fetched status snapshot.
    pub fn latest(&self) -> Option<Arc<DeviceStatus>> {
        self.inner.latest.load_full()
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Register a subscriber callback under an accessory identity.
    /// Re-registering the same identity replaces the callback.
    pub fn register(&self, id: impl Into<String>, callback: StatusCallback) {
        let id = id.into();
        debug!(subscriber = %id, "registering status subscriber");
        self.inner.subscribers.insert(id, callback);
    }

    pub fn unregister(&self, id: &str) {
        self.inner.subscribers.remove(id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Resolve the device identity and start the recurring fetch loop.
    ///
    /// The first fetch happens immediately after resolution. Calling
    /// `start` while running restarts the loop with the new interval,
    /// keeping the subscriber registry intact.
    pub async fn start(&self, interval: Duration) -> Result<(), CoreError> {
        if self.inner.identity.get().is_none() {
            let id = self.inner.api.resolve_identity().await?;
            info!(device = %id, "resolved ventilation unit");
            let _ = self.inner.identity.set(id);
        }

        self.halt().await;

        let cancel = CancellationToken::new();
        *self.inner.cancel.lock().await = Some(cancel.clone());

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(poll_loop(inner, interval, cancel));
        *self.inner.task.lock().await = Some(handle);

        debug!(interval_secs = interval.as_secs(), "poller started");
        Ok(())
    }

    /// Stop the loop and clear the subscriber registry. Idempotent.
    pub async fn stop(&self) {
        self.halt().await;
        self.inner.subscribers.clear();
        debug!("poller stopped");
    }

    /// Ask for one out-of-band fetch, debounced.
    ///
    /// Requests arriving within the debounce window collapse into a
    /// single fetch, after which the recurring timer is reset.
    pub fn request_refresh(&self, reason: &str) {
        if self.inner.refresh_pending.swap(true, Ordering::AcqRel) {
            debug!(reason, "refresh already queued -- coalesced");
            return;
        }
        debug!(reason, "immediate refresh requested");
        self.inner.refresh_notify.notify_one();
    }

    /// Cancel the running loop without touching the registry.
    async fn halt(&self) {
        if let Some(cancel) = self.inner.cancel.lock().await.take() {
            cancel.cancel();
        }
        if let Some(handle) = self.inner.task.lock().await.take() {
            let _ = handle.await;
        }
    }
}

// ── Poll loop ───────────────────────────────────────────────────────

async fn poll_loop(inner: Arc<PollerInner>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = inner.refresh_notify.notified() => {
                // Let the rest of the burst arrive before fetching.
                tokio::time::sleep(REFRESH_DEBOUNCE).await;
                inner.refresh_pending.store(false, Ordering::Release);
                inner.poll_once().await;
                ticker.reset();
            }
            _ = ticker.tick() => {
                inner.poll_once().await;
            }
        }
    }
}

impl PollerInner {
    /// Fetch once and fan the snapshot out to every subscriber.
    ///
    /// A failed fetch skips fan-out for this tick without tearing the
    /// loop down. All subscribers see the same snapshot before the
    /// next one is produced.
    async fn poll_once(&self) {
        let Some(id) = self.identity.get() else {
            return;
        };

        match self.api.fetch_status(id).await {
            Ok(status) => {
                let status = Arc::new(status);
                self.latest.store(Some(Arc::clone(&status)));
                for entry in self.subscribers.iter() {
                    (entry.value())(Arc::clone(&status));
                }
                debug!(
                    mode = %status.mode,
                    forced = status.forced,
                    subscribers = self.subscribers.len(),
                    "status fan-out complete"
                );
            }
            Err(e) => {
                warn!(error = %e, "status fetch failed -- skipping fan-out");
            }
        }
    }
}
