//! Connectivity tracking
//!
//! Wraps a device reachability probe and keeps one boolean "online" state.
//! Listeners hear about genuine transitions only; repeated reports of the
//! same state are swallowed. A failing probe never flips the state, the last
//! known value is kept instead.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::Result;

/// Device network reachability source
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Probe reachability right now
    async fn check(&self) -> Result<bool>;

    /// Platform push channel for reachability changes, if available
    fn watch(&self) -> Option<watch::Receiver<bool>> {
        None
    }
}

/// Probe driven by the host application, e.g. from a platform callback
pub struct ManualProbe {
    state: watch::Sender<bool>,
}

impl ManualProbe {
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self { state }
    }

    /// Publish a new reachability reading
    pub fn set(&self, online: bool) {
        self.state.send_replace(online);
    }
}

#[async_trait]
impl ReachabilityProbe for ManualProbe {
    async fn check(&self) -> Result<bool> {
        Ok(*self.state.borrow())
    }

    fn watch(&self) -> Option<watch::Receiver<bool>> {
        Some(self.state.subscribe())
    }
}

type Listener = Arc<dyn Fn(bool) + Send + Sync>;

struct Inner {
    probe: Arc<dyn ReachabilityProbe>,
    online: AtomicBool,
    listeners: Mutex<BTreeMap<u64, Listener>>,
    next_listener: AtomicU64,
    platform_task: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn apply(&self, reachable: bool) {
        let was_online = self.online.swap(reachable, Ordering::SeqCst);
        if was_online == reachable {
            return;
        }

        tracing::info!(
            online = reachable,
            "Connection changed: {}",
            if reachable { "ONLINE" } else { "OFFLINE" }
        );

        // Snapshot so listeners may unsubscribe from inside the callback
        let listeners: Vec<(u64, Listener)> = self
            .listeners
            .lock()
            .iter()
            .map(|(id, l)| (*id, l.clone()))
            .collect();

        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(reachable))).is_err() {
                tracing::error!(listener = id, "Connection listener panicked");
            }
        }
    }
}

/// Tracks online/offline state and notifies subscribers on transitions
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

impl ConnectivityMonitor {
    /// Create a monitor; the device is assumed online until a probe says otherwise
    pub fn new(probe: Arc<dyn ReachabilityProbe>) -> Self {
        Self {
            inner: Arc::new(Inner {
                probe,
                online: AtomicBool::new(true),
                listeners: Mutex::new(BTreeMap::new()),
                next_listener: AtomicU64::new(1),
                platform_task: Mutex::new(None),
            }),
        }
    }

    /// Probe once and start following platform reachability events
    pub async fn initialize(&self) -> bool {
        let online = self.check_now().await;

        let mut task = self.inner.platform_task.lock();
        if task.is_none() {
            if let Some(rx) = self.inner.probe.watch() {
                *task = Some(tokio::spawn(follow_platform(
                    Arc::downgrade(&self.inner),
                    rx,
                )));
            }
        }

        tracing::info!(online, "Connection monitor initialized");
        online
    }

    /// Last known state, no I/O
    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Register a callback invoked only when the state flips.
    ///
    /// The listener stays registered until the returned guard is dropped or
    /// `unsubscribe` is called.
    #[must_use = "dropping the subscription unregisters the listener"]
    pub fn on_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().insert(id, Arc::new(listener));
        Subscription {
            monitor: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Force a fresh probe and return the possibly updated state
    pub async fn check_now(&self) -> bool {
        match self.inner.probe.check().await {
            Ok(reachable) => self.inner.apply(reachable),
            Err(e) => {
                tracing::warn!("Reachability probe failed, keeping last state: {}", e);
            }
        }
        self.is_online()
    }

    /// Entry point for platform reachability callbacks
    pub fn report(&self, reachable: bool) {
        self.inner.apply(reachable);
    }

    /// Stop following platform events and drop every listener
    pub fn shutdown(&self) {
        if let Some(task) = self.inner.platform_task.lock().take() {
            task.abort();
        }
        self.inner.listeners.lock().clear();
        tracing::info!("Connection monitor stopped");
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }
}

async fn follow_platform(monitor: Weak<Inner>, mut rx: watch::Receiver<bool>) {
    while rx.changed().await.is_ok() {
        let reachable = *rx.borrow_and_update();
        match monitor.upgrade() {
            Some(inner) => inner.apply(reachable),
            None => break,
        }
    }
}

/// Handle for a registered connectivity listener
pub struct Subscription {
    monitor: Weak<Inner>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.monitor.upgrade() {
            inner.listeners.lock().remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FieldSyncError;
    use std::sync::atomic::AtomicUsize;

    struct FailingProbe;

    #[async_trait]
    impl ReachabilityProbe for FailingProbe {
        async fn check(&self) -> Result<bool> {
            Err(FieldSyncError::Remote("probe unavailable".to_string()))
        }
    }

    #[test]
    fn test_listeners_fire_only_on_transitions() {
        let monitor = ConnectivityMonitor::new(Arc::new(ManualProbe::new(true)));
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let _sub = monitor.on_change(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        monitor.report(true);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        monitor.report(false);
        monitor.report(false);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!monitor.is_online());

        monitor.report(true);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_listener_does_not_break_others() {
        let monitor = ConnectivityMonitor::new(Arc::new(ManualProbe::new(true)));
        let _bad = monitor.on_change(|_| panic!("listener bug"));
        let reached = Arc::new(AtomicBool::new(false));
        let flag = reached.clone();
        let _good = monitor.on_change(move |online| flag.store(!online, Ordering::SeqCst));

        monitor.report(false);
        assert!(reached.load(Ordering::SeqCst));
    }

    #[test]
    fn test_no_build_profile_aborts_on_panic() {
        // catch_unwind in Inner::apply is a no-op under panic = "abort"
        let manifest = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml"));
        let aborting: Vec<&str> = manifest
            .lines()
            .map(str::trim)
            .filter(|line| !line.starts_with('#'))
            .filter(|line| line.replace(' ', "") == "panic=\"abort\"")
            .collect();
        assert!(aborting.is_empty(), "found {:?} in Cargo.toml", aborting);
    }

    #[test]
    fn test_dropping_subscription_unregisters() {
        let monitor = ConnectivityMonitor::new(Arc::new(ManualProbe::new(true)));
        let sub = monitor.on_change(|_| {});
        assert_eq!(monitor.listener_count(), 1);
        sub.unsubscribe();
        assert_eq!(monitor.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_probe_failure_keeps_state() {
        let monitor = ConnectivityMonitor::new(Arc::new(FailingProbe));
        assert!(monitor.check_now().await);

        monitor.report(false);
        assert!(!monitor.check_now().await);
    }

    #[tokio::test]
    async fn test_check_now_applies_probe_reading() {
        let probe = Arc::new(ManualProbe::new(false));
        let monitor = ConnectivityMonitor::new(probe.clone());
        assert!(monitor.is_online());

        assert!(!monitor.check_now().await);
        probe.set(true);
        assert!(monitor.check_now().await);
    }

    #[tokio::test]
    async fn test_platform_events_are_followed() {
        let probe = Arc::new(ManualProbe::new(true));
        let monitor = ConnectivityMonitor::new(probe.clone());
        assert!(monitor.initialize().await);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _sub = monitor.on_change(move |online| {
            let _ = tx.send(online);
        });

        probe.set(false);
        assert_eq!(rx.recv().await, Some(false));
        assert!(!monitor.is_online());
    }

    #[tokio::test]
    async fn test_shutdown_clears_listeners() {
        let probe = Arc::new(ManualProbe::new(true));
        let monitor = ConnectivityMonitor::new(probe);
        monitor.initialize().await;
        let _sub = monitor.on_change(|_| {});

        monitor.shutdown();
        assert_eq!(monitor.listener_count(), 0);
    }
}
