//! DeviceManager: the process-wide access point to the device registry.
//!
//! The manager owns two things:
//!
//! - the [`DeviceRegistry`], behind a `Mutex` so the process-wide instance can
//!   live in a `static`;
//! - the lifetime of the external [`MediaSubsystem`]: `init` runs when the
//!   manager is built, `de_init` when it is shut down.
//!
//! # One instance per process
//!
//! [`DeviceManager::get_or_init`] is the single accessor.  The first call
//! builds the manager (and therefore initialises the media subsystem); every
//! later call returns the same instance.  Statics are never dropped, so the
//! binary calls [`DeviceManager::shutdown`] before exiting.  Once shut down,
//! the manager stays shut down: resetting the media subsystem requires a
//! process restart.
//!
//! # Locking
//!
//! The registry is single-threaded by design.  The mutex only serialises
//! callers that share the static; it is held for the duration of one
//! operation, including a session's synchronous `connect` step.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use mirror_core::{DeviceEvent, DeviceParams, MediaSubsystem, Session, SessionFactory};
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::device_registry::{AttachError, DeviceHandle, DeviceRegistry, RegistryConfig};

static INSTANCE: OnceLock<DeviceManager> = OnceLock::new();

/// Registry plus media-subsystem lifetime.
pub struct DeviceManager {
    registry: Mutex<DeviceRegistry>,
    media: Box<dyn MediaSubsystem>,
    shut_down: AtomicBool,
}

impl DeviceManager {
    /// Builds a manager and initialises the media subsystem.
    pub fn new(
        config: RegistryConfig,
        media: Box<dyn MediaSubsystem>,
        factory: Box<dyn SessionFactory>,
    ) -> Self {
        media.init();
        info!(max_devices = config.max_devices, "device manager started");
        Self {
            registry: Mutex::new(DeviceRegistry::new(config, factory)),
            media,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Returns the process-wide manager, building it with `init` on first
    /// access.  Later calls never run `init`.
    pub fn get_or_init(init: impl FnOnce() -> DeviceManager) -> &'static DeviceManager {
        INSTANCE.get_or_init(init)
    }

    /// Returns the process-wide manager if it has been built.
    pub fn get() -> Option<&'static DeviceManager> {
        INSTANCE.get()
    }

    fn registry(&self) -> MutexGuard<'_, DeviceRegistry> {
        // A panic inside one operation must not brick the whole registry.
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    // ── Registry operations ──────────────────────────────────────────────────

    /// See [`DeviceRegistry::attach`].  Always `false` after shutdown.
    pub fn attach(&self, params: DeviceParams) -> bool {
        let mut registry = self.registry();
        if self.is_shut_down() {
            warn!("attach rejected: {}", AttachError::ShutDown);
            return false;
        }
        registry.attach(params)
    }

    /// See [`DeviceRegistry::try_attach`].
    ///
    /// # Errors
    ///
    /// [`AttachError::ShutDown`] after [`Self::shutdown`], otherwise whatever
    /// the registry reports.
    pub fn try_attach(&self, params: DeviceParams) -> Result<DeviceHandle, AttachError> {
        // The flag is only flipped under the registry lock, so checking it
        // with the guard held keeps attach and shutdown from interleaving.
        let mut registry = self.registry();
        if self.is_shut_down() {
            return Err(AttachError::ShutDown);
        }
        registry.try_attach(params)
    }

    pub fn detach(&self, serial: &str) -> bool {
        self.registry().detach(serial)
    }

    pub fn detach_all(&self) {
        self.registry().detach_all();
    }

    /// Snapshot of the device attached as `serial`, if any.
    pub fn lookup(&self, serial: &str) -> Option<DeviceHandle> {
        self.registry().handle(serial)
    }

    /// Runs `f` against the live session for `serial`, if any.
    ///
    /// The registry lock is held while `f` runs.
    pub fn with_session<R>(&self, serial: &str, f: impl FnOnce(&dyn Session) -> R) -> Option<R> {
        let registry = self.registry();
        registry.lookup(serial).map(|session| f(session))
    }

    pub fn device_count(&self) -> usize {
        self.registry().len()
    }

    pub fn serials(&self) -> Vec<String> {
        self.registry().serials()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.registry().subscribe()
    }

    /// See [`DeviceRegistry::process_events`].
    pub fn process_events(&self) -> usize {
        self.registry().process_events()
    }

    /// See [`DeviceRegistry::process_events_timeout`].
    ///
    /// Holds the registry lock while waiting; keep `timeout` short.
    pub fn process_events_timeout(&self, timeout: Duration) -> usize {
        self.registry().process_events_timeout(timeout)
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Detaches every device and tears down the media subsystem.
    ///
    /// Only the first call has any effect.
    pub fn shutdown(&self) {
        let mut registry = self.registry();
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        registry.detach_all();
        drop(registry);
        self.media.de_init();
        info!("device manager stopped");
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_core::{FrameSize, SessionEventSink};
    use mockall::{mock, Sequence};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    mock! {
        pub Media {}
        impl MediaSubsystem for Media {
            fn init(&self);
            fn de_init(&self);
        }
    }

    struct StubSession {
        params: DeviceParams,
    }

    impl Session for StubSession {
        fn connect(&mut self) -> bool {
            true
        }
        fn params(&self) -> &DeviceParams {
            &self.params
        }
    }

    /// A factory that keeps every sink so tests can play the session's role.
    fn stub_factory(sinks: Arc<Mutex<Vec<SessionEventSink>>>) -> Box<dyn SessionFactory> {
        Box::new(move |params: DeviceParams, events: SessionEventSink| -> Box<dyn Session> {
            sinks.lock().unwrap().push(events);
            Box::new(StubSession { params })
        })
    }

    fn media_expecting_one_lifecycle() -> MockMedia {
        let mut seq = Sequence::new();
        let mut media = MockMedia::new();
        media.expect_init().times(1).in_sequence(&mut seq).return_const(());
        media.expect_de_init().times(1).in_sequence(&mut seq).return_const(());
        media
    }

    fn make_manager() -> (DeviceManager, Arc<Mutex<Vec<SessionEventSink>>>) {
        let sinks = Arc::new(Mutex::new(Vec::new()));
        let manager = DeviceManager::new(
            RegistryConfig::default(),
            Box::new(media_expecting_one_lifecycle()),
            stub_factory(Arc::clone(&sinks)),
        );
        (manager, sinks)
    }

    #[test]
    fn test_media_init_and_de_init_run_once_in_order() {
        let (manager, _sinks) = make_manager();
        manager.shutdown();
        manager.shutdown();
        drop(manager);
        // MockMedia verifies `times(1)` for both calls when it is dropped.
    }

    #[test]
    fn test_drop_without_shutdown_de_inits_media() {
        let (manager, _sinks) = make_manager();
        drop(manager);
    }

    #[test]
    fn test_shutdown_detaches_all_devices() {
        let (manager, _sinks) = make_manager();
        assert!(manager.attach(DeviceParams::new("a")));
        assert!(manager.attach(DeviceParams::new("b")));
        manager.shutdown();
        assert_eq!(manager.device_count(), 0);
        assert!(manager.lookup("a").is_none());
    }

    #[test]
    fn test_attach_after_shutdown_fails() {
        let (manager, _sinks) = make_manager();
        manager.shutdown();
        assert!(!manager.attach(DeviceParams::new("a")));
        assert_eq!(
            manager.try_attach(DeviceParams::new("a")),
            Err(AttachError::ShutDown)
        );
    }

    #[test]
    fn test_lookup_returns_snapshot_of_attached_device() {
        let (manager, _sinks) = make_manager();
        let attached = manager.try_attach(DeviceParams::new("ABC123")).unwrap();
        let found = manager.lookup("ABC123").unwrap();
        assert_eq!(found, attached);
        assert_eq!(found.local_port, 46364);
    }

    #[test]
    fn test_with_session_exposes_live_session() {
        let (manager, _sinks) = make_manager();
        manager.attach(DeviceParams::new("ABC123"));
        let serial = manager.with_session("ABC123", |s| s.serial().to_string());
        assert_eq!(serial.as_deref(), Some("ABC123"));
        assert!(manager.with_session("missing", |_| ()).is_none());
    }

    #[test]
    fn test_detach_then_reattach() {
        let (manager, _sinks) = make_manager();
        assert!(manager.attach(DeviceParams::new("ABC123")));
        assert!(!manager.attach(DeviceParams::new("ABC123")));
        assert!(manager.detach("ABC123"));
        assert!(!manager.detach("ABC123"));
        assert!(manager.attach(DeviceParams::new("ABC123")));
    }

    struct CountedSession {
        params: DeviceParams,
        live: Arc<AtomicUsize>,
    }

    impl Session for CountedSession {
        fn connect(&mut self) -> bool {
            true
        }
        fn params(&self) -> &DeviceParams {
            &self.params
        }
    }

    impl Drop for CountedSession {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_concurrent_attach_never_outlives_shutdown() {
        let live = Arc::new(AtomicUsize::new(0));
        let factory_live = Arc::clone(&live);
        let factory = move |params: DeviceParams, _events: SessionEventSink| -> Box<dyn Session> {
            factory_live.fetch_add(1, Ordering::SeqCst);
            Box::new(CountedSession {
                params,
                live: Arc::clone(&factory_live),
            })
        };
        let manager = Arc::new(DeviceManager::new(
            RegistryConfig::default(),
            Box::new(media_expecting_one_lifecycle()),
            Box::new(factory),
        ));

        let attachers: Vec<_> = (0..4)
            .map(|t| {
                let manager = Arc::clone(&manager);
                std::thread::spawn(move || {
                    for i in 0.. {
                        match manager.try_attach(DeviceParams::new(format!("t{t}-{i}"))) {
                            Err(AttachError::ShutDown) => break,
                            Err(AttachError::CapacityExceeded { .. }) => {
                                manager.detach_all();
                            }
                            _ => {}
                        }
                    }
                })
            })
            .collect();

        std::thread::sleep(Duration::from_millis(20));
        manager.shutdown();
        let live_after_shutdown = live.load(Ordering::SeqCst);
        for attacher in attachers {
            attacher.join().unwrap();
        }

        assert_eq!(live_after_shutdown, 0, "shutdown must leave no session behind");
        assert_eq!(live.load(Ordering::SeqCst), 0);
        assert_eq!(manager.device_count(), 0);
    }

    #[tokio::test]
    async fn test_observer_receives_events_relayed_by_manager() {
        let (manager, sinks) = make_manager();
        let mut rx = manager.subscribe();
        manager.attach(DeviceParams::new("ABC123"));

        let sink = sinks.lock().unwrap().last().cloned().unwrap();
        sink.connected("Pixel 7", FrameSize::new(1080, 2400));
        sink.disconnected();
        assert_eq!(manager.process_events(), 2);

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, DeviceEvent::Connected { success: true, .. }));
        let second = rx.recv().await.unwrap();
        assert_eq!(
            second,
            DeviceEvent::Disconnected {
                serial: "ABC123".to_string()
            }
        );
        assert_eq!(manager.device_count(), 0);
    }
}
