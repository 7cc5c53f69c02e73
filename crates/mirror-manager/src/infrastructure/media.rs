//! Media subsystem used when no decoder stack is linked in.
//!
//! A real build plugs the demuxer's global init/teardown in through
//! [`MediaSubsystem`].  The headless binary and the tests use
//! [`HeadlessMedia`], which loads nothing and only tracks its state so that
//! the one-init-one-teardown contract stays observable.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use mirror_core::MediaSubsystem;
use tracing::{info, warn};

/// Counters shared between a [`HeadlessMedia`] and whoever inspects it.
#[derive(Debug, Default)]
pub struct MediaCounters {
    init: AtomicU32,
    de_init: AtomicU32,
}

impl MediaCounters {
    pub fn init_calls(&self) -> u32 {
        self.init.load(Ordering::SeqCst)
    }

    pub fn de_init_calls(&self) -> u32 {
        self.de_init.load(Ordering::SeqCst)
    }
}

/// A media subsystem with no decoder behind it.
#[derive(Debug, Default)]
pub struct HeadlessMedia {
    counters: Arc<MediaCounters>,
}

impl HeadlessMedia {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the call counters, valid after the media is moved into a
    /// manager.
    pub fn counters(&self) -> Arc<MediaCounters> {
        Arc::clone(&self.counters)
    }
}

impl MediaSubsystem for HeadlessMedia {
    fn init(&self) {
        if self.counters.init.fetch_add(1, Ordering::SeqCst) > 0 {
            warn!("media subsystem initialised more than once");
        }
        info!("media subsystem initialised (headless)");
    }

    fn de_init(&self) {
        if self.counters.init_calls() == 0 {
            warn!("media subsystem torn down before init");
        }
        self.counters.de_init.fetch_add(1, Ordering::SeqCst);
        info!("media subsystem torn down");
    }
}
