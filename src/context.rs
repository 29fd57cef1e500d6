//! Shared mount state.
//!
//! One [`Context`] is built per mount and threaded through the facade and
//! the background workers; it replaces any notion of process-global
//! mutable state (root id, cached service handles).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::cache::CacheManager;
use crate::client::DriveApi;
use crate::config::{GoogleAppMode, MountConfig};
use crate::statfs::StatvfsData;
use crate::store::Store;
use crate::types::FsResult;

pub struct Context {
    pub mount: MountConfig,
    pub client: Arc<dyn DriveApi>,
    pub store: Store,
    pub cache: CacheManager,
    /// The remote's real root id, fetched once at startup; ingestion
    /// normalizes it to the local sentinel.
    pub root_id: String,
    /// Quota snapshot served to `statfs`, refreshed by the updater.
    pub statfs: Mutex<StatvfsData>,
    /// Changes-feed cursor recorded by the initial crawl.
    pub changes_token: Mutex<Option<String>>,
}

impl Context {
    pub fn new(
        mount: MountConfig,
        client: Arc<dyn DriveApi>,
        store: Store,
        cache: CacheManager,
    ) -> FsResult<Arc<Self>> {
        let root_id = client.root_id()?;
        Ok(Arc::new(Context {
            mount,
            client,
            store,
            cache,
            root_id,
            statfs: Mutex::new(StatvfsData::default()),
            changes_token: Mutex::new(None),
        }))
    }

    /// Whether this mount shows the trash dimension.
    pub fn bin(&self) -> bool {
        self.mount.trash
    }

    pub fn app_mode(&self) -> GoogleAppMode {
        self.mount.google_app_mode
    }
}

/// Sleeps for `duration` but returns early once `stop` is raised, so
/// worker loops notice teardown within tens of milliseconds.
pub(crate) fn interruptible_sleep(stop: &AtomicBool, duration: Duration) {
    let deadline = Instant::now() + duration;
    loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(50)));
    }
}
