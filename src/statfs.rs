//! Storage-quota snapshot backing `statfs`.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error};

use crate::context::{interruptible_sleep, Context};
use crate::types::FsResult;

/// Drives with no quota limit report a fixed large total so `df` output
/// stays finite.
const UNLIMITED_QUOTA_BYTES: u64 = 16 << 40;

const REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// The answer to `statfs`, in 512-byte block units. Inode counts report
/// zero; the remote has no such notion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatvfsData {
    pub f_bsize: u32,
    pub f_frsize: u32,
    pub f_blocks: u64,
    pub f_bfree: u64,
    pub f_bavail: u64,
    pub f_files: u64,
    pub f_ffree: u64,
    pub f_favail: u64,
    pub f_namemax: u32,
}

impl Default for StatvfsData {
    fn default() -> Self {
        StatvfsData {
            f_bsize: 512,
            f_frsize: 512,
            f_blocks: 0,
            f_bfree: 0,
            f_bavail: 0,
            f_files: 0,
            f_ffree: 0,
            f_favail: 0,
            f_namemax: 32767,
        }
    }
}

/// Queries the remote quota and replaces the snapshot.
pub fn refresh(ctx: &Context) -> FsResult<()> {
    let quota = ctx.client.about()?;
    let total = quota.limit.unwrap_or(UNLIMITED_QUOTA_BYTES);
    let free = total.saturating_sub(quota.usage);

    let snapshot = StatvfsData {
        f_blocks: total / 512,
        f_bfree: free / 512,
        f_bavail: free / 512,
        ..StatvfsData::default()
    };
    debug!(
        "statfs refreshed: {} blocks total, {} free",
        snapshot.f_blocks, snapshot.f_bfree
    );
    *ctx.statfs.lock().unwrap() = snapshot;
    Ok(())
}

/// Periodic refresh loop; errors are logged and the stale snapshot keeps
/// serving until the next tick.
pub struct StatfsUpdater {
    ctx: Arc<Context>,
    interval: Duration,
}

impl StatfsUpdater {
    pub fn new(ctx: Arc<Context>) -> Self {
        StatfsUpdater {
            ctx,
            interval: REFRESH_INTERVAL,
        }
    }

    #[cfg(test)]
    fn with_interval(ctx: Arc<Context>, interval: Duration) -> Self {
        StatfsUpdater { ctx, interval }
    }

    pub fn run(&self, stop: &AtomicBool) {
        loop {
            interruptible_sleep(stop, self.interval);
            if stop.load(std::sync::atomic::Ordering::Relaxed) {
                return;
            }
            if let Err(e) = refresh(&self.ctx) {
                error!("statfs refresh failed: {}", e);
            }
        }
    }
}
