//! A userspace filesystem exposing a Google Drive as a local directory
//! tree.
//!
//! The crate translates kernel VFS operations into a combination of local
//! metadata lookups, content-cache reads and remote API calls:
//!
//! - [`store`] keeps an embedded SQLite index shadowing the remote
//!   namespace, with the SQLite rowid doubling as the kernel inode;
//! - [`sync`] crawls the flat id-parented remote listing into a strict
//!   hierarchical tree;
//! - [`cache`] holds downloaded content keyed by MD5, validated on write
//!   and on demand;
//! - [`queue`] defers mutating operations onto a single worker that
//!   reconciles optimistic placeholder rows with server-assigned ids;
//! - [`fs`] is the operations facade the kernel bridge drives, with the
//!   `fuser` glue in `driver`.
//!
//! # Usage
//!
//! ```rust, no_run
//! use std::path::PathBuf;
//! use std::sync::atomic::AtomicBool;
//! use std::sync::Arc;
//!
//! use gdrivefs::Profile;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let profile = Profile::new(
//!         PathBuf::from("/home/user/.config/gdrivefs/default"),
//!         PathBuf::from("/home/user/.cache/gdrivefs/default"),
//!     );
//!     let stop = Arc::new(AtomicBool::new(false));
//!     let (ops, mountpoint, workers) = profile.start(Arc::clone(&stop))?;
//!
//!     gdrivefs::mount(ops, &mountpoint, &[])?;
//!
//!     stop.store(true, std::sync::atomic::Ordering::Relaxed);
//!     for worker in workers {
//!         let _ = worker.join();
//!     }
//!     Ok(())
//! }
//! ```

mod driver;

pub mod cache;
pub mod client;
pub mod config;
pub mod context;
pub mod fs;
pub mod profile;
pub mod queue;
pub mod statfs;
pub mod store;
pub mod sync;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{Credentials, DriveApi, HttpDriveClient};
pub use config::{Config, GoogleAppMode};
pub use fs::DriveFilesystem;
pub use profile::Profile;
pub use types::{Error, FsResult};

use std::io;
use std::path::Path;

pub use fuser::{BackgroundSession, MountOption};

/// Wires up `env_logger` for hosts that do not bring their own `log`
/// backend. Controlled by the `logging` feature.
#[cfg(feature = "logging")]
pub fn init_logging() {
    let _ = env_logger::builder().format_timestamp_secs().try_init();
}

/// Mounts the filesystem and blocks until it is unmounted.
pub fn mount(
    filesystem: DriveFilesystem,
    mountpoint: &Path,
    options: &[MountOption],
) -> io::Result<()> {
    fuser::mount2(filesystem, mountpoint, options)
}

/// Mounts the filesystem on a background session; dropping the session
/// unmounts it.
pub fn spawn_mount(
    filesystem: DriveFilesystem,
    mountpoint: &Path,
    options: &[MountOption],
) -> io::Result<BackgroundSession> {
    fuser::spawn_mount2(filesystem, mountpoint, options)
}
