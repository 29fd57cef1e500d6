//! Profile lifecycle: a profile directory holds the configuration, the
//! credential blob and the metadata store of one mount.
//!
//! `start` wires the whole core together: credentials, remote client,
//! store, cache, initial crawl, and the background workers. It hands back
//! the operations object for the kernel bridge, the configured mountpoint
//! and the worker join handles; raising the stop flag winds the workers
//! down at their next tick.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{info, warn};

use crate::cache::CacheManager;
use crate::client::{Credentials, DriveApi, HttpDriveClient};
use crate::config::Config;
use crate::context::Context;
use crate::fs::DriveFilesystem;
use crate::queue::QueueWorker;
use crate::statfs::{self, StatfsUpdater};
use crate::store::Store;
use crate::sync;
use crate::types::{Error, FsResult};

pub const CONFIG_FILE: &str = "config.toml";
pub const CREDENTIALS_FILE: &str = "credentials.json";
pub const DATABASE_FILE: &str = "data.db";

pub struct Profile {
    pub profile_dir: PathBuf,
    pub cache_dir: PathBuf,
}

impl Profile {
    pub fn new(profile_dir: PathBuf, cache_dir: PathBuf) -> Self {
        Profile {
            profile_dir,
            cache_dir,
        }
    }

    /// Creates the profile on disk from an already-authorized credential
    /// blob (the interactive consent flow lives outside this crate).
    pub fn create(&self, credentials_json: &str) -> FsResult<()> {
        Credentials::from_json(credentials_json)?;
        fs::create_dir_all(&self.profile_dir)?;
        fs::create_dir_all(&self.cache_dir)?;
        fs::write(
            self.profile_dir.join(CREDENTIALS_FILE),
            credentials_json,
        )?;

        let config_path = self.profile_dir.join(CONFIG_FILE);
        if !config_path.exists() {
            Config::default().save(&config_path)?;
        }
        info!("profile created at '{}'", self.profile_dir.display());
        Ok(())
    }

    pub fn remove(&self) -> FsResult<()> {
        for dir in [&self.profile_dir, &self.cache_dir] {
            match fs::remove_dir_all(dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn load_config(&self) -> FsResult<Config> {
        let path = self.profile_dir.join(CONFIG_FILE);
        if path.exists() {
            Config::load(&path)
        } else {
            Ok(Config::default())
        }
    }

    /// Starts the profile with the production HTTP client.
    pub fn start(
        &self,
        stop: Arc<AtomicBool>,
    ) -> FsResult<(DriveFilesystem, PathBuf, Vec<JoinHandle<()>>)> {
        let raw = fs::read_to_string(self.profile_dir.join(CREDENTIALS_FILE))
            .map_err(|_| Error::AuthFailed("no credentials found, invalid profile".into()))?;
        let credentials = Credentials::from_json(&raw)?;
        let client: Arc<dyn DriveApi> = Arc::new(HttpDriveClient::new(credentials));
        self.start_with_client(client, stop)
    }

    /// Starts the profile against any [`DriveApi`] implementation. This is
    /// the seam deployments (and the tests) substitute their own remote
    /// through.
    pub fn start_with_client(
        &self,
        client: Arc<dyn DriveApi>,
        stop: Arc<AtomicBool>,
    ) -> FsResult<(DriveFilesystem, PathBuf, Vec<JoinHandle<()>>)> {
        let config = self.load_config()?;
        fs::create_dir_all(&self.profile_dir)?;

        let store = Store::open(&self.profile_dir.join(DATABASE_FILE))?;
        let cache = CacheManager::new(self.cache_dir.clone())?;
        let ctx = Context::new(config.mount.clone(), client, store, cache)?;

        info!("initiating filesystem");
        statfs::refresh(&ctx)?;
        sync::recursive_list_root(&ctx)?;
        match ctx.cache.validate_all() {
            Ok(0) => {}
            Ok(evicted) => info!("evicted {} invalid cache entries", evicted),
            Err(e) => warn!("cache validation failed: {}", e),
        }
        info!("filesystem initiated successfully");

        let queue_worker = QueueWorker::new(Arc::clone(&ctx));
        let queue_stop = Arc::clone(&stop);
        let statfs_updater = StatfsUpdater::new(Arc::clone(&ctx));
        let statfs_stop = Arc::clone(&stop);

        let workers = vec![
            std::thread::Builder::new()
                .name("gdrivefs-queue".into())
                .spawn(move || queue_worker.run(&queue_stop))?,
            std::thread::Builder::new()
                .name("gdrivefs-statfs".into())
                .spawn(move || statfs_updater.run(&statfs_stop))?,
        ];

        let mountpoint = config.mount.mountpoint.clone();
        Ok((DriveFilesystem::new(ctx), mountpoint, workers))
    }
}
