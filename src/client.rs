//! The remote drive client.
//!
//! [`DriveApi`] is the session-oriented interface the core consumes; the
//! production implementation is [`http::HttpDriveClient`]. Keeping the
//! surface behind a trait lets deployments substitute their own transport
//! and lets the tests run against an in-memory drive.

use std::io::Write;

use serde::Deserialize;

use crate::types::{DriveObject, FsResult};

pub mod http;

pub use http::{Credentials, HttpDriveClient};

/// Storage quota snapshot from the `about` endpoint. `limit` is absent for
/// unlimited plans.
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageQuota {
    pub limit: Option<u64>,
    pub usage: u64,
}

/// One entry of the changes feed: either a new object version or a removal.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    pub file_id: String,
    #[serde(default)]
    pub removed: bool,
    pub file: Option<DriveObject>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChangeList {
    #[serde(default)]
    pub changes: Vec<Change>,
    pub next_page_token: Option<String>,
    pub new_start_page_token: Option<String>,
}

/// Per-worker session to the remote drive API.
///
/// Implementations retry transient failures internally (bounded) and are
/// safe to call from multiple threads. Every mutation returns the fresh
/// server-side object so the caller can ingest it without a second fetch.
pub trait DriveApi: Send + Sync {
    /// Resolves the remote's real id for the drive root.
    fn root_id(&self) -> FsResult<String>;

    fn get_by_id(&self, id: &str) -> FsResult<DriveObject>;

    /// One page of a list query; pass the returned token to continue.
    fn list(
        &self,
        query: &str,
        page_token: Option<&str>,
    ) -> FsResult<(Vec<DriveObject>, Option<String>)>;

    fn start_page_token(&self) -> FsResult<String>;

    fn changes(&self, page_token: &str) -> FsResult<ChangeList>;

    fn create_folder(&self, parent_id: &str, name: &str) -> FsResult<DriveObject>;

    fn create_shortcut(
        &self,
        parent_id: &str,
        name: &str,
        target_id: &str,
    ) -> FsResult<DriveObject>;

    fn rename(&self, id: &str, new_name: &str) -> FsResult<DriveObject>;

    fn relocate(
        &self,
        id: &str,
        old_parent_id: &str,
        new_parent_id: &str,
    ) -> FsResult<DriveObject>;

    /// Soft delete.
    fn trash(&self, id: &str) -> FsResult<()>;

    /// Restore from the trash dimension.
    fn untrash(&self, id: &str) -> FsResult<()>;

    /// Streams the object's bytes (or its export conversion when
    /// `export_mime` is given) into `out`, returning the byte count.
    fn download(
        &self,
        id: &str,
        export_mime: Option<&str>,
        out: &mut dyn Write,
    ) -> FsResult<u64>;

    fn about(&self) -> FsResult<StorageQuota>;
}
