//! The VFS-facing operations facade.
//!
//! [`DriveFilesystem`] holds the mount context and expresses every kernel
//! operation as a method returning [`FsResult`]; the `fuser` glue in
//! `driver` converts errors to errnos at the boundary. The facade is
//! read-mostly: file contents come from the cache, directory mutations go
//! to the remote (inline, or via the request queue for `mkdir`), and
//! content writes are rejected outright.
//!
//! In trash-view mounts every lookup targets the `bin` table and the
//! delete operations invert: `rmdir`/`unlink` restore instead of trash.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use fuser::{FileAttr, FileType};
use log::{debug, info};

use crate::cache::CacheEntry;
use crate::context::Context;
use crate::queue;
use crate::statfs::StatvfsData;
use crate::types::{
    export_mime, join_path, DriveFileRow, Error, FileRow, FsResult, Inode, ROOT_ID,
};
use crate::config::GoogleAppMode;

/// Names that never surface in listings and are rejected on lookup; the
/// desktop environment probes for these on every mount.
pub const IGNORED_NAMES: [&str; 8] = [
    ".Trash",
    ".Trash-1000",
    "BDMV",
    ".xdg-volume-info",
    "autorun.inf",
    ".hidden",
    ".comments",
    ".directory",
];

/// One `readdir` entry, already carrying its stable inode.
#[derive(Debug, Clone, PartialEq)]
pub struct DirEntry {
    pub inode: Inode,
    pub kind: FileType,
    pub name: String,
}

#[derive(Debug)]
pub struct DriveFilesystem {
    ctx: Arc<Context>,
    uid: u32,
    gid: u32,
}

fn try_ignore(name: &str) -> FsResult<()> {
    if IGNORED_NAMES.contains(&name) {
        return Err(Error::Ignored(name.to_string()));
    }
    Ok(())
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl DriveFilesystem {
    pub fn new(ctx: Arc<Context>) -> Self {
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        DriveFilesystem { ctx, uid, gid }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    fn bin(&self) -> bool {
        self.ctx.bin()
    }

    fn row(&self, inode: Inode) -> FsResult<(Inode, FileRow)> {
        self.ctx
            .store
            .file_by_inode(inode, self.bin())?
            .ok_or_else(|| Error::not_found(format!("inode {}", inode)))
    }

    fn child(&self, parent: &FileRow, name: &str) -> FsResult<Option<(Inode, FileRow)>> {
        self.ctx
            .store
            .file_by_path(&join_path(&parent.path, name), self.bin())
    }

    fn attr(&self, inode: Inode, row: &FileRow) -> FileAttr {
        row.attr(inode, self.uid, self.gid)
    }

    /// Ingests a fresh server-side object and returns its materialized row.
    fn ingest(&self, object: &crate::types::DriveObject) -> FsResult<(Inode, FileRow)> {
        let row = DriveFileRow::from_object(object, &self.ctx.root_id);
        self.ctx.store.put_drive_file(&row)?;
        self.ctx.store.materialize(&row)
    }

    /// Where a row's content lives in the cache, and how to fetch it.
    fn cache_entry(&self, row: &FileRow) -> FsResult<CacheEntry> {
        if row.is_google_app() {
            return match self.ctx.app_mode() {
                GoogleAppMode::Ignore => Err(Error::Ignored(row.basename.clone())),
                GoogleAppMode::Web | GoogleAppMode::Desktop => {
                    Err(Error::Unsupported("virtual-app document has no byte stream"))
                }
                GoogleAppMode::Convert => {
                    let mime = export_mime(&row.mime_type)
                        .ok_or(Error::Unsupported("document type has no export conversion"))?;
                    Ok(CacheEntry::for_export(row, mime))
                }
            };
        }

        let id = row
            .id
            .as_deref()
            .ok_or_else(|| Error::Pending(row.path.clone()))?;
        let mirror = self
            .ctx
            .store
            .get_drive_file(id)?
            .ok_or_else(|| Error::not_found(format!("mirror row '{}'", id)))?;
        let md5 = mirror
            .md5
            .ok_or(Error::Unsupported("object has no content digest"))?;
        Ok(CacheEntry::for_file(row, &md5))
    }

    // ----------------------------------------------------------------
    // Lookup and attributes

    pub fn lookup(&self, parent_inode: Inode, name: &str) -> FsResult<FileAttr> {
        try_ignore(name)?;
        let (_, parent) = self.row(parent_inode)?;
        let (inode, row) = self
            .child(&parent, name)?
            .ok_or_else(|| Error::not_found(format!("(inode {})/'{}'", parent_inode, name)))?;
        if row.is_google_app() && self.ctx.app_mode() == GoogleAppMode::Ignore {
            return Err(Error::Ignored(name.to_string()));
        }
        Ok(self.attr(inode, &row))
    }

    pub fn getattr(&self, inode: Inode) -> FsResult<FileAttr> {
        let (inode, row) = self.row(inode)?;
        try_ignore(&row.basename)?;
        Ok(self.attr(inode, &row))
    }

    pub fn readlink(&self, inode: Inode) -> FsResult<Vec<u8>> {
        let (_, row) = self.row(inode)?;

        // A dangling shortcut resolves to its own path, a self-loop the
        // caller can detect.
        let local_path = row
            .target_id
            .as_deref()
            .and_then(|target_id| {
                self.ctx
                    .store
                    .file_by_id(target_id, self.bin())
                    .ok()
                    .flatten()
            })
            .map(|(_, target)| target.path)
            .unwrap_or_else(|| row.path.clone());

        let absolute = self
            .ctx
            .mount
            .mountpoint
            .join(local_path.trim_start_matches('/'));
        Ok(absolute.as_os_str().as_encoded_bytes().to_vec())
    }

    // ----------------------------------------------------------------
    // Directories

    pub fn opendir(&self, inode: Inode) -> FsResult<u64> {
        let (inode, _) = self.row(inode)?;
        Ok(inode)
    }

    /// All children of `inode`, inode-ascending. The kernel resumes
    /// listing by the last offset it saw, and our offsets are the inodes
    /// themselves, so the order is part of the contract.
    pub fn readdir_entries(&self, inode: Inode) -> FsResult<Vec<DirEntry>> {
        let (_, dir_row) = self.row(inode)?;
        let hide_apps = self.ctx.app_mode() == GoogleAppMode::Ignore;

        let children = self.ctx.store.children_of(&dir_row.path, self.bin())?;
        Ok(children
            .into_iter()
            .filter(|(_, row)| !IGNORED_NAMES.contains(&row.basename.as_str()))
            .filter(|(_, row)| !(hide_apps && row.is_google_app()))
            .map(|(inode, row)| DirEntry {
                inode,
                kind: row.file_type(),
                name: row.basename,
            })
            .collect())
    }

    pub fn mkdir(&self, parent_inode: Inode, name: &str) -> FsResult<FileAttr> {
        if self.bin() {
            return Err(Error::Unsupported("mkdir in trash view"));
        }
        try_ignore(name)?;
        let (_, parent) = self.row(parent_inode)?;
        if self.child(&parent, name)?.is_some() {
            return Err(Error::AlreadyExists(join_path(&parent.path, name)));
        }

        info!("mkdir (inode {})/'{}'", parent_inode, name);
        queue::enqueue_mkdir(&self.ctx, &parent.path, name)?;
        let (inode, row) = self
            .ctx
            .store
            .insert_placeholder(&parent, name, true, now_epoch(), false)?;
        Ok(self.attr(inode, &row))
    }

    /// Shared by `rmdir` and `unlink`: soft-delete in a live mount,
    /// restore in a trash-view mount, and in both cases drop the row.
    pub fn remove(&self, parent_inode: Inode, name: &str) -> FsResult<()> {
        let (_, parent) = self.row(parent_inode)?;
        let (_, child) = self
            .child(&parent, name)?
            .ok_or_else(|| Error::not_found(format!("(inode {})/'{}'", parent_inode, name)))?;

        info!("remove '{}'", child.path);
        match &child.id {
            None => {
                // Unreconciled placeholder: cancel the queued mkdir, no
                // remote call to make.
                self.ctx
                    .store
                    .delete_file_by_path(&child.path, self.bin())?;
                queue::cancel_mkdir(&self.ctx, &child.dirname, &child.basename)?;
            }
            Some(id) => {
                if self.bin() {
                    self.ctx.client.untrash(id)?;
                } else {
                    self.ctx.client.trash(id)?;
                }
                self.ctx
                    .store
                    .delete_file_by_path(&child.path, self.bin())?;
            }
        }
        Ok(())
    }

    pub fn rename(
        &self,
        parent_inode: Inode,
        name: &str,
        new_parent_inode: Inode,
        new_name: &str,
    ) -> FsResult<()> {
        let (_, old_parent) = self.row(parent_inode)?;
        let (_, new_parent) = self.row(new_parent_inode)?;

        let (_, child) = self
            .child(&old_parent, name)?
            .ok_or_else(|| Error::not_found(format!("(inode {})/'{}'", parent_inode, name)))?;
        if self.child(&new_parent, new_name)?.is_some() {
            return Err(Error::AlreadyExists(join_path(&new_parent.path, new_name)));
        }
        let child_id = child
            .id
            .as_deref()
            .ok_or_else(|| Error::Pending(child.path.clone()))?;

        info!(
            "rename '{}' -> (inode {})/'{}'",
            child.path, new_parent_inode, new_name
        );
        let object = if parent_inode == new_parent_inode {
            self.ctx.client.rename(child_id, new_name)?
        } else {
            let new_parent_id = new_parent
                .id
                .as_deref()
                .ok_or_else(|| Error::Pending(new_parent.path.clone()))?;
            let old_parent_id = child.parent_id.as_deref().unwrap_or(ROOT_ID);
            self.ctx
                .client
                .relocate(child_id, old_parent_id, new_parent_id)?
        };
        self.ingest(&object)?;
        Ok(())
    }

    pub fn symlink(
        &self,
        parent_inode: Inode,
        name: &str,
        target: &Path,
    ) -> FsResult<FileAttr> {
        if self.bin() {
            return Err(Error::Unsupported("symlink in trash view"));
        }
        try_ignore(name)?;
        if !target.is_absolute() {
            return Err(Error::not_found(format!(
                "relative symlink target '{}'",
                target.display()
            )));
        }

        // Only targets inside the mountpoint can be expressed as remote
        // shortcuts.
        let relative = target
            .strip_prefix(&self.ctx.mount.mountpoint)
            .map_err(|_| Error::CrossDevice(target.display().to_string()))?;
        let local_path = if relative.as_os_str().is_empty() {
            "/".to_string()
        } else {
            format!("/{}", relative.display())
        };

        let (_, parent) = self.row(parent_inode)?;
        let (_, target_row) = self
            .ctx
            .store
            .file_by_path(&local_path, self.bin())?
            .ok_or_else(|| Error::not_found(format!("symlink target '{}'", local_path)))?;
        let target_id = target_row
            .id
            .as_deref()
            .ok_or_else(|| Error::Pending(local_path.clone()))?;
        if self.child(&parent, name)?.is_some() {
            return Err(Error::AlreadyExists(join_path(&parent.path, name)));
        }

        info!("symlink (inode {})/'{}' -> '{}'", parent_inode, name, local_path);
        let parent_id = parent
            .id
            .as_deref()
            .ok_or_else(|| Error::Pending(parent.path.clone()))?;
        let object = self.ctx.client.create_shortcut(parent_id, name, target_id)?;
        let (inode, row) = self.ingest(&object)?;
        Ok(self.attr(inode, &row))
    }

    // ----------------------------------------------------------------
    // File content

    /// Opens for reading, filling the cache on a miss. The returned handle
    /// is the inode itself; handles carry no other state.
    pub fn open(&self, inode: Inode, flags: i32) -> FsResult<u64> {
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            return Err(Error::ReadOnly("open for writing"));
        }
        let (inode, row) = self.row(inode)?;
        if row.is_dir {
            return Err(Error::Unsupported("open on a directory"));
        }

        debug!("open '{}'", row.path);
        let entry = self.cache_entry(&row)?;
        self.ctx
            .cache
            .ensure_cached(self.ctx.client.as_ref(), &entry)?;
        Ok(inode)
    }

    pub fn read(&self, inode: Inode, offset: i64, size: u32) -> FsResult<Vec<u8>> {
        if offset < 0 {
            return Err(Error::Io(std::io::Error::from_raw_os_error(libc::EINVAL)));
        }
        let (_, row) = self.row(inode)?;
        let entry = self.cache_entry(&row)?;
        self.ctx.cache.read_at(&entry.key, offset as u64, size)
    }

    pub fn statfs(&self) -> StatvfsData {
        *self.ctx.statfs.lock().unwrap()
    }
}
