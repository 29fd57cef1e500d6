//! Metadata rows: the mirror of remote objects and the materialized tree.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{FileAttr, FileType};

use super::object::{timestamp_or_zero, DriveObject, ObjectKind, ROOT_ID};

/// The kernel names open objects by the row identifier of the backing
/// metadata row; the root is the well-known fuser value (1).
pub type Inode = u64;
pub const ROOT_INODE: Inode = fuser::FUSE_ROOT_ID;

/// An immutable-per-version snapshot of a remote entry, as stored in the
/// `drive_files` mirror table.
#[derive(Debug, Clone, PartialEq)]
pub struct DriveFileRow {
    pub id: String,
    pub parent_id: Option<String>,
    pub name: String,
    pub file_size: u64,
    pub atime: i64,
    pub ctime: i64,
    pub mtime: i64,
    pub mime_type: String,
    pub target_id: Option<String>,
    pub trashed: bool,
    pub md5: Option<String>,
}

impl DriveFileRow {
    /// Converts a wire object into a mirror row, normalizing the remote's
    /// real root id to [`ROOT_ID`] in both id positions.
    pub fn from_object(obj: &DriveObject, real_root_id: &str) -> Self {
        let normalize = |id: &str| {
            if id == real_root_id || id == ROOT_ID {
                ROOT_ID.to_string()
            } else {
                id.to_string()
            }
        };

        DriveFileRow {
            id: normalize(&obj.id),
            parent_id: obj.parents.first().map(|p| normalize(p)),
            name: if obj.id == real_root_id || obj.id == ROOT_ID {
                "/".to_string()
            } else {
                obj.name.clone()
            },
            file_size: obj
                .size
                .as_deref()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            atime: timestamp_or_zero(obj.viewed_by_me_time.as_deref()),
            ctime: timestamp_or_zero(obj.created_time.as_deref()),
            mtime: timestamp_or_zero(obj.modified_time.as_deref()),
            mime_type: obj.mime_type.clone(),
            target_id: obj.shortcut_details.as_ref().map(|s| s.target_id.clone()),
            trashed: obj.trashed,
            md5: obj.md5_checksum.clone(),
        }
    }

    pub fn kind(&self) -> ObjectKind {
        ObjectKind::from_mime(&self.mime_type)
    }

    pub fn is_folder(&self) -> bool {
        self.kind() == ObjectKind::Folder
    }
}

/// One name in the live (`files`) or trashed (`bin`) tree.
///
/// `id` is `None` while the row is a placeholder awaiting the server
/// assigned identity; see the request queue worker.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRow {
    pub id: Option<String>,
    pub parent_id: Option<String>,
    pub dirname: String,
    pub basename: String,
    pub path: String,
    pub file_size: u64,
    pub atime: i64,
    pub ctime: i64,
    pub mtime: i64,
    pub mime_type: String,
    pub is_dir: bool,
    pub is_link: bool,
    pub target_id: Option<String>,
    pub target_path: Option<String>,
}

impl FileRow {
    pub fn kind(&self) -> ObjectKind {
        ObjectKind::from_mime(&self.mime_type)
    }

    pub fn is_google_app(&self) -> bool {
        self.kind() == ObjectKind::GoogleApp
    }

    pub fn file_type(&self) -> FileType {
        if self.is_dir {
            FileType::Directory
        } else if self.is_link {
            FileType::Symlink
        } else {
            FileType::RegularFile
        }
    }

    /// Builds the kernel attribute record for this row.
    ///
    /// Directories and links report the conventional fixed sizes; regular
    /// files report the mirrored byte size. Ownership is pinned to the
    /// mounting user.
    pub fn attr(&self, inode: Inode, uid: u32, gid: u32) -> FileAttr {
        let (kind, perm, size) = if self.is_dir {
            (FileType::Directory, 0o755, 0)
        } else if self.is_link {
            (FileType::Symlink, 0o777, 40)
        } else {
            (FileType::RegularFile, 0o644, self.file_size)
        };

        FileAttr {
            ino: inode,
            size,
            blocks: size.div_ceil(512),
            atime: epoch(self.atime),
            mtime: epoch(self.mtime),
            ctime: epoch(self.mtime),
            crtime: epoch(self.ctime),
            kind,
            perm,
            nlink: 1,
            uid,
            gid,
            rdev: 0,
            blksize: 512,
            flags: 0,
        }
    }
}

fn epoch(secs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH
    }
}

/// Composes a row path from its parent's path and its basename.
/// The root is the only row with an empty basename and path `/`.
pub fn join_path(dirname: &str, basename: &str) -> String {
    if dirname == "/" {
        format!("/{}", basename)
    } else {
        format!("{}/{}", dirname, basename)
    }
}

/// Splits a path into `(dirname, basename)`, the inverse of [`join_path`].
pub fn split_path(path: &str) -> (String, String) {
    if path == "/" {
        return ("/".to_string(), String::new());
    }
    match path.rsplit_once('/') {
        Some(("", basename)) => ("/".to_string(), basename.to_string()),
        Some((dirname, basename)) => (dirname.to_string(), basename.to_string()),
        None => ("/".to_string(), path.to_string()),
    }
}
