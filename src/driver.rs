//! `fuser::Filesystem` glue for [`DriveFilesystem`].
//!
//! Each callback forwards to the facade method, converts an `Err` into the
//! mapped errno and logs it at a severity matching its kind; nothing else
//! lives here. Offsets handed to the kernel from `readdir` are the entry
//! inodes themselves: entries are emitted inode-ascending, so resuming at
//! "entries with inode greater than the last offset" is exact.

use std::ffi::OsStr;
use std::path::Path;
use std::time::{Duration, SystemTime};

use fuser::{
    Filesystem, KernelConfig, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyStatfs, Request, TimeOrNow,
};
use log::{debug, error, warn};

use crate::fs::DriveFilesystem;
use crate::types::Error;

const TTL: Duration = Duration::from_secs(1);

fn log_error(op: &str, err: &Error) {
    match err {
        Error::NotFound(_) | Error::Ignored(_) => debug!("[{}] {}", op, err),
        Error::Unreachable(_) | Error::AuthFailed(_) | Error::Integrity(_) => {
            error!("[{}] {}", op, err)
        }
        _ => warn!("[{}] {}", op, err),
    }
}

/// Non-UTF-8 names cannot exist remotely, so they resolve to nothing.
fn name_str<'a>(op: &str, name: &'a OsStr) -> Result<&'a str, Error> {
    name.to_str()
        .ok_or_else(|| Error::not_found(format!("[{}] non-utf8 name", op)))
}

impl Filesystem for DriveFilesystem {
    fn init(&mut self, _req: &Request, _config: &mut KernelConfig) -> Result<(), libc::c_int> {
        Ok(())
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let result =
            name_str("lookup", name).and_then(|name| DriveFilesystem::lookup(self, parent, name));
        match result {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => {
                log_error("lookup", &e);
                reply.error(e.errno());
            }
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match DriveFilesystem::getattr(self, ino) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => {
                log_error("getattr", &e);
                reply.error(e.errno());
            }
        }
    }

    fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
        match DriveFilesystem::readlink(self, ino) {
            Ok(target) => reply.data(&target),
            Err(e) => {
                log_error("readlink", &e);
                reply.error(e.errno());
            }
        }
    }

    fn opendir(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        match DriveFilesystem::opendir(self, ino) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => {
                log_error("opendir", &e);
                reply.error(e.errno());
            }
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let entries = match self.readdir_entries(ino) {
            Ok(entries) => entries,
            Err(e) => {
                log_error("readdir", &e);
                reply.error(e.errno());
                return;
            }
        };

        for entry in entries {
            if (entry.inode as i64) <= offset {
                continue;
            }
            if reply.add(entry.inode, entry.inode as i64, entry.kind, &entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request, _ino: u64, _fh: u64, _flags: i32, reply: ReplyEmpty) {
        reply.ok();
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let result =
            name_str("mkdir", name).and_then(|name| DriveFilesystem::mkdir(self, parent, name));
        match result {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => {
                log_error("mkdir", &e);
                reply.error(e.errno());
            }
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let result = name_str("rmdir", name).and_then(|name| self.remove(parent, name));
        match result {
            Ok(()) => reply.ok(),
            Err(e) => {
                log_error("rmdir", &e);
                reply.error(e.errno());
            }
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let result = name_str("unlink", name).and_then(|name| self.remove(parent, name));
        match result {
            Ok(()) => reply.ok(),
            Err(e) => {
                log_error("unlink", &e);
                reply.error(e.errno());
            }
        }
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let result = name_str("rename", name).and_then(|name| {
            name_str("rename", newname).and_then(|newname| {
                DriveFilesystem::rename(self, parent, name, newparent, newname)
            })
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => {
                log_error("rename", &e);
                reply.error(e.errno());
            }
        }
    }

    fn symlink(
        &mut self,
        _req: &Request,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        let result = name_str("symlink", link_name)
            .and_then(|name| DriveFilesystem::symlink(self, parent, name, target));
        match result {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => {
                log_error("symlink", &e);
                reply.error(e.errno());
            }
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        match DriveFilesystem::open(self, ino, flags) {
            Ok(fh) => reply.opened(fh, fuser::consts::FOPEN_KEEP_CACHE),
            Err(e) => {
                log_error("open", &e);
                reply.error(e.errno());
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        match DriveFilesystem::read(self, ino, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => {
                log_error("read", &e);
                reply.error(e.errno());
            }
        }
    }

    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn flush(&mut self, _req: &Request, _ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        // Nothing buffered on a read-only handle.
        reply.ok();
    }

    fn fsync(&mut self, _req: &Request, _ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        let e = Error::Unsupported("fsync");
        log_error("fsync", &e);
        reply.error(e.errno());
    }

    fn statfs(&mut self, _req: &Request, _ino: u64, reply: ReplyStatfs) {
        let s = DriveFilesystem::statfs(self);
        reply.statfs(
            s.f_blocks,
            s.f_bfree,
            s.f_bavail,
            s.f_files,
            s.f_ffree,
            s.f_bsize,
            s.f_namemax,
            s.f_frsize,
        );
    }

    fn access(&mut self, _req: &Request, _ino: u64, _mask: i32, reply: ReplyEmpty) {
        reply.ok();
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        if size.is_some() {
            let e = Error::ReadOnly("truncate");
            log_error("setattr", &e);
            reply.error(e.errno());
            return;
        }
        // Mode/time changes cannot be persisted remotely; answer with the
        // current attributes so utilities keep working.
        match DriveFilesystem::getattr(self, ino) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => {
                log_error("setattr", &e);
                reply.error(e.errno());
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        _req: &Request,
        _ino: u64,
        _fh: u64,
        _offset: i64,
        _data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyWrite,
    ) {
        let e = Error::ReadOnly("write");
        log_error("write", &e);
        reply.error(e.errno());
    }

    fn create(
        &mut self,
        _req: &Request,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: fuser::ReplyCreate,
    ) {
        let e = Error::ReadOnly("create");
        log_error("create", &e);
        reply.error(e.errno());
    }

    fn mknod(
        &mut self,
        _req: &Request,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        let e = Error::ReadOnly("mknod");
        log_error("mknod", &e);
        reply.error(e.errno());
    }
}
