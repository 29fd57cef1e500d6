//! Content-addressed local file cache.
//!
//! A completed entry is a read-only file whose name equals the MD5 hex
//! digest of its contents; in-progress downloads stage under a `.dpart`
//! suffix and are renamed into place only after the digest checks out, so
//! any name without `.dpart` is guaranteed complete and validated.
//! Exported virtual-app documents have no remote digest and cache under
//! the id-derived `gapp-<id>` key instead.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, info, warn};
use md5::{Digest, Md5};

use crate::client::DriveApi;
use crate::types::{Error, FileRow, FsResult};

const DOWNLOAD_ATTEMPTS: u32 = 3;
const PART_SUFFIX: &str = "dpart";

/// What a row needs from the cache: its key and how to fill it on a miss.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub object_id: String,
    /// Expected size; `None` disables the size check (exports).
    pub expected_size: Option<u64>,
    /// Digest to validate against; `None` disables hashing (exports).
    pub md5: Option<String>,
    pub export_mime: Option<&'static str>,
}

impl CacheEntry {
    /// Cache identity of a regular file row. `None` when the row has no
    /// digest (folders, links, placeholders, virtual apps).
    pub fn for_file(row: &FileRow, md5: &str) -> Self {
        CacheEntry {
            key: md5.to_string(),
            object_id: row.id.clone().unwrap_or_default(),
            expected_size: Some(row.file_size),
            md5: Some(md5.to_string()),
            export_mime: None,
        }
    }

    /// Cache identity of a virtual-app export.
    pub fn for_export(row: &FileRow, export_mime: &'static str) -> Self {
        let object_id = row.id.clone().unwrap_or_default();
        CacheEntry {
            key: format!("gapp-{}", object_id),
            object_id,
            expected_size: None,
            md5: None,
            export_mime: Some(export_mime),
        }
    }
}

pub struct CacheManager {
    dir: PathBuf,
    /// One download at a time process-wide; a waiter observing the lock
    /// released will find the entry already complete.
    download_lock: Mutex<()>,
}

struct HashingWriter<W> {
    inner: W,
    hasher: Md5,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

fn md5_of(path: &Path) -> FsResult<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn is_md5_name(name: &str) -> bool {
    name.len() == 32 && name.bytes().all(|b| b.is_ascii_hexdigit())
}

impl CacheManager {
    pub fn new(dir: PathBuf) -> FsResult<Self> {
        fs::create_dir_all(&dir)?;
        Ok(CacheManager {
            dir,
            download_lock: Mutex::new(()),
        })
    }

    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    fn part_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", key, PART_SUFFIX))
    }

    /// A completed entry exists and, when a size is expected, matches it.
    pub fn is_cached(&self, entry: &CacheEntry) -> bool {
        let path = self.entry_path(&entry.key);
        match fs::metadata(&path) {
            Ok(meta) => match entry.expected_size {
                Some(size) => meta.len() == size,
                None => true,
            },
            Err(_) => false,
        }
    }

    /// Makes sure the entry is complete in the cache, downloading it if
    /// necessary, and returns its path.
    pub fn ensure_cached(&self, client: &dyn DriveApi, entry: &CacheEntry) -> FsResult<PathBuf> {
        if self.is_cached(entry) {
            return Ok(self.entry_path(&entry.key));
        }

        let _guard = self.download_lock.lock().unwrap();
        // Another opener may have completed it while we waited.
        if self.is_cached(entry) {
            return Ok(self.entry_path(&entry.key));
        }
        self.download(client, entry)?;
        Ok(self.entry_path(&entry.key))
    }

    fn download(&self, client: &dyn DriveApi, entry: &CacheEntry) -> FsResult<()> {
        let part = self.part_path(&entry.key);
        let target = self.entry_path(&entry.key);

        let mut result = Ok(());
        for attempt in 1..=DOWNLOAD_ATTEMPTS {
            result = self.download_once(client, entry, &part);
            match &result {
                Ok(()) => break,
                Err(Error::Integrity(_)) => {
                    info!(
                        "invalid digest for '{}' (attempt {}), retrying",
                        entry.key, attempt
                    );
                    let _ = fs::remove_file(&part);
                }
                Err(_) => {
                    let _ = fs::remove_file(&part);
                    break;
                }
            }
        }
        result?;

        fs::rename(&part, &target)?;
        // Completed entries are read-only to discourage corruption.
        fs::set_permissions(&target, fs::Permissions::from_mode(0o444))?;
        debug!("cached '{}'", entry.key);
        Ok(())
    }

    fn download_once(
        &self,
        client: &dyn DriveApi,
        entry: &CacheEntry,
        part: &Path,
    ) -> FsResult<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(part)?;

        // Zero-byte files need no remote round-trip.
        if entry.expected_size == Some(0) {
            return Ok(());
        }

        let mut writer = HashingWriter {
            inner: file,
            hasher: Md5::new(),
        };
        client.download(&entry.object_id, entry.export_mime, &mut writer)?;
        writer.flush()?;

        if let Some(expected) = &entry.md5 {
            let digest = hex::encode(writer.hasher.finalize());
            if digest != *expected {
                return Err(Error::Integrity(format!(
                    "'{}': got {}, expected {}",
                    entry.object_id, digest, expected
                )));
            }
        }
        Ok(())
    }

    /// Reads `size` bytes at `offset` from a completed entry.
    pub fn read_at(&self, key: &str, offset: u64, size: u32) -> FsResult<Vec<u8>> {
        let mut file = File::open(self.entry_path(key))?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; size as usize];
        let mut filled = 0;
        while filled < buffer.len() {
            let n = file.read(&mut buffer[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buffer.truncate(filled);
        Ok(buffer)
    }

    /// Walks the cache directory, unlinking every digest-named entry whose
    /// content no longer hashes to its name, plus any stale `.dpart`
    /// residue. Export entries carry no digest and are left alone.
    pub fn validate_all(&self) -> FsResult<usize> {
        let mut removed = 0;
        for dir_entry in fs::read_dir(&self.dir)? {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_file() {
                continue;
            }
            let name = dir_entry.file_name();
            let name = name.to_string_lossy();

            let stale = if name.ends_with(&format!(".{}", PART_SUFFIX)) {
                true
            } else if is_md5_name(&name) {
                md5_of(&dir_entry.path())? != *name
            } else {
                false
            };

            if stale {
                warn!("evicting invalid cache entry '{}'", name);
                fs::remove_file(dir_entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
