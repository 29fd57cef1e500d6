//! The deferred-mutation worker.
//!
//! Kernel mutations that would otherwise block on a remote round-trip are
//! recorded in the durable `request_queue` and answered immediately with a
//! placeholder row; this single worker drains the queue in FIFO order and
//! reconciles each placeholder with the server-assigned identity. A
//! request that keeps failing is dropped after `MAX_ATTEMPTS` and its
//! placeholder removed, so the error surfaces as ENOENT on the next
//! lookup.
//!
//! `mkdir` is the only request type today. The shapes reserved for future
//! deferral follow the same pattern: `rename(old_path, new_path)`,
//! `unlink(path)`, `rmdir(path)`, `upload(path, source)` and
//! `mkshortcut(path, target_path)` would each carry a path-keyed payload
//! and an idempotent handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};
use serde::{Deserialize, Serialize};

use crate::context::{interruptible_sleep, Context};
use crate::store::QueuedRequest;
use crate::types::{join_path, DriveFileRow, Error, FsResult};

pub const REQUEST_TYPE_MKDIR: &str = "mkdir";

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MkdirRequest {
    pub dirname: String,
    pub name: String,
}

impl MkdirRequest {
    pub fn payload(&self) -> String {
        serde_json::to_string(self).expect("mkdir payload serializes")
    }
}

pub struct QueueWorker {
    ctx: Arc<Context>,
    poll_interval: Duration,
}

impl QueueWorker {
    pub fn new(ctx: Arc<Context>) -> Self {
        QueueWorker {
            ctx,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Drain-and-sleep loop until `stop` is raised. A final drain runs at
    /// teardown so a short-lived mount still flushes what it queued.
    pub fn run(&self, stop: &AtomicBool) {
        while !stop.load(Ordering::Relaxed) {
            self.drain_once();
            interruptible_sleep(stop, self.poll_interval);
        }
        self.drain_once();
    }

    /// One pass over the queue in FIFO order. Failures keep the request
    /// for the next pass until the attempt budget runs out.
    pub fn drain_once(&self) {
        let pending = match self.ctx.store.list_requests() {
            Ok(pending) => pending,
            Err(e) => {
                error!("cannot read request queue: {}", e);
                return;
            }
        };

        for request in pending {
            match self.dispatch(&request) {
                Ok(()) => {
                    debug!("request {} ({}) done", request.id, request.request_type);
                    if let Err(e) = self.ctx.store.delete_request(request.id) {
                        error!("cannot remove finished request {}: {}", request.id, e);
                    }
                }
                Err(e) => {
                    warn!(
                        "request {} ({}) failed: {}",
                        request.id, request.request_type, e
                    );
                    let attempts = self
                        .ctx
                        .store
                        .record_attempt(request.id)
                        .unwrap_or(MAX_ATTEMPTS);
                    if attempts >= MAX_ATTEMPTS {
                        error!(
                            "request {} ({}) exhausted {} attempts, dropping",
                            request.id, request.request_type, attempts
                        );
                        self.discard(&request);
                    }
                }
            }
        }
    }

    fn dispatch(&self, request: &QueuedRequest) -> FsResult<()> {
        match request.request_type.as_str() {
            REQUEST_TYPE_MKDIR => {
                let decoded: MkdirRequest =
                    serde_json::from_str(&request.payload).map_err(|e| {
                        warn!("malformed mkdir payload '{}': {}", request.payload, e);
                        Error::Unsupported("malformed mkdir payload")
                    })?;
                self.handle_mkdir(&decoded)
            }
            _ => Err(Error::Unsupported("unknown request type")),
        }
    }

    fn handle_mkdir(&self, request: &MkdirRequest) -> FsResult<()> {
        let store = &self.ctx.store;
        let path = join_path(&request.dirname, &request.name);

        // Re-entry: the placeholder may already be reconciled, or the user
        // may have removed it before we got here.
        match store.file_by_path(&path, false)? {
            Some((_, row)) if row.id.is_some() => return Ok(()),
            Some(_) => {}
            None => {
                debug!("placeholder '{}' is gone, dropping its request", path);
                return Ok(());
            }
        }

        let (_, parent) = store
            .file_by_path(&request.dirname, false)?
            .ok_or_else(|| Error::not_found(format!("parent '{}'", request.dirname)))?;
        // FIFO order reconciles the parent's own request before this one.
        let parent_id = parent
            .id
            .clone()
            .ok_or_else(|| Error::Pending(request.dirname.clone()))?;

        // Duplicate detection: an earlier attempt may have created the
        // folder server-side before we crashed.
        let probe = format!(
            "'{}' in parents and name = '{}' and trashed = false",
            self.wire_id(&parent_id),
            request.name
        );
        let (existing, _) = self.ctx.client.list(&probe, None)?;
        let object = match existing.into_iter().next() {
            Some(object) => object,
            None => self.ctx.client.create_folder(&parent_id, &request.name)?,
        };

        let row = DriveFileRow::from_object(&object, &self.ctx.root_id);
        store.put_drive_file(&row)?;
        store.materialize(&row)?;
        Ok(())
    }

    fn wire_id<'a>(&'a self, id: &'a str) -> &'a str {
        if id == crate::types::ROOT_ID {
            &self.ctx.root_id
        } else {
            id
        }
    }

    /// Drops a request for good, removing the placeholder it promised to
    /// reconcile.
    fn discard(&self, request: &QueuedRequest) {
        if let Err(e) = self.ctx.store.delete_request(request.id) {
            error!("cannot drop request {}: {}", request.id, e);
            return;
        }
        if request.request_type == REQUEST_TYPE_MKDIR {
            if let Ok(decoded) = serde_json::from_str::<MkdirRequest>(&request.payload) {
                let path = join_path(&decoded.dirname, &decoded.name);
                match self.ctx.store.file_by_path(&path, false) {
                    Ok(Some((_, row))) if row.id.is_none() => {
                        let _ = self.ctx.store.delete_file_by_path(&path, false);
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Enqueues a mkdir for the worker; used by the facade.
pub(crate) fn enqueue_mkdir(ctx: &Context, dirname: &str, name: &str) -> FsResult<()> {
    let request = MkdirRequest {
        dirname: dirname.to_string(),
        name: name.to_string(),
    };
    ctx.store
        .enqueue_request(REQUEST_TYPE_MKDIR, &request.payload())?;
    Ok(())
}

/// Cancels a queued mkdir whose placeholder was unlinked before the worker
/// ran.
pub(crate) fn cancel_mkdir(ctx: &Context, dirname: &str, name: &str) -> FsResult<()> {
    let request = MkdirRequest {
        dirname: dirname.to_string(),
        name: name.to_string(),
    };
    ctx.store
        .delete_request_by_payload(REQUEST_TYPE_MKDIR, &request.payload())
}
