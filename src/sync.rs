//! Tree synchronization: the initial crawl, subtree refresh, and the
//! changes feed.
//!
//! The remote namespace is flat (objects point at their parents by id),
//! so ingestion has to order insertions parent-before-child for the store
//! to compose paths. Folders are inserted in rounds: each round takes the
//! folders whose parent is already present; when a round makes no progress
//! the remainder is unreachable (its ancestors are trashed or not owned)
//! and is adopted at the root, matching the orphan policy.

use std::collections::HashSet;

use log::{debug, info, warn};

use crate::client::{Change, DriveApi};
use crate::context::Context;
use crate::types::{DriveFileRow, DriveObject, Error, FsResult, ROOT_ID};

/// Parent-id disjunctions per list call, bounded by the remote's query
/// length limit.
const QUERY_CHUNK: usize = 50;

/// Runs a list query to exhaustion, following page tokens.
fn exec_query(client: &dyn DriveApi, query: &str) -> FsResult<Vec<DriveObject>> {
    debug!("q=\"{}\"", query);
    let (mut objects, mut token) = client.list(query, None)?;
    while let Some(t) = token {
        let (more, next) = client.list(query, Some(&t))?;
        objects.extend(more);
        token = next;
    }
    Ok(objects)
}

/// Normalizes wire objects into mirror rows: the real root id becomes the
/// sentinel, orphans are re-parented to root, and the result is id-sorted
/// so duplicate-name disambiguation is stable across mounts.
fn to_rows(ctx: &Context, objects: &[DriveObject]) -> Vec<DriveFileRow> {
    let mut rows: Vec<DriveFileRow> = objects
        .iter()
        .map(|o| DriveFileRow::from_object(o, &ctx.root_id))
        .filter(|r| r.id != ROOT_ID)
        .collect();
    for row in &mut rows {
        if row.parent_id.is_none() {
            row.parent_id = Some(ROOT_ID.to_string());
        }
    }
    rows.sort_by(|a, b| a.id.cmp(&b.id));
    rows.dedup_by(|a, b| a.id == b.id);
    rows
}

fn parent_known(ctx: &Context, row: &DriveFileRow, inserted: &HashSet<String>) -> bool {
    match row.parent_id.as_deref() {
        None => true,
        Some(parent_id) => {
            inserted.contains(parent_id)
                || ctx
                    .store
                    .file_by_id(parent_id, row.trashed)
                    .map(|found| found.is_some())
                    .unwrap_or(false)
        }
    }
}

fn reparent_to_root(ctx: &Context, row: &mut DriveFileRow) -> FsResult<()> {
    warn!(
        "'{}' ({}) has no reachable parent, adopting at root",
        row.name, row.id
    );
    row.parent_id = Some(ROOT_ID.to_string());
    ctx.store.reparent_drive_file(&row.id, ROOT_ID)
}

/// Mirrors and materializes a batch in parent-before-child order.
pub(crate) fn ingest(ctx: &Context, rows: Vec<DriveFileRow>) -> FsResult<()> {
    ctx.store.put_drive_files(&rows)?;

    let (mut folders, files): (Vec<_>, Vec<_>) = rows.into_iter().partition(|r| r.is_folder());
    let mut inserted: HashSet<String> = HashSet::new();
    inserted.insert(ROOT_ID.to_string());

    while !folders.is_empty() {
        let (ready, pending): (Vec<_>, Vec<_>) = folders
            .into_iter()
            .partition(|f| parent_known(ctx, f, &inserted));

        if ready.is_empty() {
            // No progress this round; adopt the rest at root and let the
            // next round insert them.
            folders = pending;
            for folder in &mut folders {
                reparent_to_root(ctx, folder)?;
            }
            continue;
        }

        for folder in ready {
            ctx.store.materialize(&folder)?;
            inserted.insert(folder.id);
        }
        folders = pending;
    }

    for mut file in files {
        if !parent_known(ctx, &file, &inserted) {
            reparent_to_root(ctx, &mut file)?;
        }
        ctx.store.materialize(&file)?;
    }
    Ok(())
}

/// Initial crawl: fetches the root, lists everything this account owns in
/// the mount's trash dimension, and materializes the whole tree. Also
/// records the changes-feed cursor for later refreshes.
pub fn recursive_list_root(ctx: &Context) -> FsResult<()> {
    info!("listing remote tree");
    let root = ctx.client.get_by_id(ROOT_ID)?;
    let root_row = DriveFileRow::from_object(&root, &ctx.root_id);
    ctx.store.put_drive_file(&root_row)?;
    ctx.store.materialize(&root_row)?;

    let query = format!("'me' in owners and trashed={}", ctx.bin());
    let objects = exec_query(ctx.client.as_ref(), &query)?;
    info!("received {} remote objects", objects.len());
    ingest(ctx, to_rows(ctx, &objects))?;

    match ctx.client.start_page_token() {
        Ok(token) => *ctx.changes_token.lock().unwrap() = Some(token),
        Err(e) => warn!("could not record changes cursor: {}", e),
    }
    Ok(())
}

/// Subtree refresh seeded at `parent_id`: walks the remote tree level by
/// level, batching child queries per round.
pub fn recursive_list_any(ctx: &Context, parent_id: &str) -> FsResult<()> {
    let seed = ctx.client.get_by_id(parent_id)?;
    let seed_row = DriveFileRow::from_object(&seed, &ctx.root_id);
    ctx.store.put_drive_file(&seed_row)?;
    ctx.store.materialize(&seed_row)?;

    let mut frontier = vec![seed_row.id.clone()];
    while !frontier.is_empty() {
        let mut objects = Vec::new();
        for chunk in frontier.chunks(QUERY_CHUNK) {
            let parents = chunk
                .iter()
                .map(|id| format!("'{}' in parents", wire_parent(ctx, id)))
                .collect::<Vec<_>>()
                .join(" or ");
            let query = format!(
                "'me' in owners and ({}) and trashed={}",
                parents,
                ctx.bin()
            );
            objects.extend(exec_query(ctx.client.as_ref(), &query)?);
        }

        let rows = to_rows(ctx, &objects);
        frontier = rows
            .iter()
            .filter(|r| r.is_folder())
            .map(|r| r.id.clone())
            .collect();
        ingest(ctx, rows)?;
    }
    Ok(())
}

/// Queries name the remote's real root id, not our sentinel.
fn wire_parent<'a>(ctx: &'a Context, id: &'a str) -> &'a str {
    if id == ROOT_ID {
        &ctx.root_id
    } else {
        id
    }
}

/// Folds the pending changes feed into the store, advancing the cursor.
/// Returns how many changes were applied.
pub fn apply_changes(ctx: &Context) -> FsResult<usize> {
    let Some(mut token) = ctx.changes_token.lock().unwrap().clone() else {
        return Ok(0);
    };

    let mut applied = 0;
    loop {
        let batch = ctx.client.changes(&token)?;
        for change in batch.changes {
            let id = change.file_id.clone();
            if let Err(e) = apply_one(ctx, change) {
                warn!("skipping change for '{}': {}", id, e);
            } else {
                applied += 1;
            }
        }
        match (batch.next_page_token, batch.new_start_page_token) {
            (Some(next), _) => token = next,
            (None, new_start) => {
                *ctx.changes_token.lock().unwrap() = new_start.or(Some(token));
                break;
            }
        }
    }
    Ok(applied)
}

fn apply_one(ctx: &Context, change: Change) -> FsResult<()> {
    let Some(object) = (!change.removed).then_some(change.file).flatten() else {
        for bin in [false, true] {
            ctx.store.delete_file_by_id(&change.file_id, bin)?;
        }
        return ctx.store.delete_drive_file(&change.file_id);
    };

    let mut row = DriveFileRow::from_object(&object, &ctx.root_id);
    if row.id == ROOT_ID {
        return Ok(());
    }
    if row.parent_id.is_none() {
        row.parent_id = Some(ROOT_ID.to_string());
    }

    // An object crossing the trash boundary leaves its old table.
    ctx.store.delete_file_by_id(&row.id, !row.trashed)?;
    ctx.store.put_drive_file(&row)?;
    match ctx.store.materialize(&row) {
        Ok(_) => Ok(()),
        Err(Error::NotFound(_)) => {
            reparent_to_root(ctx, &mut row)?;
            ctx.store.materialize(&row).map(|_| ())
        }
        Err(e) => Err(e),
    }
}
