//! An in-memory drive used by the unit tests.
//!
//! Implements [`DriveApi`] over a hash map of objects, with just enough of
//! the list-query grammar (`trashed=`, `'<id>' in parents`, `name = '...'`)
//! to satisfy the queries the core actually issues. Failure injection
//! covers the paths the production client can take: transient mutation
//! errors and corrupted download payloads.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;

use md5::{Digest, Md5};

use crate::client::{Change, ChangeList, DriveApi, StorageQuota};
use crate::types::{
    DriveObject, Error, FsResult, ShortcutDetails, FOLDER_MIME_TYPE, ROOT_ID, SHORTCUT_MIME_TYPE,
};

pub(crate) const FAKE_ROOT_ID: &str = "fake-root-0000";

#[derive(Default)]
struct State {
    objects: HashMap<String, DriveObject>,
    contents: HashMap<String, Vec<u8>>,
    exports: HashMap<String, Vec<u8>>,
    change_log: Vec<Change>,
    next_id: u64,
    corrupt_downloads: bool,
    failing_mutations: u32,
    page_size: Option<usize>,
    quota_limit: Option<u64>,
}

pub(crate) struct FakeDrive {
    state: Mutex<State>,
}

fn parent_filters(query: &str) -> Vec<String> {
    let mut filters = Vec::new();
    let mut rest = query;
    while let Some(pos) = rest.find("' in parents") {
        let head = &rest[..pos];
        if let Some(start) = head.rfind('\'') {
            filters.push(head[start + 1..].to_string());
        }
        rest = &rest[pos + "' in parents".len()..];
    }
    filters
}

fn name_filter(query: &str) -> Option<String> {
    let start = query.find("name = '")? + "name = '".len();
    let end = query[start..].find('\'')?;
    Some(query[start..start + end].to_string())
}

fn wants_trashed(query: &str) -> bool {
    query.contains("trashed=true") || query.contains("trashed = true")
}

/// The root may be named by the sentinel or the remote's real id.
fn same_parent(filter: &str, parent: &str) -> bool {
    let is_root = |id: &str| id == ROOT_ID || id == FAKE_ROOT_ID;
    filter == parent || (is_root(filter) && is_root(parent))
}

impl FakeDrive {
    pub fn new() -> Self {
        FakeDrive {
            state: Mutex::new(State {
                quota_limit: Some(1 << 34),
                ..State::default()
            }),
        }
    }

    fn fresh_id(state: &mut State) -> String {
        state.next_id += 1;
        format!("obj{}", state.next_id)
    }

    fn log_change(state: &mut State, id: &str, removed: bool) {
        let file = state.objects.get(id).cloned();
        state.change_log.push(Change {
            file_id: id.to_string(),
            removed,
            file,
        });
    }

    fn insert(state: &mut State, object: DriveObject) {
        let id = object.id.clone();
        state.objects.insert(id.clone(), object);
        Self::log_change(state, &id, false);
    }

    // ------------------------------------------------------------
    // Fixture construction

    /// Adds a regular file and returns its content digest.
    pub fn add_file(&self, parent_id: &str, name: &str, content: &[u8]) -> String {
        let digest = hex::encode(Md5::digest(content));
        let mut state = self.state.lock().unwrap();
        let id = Self::fresh_id(&mut state);
        state.contents.insert(id.clone(), content.to_vec());
        Self::insert(
            &mut state,
            DriveObject {
                id,
                name: name.to_string(),
                mime_type: "application/octet-stream".to_string(),
                parents: vec![parent_id.to_string()],
                size: Some(content.len().to_string()),
                viewed_by_me_time: None,
                created_time: Some("2021-03-01T10:00:00.000Z".to_string()),
                modified_time: Some("2021-03-02T10:00:00.000Z".to_string()),
                shortcut_details: None,
                trashed: false,
                md5_checksum: Some(digest.clone()),
            },
        );
        digest
    }

    pub fn add_folder(&self, parent_id: &str, name: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let id = Self::fresh_id(&mut state);
        Self::insert(
            &mut state,
            DriveObject {
                id: id.clone(),
                name: name.to_string(),
                mime_type: FOLDER_MIME_TYPE.to_string(),
                parents: vec![parent_id.to_string()],
                size: None,
                viewed_by_me_time: None,
                created_time: Some("2021-03-01T10:00:00.000Z".to_string()),
                modified_time: Some("2021-03-01T10:00:00.000Z".to_string()),
                shortcut_details: None,
                trashed: false,
                md5_checksum: None,
            },
        );
        id
    }

    pub fn add_shortcut(&self, parent_id: &str, name: &str, target_id: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let id = Self::fresh_id(&mut state);
        Self::insert(
            &mut state,
            DriveObject {
                id: id.clone(),
                name: name.to_string(),
                mime_type: SHORTCUT_MIME_TYPE.to_string(),
                parents: vec![parent_id.to_string()],
                size: None,
                viewed_by_me_time: None,
                created_time: None,
                modified_time: None,
                shortcut_details: Some(ShortcutDetails {
                    target_id: target_id.to_string(),
                }),
                trashed: false,
                md5_checksum: None,
            },
        );
        id
    }

    pub fn add_google_app(&self, parent_id: &str, name: &str, mime_type: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let id = Self::fresh_id(&mut state);
        state
            .exports
            .insert(id.clone(), format!("exported-{}", id).into_bytes());
        Self::insert(
            &mut state,
            DriveObject {
                id: id.clone(),
                name: name.to_string(),
                mime_type: mime_type.to_string(),
                parents: vec![parent_id.to_string()],
                size: None,
                viewed_by_me_time: None,
                created_time: None,
                modified_time: None,
                shortcut_details: None,
                trashed: false,
                md5_checksum: None,
            },
        );
        id
    }

    /// Marks an existing object trashed without going through the API.
    pub fn trash_directly(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(object) = state.objects.get_mut(id) {
            object.trashed = true;
        }
        Self::log_change(&mut state, id, false);
    }

    /// Detaches an object from its parent, making it an orphan.
    pub fn orphan(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(object) = state.objects.get_mut(id) {
            object.parents.clear();
        }
    }

    pub fn remove_object(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        state.objects.remove(id);
        state.contents.remove(id);
        state.change_log.push(Change {
            file_id: id.to_string(),
            removed: true,
            file: None,
        });
    }

    pub fn id_of(&self, name: &str) -> String {
        let state = self.state.lock().unwrap();
        state
            .objects
            .values()
            .find(|o| o.name == name)
            .map(|o| o.id.clone())
            .unwrap_or_else(|| panic!("no fixture object named '{}'", name))
    }

    pub fn object(&self, id: &str) -> Option<DriveObject> {
        self.state.lock().unwrap().objects.get(id).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.state.lock().unwrap().objects.len()
    }

    // ------------------------------------------------------------
    // Failure injection and knobs

    pub fn corrupt_downloads(&self) {
        self.state.lock().unwrap().corrupt_downloads = true;
    }

    /// The next `n` mutations fail with a transient error.
    pub fn fail_mutations(&self, n: u32) {
        self.state.lock().unwrap().failing_mutations = n;
    }

    pub fn set_page_size(&self, size: usize) {
        self.state.lock().unwrap().page_size = Some(size);
    }

    pub fn set_quota(&self, limit: Option<u64>) {
        self.state.lock().unwrap().quota_limit = limit;
    }

    fn check_mutation(state: &mut State) -> FsResult<()> {
        if state.failing_mutations > 0 {
            state.failing_mutations -= 1;
            return Err(Error::unreachable("injected fault"));
        }
        Ok(())
    }

    fn root_object() -> DriveObject {
        DriveObject {
            id: FAKE_ROOT_ID.to_string(),
            name: "My Drive".to_string(),
            mime_type: FOLDER_MIME_TYPE.to_string(),
            parents: Vec::new(),
            size: None,
            viewed_by_me_time: None,
            created_time: None,
            modified_time: None,
            shortcut_details: None,
            trashed: false,
            md5_checksum: None,
        }
    }
}

impl DriveApi for FakeDrive {
    fn root_id(&self) -> FsResult<String> {
        Ok(FAKE_ROOT_ID.to_string())
    }

    fn get_by_id(&self, id: &str) -> FsResult<DriveObject> {
        if id == ROOT_ID || id == FAKE_ROOT_ID {
            return Ok(Self::root_object());
        }
        self.state
            .lock()
            .unwrap()
            .objects
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("remote object '{}'", id)))
    }

    fn list(
        &self,
        query: &str,
        page_token: Option<&str>,
    ) -> FsResult<(Vec<DriveObject>, Option<String>)> {
        let state = self.state.lock().unwrap();
        let trashed = wants_trashed(query);
        let parents = parent_filters(query);
        let name = name_filter(query);

        let mut matches: Vec<DriveObject> = state
            .objects
            .values()
            .filter(|o| o.trashed == trashed)
            .filter(|o| {
                parents.is_empty()
                    || o.parents
                        .first()
                        .map(|p| parents.iter().any(|f| same_parent(f, p)))
                        .unwrap_or(false)
            })
            .filter(|o| name.as_ref().map(|n| o.name == *n).unwrap_or(true))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));

        match state.page_size {
            None => Ok((matches, None)),
            Some(page) => {
                let start: usize = page_token.map(|t| t.parse().unwrap()).unwrap_or(0);
                let end = (start + page).min(matches.len());
                let next = (end < matches.len()).then(|| end.to_string());
                Ok((matches[start..end].to_vec(), next))
            }
        }
    }

    fn start_page_token(&self) -> FsResult<String> {
        Ok(self.state.lock().unwrap().change_log.len().to_string())
    }

    fn changes(&self, page_token: &str) -> FsResult<ChangeList> {
        let state = self.state.lock().unwrap();
        let start: usize = page_token
            .parse()
            .map_err(|_| Error::unreachable("bad page token"))?;
        Ok(ChangeList {
            changes: state.change_log[start.min(state.change_log.len())..].to_vec(),
            next_page_token: None,
            new_start_page_token: Some(state.change_log.len().to_string()),
        })
    }

    fn create_folder(&self, parent_id: &str, name: &str) -> FsResult<DriveObject> {
        let mut state = self.state.lock().unwrap();
        Self::check_mutation(&mut state)?;
        let id = Self::fresh_id(&mut state);
        let object = DriveObject {
            id: id.clone(),
            name: name.to_string(),
            mime_type: FOLDER_MIME_TYPE.to_string(),
            parents: vec![parent_id.to_string()],
            size: None,
            viewed_by_me_time: None,
            created_time: Some("2021-04-01T08:00:00.000Z".to_string()),
            modified_time: Some("2021-04-01T08:00:00.000Z".to_string()),
            shortcut_details: None,
            trashed: false,
            md5_checksum: None,
        };
        Self::insert(&mut state, object.clone());
        Ok(object)
    }

    fn create_shortcut(
        &self,
        parent_id: &str,
        name: &str,
        target_id: &str,
    ) -> FsResult<DriveObject> {
        let mut state = self.state.lock().unwrap();
        Self::check_mutation(&mut state)?;
        let id = Self::fresh_id(&mut state);
        let object = DriveObject {
            id: id.clone(),
            name: name.to_string(),
            mime_type: SHORTCUT_MIME_TYPE.to_string(),
            parents: vec![parent_id.to_string()],
            size: None,
            viewed_by_me_time: None,
            created_time: None,
            modified_time: None,
            shortcut_details: Some(ShortcutDetails {
                target_id: target_id.to_string(),
            }),
            trashed: false,
            md5_checksum: None,
        };
        Self::insert(&mut state, object.clone());
        Ok(object)
    }

    fn rename(&self, id: &str, new_name: &str) -> FsResult<DriveObject> {
        let mut state = self.state.lock().unwrap();
        Self::check_mutation(&mut state)?;
        let object = state
            .objects
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("remote object '{}'", id)))?;
        object.name = new_name.to_string();
        let object = object.clone();
        Self::log_change(&mut state, id, false);
        Ok(object)
    }

    fn relocate(
        &self,
        id: &str,
        _old_parent_id: &str,
        new_parent_id: &str,
    ) -> FsResult<DriveObject> {
        let mut state = self.state.lock().unwrap();
        Self::check_mutation(&mut state)?;
        let object = state
            .objects
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("remote object '{}'", id)))?;
        object.parents = vec![new_parent_id.to_string()];
        let object = object.clone();
        Self::log_change(&mut state, id, false);
        Ok(object)
    }

    fn trash(&self, id: &str) -> FsResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_mutation(&mut state)?;
        match state.objects.get_mut(id) {
            Some(object) => {
                object.trashed = true;
                Self::log_change(&mut state, id, false);
                Ok(())
            }
            None => Err(Error::not_found(format!("remote object '{}'", id))),
        }
    }

    fn untrash(&self, id: &str) -> FsResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_mutation(&mut state)?;
        match state.objects.get_mut(id) {
            Some(object) => {
                object.trashed = false;
                Self::log_change(&mut state, id, false);
                Ok(())
            }
            None => Err(Error::not_found(format!("remote object '{}'", id))),
        }
    }

    fn download(
        &self,
        id: &str,
        export_mime: Option<&str>,
        out: &mut dyn Write,
    ) -> FsResult<u64> {
        let state = self.state.lock().unwrap();
        if state.corrupt_downloads {
            out.write_all(b"corrupted payload")?;
            return Ok(17);
        }
        let bytes = match export_mime {
            Some(_) => state.exports.get(id),
            None => state.contents.get(id),
        }
        .ok_or_else(|| Error::not_found(format!("remote content '{}'", id)))?;
        out.write_all(bytes)?;
        Ok(bytes.len() as u64)
    }

    fn about(&self) -> FsResult<StorageQuota> {
        let state = self.state.lock().unwrap();
        let usage = state.contents.values().map(|c| c.len() as u64).sum();
        Ok(StorageQuota {
            limit: state.quota_limit,
            usage,
        })
    }
}
