//! A scriptable in-memory drive backing the integration tests, talking to
//! the crate only through its public [`DriveApi`] seam.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;

use md5::{Digest, Md5};

use gdrivefs::client::{ChangeList, StorageQuota};
use gdrivefs::types::{
    DriveObject, Error, FsResult, ShortcutDetails, FOLDER_MIME_TYPE, ROOT_ID, SHORTCUT_MIME_TYPE,
};
use gdrivefs::DriveApi;

pub const REMOTE_ROOT_ID: &str = "remote-root-99";

#[derive(Default)]
struct Remote {
    objects: HashMap<String, DriveObject>,
    contents: HashMap<String, Vec<u8>>,
    next_id: u64,
}

pub struct ScriptedDrive {
    remote: Mutex<Remote>,
}

fn blank_object(id: &str, parent_id: &str, name: &str, mime_type: &str) -> DriveObject {
    DriveObject {
        id: id.to_string(),
        name: name.to_string(),
        mime_type: mime_type.to_string(),
        parents: vec![parent_id.to_string()],
        size: None,
        viewed_by_me_time: None,
        created_time: Some("2021-05-01T12:00:00.000Z".to_string()),
        modified_time: Some("2021-05-02T12:00:00.000Z".to_string()),
        shortcut_details: None,
        trashed: false,
        md5_checksum: None,
    }
}

impl ScriptedDrive {
    pub fn new() -> Self {
        ScriptedDrive {
            remote: Mutex::new(Remote::default()),
        }
    }

    fn next_id(remote: &mut Remote) -> String {
        remote.next_id += 1;
        format!("srv{:04}", remote.next_id)
    }

    pub fn add_file(&self, parent_id: &str, name: &str, content: &[u8]) -> String {
        let mut remote = self.remote.lock().unwrap();
        let id = Self::next_id(&mut remote);
        let mut object = blank_object(&id, parent_id, name, "text/plain");
        object.size = Some(content.len().to_string());
        object.md5_checksum = Some(hex::encode(Md5::digest(content)));
        remote.contents.insert(id.clone(), content.to_vec());
        remote.objects.insert(id.clone(), object);
        id
    }

    pub fn add_folder(&self, parent_id: &str, name: &str) -> String {
        let mut remote = self.remote.lock().unwrap();
        let id = Self::next_id(&mut remote);
        let object = blank_object(&id, parent_id, name, FOLDER_MIME_TYPE);
        remote.objects.insert(id.clone(), object);
        id
    }

    pub fn set_trashed(&self, id: &str, trashed: bool) {
        let mut remote = self.remote.lock().unwrap();
        remote.objects.get_mut(id).unwrap().trashed = trashed;
    }

    pub fn object(&self, id: &str) -> Option<DriveObject> {
        self.remote.lock().unwrap().objects.get(id).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<DriveObject> {
        self.remote
            .lock()
            .unwrap()
            .objects
            .values()
            .find(|o| o.name == name)
            .cloned()
    }

    fn is_root(id: &str) -> bool {
        id == ROOT_ID || id == REMOTE_ROOT_ID
    }
}

impl DriveApi for ScriptedDrive {
    fn root_id(&self) -> FsResult<String> {
        Ok(REMOTE_ROOT_ID.to_string())
    }

    fn get_by_id(&self, id: &str) -> FsResult<DriveObject> {
        if Self::is_root(id) {
            let mut root = blank_object(REMOTE_ROOT_ID, "", "My Drive", FOLDER_MIME_TYPE);
            root.parents.clear();
            return Ok(root);
        }
        self.remote
            .lock()
            .unwrap()
            .objects
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn list(
        &self,
        query: &str,
        _page_token: Option<&str>,
    ) -> FsResult<(Vec<DriveObject>, Option<String>)> {
        let remote = self.remote.lock().unwrap();
        let trashed = query.contains("trashed=true") || query.contains("trashed = true");

        // Optional `name = '...'` clause (used for duplicate probes).
        let name = query.find("name = '").map(|at| {
            let rest = &query[at + "name = '".len()..];
            rest[..rest.find('\'').unwrap()].to_string()
        });

        // Optional parent-id disjunction.
        let mut parents = Vec::new();
        let mut rest = query;
        while let Some(at) = rest.find("' in parents") {
            if let Some(open) = rest[..at].rfind('\'') {
                parents.push(rest[open + 1..at].to_string());
            }
            rest = &rest[at + "' in parents".len()..];
        }

        let mut matched: Vec<DriveObject> = remote
            .objects
            .values()
            .filter(|o| o.trashed == trashed)
            .filter(|o| name.as_deref().map(|n| o.name == n).unwrap_or(true))
            .filter(|o| {
                parents.is_empty()
                    || o.parents.first().is_some_and(|p| {
                        parents
                            .iter()
                            .any(|f| f == p || (Self::is_root(f) && Self::is_root(p)))
                    })
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        Ok((matched, None))
    }

    fn start_page_token(&self) -> FsResult<String> {
        Ok("0".to_string())
    }

    fn changes(&self, _page_token: &str) -> FsResult<ChangeList> {
        Ok(ChangeList::default())
    }

    fn create_folder(&self, parent_id: &str, name: &str) -> FsResult<DriveObject> {
        let mut remote = self.remote.lock().unwrap();
        let id = Self::next_id(&mut remote);
        let object = blank_object(&id, parent_id, name, FOLDER_MIME_TYPE);
        remote.objects.insert(id.clone(), object.clone());
        Ok(object)
    }

    fn create_shortcut(
        &self,
        parent_id: &str,
        name: &str,
        target_id: &str,
    ) -> FsResult<DriveObject> {
        let mut remote = self.remote.lock().unwrap();
        let id = Self::next_id(&mut remote);
        let mut object = blank_object(&id, parent_id, name, SHORTCUT_MIME_TYPE);
        object.shortcut_details = Some(ShortcutDetails {
            target_id: target_id.to_string(),
        });
        remote.objects.insert(id.clone(), object.clone());
        Ok(object)
    }

    fn rename(&self, id: &str, new_name: &str) -> FsResult<DriveObject> {
        let mut remote = self.remote.lock().unwrap();
        let object = remote
            .objects
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        object.name = new_name.to_string();
        Ok(object.clone())
    }

    fn relocate(
        &self,
        id: &str,
        _old_parent_id: &str,
        new_parent_id: &str,
    ) -> FsResult<DriveObject> {
        let mut remote = self.remote.lock().unwrap();
        let object = remote
            .objects
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        object.parents = vec![new_parent_id.to_string()];
        Ok(object.clone())
    }

    fn trash(&self, id: &str) -> FsResult<()> {
        let mut remote = self.remote.lock().unwrap();
        remote
            .objects
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?
            .trashed = true;
        Ok(())
    }

    fn untrash(&self, id: &str) -> FsResult<()> {
        let mut remote = self.remote.lock().unwrap();
        remote
            .objects
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?
            .trashed = false;
        Ok(())
    }

    fn download(
        &self,
        id: &str,
        _export_mime: Option<&str>,
        out: &mut dyn Write,
    ) -> FsResult<u64> {
        let remote = self.remote.lock().unwrap();
        let bytes = remote
            .contents
            .get(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        out.write_all(bytes)?;
        Ok(bytes.len() as u64)
    }

    fn about(&self) -> FsResult<StorageQuota> {
        Ok(StorageQuota {
            limit: Some(1 << 30),
            usage: 1 << 20,
        })
    }
}
