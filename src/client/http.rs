//! HTTP implementation of [`DriveApi`] over the Drive v3 REST surface.
//!
//! Each call enforces a 30 second timeout and retries transient failures
//! (transport errors, 5xx, 429) up to a small bound before reporting
//! [`Error::Unreachable`]. An access token rejected mid-call triggers one
//! refresh through the OAuth token endpoint and a single retry; a failed
//! refresh is [`Error::AuthFailed`]. The interactive consent flow is not
//! part of this crate: callers provide an already-authorized credential
//! blob.

use std::io::{self, Write};
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{ChangeList, DriveApi, StorageQuota};
use crate::types::{DriveObject, Error, FsResult, ROOT_ID};

const API_BASE: &str = "https://www.googleapis.com/drive/v3";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Field mask requested on every object-returning call; this is the set of
/// keys the core consumes.
const FILE_FIELDS: &str = "id,parents,name,size,viewedByMeTime,createdTime,\
                           modifiedTime,mimeType,trashed,md5Checksum,shortcutDetails";

const CALL_TIMEOUT: Duration = Duration::from_secs(30);
const CALL_ATTEMPTS: u32 = 3;
const PAGE_SIZE: &str = "1000";

/// The opaque authorized-user blob, in the layout the OAuth installed-app
/// flow persists (`credentials.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    /// Current access token, if one was persisted with the blob.
    #[serde(default)]
    pub token: Option<String>,
}

impl Credentials {
    pub fn from_json(raw: &str) -> FsResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| Error::AuthFailed(format!("malformed credentials: {}", e)))
    }
}

pub struct HttpDriveClient {
    agent: ureq::Agent,
    credentials: Mutex<Credentials>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    files: Vec<DriveObject>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuotaResponse {
    #[serde(default)]
    storage_quota: QuotaFields,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct QuotaFields {
    limit: Option<String>,
    usage_in_drive: Option<String>,
}

impl HttpDriveClient {
    pub fn new(credentials: Credentials) -> Self {
        HttpDriveClient {
            agent: ureq::AgentBuilder::new().timeout(CALL_TIMEOUT).build(),
            credentials: Mutex::new(credentials),
        }
    }

    /// The wire knows the root by the `root` alias, not our sentinel.
    fn wire_id(id: &str) -> &str {
        if id == ROOT_ID {
            "root"
        } else {
            id
        }
    }

    fn access_token(&self) -> FsResult<String> {
        let mut credentials = self.credentials.lock().unwrap();
        if let Some(token) = &credentials.token {
            return Ok(token.clone());
        }

        debug!("refreshing access token");
        let response = self
            .agent
            .post(TOKEN_URL)
            .send_form(&[
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
                ("refresh_token", credentials.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .map_err(|e| Error::AuthFailed(format!("token refresh failed: {}", e)))?;

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
        }
        let token: TokenResponse = response
            .into_json()
            .map_err(|e| Error::AuthFailed(format!("malformed token response: {}", e)))?;
        credentials.token = Some(token.access_token.clone());
        Ok(token.access_token)
    }

    fn invalidate_token(&self) {
        self.credentials.lock().unwrap().token = None;
    }

    /// Issues one API call with the retry and refresh policy applied.
    fn api_call(
        &self,
        method: &str,
        path: &str,
        query: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> FsResult<ureq::Response> {
        let url = format!("{}/{}", API_BASE, path);
        let mut refreshed = false;
        let mut last_failure = String::new();

        for attempt in 1..=CALL_ATTEMPTS {
            let token = self.access_token()?;
            let mut request = self
                .agent
                .request(method, &url)
                .set("Authorization", &format!("Bearer {}", token));
            for &(key, value) in query {
                request = request.query(key, value);
            }

            let result = match &body {
                Some(json) => request.send_json(json.clone()),
                None => request.call(),
            };

            match result {
                Ok(response) => return Ok(response),
                Err(ureq::Error::Status(401, _)) if !refreshed => {
                    refreshed = true;
                    self.invalidate_token();
                }
                Err(ureq::Error::Status(401, _)) => {
                    return Err(Error::AuthFailed("access token rejected".into()))
                }
                Err(ureq::Error::Status(404, _)) => {
                    return Err(Error::not_found(format!("remote object ({} {})", method, path)))
                }
                Err(ureq::Error::Status(code, _)) if code >= 500 || code == 429 => {
                    warn!("{} {}: HTTP {} (attempt {})", method, path, code, attempt);
                    last_failure = format!("HTTP {}", code);
                }
                Err(ureq::Error::Status(code, _)) => {
                    return Err(Error::unreachable(format!(
                        "{} {} rejected with HTTP {}",
                        method, path, code
                    )))
                }
                Err(ureq::Error::Transport(transport)) => {
                    warn!("{} {}: {} (attempt {})", method, path, transport, attempt);
                    last_failure = transport.to_string();
                }
            }
        }

        Err(Error::unreachable(format!(
            "{} {} failed after {} attempts: {}",
            method, path, CALL_ATTEMPTS, last_failure
        )))
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> FsResult<T> {
        self.api_call("GET", path, query, None)?
            .into_json()
            .map_err(|e| Error::unreachable(format!("malformed response for {}: {}", path, e)))
    }

    fn object_from(&self, response: ureq::Response, path: &str) -> FsResult<DriveObject> {
        response
            .into_json()
            .map_err(|e| Error::unreachable(format!("malformed response for {}: {}", path, e)))
    }
}

impl DriveApi for HttpDriveClient {
    fn root_id(&self) -> FsResult<String> {
        #[derive(Deserialize)]
        struct IdOnly {
            id: String,
        }
        let response: IdOnly = self.get_json("files/root", &[("fields", "id")])?;
        Ok(response.id)
    }

    fn get_by_id(&self, id: &str) -> FsResult<DriveObject> {
        let path = format!("files/{}", Self::wire_id(id));
        self.get_json(&path, &[("fields", FILE_FIELDS)])
    }

    fn list(
        &self,
        query: &str,
        page_token: Option<&str>,
    ) -> FsResult<(Vec<DriveObject>, Option<String>)> {
        let fields = format!("nextPageToken,files({})", FILE_FIELDS);
        let mut params = vec![
            ("q", query),
            ("fields", fields.as_str()),
            ("pageSize", PAGE_SIZE),
            ("spaces", "drive"),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }
        let response: ListResponse = self.get_json("files", &params)?;
        Ok((response.files, response.next_page_token))
    }

    fn start_page_token(&self) -> FsResult<String> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct TokenOnly {
            start_page_token: String,
        }
        let response: TokenOnly = self.get_json("changes/startPageToken", &[])?;
        Ok(response.start_page_token)
    }

    fn changes(&self, page_token: &str) -> FsResult<ChangeList> {
        let fields = format!(
            "nextPageToken,newStartPageToken,changes(removed,fileId,file({}))",
            FILE_FIELDS
        );
        self.get_json(
            "changes",
            &[
                ("pageToken", page_token),
                ("fields", fields.as_str()),
                ("pageSize", PAGE_SIZE),
                ("spaces", "drive"),
            ],
        )
    }

    fn create_folder(&self, parent_id: &str, name: &str) -> FsResult<DriveObject> {
        let body = json!({
            "name": name,
            "mimeType": crate::types::FOLDER_MIME_TYPE,
            "parents": [Self::wire_id(parent_id)],
        });
        let response = self.api_call("POST", "files", &[("fields", FILE_FIELDS)], Some(body))?;
        self.object_from(response, "files")
    }

    fn create_shortcut(
        &self,
        parent_id: &str,
        name: &str,
        target_id: &str,
    ) -> FsResult<DriveObject> {
        let body = json!({
            "name": name,
            "mimeType": crate::types::SHORTCUT_MIME_TYPE,
            "parents": [Self::wire_id(parent_id)],
            "shortcutDetails": {"targetId": target_id},
        });
        let response = self.api_call("POST", "files", &[("fields", FILE_FIELDS)], Some(body))?;
        self.object_from(response, "files")
    }

    fn rename(&self, id: &str, new_name: &str) -> FsResult<DriveObject> {
        let path = format!("files/{}", id);
        let response = self.api_call(
            "PATCH",
            &path,
            &[("fields", FILE_FIELDS)],
            Some(json!({"name": new_name})),
        )?;
        self.object_from(response, &path)
    }

    fn relocate(
        &self,
        id: &str,
        old_parent_id: &str,
        new_parent_id: &str,
    ) -> FsResult<DriveObject> {
        let path = format!("files/{}", id);
        let response = self.api_call(
            "PATCH",
            &path,
            &[
                ("addParents", Self::wire_id(new_parent_id)),
                ("removeParents", Self::wire_id(old_parent_id)),
                ("fields", FILE_FIELDS),
            ],
            Some(json!({})),
        )?;
        self.object_from(response, &path)
    }

    fn trash(&self, id: &str) -> FsResult<()> {
        let path = format!("files/{}", id);
        self.api_call("PATCH", &path, &[], Some(json!({"trashed": true})))?;
        Ok(())
    }

    fn untrash(&self, id: &str) -> FsResult<()> {
        let path = format!("files/{}", id);
        self.api_call("PATCH", &path, &[], Some(json!({"trashed": false})))?;
        Ok(())
    }

    fn download(
        &self,
        id: &str,
        export_mime: Option<&str>,
        out: &mut dyn Write,
    ) -> FsResult<u64> {
        let response = match export_mime {
            Some(mime) => self.api_call(
                "GET",
                &format!("files/{}/export", id),
                &[("mimeType", mime)],
                None,
            )?,
            None => self.api_call("GET", &format!("files/{}", id), &[("alt", "media")], None)?,
        };

        let mut reader = response.into_reader();
        let written = io::copy(&mut reader, out)?;
        Ok(written)
    }

    fn about(&self) -> FsResult<StorageQuota> {
        let response: QuotaResponse = self.get_json("about", &[("fields", "storageQuota")])?;
        Ok(StorageQuota {
            limit: response
                .storage_quota
                .limit
                .and_then(|s| s.parse().ok()),
            usage: response
                .storage_quota
                .usage_in_drive
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
        })
    }
}
