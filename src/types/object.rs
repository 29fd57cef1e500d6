//! The remote object model.
//!
//! [`DriveObject`] is the concrete record deserialized from the remote
//! drive API. Every field the core consumes is declared here with the
//! optionality the wire format actually exhibits; nothing is accessed by
//! string key.

use serde::Deserialize;

/// Canonical local id of the drive root.
///
/// The remote knows the root by an opaque id of its own; the client
/// translates this sentinel on the wire and ingestion normalizes the real
/// id back to it, so the rest of the core never sees the remote value.
pub const ROOT_ID: &str = "__ROOT__";

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
pub const SHORTCUT_MIME_TYPE: &str = "application/vnd.google-apps.shortcut";

/// Document types with no downloadable byte stream except via export.
pub const GOOGLE_APP_MIME_TYPES: [&str; 9] = [
    "application/vnd.google-apps.document",
    "application/vnd.google-apps.spreadsheet",
    "application/vnd.google-apps.drawing",
    "application/vnd.google-apps.presentation",
    "application/vnd.google-apps.form",
    "application/vnd.google-apps.fusiontable",
    "application/vnd.google-apps.map",
    "application/vnd.google-apps.script",
    "application/vnd.google-apps.site",
];

/// Export conversions supported by the remote, as `(source, target, extension)`.
/// Apps not listed here cannot be exported at all.
pub const GOOGLE_APP_EXPORTS: [(&str, &str, &str); 4] = [
    ("application/vnd.google-apps.document", "application/pdf", ".pdf"),
    ("application/vnd.google-apps.spreadsheet", "application/pdf", ".pdf"),
    ("application/vnd.google-apps.drawing", "image/png", ".png"),
    ("application/vnd.google-apps.presentation", "application/pdf", ".pdf"),
];

/// Returns the export mime for a virtual-app document, if it has one.
pub fn export_mime(mime_type: &str) -> Option<&'static str> {
    GOOGLE_APP_EXPORTS
        .iter()
        .find(|(source, _, _)| *source == mime_type)
        .map(|(_, target, _)| *target)
}

/// Non-file treatment triggered by the mime sentinels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Folder,
    Regular,
    Shortcut,
    GoogleApp,
}

impl ObjectKind {
    pub fn from_mime(mime_type: &str) -> Self {
        if mime_type == FOLDER_MIME_TYPE {
            ObjectKind::Folder
        } else if mime_type == SHORTCUT_MIME_TYPE {
            ObjectKind::Shortcut
        } else if GOOGLE_APP_MIME_TYPES.contains(&mime_type) {
            ObjectKind::GoogleApp
        } else {
            ObjectKind::Regular
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortcutDetails {
    pub target_id: String,
}

/// A single entry of the backing drive, as returned by `files.get`,
/// `files.list` and the mutation endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveObject {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    /// Absent for orphans; the remote model allows several parents but the
    /// first one is authoritative for the materialized tree.
    #[serde(default)]
    pub parents: Vec<String>,
    /// The wire encodes sizes as decimal strings.
    pub size: Option<String>,
    pub viewed_by_me_time: Option<String>,
    pub created_time: Option<String>,
    pub modified_time: Option<String>,
    pub shortcut_details: Option<ShortcutDetails>,
    #[serde(default)]
    pub trashed: bool,
    pub md5_checksum: Option<String>,
}

impl DriveObject {
    pub fn kind(&self) -> ObjectKind {
        ObjectKind::from_mime(&self.mime_type)
    }
}

/// Parses an RFC3339 timestamp from the wire into UTC epoch seconds.
/// Missing or malformed timestamps default to 0 per the data model.
pub(crate) fn timestamp_or_zero(value: Option<&str>) -> i64 {
    value
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp())
        .unwrap_or(0)
}
