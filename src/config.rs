//! Profile configuration.
//!
//! A profile is configured by a small TOML document with a single `[mount]`
//! section. Parsing is strict: unknown keys and malformed values fail with
//! [`Error::Schema`], which aborts the mount before kernel registration.
//!
//! ```toml
//! [mount]
//! mountpoint = "/home/user/Google Drive"
//! trash = false
//! google_app_mode = "WEB"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{Error, FsResult};

/// How virtual-app documents (docs, sheets, ...) surface in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum GoogleAppMode {
    /// Surface as entries whose content is not readable.
    #[default]
    Web,
    /// Export through the remote conversion endpoint on open.
    Convert,
    /// Hide from listings entirely.
    Ignore,
    /// Like `Web`; the desktop-entry rendering lives above this crate.
    Desktop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MountConfig {
    #[serde(default = "default_mountpoint")]
    pub mountpoint: PathBuf,
    #[serde(default)]
    pub trash: bool,
    #[serde(default)]
    pub google_app_mode: GoogleAppMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub mount: MountConfig,
}

fn default_mountpoint() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/"))
        .join("Google Drive")
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mount: MountConfig {
                mountpoint: default_mountpoint(),
                trash: false,
                google_app_mode: GoogleAppMode::default(),
            },
        }
    }
}

impl Config {
    pub fn parse(raw: &str) -> FsResult<Self> {
        let config: Config =
            toml::from_str(raw).map_err(|e| Error::Schema(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> FsResult<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::Schema(format!("{}: {}", path.display(), e)))?;
        Self::parse(&raw)
    }

    pub fn save(&self, path: &Path) -> FsResult<()> {
        let raw = toml::to_string_pretty(self).map_err(|e| Error::Schema(e.to_string()))?;
        fs::write(path, raw)?;
        Ok(())
    }

    fn validate(&self) -> FsResult<()> {
        if !self.mount.mountpoint.is_absolute() {
            return Err(Error::Schema(format!(
                "mountpoint must be absolute, got '{}'",
                self.mount.mountpoint.display()
            )));
        }
        Ok(())
    }
}
