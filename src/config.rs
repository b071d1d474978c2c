use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Name of the optional settings file inside the application directory.
pub const SETTINGS_FILE_NAME: &str = "config.toml";

/// Default deadline for source synchronisation and readiness waits.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Default hosts file rewritten for projects that declare host entries.
pub const DEFAULT_HOSTS_FILE: &str = "/etc/hosts";

/// User-level settings loaded from `<app-dir>/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub engine: EngineSettings,
    pub timeouts: TimeoutSettings,
    pub hosts: HostsSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    /// Container engine CLI invoked by the docker adapter.
    pub binary: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutSettings {
    pub sync_secs: u64,
    pub readiness_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            sync_secs: DEFAULT_TIMEOUT_SECS,
            readiness_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl TimeoutSettings {
    pub fn sync(&self) -> Duration {
        Duration::from_secs(self.sync_secs)
    }

    pub fn readiness(&self) -> Duration {
        Duration::from_secs(self.readiness_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostsSettings {
    pub file: PathBuf,
}

impl Default for HostsSettings {
    fn default() -> Self {
        Self {
            file: PathBuf::from(DEFAULT_HOSTS_FILE),
        }
    }
}

impl Settings {
    /// Load settings from `app_dir`, falling back to defaults when the file is absent.
    pub fn load(app_dir: &Path) -> Result<Self> {
        let path = app_dir.join(SETTINGS_FILE_NAME);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => return Err(Error::ReadSettings { path, source }),
        };
        toml::from_str(&contents).map_err(|source| Error::ParseSettings { path, source })
    }
}

/// Resolve the directory holding installed projects: `$DEVBOX_HOME`, else `<home>/.devbox`.
pub fn app_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os("DEVBOX_HOME") {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    user_home_dir()
        .map(|home| home.join(".devbox"))
        .ok_or(Error::HomeDirectoryUnavailable)
}

pub(crate) fn user_home_dir() -> Option<PathBuf> {
    if let Some(home) = std::env::var_os("HOME") {
        if !home.is_empty() {
            return Some(PathBuf::from(home));
        }
    }

    #[cfg(windows)]
    {
        if let Some(profile) = std::env::var_os("USERPROFILE") {
            if !profile.is_empty() {
                return Some(PathBuf::from(profile));
            }
        }
    }

    None
}

/// Expand a leading `~` and resolve relative paths against `cwd`. An empty input means `cwd`.
pub fn expand_path(input: &str, cwd: &Path) -> PathBuf {
    if input.is_empty() {
        return cwd.to_path_buf();
    }
    if input == "~" {
        return user_home_dir().unwrap_or_else(|| cwd.to_path_buf());
    }
    if let Some(rest) = input.strip_prefix("~/") {
        if let Some(home) = user_home_dir() {
            return home.join(rest);
        }
    }
    let path = Path::new(input);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}
