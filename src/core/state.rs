use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, IoAction, Result};

/// File name of the per-project state inside the manifest checkout.
pub const STATE_FILE_NAME: &str = ".devboxstate";

/// Persisted per-project state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// Source-relative path (`./sources/<name>[/...]`) to absolute local checkout.
    #[serde(default)]
    pub mounts: BTreeMap<String, String>,
    /// Whether a hosts-file block was written for the project.
    #[serde(default, skip_serializing_if = "is_false")]
    pub has_hosts: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl State {
    /// Read the state file; an absent or empty file is an empty state.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => return Err(Error::io(path, source, IoAction::Read)),
        };
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(&contents).map_err(|source| Error::StateFileCorrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Replace the state file as a whole: write a sibling temp file, then rename over.
    pub fn save(&self, path: &Path) -> Result<()> {
        let encoded = serde_json::to_string(self).map_err(|source| Error::StateFileCorrupt {
            path: path.to_path_buf(),
            source,
        })?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, encoded).map_err(|source| Error::io(&tmp, source, IoAction::Write))?;
        fs::rename(&tmp, path).map_err(|source| Error::io(path, source, IoAction::Write))
    }
}
