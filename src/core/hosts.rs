//! Marked per-project block inside the system hosts file.

use std::fs;
use std::path::Path;

use crate::error::{Error, IoAction, Result};

fn begin_marker(project: &str) -> String {
    format!("# BEGIN: Devbox '{project}' project")
}

fn end_marker(project: &str) -> String {
    format!("# END: Devbox: '{project}' project")
}

/// Rewrite `contents` so that the project's block holds exactly `entries`.
///
/// An existing block is replaced in place; otherwise a new block is appended. Empty `entries`
/// remove the block. Blocks of other projects and unrelated lines are kept untouched. Returns
/// `None` when the project's begin marker has no matching end marker.
pub fn render(contents: &str, project: &str, entries: &[String]) -> Option<String> {
    let begin = begin_marker(project);
    let end = end_marker(project);

    let write_block = |out: &mut String| {
        out.push_str(&begin);
        out.push('\n');
        for entry in entries {
            out.push_str(entry);
            out.push('\n');
        }
        out.push_str(&end);
        out.push('\n');
    };

    let mut rendered = String::with_capacity(contents.len());
    let mut replaced = false;
    let mut inside_block = false;

    for line in contents.lines() {
        if inside_block {
            if line.trim() == end {
                inside_block = false;
            }
            continue;
        }
        if line.trim() == begin {
            inside_block = true;
            replaced = true;
            if !entries.is_empty() {
                write_block(&mut rendered);
            }
            continue;
        }
        rendered.push_str(line);
        rendered.push('\n');
    }

    if inside_block {
        return None;
    }
    if !replaced && !entries.is_empty() {
        write_block(&mut rendered);
    }
    Some(rendered)
}

/// Apply [`render`] to the file at `path`. Returns whether the file was rewritten.
///
/// The file is written in place so its permissions are preserved, and left alone when the
/// content would not change.
pub fn save(path: &Path, project: &str, entries: &[String]) -> Result<bool> {
    let current =
        fs::read_to_string(path).map_err(|source| Error::io(path, source, IoAction::Read))?;
    let updated = render(&current, project, entries).ok_or_else(|| Error::HostsBlockUnterminated {
        path: path.to_path_buf(),
        project: project.to_string(),
    })?;
    if updated == current {
        return Ok(false);
    }
    fs::write(path, updated).map_err(|source| Error::io(path, source, IoAction::Write))?;
    Ok(true)
}
