//! Local-mount bookkeeping: swap a source checkout for a working copy on the host.

use std::path::Path;

use crate::error::{Error, Result};

use super::project::{Project, SOURCES_DIR, clean_path};

/// Canonical key for a source path: `./sources/<name>[/...]` without a trailing slash.
///
/// A bare source name is accepted as shorthand for `./sources/<name>`.
pub fn normalize_source_path(input: &str) -> String {
    let trimmed = input.trim().trim_end_matches('/');
    let relative = trimmed.strip_prefix("./").unwrap_or(trimmed);
    if relative.starts_with(&format!("{SOURCES_DIR}/")) {
        format!("./{relative}")
    } else {
        format!("./{SOURCES_DIR}/{relative}")
    }
}

/// Source name of a normalized source path.
pub fn source_name_of(source_path: &str) -> Option<&str> {
    source_path
        .strip_prefix(&format!("./{SOURCES_DIR}/"))?
        .split('/')
        .next()
        .filter(|name| !name.is_empty())
}

/// Check that `source_path` names a declared source whose checkout exists.
pub fn validate_source_path(project: &Project, source_path: &str) -> Result<()> {
    let unknown = || Error::UnknownSource {
        project: project.name.clone(),
        source_path: source_path.to_string(),
    };
    let name = source_name_of(source_path).ok_or_else(unknown)?;
    if !project.sources.contains_key(name) || !project.resolve(source_path).exists() {
        return Err(unknown());
    }
    Ok(())
}

/// Map `source_path` to `local`, persist, reload and return the services to restart.
pub fn mount(project: &mut Project, source_path: &str, local: &Path) -> Result<Vec<String>> {
    let local = clean_path(local);
    if !local.exists() {
        return Err(Error::MountTargetMissing { path: local });
    }
    if let Some(existing) = project.state.mounts.get(source_path) {
        return Err(Error::AlreadyMounted {
            source_path: source_path.to_string(),
            local: existing.clone(),
        });
    }

    project.state.mounts.insert(
        source_path.to_string(),
        local.to_string_lossy().into_owned(),
    );
    project.save_state()?;
    project.reload()?;

    Ok(project.services_affected_by(source_path))
}

/// Drop the mapping of `source_path`, persist, reload and return the services to restart.
pub fn umount(project: &mut Project, source_path: &str) -> Result<Vec<String>> {
    if !project.state.mounts.contains_key(source_path) {
        return Err(Error::NotMounted {
            source_path: source_path.to_string(),
        });
    }
    let affected = project.services_affected_by(source_path);

    project.state.mounts.remove(source_path);
    project.save_state()?;
    project.reload()?;

    Ok(affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::project::tests::{DEMO_MANIFEST, write_project};
    use crate::core::state::{STATE_FILE_NAME, State};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn source_paths_are_normalized() {
        assert_eq!(normalize_source_path("service-1"), "./sources/service-1");
        assert_eq!(normalize_source_path("sources/svc/cmd/"), "./sources/svc/cmd");
        assert_eq!(normalize_source_path("./sources/svc"), "./sources/svc");
        assert_eq!(source_name_of("./sources/svc/cmd"), Some("svc"));
    }

    #[test]
    fn mount_then_umount_round_trips_volumes() {
        let app = TempDir::new().unwrap();
        let dir = write_project(app.path(), "demo", DEMO_MANIFEST, None);
        let local = TempDir::new().unwrap();
        let mut project = Project::load(app.path(), "demo", &[]).unwrap();
        let original = project.services["app"].volumes.clone();

        validate_source_path(&project, "./sources/service-1").unwrap();
        let affected = mount(&mut project, "./sources/service-1", local.path()).unwrap();

        assert_eq!(affected, vec!["app"]);
        let state = State::load(&dir.join(STATE_FILE_NAME)).unwrap();
        assert_eq!(
            state.mounts["./sources/service-1"],
            local.path().to_string_lossy()
        );
        assert_eq!(
            project.services["app"].volumes[0],
            format!("{}:/app", local.path().display())
        );

        let err = mount(&mut project, "./sources/service-1", local.path()).unwrap_err();
        assert!(matches!(err, Error::AlreadyMounted { .. }));

        let affected = umount(&mut project, "./sources/service-1").unwrap();
        assert_eq!(affected, vec!["app"]);
        assert_eq!(project.services["app"].volumes, original);
        assert!(matches!(
            umount(&mut project, "./sources/service-1").unwrap_err(),
            Error::NotMounted { .. }
        ));
    }

    #[test]
    fn missing_target_and_unknown_source_are_rejected() {
        let app = TempDir::new().unwrap();
        write_project(app.path(), "demo", DEMO_MANIFEST, None);
        let mut project = Project::load(app.path(), "demo", &[]).unwrap();

        let err = mount(&mut project, "./sources/service-1", Path::new("/nonexistent/devbox")).unwrap_err();
        assert!(matches!(err, Error::MountTargetMissing { .. }));

        let err = validate_source_path(&project, "./sources/ghost").unwrap_err();
        assert!(matches!(err, Error::UnknownSource { .. }));
        fs::remove_dir_all(project.source_dir("service-1")).unwrap();
        assert!(validate_source_path(&project, "./sources/service-1").is_err());
    }
}
