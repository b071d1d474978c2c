use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, IoAction, Result};

use super::super::cancel::CancelToken;
use super::super::engine::BuildOptions;
use super::super::events::Event;
use super::super::project::{SOURCES_DIR, clean_path};
use super::super::state::STATE_FILE_NAME;
use super::RunContext;

/// Archive name of a Dockerfile that lives outside its build context.
const DETACHED_DOCKERFILE: &str = ".devbox.Dockerfile";

/// Build an internal image from a Dockerfile and its context directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildJob {
    pub image: String,
    pub context: PathBuf,
    pub dockerfile: PathBuf,
}

impl BuildJob {
    pub(super) fn start(&self, ctx: &RunContext, cancel: &CancelToken) -> Result<()> {
        let wrap = |source: Error| match source {
            Error::Cancelled => Error::Cancelled,
            source => Error::BuildFailed {
                image: self.image.clone(),
                source: Box::new(source),
            },
        };

        let (archive, dockerfile) =
            context_archive(&self.context, &self.dockerfile, &ctx.work_dir).map_err(wrap)?;
        cancel.check()?;

        let options = BuildOptions {
            tag: self.image.clone(),
            dockerfile,
            labels: BTreeMap::from([(
                super::LABEL_DEVBOX_PROJECT.to_string(),
                ctx.project.clone(),
            )]),
        };
        ctx.engine
            .build_image(archive, &options, cancel)
            .map_err(wrap)?;
        ctx.emit(Event::ImageBuilt {
            image: self.image.clone(),
        });
        Ok(())
    }
}

/// Tar the build context and return it with the Dockerfile's path inside the archive.
///
/// `.git` directories are skipped everywhere; when the context is the project directory its
/// source checkouts and state file are skipped too.
pub fn context_archive(
    context: &Path,
    dockerfile: &Path,
    work_dir: &Path,
) -> Result<(Vec<u8>, String)> {
    let context = clean_path(context);
    let dockerfile = clean_path(dockerfile);
    let excluded = [
        clean_path(&work_dir.join(SOURCES_DIR)),
        clean_path(&work_dir.join(STATE_FILE_NAME)),
    ];

    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    if context.is_dir() {
        append_dir(&mut builder, &context, &context, &excluded)?;
    }

    let dockerfile_name = match dockerfile.strip_prefix(&context) {
        Ok(relative) if dockerfile.is_file() => relative.to_string_lossy().into_owned(),
        _ => {
            let contents = fs::read(&dockerfile)
                .map_err(|source| Error::io(&dockerfile, source, IoAction::Read))?;
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            builder
                .append_data(&mut header, DETACHED_DOCKERFILE, contents.as_slice())
                .map_err(|source| Error::io(&dockerfile, source, IoAction::Read))?;
            DETACHED_DOCKERFILE.to_string()
        }
    };

    let archive = builder
        .into_inner()
        .map_err(|source| Error::io(&context, source, IoAction::Read))?;
    Ok((archive, dockerfile_name))
}

fn append_dir(
    builder: &mut tar::Builder<Vec<u8>>,
    root: &Path,
    dir: &Path,
    excluded: &[PathBuf],
) -> Result<()> {
    let mut entries = fs::read_dir(dir)
        .map_err(|source| Error::io(dir, source, IoAction::Read))?
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|source| Error::io(dir, source, IoAction::Read))?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        if entry.file_name() == ".git" || excluded.contains(&path) {
            continue;
        }
        let name = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        let file_type = entry
            .file_type()
            .map_err(|source| Error::io(&path, source, IoAction::Read))?;
        if file_type.is_dir() {
            builder
                .append_dir(&name, &path)
                .map_err(|source| Error::io(&path, source, IoAction::Read))?;
            append_dir(builder, root, &path, excluded)?;
        } else {
            builder
                .append_path_with_name(&path, &name)
                .map_err(|source| Error::io(&path, source, IoAction::Read))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::fake::FakeEngine;
    use crate::core::runners::tests::context;
    use std::io::Read;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn archive_names(bytes: &[u8]) -> Vec<String> {
        let mut archive = tar::Archive::new(bytes);
        archive
            .entries()
            .unwrap()
            .map(|entry| entry.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn archive_skips_git_and_sources() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::create_dir_all(root.join("sources/svc")).unwrap();
        fs::create_dir_all(root.join("app")).unwrap();
        fs::write(root.join("Dockerfile"), "FROM alpine\n").unwrap();
        fs::write(root.join("app/main.go"), "package main\n").unwrap();
        fs::write(root.join(".git/HEAD"), "ref").unwrap();
        fs::write(root.join("sources/svc/x"), "x").unwrap();

        let (bytes, dockerfile) =
            context_archive(root, &root.join("Dockerfile"), root).unwrap();
        assert_eq!(dockerfile, "Dockerfile");
        let names = archive_names(&bytes);
        assert!(names.contains(&"Dockerfile".to_string()));
        assert!(names.iter().any(|name| name.starts_with("app")));
        assert!(names.contains(&"app/main.go".to_string()));
        assert!(!names.iter().any(|name| name.contains(".git") || name.starts_with("sources")));
    }

    #[test]
    fn detached_dockerfile_is_embedded() {
        let dir = TempDir::new().unwrap();
        let context_dir = dir.path().join("ctx");
        fs::create_dir_all(&context_dir).unwrap();
        fs::write(dir.path().join("build.Dockerfile"), "FROM scratch\n").unwrap();

        let (bytes, dockerfile) = context_archive(
            &context_dir,
            &dir.path().join("build.Dockerfile"),
            dir.path(),
        )
        .unwrap();
        assert_eq!(dockerfile, DETACHED_DOCKERFILE);

        let mut archive = tar::Archive::new(bytes.as_slice());
        let mut entry = archive.entries().unwrap().next().unwrap().unwrap();
        let mut contents = String::new();
        entry.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "FROM scratch\n");
    }

    #[test]
    fn build_tags_image() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Dockerfile"), "FROM alpine\n").unwrap();
        let engine = Arc::new(FakeEngine::new());
        let job = BuildJob {
            image: "local/service-1".into(),
            context: dir.path().to_path_buf(),
            dockerfile: dir.path().join("Dockerfile"),
        };
        job.start(&context(&engine), &CancelToken::new()).unwrap();

        let state = engine.state.lock().unwrap();
        assert_eq!(state.built[0].0, "local/service-1");
        assert_eq!(state.built[0].1, "Dockerfile");
        assert!(state.images.contains("local/service-1"));
    }

    #[test]
    fn missing_dockerfile_fails_build() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(FakeEngine::new());
        let job = BuildJob {
            image: "local/x".into(),
            context: dir.path().to_path_buf(),
            dockerfile: dir.path().join("Dockerfile"),
        };
        let err = job.start(&context(&engine), &CancelToken::new()).unwrap_err();
        assert!(matches!(err, Error::BuildFailed { .. }));
    }
}
