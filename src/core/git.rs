use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::error::{Error, IoAction, Result};

use super::cancel::CancelToken;
use super::process::{CommandOutput, CommandRunner, CommandSpec};

const EXCLUDE_FILE: &str = ".git/info/exclude";
const INDEX_LOCK: &str = ".git/index.lock";

/// Summary of the latest commit of a working tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitInfo {
    pub hash: String,
    pub author: String,
    pub date: String,
    pub message: String,
}

impl CommitInfo {
    pub fn short_hash(&self) -> &str {
        self.hash.get(..8).unwrap_or(&self.hash)
    }
}

/// Git operations bound to one working directory.
#[derive(Clone)]
pub struct Git {
    runner: Arc<dyn CommandRunner>,
    dir: PathBuf,
}

impl Git {
    pub fn new(runner: Arc<dyn CommandRunner>, dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `git clone <url> <dir> [--branch <branch>]`.
    pub fn clone_repo(&self, url: &str, branch: Option<&str>, cancel: &CancelToken) -> Result<()> {
        let mut args = vec![
            "clone".to_string(),
            url.to_string(),
            self.dir.to_string_lossy().into_owned(),
        ];
        if let Some(branch) = branch.filter(|branch| !branch.is_empty()) {
            args.push("--branch".to_string());
            args.push(branch.to_string());
        }
        self.git(args, cancel).map(drop)
    }

    /// Bring the checkout to the tip of `branch`, creating a shallow clone when absent.
    pub fn sync(
        &self,
        url: &str,
        branch: Option<&str>,
        sparse: &[String],
        cancel: &CancelToken,
    ) -> Result<()> {
        // Without `.git` every git command would resolve the enclosing repository instead.
        if self.dir.exists() && !self.dir.join(".git").exists() {
            fs::remove_dir_all(&self.dir)
                .map_err(|source| Error::io(&self.dir, source, IoAction::Remove))?;
        }

        if self.dir.exists() {
            self.reset(cancel)?;
        } else {
            fs::create_dir_all(&self.dir)
                .map_err(|source| Error::io(&self.dir, source, IoAction::CreateDir))?;
            let mut args = vec!["clone", "--no-checkout", "--depth", "1"];
            if let Some(branch) = branch.filter(|branch| !branch.is_empty()) {
                args.extend(["--branch", branch]);
            }
            let dir = self.dir.to_string_lossy();
            args.extend([url, dir.as_ref()]);
            self.git(args, cancel)?;
        }

        if sparse.is_empty() {
            self.git_in(["sparse-checkout", "disable"], cancel)?;
        } else {
            self.git_in(["sparse-checkout", "init", "--cone"], cancel)?;
            let mut args = vec!["sparse-checkout".to_string(), "set".to_string()];
            args.extend(sparse.iter().cloned());
            self.git_in(args, cancel)?;
        }

        match branch.filter(|branch| !branch.is_empty()) {
            Some(branch) => self.git_in(["checkout", branch], cancel)?,
            None => self.git_in(["checkout"], cancel)?,
        };

        self.pull(cancel)
    }

    /// Discard local changes and rebase onto the upstream branch.
    pub fn pull(&self, cancel: &CancelToken) -> Result<()> {
        self.reset(cancel)?;
        self.git_in(["pull", "--rebase"], cancel).map(drop)
    }

    /// Clear a stale index lock, then `reset --hard` and `clean -fd`.
    pub fn reset(&self, cancel: &CancelToken) -> Result<()> {
        let lock = self.dir.join(INDEX_LOCK);
        match fs::remove_file(&lock) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(Error::io(lock, source, IoAction::Remove)),
        }
        self.git_in(["reset", "--hard"], cancel)?;
        self.git_in(["clean", "-fd"], cancel).map(drop)
    }

    /// Append `patterns` to `.git/info/exclude`, skipping lines already present.
    pub fn set_local_exclude(&self, patterns: &[&str]) -> Result<()> {
        let path = self.dir.join(EXCLUDE_FILE);
        let existing = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
            Err(source) => return Err(Error::io(path, source, IoAction::Read)),
        };

        let mut updated = existing.clone();
        for pattern in patterns {
            if existing.lines().any(|line| line.trim() == *pattern) {
                continue;
            }
            if !updated.is_empty() && !updated.ends_with('\n') {
                updated.push('\n');
            }
            updated.push_str(pattern);
            updated.push('\n');
        }
        if updated == existing {
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| Error::io(parent, source, IoAction::CreateDir))?;
        }
        fs::write(&path, updated).map_err(|source| Error::io(path, source, IoAction::Write))
    }

    /// URL of the `origin` remote.
    pub fn remote_url(&self, cancel: &CancelToken) -> Result<String> {
        let output = self
            .git_in(["config", "--get", "remote.origin.url"], cancel)
            .map_err(|_| Error::GitRemoteMissing {
                path: self.dir.clone(),
            })?;
        let url = output.stdout.trim().to_string();
        if url.is_empty() {
            return Err(Error::GitRemoteMissing {
                path: self.dir.clone(),
            });
        }
        Ok(url)
    }

    pub fn top_level(&self, cancel: &CancelToken) -> Result<PathBuf> {
        let output = self.git_in(["rev-parse", "--show-toplevel"], cancel)?;
        Ok(PathBuf::from(output.stdout.trim()))
    }

    /// Latest commit: hash, author, date and subject.
    pub fn info(&self, cancel: &CancelToken) -> Result<CommitInfo> {
        let output = self.git_in(["log", "-1", "--pretty=format:%H%n%aN%n%ad%n%s"], cancel)?;
        parse_commit_info(&output.stdout)
    }

    fn git<I, S>(&self, args: I, cancel: &CancelToken) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = CommandSpec::new("git")
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0");
        self.runner.run(&spec, cancel)
    }

    fn git_in<I, S>(&self, args: I, cancel: &CancelToken) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut full = vec!["-C".to_string(), self.dir.to_string_lossy().into_owned()];
        full.extend(args.into_iter().map(Into::into));
        self.git(full, cancel)
    }
}

fn parse_commit_info(output: &str) -> Result<CommitInfo> {
    let trimmed = output.trim_end_matches('\n');
    let parts: Vec<&str> = trimmed.split('\n').collect();
    match parts.as_slice() {
        [hash, author, date, message] => Ok(CommitInfo {
            hash: hash.to_string(),
            author: author.to_string(),
            date: date.to_string(),
            message: message.to_string(),
        }),
        _ => Err(Error::MalformedCommitInfo {
            output: output.to_string(),
        }),
    }
}

/// Hint attached to clone failures.
pub fn clone_hint(branch: Option<&str>) -> String {
    match branch {
        Some(branch) => format!(
            "Tip: check that branch `{branch}` exists and that your git credentials (SSH agent or credential helper) grant access to the repository."
        ),
        None => "Tip: check the repository URL and that your git credentials (SSH agent or credential helper) grant access to the repository.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::process::testing::ScriptedRunner;
    use tempfile::TempDir;

    fn git_with(runner: &Arc<ScriptedRunner>, dir: &Path) -> Git {
        Git::new(runner.clone(), dir)
    }

    #[test]
    fn commit_info_parses_four_fields() {
        let info = parse_commit_info("abc123\nJane Doe\nMon Jan 1 10:00:00 2024 +0000\nInitial commit")
            .unwrap();
        assert_eq!(info.hash, "abc123");
        assert_eq!(info.author, "Jane Doe");
        assert_eq!(info.message, "Initial commit");
    }

    #[test]
    fn commit_info_rejects_wrong_field_count() {
        let err = parse_commit_info("abc123\nJane Doe").unwrap_err();
        assert!(matches!(err, Error::MalformedCommitInfo { .. }));
    }

    #[test]
    fn clone_passes_branch_and_disables_prompts() {
        let runner = Arc::new(ScriptedRunner::new());
        let git = git_with(&runner, Path::new("/tmp/target"));
        git.clone_repo("git@github.com:acme/manifest.git", Some("dev"), &CancelToken::new())
            .unwrap();

        let calls = runner.calls.lock().unwrap();
        assert_eq!(
            calls[0].args,
            vec![
                "clone",
                "git@github.com:acme/manifest.git",
                "/tmp/target",
                "--branch",
                "dev"
            ]
        );
        assert!(
            calls[0]
                .env
                .contains(&("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()))
        );
    }

    #[test]
    fn sync_fresh_directory_clones_shallow_with_sparse_paths() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("sources").join("svc");
        let runner = Arc::new(ScriptedRunner::new());
        let git = git_with(&runner, &target);

        git.sync(
            "https://example.com/svc.git",
            Some("main"),
            &["cmd/api".to_string(), "pkg".to_string()],
            &CancelToken::new(),
        )
        .unwrap();

        let dir = target.to_string_lossy().into_owned();
        let commands = runner.commands();
        assert_eq!(
            commands,
            vec![
                format!("clone --no-checkout --depth 1 --branch main https://example.com/svc.git {dir}"),
                format!("-C {dir} sparse-checkout init --cone"),
                format!("-C {dir} sparse-checkout set cmd/api pkg"),
                format!("-C {dir} checkout main"),
                format!("-C {dir} reset --hard"),
                format!("-C {dir} clean -fd"),
                format!("-C {dir} pull --rebase"),
            ]
        );
    }

    #[test]
    fn sync_existing_checkout_resets_and_disables_sparse() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("svc");
        fs::create_dir_all(target.join(".git")).unwrap();
        fs::write(target.join(INDEX_LOCK), "").unwrap();
        let runner = Arc::new(ScriptedRunner::new());

        git_with(&runner, &target)
            .sync("https://example.com/svc.git", None, &[], &CancelToken::new())
            .unwrap();

        let dir = target.to_string_lossy().into_owned();
        let commands = runner.commands();
        assert_eq!(commands[0], format!("-C {dir} reset --hard"));
        assert_eq!(commands[1], format!("-C {dir} clean -fd"));
        assert_eq!(commands[2], format!("-C {dir} sparse-checkout disable"));
        assert_eq!(commands[3], format!("-C {dir} checkout"));
        assert!(!target.join(INDEX_LOCK).exists());
    }

    #[test]
    fn sync_removes_directory_without_git_metadata() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("svc");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("stale.txt"), "x").unwrap();
        let runner = Arc::new(ScriptedRunner::new());

        git_with(&runner, &target)
            .sync("https://example.com/svc.git", None, &[], &CancelToken::new())
            .unwrap();

        assert!(!target.join("stale.txt").exists());
        assert!(runner.commands()[0].starts_with("clone --no-checkout --depth 1"));
    }

    #[test]
    fn local_exclude_is_appended_idempotently() {
        let tmp = TempDir::new().unwrap();
        let info = tmp.path().join(".git/info");
        fs::create_dir_all(&info).unwrap();
        fs::write(info.join("exclude"), "# git ls-files --others\n*.swp").unwrap();
        let git = Git::new(Arc::new(ScriptedRunner::new()), tmp.path());

        git.set_local_exclude(&["/sources/", "/.devboxstate", "/.env"])
            .unwrap();
        git.set_local_exclude(&["/sources/", "/.env"]).unwrap();

        let contents = fs::read_to_string(info.join("exclude")).unwrap();
        assert_eq!(
            contents,
            "# git ls-files --others\n*.swp\n/sources/\n/.devboxstate\n/.env\n"
        );
    }

    #[test]
    fn remote_url_is_trimmed_and_missing_remote_is_reported() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("remote.origin.url", "git@github.com:acme/svc.git\n");
        let git = git_with(&runner, Path::new("/work"));
        assert_eq!(
            git.remote_url(&CancelToken::new()).unwrap(),
            "git@github.com:acme/svc.git"
        );

        runner.fail("remote.origin.url", "");
        let err = git.remote_url(&CancelToken::new()).unwrap_err();
        assert!(matches!(err, Error::GitRemoteMissing { .. }));
    }

    #[test]
    fn clone_hint_starts_with_tip() {
        assert!(clone_hint(None).starts_with("Tip:"));
        assert!(clone_hint(Some("dev")).contains("`dev`"));
    }
}
