use std::path::PathBuf;

use crate::error::{Error, Result};

use super::super::cancel::CancelToken;
use super::super::events::Event;
use super::super::git::{Git, clone_hint};
use super::super::project::Source;
use super::RunContext;

/// Keep the checkout of an unmounted source in `./sources/<name>` at the tip of its branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceJob {
    pub source: Source,
    pub dir: PathBuf,
}

impl SourceJob {
    pub fn new(source: Source, dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            dir: dir.into(),
        }
    }

    pub(super) fn start(&self, ctx: &RunContext, cancel: &CancelToken) -> Result<()> {
        let git = Git::new(ctx.commands.clone(), &self.dir);
        let fresh = !self.dir.join(".git").exists();
        let branch = self.source.branch.as_deref();
        let sync_cancel = cancel.with_timeout(ctx.sync_timeout);

        git.sync(
            &self.source.url,
            branch,
            &self.source.sparse_checkout,
            &sync_cancel,
        )
        .map_err(|source| match source {
            // The parent token firing is a cancellation; only the sync deadline is a failure.
            Error::Cancelled if cancel.is_cancelled() => Error::Cancelled,
            source if fresh => Error::GitCloneFailed {
                url: self.source.url.clone(),
                hint: clone_hint(branch),
                source: Box::new(source),
            },
            source => Error::GitSyncFailed {
                path: self.dir.clone(),
                source: Box::new(source),
            },
        })?;

        let commit = git.info(cancel).ok();
        ctx.emit(Event::SourceSynced {
            name: self.source.name.clone(),
            path: self.dir.clone(),
            commit,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::fake::FakeEngine;
    use crate::core::process::testing::ScriptedRunner;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn source() -> Source {
        Source {
            name: "service-1".into(),
            url: "git@example.com:team/service-1.git".into(),
            branch: Some("main".into()),
            sparse_checkout: vec!["api".into()],
            environment: Vec::new(),
        }
    }

    fn context(runner: &Arc<ScriptedRunner>, dir: &TempDir) -> RunContext {
        RunContext::new(
            "demo",
            dir.path(),
            Arc::new(FakeEngine::new()),
            runner.clone(),
        )
        .with_timeouts(Duration::from_millis(300), Duration::from_secs(5))
    }

    #[test]
    fn fresh_checkout_is_cloned_and_reported() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("log -1", "abcdef0123456789\nAda\nMon Oct 19\nInitial commit\n");
        let (tx, rx) = mpsc::channel();
        let ctx = context(&runner, &dir).with_events(tx);
        let checkout = dir.path().join("sources/service-1");

        SourceJob::new(source(), &checkout)
            .start(&ctx, &CancelToken::new())
            .unwrap();
        drop(ctx);

        let commands = runner.commands();
        assert!(commands[0].starts_with("clone --no-checkout --depth 1 --branch main"));
        assert!(commands.iter().any(|c| c.ends_with("sparse-checkout set api")));
        assert!(commands.iter().any(|c| c.ends_with("pull --rebase")));

        let events: Vec<Event> = rx.iter().collect();
        match &events[..] {
            [Event::SourceSynced { name, commit, .. }] => {
                assert_eq!(name, "service-1");
                assert_eq!(commit.as_ref().unwrap().short_hash(), "abcdef01");
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn clone_failure_carries_hint() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail("clone", "Repository not found");
        let err = SourceJob::new(source(), dir.path().join("sources/service-1"))
            .start(&context(&runner, &dir), &CancelToken::new())
            .unwrap_err();
        match err {
            Error::GitCloneFailed { hint, .. } => assert!(hint.contains("`main`")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn existing_checkout_failure_is_a_sync_error() {
        let dir = TempDir::new().unwrap();
        let checkout = dir.path().join("sources/service-1");
        std::fs::create_dir_all(checkout.join(".git")).unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail("pull --rebase", "conflict");
        let err = SourceJob::new(source(), &checkout)
            .start(&context(&runner, &dir), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, Error::GitSyncFailed { path, .. } if path == checkout));
    }
}
