use std::error::Error as StdError;
use std::process::ExitCode;

use crate::Error;

pub fn exit_code(err: &Error) -> ExitCode {
    match err {
        Error::InvalidProjectName { .. } => ExitCode::from(64),
        Error::AmbiguousProject { .. } => ExitCode::from(64),
        Error::AmbiguousSource { .. } => ExitCode::from(64),
        Error::DestroyRequiresName => ExitCode::from(64),
        Error::AlreadyMounted { .. } => ExitCode::from(64),
        Error::NotMounted { .. } => ExitCode::from(64),
        Error::UnknownDependency { .. } => ExitCode::from(65),
        Error::CyclicOrUnresolved { .. } => ExitCode::from(65),
        Error::MalformedCommitInfo { .. } => ExitCode::from(65),
        Error::InvalidVolumeSpec { .. } => ExitCode::from(65),
        Error::StateFileCorrupt { .. } => ExitCode::from(65),
        Error::ParseManifest { .. } => ExitCode::from(65),
        Error::InvalidManifest { .. } => ExitCode::from(65),
        Error::ParseSettings { .. } => ExitCode::from(65),
        Error::HostsBlockUnterminated { .. } => ExitCode::from(65),
        Error::UnknownScenario { .. } => ExitCode::from(66),
        Error::UnknownProject { .. } => ExitCode::from(66),
        Error::UnknownSource { .. } => ExitCode::from(66),
        Error::UnknownService { .. } => ExitCode::from(66),
        Error::ServiceNotRunning { .. } => ExitCode::from(66),
        Error::MissingProjectDir { .. } => ExitCode::from(66),
        Error::ManifestNotFound { .. } => ExitCode::from(66),
        Error::MountTargetMissing { .. } => ExitCode::from(66),
        Error::GitRemoteMissing { .. } => ExitCode::from(66),
        Error::ImagePullFailed { .. } => ExitCode::from(70),
        Error::BuildFailed { .. } => ExitCode::from(70),
        Error::ContainerCreateFailed { .. } => ExitCode::from(70),
        Error::ContainerStartFailed { .. } => ExitCode::from(70),
        Error::ReadinessTimeout { .. } => ExitCode::from(70),
        Error::ActionTimeout { .. } => ExitCode::from(70),
        Error::ActionNonZeroExit { .. } => ExitCode::from(70),
        Error::GitCloneFailed { .. } => ExitCode::from(70),
        Error::GitSyncFailed { .. } => ExitCode::from(70),
        Error::CommandSpawn { .. } => ExitCode::from(70),
        Error::CommandFailed { .. } => ExitCode::from(70),
        Error::Engine { .. } => ExitCode::from(70),
        Error::Cancelled => ExitCode::from(70),
        Error::ScenarioFailed { .. } => ExitCode::from(70),
        Error::WorkingDirectoryUnavailable { .. } => ExitCode::from(70),
        Error::HomeDirectoryUnavailable => ExitCode::from(70),
        Error::AlreadyInitialized { .. } => ExitCode::from(73),
        Error::CreateDir { .. } => ExitCode::from(73),
        Error::ReadFile { .. } => ExitCode::from(74),
        Error::WriteFile { .. } => ExitCode::from(74),
        Error::RemoveDir { .. } => ExitCode::from(74),
        Error::ReadSettings { .. } => ExitCode::from(74),
        Error::PermissionDenied { .. } => ExitCode::from(77),
    }
}

/// The error and its causes, one per line, each cause indented one level deeper. Causes
/// already spelled out by the message above them are skipped.
pub fn error_stack(err: &dyn StdError) -> String {
    let mut rendered = err.to_string();
    let mut parent = rendered.clone();
    let mut depth = 1;
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !parent.contains(&text) {
            rendered.push('\n');
            rendered.push_str(&"  ".repeat(depth));
            rendered.push_str(&text);
            depth += 1;
        }
        parent = text;
        source = cause.source();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn exit_code_matches_expected_values() {
        assert_eq!(
            exit_code(&Error::InvalidProjectName {
                name: "a b".into()
            }),
            ExitCode::from(64)
        );
        assert_eq!(exit_code(&Error::DestroyRequiresName), ExitCode::from(64));
        assert_eq!(
            exit_code(&Error::InvalidManifest {
                path: "devbox.yaml".into(),
                message: "bad".into()
            }),
            ExitCode::from(65)
        );
        assert_eq!(
            exit_code(&Error::UnknownProject { name: None }),
            ExitCode::from(66)
        );
        assert_eq!(
            exit_code(&Error::ReadinessTimeout {
                name: "demo-db".into(),
                waited_secs: 300
            }),
            ExitCode::from(70)
        );
        assert_eq!(
            exit_code(&Error::AlreadyInitialized {
                name: "demo".into(),
                path: "/tmp/demo".into()
            }),
            ExitCode::from(73)
        );
        assert_eq!(
            exit_code(&Error::WriteFile {
                path: "file".into(),
                source: io::Error::new(io::ErrorKind::Other, "err")
            }),
            ExitCode::from(74)
        );
        assert_eq!(
            exit_code(&Error::PermissionDenied {
                path: "/etc/hosts".into(),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "denied")
            }),
            ExitCode::from(77)
        );
        assert_eq!(
            exit_code(&Error::ParseSettings {
                path: "config.toml".into(),
                source: toml::from_str::<toml::Value>("invalid").unwrap_err()
            }),
            ExitCode::from(65)
        );
    }

    #[test]
    fn error_stack_nests_each_cause() {
        let err = Error::GitCloneFailed {
            url: "https://github.com/acme/demo".into(),
            hint: "Tip: check your credentials.".into(),
            source: Box::new(Error::BuildFailed {
                image: "local/app".into(),
                source: Box::new(Error::Engine {
                    message: "daemon unreachable".into(),
                }),
            }),
        };
        assert_eq!(
            error_stack(&err),
            "Failed to clone https://github.com/acme/demo. Tip: check your credentials.\n  \
             Failed to build image local/app\n    \
             Container engine error: daemon unreachable"
        );
    }

    #[test]
    fn error_stack_skips_causes_already_in_the_message() {
        let err = Error::WriteFile {
            path: "/etc/hosts".into(),
            source: io::Error::new(io::ErrorKind::Other, "disk full"),
        };
        assert_eq!(error_stack(&err), "Failed to write /etc/hosts: disk full");
    }
}
