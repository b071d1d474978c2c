//! [`ContainerEngine`] backed by the `docker` command-line client.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

use super::super::cancel::CancelToken;
use super::super::process::{CommandRunner, CommandSpec, format_cli};
use super::{
    BuildOptions, ContainerEngine, ContainerSpec, ContainerState, ContainerSummary, ExecSpec,
    LabelFilter, LogOptions, MountSpec,
};

pub const DEFAULT_BINARY: &str = "docker";

/// Talks to the engine through its CLI; every call is a subprocess.
#[derive(Clone)]
pub struct DockerCli {
    runner: Arc<dyn CommandRunner>,
    binary: String,
}

impl DockerCli {
    pub fn new(runner: Arc<dyn CommandRunner>, binary: impl Into<String>) -> Self {
        Self {
            runner,
            binary: binary.into(),
        }
    }

    fn command<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new(&self.binary).args(args)
    }

    fn run<I, S>(&self, args: I, cancel: &CancelToken) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runner
            .run(&self.command(args), cancel)
            .map(|output| output.stdout)
    }
}

fn label_args(filter: &LabelFilter) -> Vec<String> {
    filter
        .labels
        .iter()
        .flat_map(|(key, value)| ["--filter".to_string(), format!("label={key}={value}")])
        .collect()
}

fn labels_to_args(labels: &BTreeMap<String, String>) -> Vec<String> {
    labels
        .iter()
        .flat_map(|(key, value)| ["--label".to_string(), format!("{key}={value}")])
        .collect()
}

fn lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// `docker create` arguments for `spec`, without the program name.
pub(crate) fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec!["create".to_string(), "--name".to_string(), spec.name.clone()];
    args.extend(labels_to_args(&spec.labels));

    if let Some(network) = &spec.network {
        args.extend(["--network".to_string(), network.clone()]);
        for alias in &spec.network_aliases {
            args.extend(["--network-alias".to_string(), alias.clone()]);
        }
    }
    if let Some(hostname) = &spec.hostname {
        args.extend(["--hostname".to_string(), hostname.clone()]);
    }
    for env in &spec.env {
        args.extend(["--env".to_string(), env.clone()]);
    }
    for mount in &spec.mounts {
        let rendered = match mount {
            MountSpec::Bind { source, target } => {
                format!("type=bind,source={source},target={target}")
            }
            MountSpec::Volume {
                source,
                target,
                subpath,
            } => {
                let mut value = String::from("type=volume");
                if let Some(source) = source {
                    value.push_str(&format!(",source={source}"));
                }
                value.push_str(&format!(",target={target}"));
                if let Some(subpath) = subpath {
                    value.push_str(&format!(",volume-subpath={subpath}"));
                }
                value
            }
        };
        args.extend(["--mount".to_string(), rendered]);
    }
    for port in &spec.ports {
        let mut rendered = String::new();
        if let Some(ip) = &port.host_ip {
            if ip.contains(':') {
                rendered.push_str(&format!("[{ip}]:"));
            } else {
                rendered.push_str(&format!("{ip}:"));
            }
        }
        match port.published {
            Some(published) => rendered.push_str(&format!("{published}:")),
            None if port.host_ip.is_some() => rendered.push(':'),
            None => {}
        }
        rendered.push_str(&format!("{}/{}", port.target, port.protocol));
        args.extend(["--publish".to_string(), rendered]);
    }
    if let Some(health) = &spec.healthcheck {
        // The CLI only takes the shell form; quote the exec form into one line.
        let (program, rest): (&str, &[String]) = match health.test.split_first() {
            Some((program, rest)) => (program.as_str(), rest),
            None => ("true", &[]),
        };
        args.extend([
            "--health-cmd".to_string(),
            format_cli(program, rest),
            "--health-interval".to_string(),
            format!("{}s", health.interval.as_secs().max(1)),
            "--health-timeout".to_string(),
            format!("{}s", health.timeout.as_secs().max(1)),
        ]);
    }
    if let Some(dir) = &spec.working_dir {
        args.extend(["--workdir".to_string(), dir.clone()]);
    }
    if let Some(user) = &spec.user {
        args.extend(["--user".to_string(), user.clone()]);
    }
    if let Some(timeout) = spec.stop_timeout {
        args.extend(["--stop-timeout".to_string(), timeout.as_secs().to_string()]);
    }

    let mut command = spec.command.clone();
    if let Some(entrypoint) = &spec.entrypoint {
        match entrypoint.split_first() {
            Some((program, rest)) => {
                args.extend(["--entrypoint".to_string(), program.clone()]);
                let mut full = rest.to_vec();
                full.extend(command);
                command = full;
            }
            None => args.extend(["--entrypoint".to_string(), String::new()]),
        }
    }

    args.push(spec.image.clone());
    args.extend(command);
    args
}

#[derive(Debug, Deserialize)]
struct InspectState {
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "Running", default)]
    running: bool,
    #[serde(rename = "ExitCode", default)]
    exit_code: i64,
    #[serde(rename = "Health", default)]
    health: Option<InspectHealth>,
}

#[derive(Debug, Deserialize)]
struct InspectHealth {
    #[serde(rename = "Status", default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct PsLine {
    #[serde(rename = "ID", default)]
    id: String,
    #[serde(rename = "Names", default)]
    names: String,
    #[serde(rename = "Image", default)]
    image: String,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "Labels", default)]
    labels: String,
}

pub(crate) fn parse_state(output: &str) -> Result<ContainerState> {
    let state: InspectState =
        serde_json::from_str(output.trim()).map_err(|err| Error::Engine {
            message: format!("unexpected inspect output: {err}"),
        })?;
    Ok(ContainerState {
        status: state.status,
        running: state.running,
        exit_code: state.exit_code,
        health: state
            .health
            .map(|health| health.status)
            .filter(|status| !status.is_empty()),
    })
}

pub(crate) fn parse_ps(output: &str) -> Result<Vec<ContainerSummary>> {
    lines(output)
        .iter()
        .map(|line| {
            let row: PsLine = serde_json::from_str(line).map_err(|err| Error::Engine {
                message: format!("unexpected ps output: {err}"),
            })?;
            let labels = row
                .labels
                .split(',')
                .filter_map(|pair| pair.split_once('='))
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect();
            Ok(ContainerSummary {
                id: row.id,
                name: row.names,
                image: row.image,
                state: row.state,
                status: row.status,
                labels,
            })
        })
        .collect()
}

impl ContainerEngine for DockerCli {
    fn image_exists(&self, image: &str, cancel: &CancelToken) -> Result<bool> {
        match self.run(["image", "inspect", "--format", "{{.Id}}", image], cancel) {
            Ok(_) => Ok(true),
            Err(Error::CommandFailed { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn pull_image(&self, image: &str, cancel: &CancelToken) -> Result<()> {
        self.run(["pull", "--quiet", image], cancel).map(drop)
    }

    fn build_image(
        &self,
        context: Vec<u8>,
        options: &BuildOptions,
        cancel: &CancelToken,
    ) -> Result<()> {
        let mut args = vec![
            "build".to_string(),
            "--quiet".to_string(),
            "--tag".to_string(),
            options.tag.clone(),
            "--file".to_string(),
            options.dockerfile.clone(),
        ];
        args.extend(labels_to_args(&options.labels));
        args.push("-".to_string());
        let spec = self.command(args).stdin(context);
        self.runner.run(&spec, cancel).map(drop)
    }

    fn create_container(&self, spec: &ContainerSpec, cancel: &CancelToken) -> Result<String> {
        let output = self.run(create_args(spec), cancel)?;
        Ok(output.trim().to_string())
    }

    fn start_container(&self, id: &str, cancel: &CancelToken) -> Result<()> {
        self.run(["start", id], cancel).map(drop)
    }

    fn stop_container(&self, id: &str, timeout: Duration, cancel: &CancelToken) -> Result<()> {
        let seconds = timeout.as_secs().to_string();
        self.run(["stop", "--time", seconds.as_str(), id], cancel)
            .map(drop)
    }

    fn remove_container(&self, id: &str, cancel: &CancelToken) -> Result<()> {
        self.run(["rm", "--force", "--volumes", id], cancel).map(drop)
    }

    fn inspect_container(&self, id: &str, cancel: &CancelToken) -> Result<ContainerState> {
        let output = self.run(
            ["container", "inspect", "--format", "{{json .State}}", id],
            cancel,
        )?;
        parse_state(&output)
    }

    fn list_containers(
        &self,
        filter: &LabelFilter,
        cancel: &CancelToken,
    ) -> Result<Vec<ContainerSummary>> {
        let mut args = vec![
            "ps".to_string(),
            "--all".to_string(),
            "--no-trunc".to_string(),
            "--format".to_string(),
            "{{json .}}".to_string(),
        ];
        args.extend(label_args(filter));
        parse_ps(&self.run(args, cancel)?)
    }

    fn create_volume(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
        cancel: &CancelToken,
    ) -> Result<()> {
        let mut args = vec!["volume".to_string(), "create".to_string()];
        args.extend(labels_to_args(labels));
        args.push(name.to_string());
        self.run(args, cancel).map(drop)
    }

    fn list_volumes(&self, filter: &LabelFilter, cancel: &CancelToken) -> Result<Vec<String>> {
        let mut args = vec![
            "volume".to_string(),
            "ls".to_string(),
            "--format".to_string(),
            "{{.Name}}".to_string(),
        ];
        args.extend(label_args(filter));
        Ok(lines(&self.run(args, cancel)?))
    }

    fn remove_volume(&self, name: &str, cancel: &CancelToken) -> Result<()> {
        self.run(["volume", "rm", "--force", name], cancel).map(drop)
    }

    fn create_network(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
        cancel: &CancelToken,
    ) -> Result<()> {
        let mut args = vec!["network".to_string(), "create".to_string()];
        args.extend(labels_to_args(labels));
        args.push(name.to_string());
        self.run(args, cancel).map(drop)
    }

    fn list_networks(&self, filter: &LabelFilter, cancel: &CancelToken) -> Result<Vec<String>> {
        let mut args = vec![
            "network".to_string(),
            "ls".to_string(),
            "--format".to_string(),
            "{{.Name}}".to_string(),
        ];
        args.extend(label_args(filter));
        Ok(lines(&self.run(args, cancel)?))
    }

    fn remove_network(&self, name: &str, cancel: &CancelToken) -> Result<()> {
        self.run(["network", "rm", name], cancel).map(drop)
    }

    fn exec(&self, container: &str, spec: &ExecSpec) -> Result<i32> {
        let mut args = vec!["exec".to_string()];
        if spec.interactive {
            args.push("--interactive".to_string());
        }
        if spec.tty {
            args.push("--tty".to_string());
        }
        if let Some(user) = &spec.user {
            args.extend(["--user".to_string(), user.clone()]);
        }
        if let Some(dir) = &spec.working_dir {
            args.extend(["--workdir".to_string(), dir.clone()]);
        }
        for env in &spec.env {
            args.extend(["--env".to_string(), env.clone()]);
        }
        args.push(container.to_string());
        args.extend(spec.command.iter().cloned());
        self.runner.run_attached(&self.command(args))
    }

    fn logs(&self, container: &str, options: LogOptions) -> Result<i32> {
        let mut args = vec!["logs".to_string()];
        if options.follow {
            args.push("--follow".to_string());
        }
        if let Some(tail) = options.tail {
            args.extend(["--tail".to_string(), tail.to_string()]);
        }
        args.push(container.to_string());
        self.runner.run_attached(&self.command(args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::{HealthcheckSpec, PortSpec};
    use crate::core::process::testing::ScriptedRunner;

    #[test]
    fn create_args_render_mounts_ports_and_entrypoint() {
        let mut labels = BTreeMap::new();
        labels.insert("com.devbox".to_string(), "true".to_string());
        let spec = ContainerSpec {
            name: "demo-app".into(),
            image: "local/app".into(),
            command: vec!["serve".into()],
            entrypoint: Some(vec!["tini".into(), "--".into()]),
            env: vec!["MODE=dev".into()],
            labels,
            mounts: vec![
                MountSpec::Bind {
                    source: "/src".into(),
                    target: "/app".into(),
                },
                MountSpec::Volume {
                    source: Some("demo-cache".into()),
                    target: "/cache".into(),
                    subpath: Some("app".into()),
                },
                MountSpec::Volume {
                    source: None,
                    target: "/tmp/scratch".into(),
                    subpath: None,
                },
            ],
            ports: vec![PortSpec {
                host_ip: Some("127.0.0.1".into()),
                published: Some(8080),
                target: 80,
                protocol: "tcp".into(),
            }],
            healthcheck: Some(HealthcheckSpec {
                test: vec!["curl".into(), "-f".into(), "http://localhost".into()],
                interval: Duration::from_secs(1),
                timeout: Duration::from_secs(120),
            }),
            hostname: Some("app".into()),
            network: Some("devbox-demo".into()),
            network_aliases: vec!["app".into(), "api.local".into()],
            working_dir: None,
            user: None,
            stop_timeout: Some(Duration::from_secs(5)),
        };

        let rendered = create_args(&spec).join(" ");
        assert!(rendered.starts_with("create --name demo-app --label com.devbox=true"));
        assert!(rendered.contains("--network devbox-demo --network-alias app --network-alias api.local"));
        assert!(rendered.contains("--mount type=bind,source=/src,target=/app"));
        assert!(rendered.contains("--mount type=volume,source=demo-cache,target=/cache,volume-subpath=app"));
        assert!(rendered.contains("--mount type=volume,target=/tmp/scratch"));
        assert!(rendered.contains("--publish 127.0.0.1:8080:80/tcp"));
        assert!(rendered.contains("--health-cmd curl -f http://localhost --health-interval 1s --health-timeout 120s"));
        assert!(rendered.contains("--stop-timeout 5"));
        assert!(rendered.ends_with("--entrypoint tini local/app -- serve"));
    }

    #[test]
    fn inspect_state_is_parsed() {
        let state = parse_state(
            r#"{"Status":"running","Running":true,"ExitCode":0,"Health":{"Status":"healthy","FailingStreak":0}}"#,
        )
        .unwrap();
        assert!(state.running);
        assert_eq!(state.health.as_deref(), Some("healthy"));

        let exited = parse_state(r#"{"Status":"exited","Running":false,"ExitCode":3}"#).unwrap();
        assert_eq!((exited.exit_code, exited.health), (3, None));
    }

    #[test]
    fn ps_lines_are_parsed_with_labels() {
        let output = concat!(
            r#"{"ID":"abc","Names":"demo-app","Image":"local/app","State":"running","Status":"Up 2 minutes","Labels":"com.devbox=true,com.devbox.name=app"}"#,
            "\n\n"
        );
        let rows = parse_ps(output).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].labels["com.devbox.name"], "app");
        assert_eq!(rows[0].state, "running");
    }

    #[test]
    fn missing_image_is_not_an_error() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail("image inspect", "No such image");
        let docker = DockerCli::new(runner.clone(), DEFAULT_BINARY);
        assert!(!docker.image_exists("alpine:3.20.3", &CancelToken::new()).unwrap());
        assert!(docker.image_exists("alpine:3.20.3", &CancelToken::new()).unwrap());
    }

    #[test]
    fn list_uses_label_filters() {
        let runner = Arc::new(ScriptedRunner::new());
        let docker = DockerCli::new(runner.clone(), "podman");
        docker
            .list_containers(
                &LabelFilter::new().with("com.devbox.project", "demo"),
                &CancelToken::new(),
            )
            .unwrap();
        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[0].program, "podman");
        assert_eq!(
            calls[0].args.join(" "),
            "ps --all --no-trunc --format {{json .}} --filter label=com.devbox.project=demo"
        );
    }
}
