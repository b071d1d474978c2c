//! In-memory engine used by runner, planner and operation tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{Error, Result};

use super::super::cancel::CancelToken;
use super::{
    BuildOptions, ContainerEngine, ContainerSpec, ContainerState, ContainerSummary, ExecSpec,
    LabelFilter, LogOptions,
};

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub spec: ContainerSpec,
    pub state: ContainerState,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub images: BTreeSet<String>,
    pub pulled: Vec<String>,
    pub built: Vec<(String, String, usize)>,
    pub containers: Vec<FakeContainer>,
    pub removed: Vec<String>,
    pub volumes: BTreeMap<String, BTreeMap<String, String>>,
    pub networks: BTreeMap<String, BTreeMap<String, String>>,
    pub execs: Vec<(String, ExecSpec)>,
    pub logs: Vec<(String, LogOptions)>,
    pub failing_pulls: BTreeSet<String>,
    /// Exit codes handed to containers (by name prefix) once started.
    pub exit_codes: BTreeMap<String, i64>,
    /// Containers that never leave `created`.
    pub stuck: BTreeSet<String>,
    pub exec_exit_code: i32,
    next_id: usize,
}

/// Thread-safe fake; containers become `running` on start and report `healthy` when they
/// declare a healthcheck.
#[derive(Debug, Default)]
pub struct FakeEngine {
    pub state: Mutex<FakeState>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(self, image: &str) -> Self {
        self.state.lock().unwrap().images.insert(image.to_string());
        self
    }

    pub fn containers(&self) -> Vec<FakeContainer> {
        self.state.lock().unwrap().containers.clone()
    }

    pub fn container_names(&self) -> Vec<String> {
        self.containers().into_iter().map(|c| c.spec.name).collect()
    }
}

fn not_found(what: &str) -> Error {
    Error::CommandFailed {
        command: format!("fake {what}"),
        code: Some(1),
        stderr: format!("No such object: {what}"),
    }
}

impl ContainerEngine for FakeEngine {
    fn image_exists(&self, image: &str, cancel: &CancelToken) -> Result<bool> {
        cancel.check()?;
        Ok(self.state.lock().unwrap().images.contains(image))
    }

    fn pull_image(&self, image: &str, cancel: &CancelToken) -> Result<()> {
        cancel.check()?;
        let mut state = self.state.lock().unwrap();
        if state.failing_pulls.contains(image) {
            return Err(Error::CommandFailed {
                command: format!("docker pull {image}"),
                code: Some(1),
                stderr: "manifest unknown".to_string(),
            });
        }
        state.pulled.push(image.to_string());
        state.images.insert(image.to_string());
        Ok(())
    }

    fn build_image(
        &self,
        context: Vec<u8>,
        options: &BuildOptions,
        cancel: &CancelToken,
    ) -> Result<()> {
        cancel.check()?;
        let mut state = self.state.lock().unwrap();
        state
            .built
            .push((options.tag.clone(), options.dockerfile.clone(), context.len()));
        state.images.insert(options.tag.clone());
        Ok(())
    }

    fn create_container(&self, spec: &ContainerSpec, cancel: &CancelToken) -> Result<String> {
        cancel.check()?;
        let mut state = self.state.lock().unwrap();
        if state.containers.iter().any(|c| c.spec.name == spec.name) {
            return Err(Error::CommandFailed {
                command: "fake create".to_string(),
                code: Some(125),
                stderr: format!("Conflict. The container name \"/{}\" is already in use", spec.name),
            });
        }
        state.next_id += 1;
        let id = format!("c{}", state.next_id);
        state.containers.push(FakeContainer {
            id: id.clone(),
            spec: spec.clone(),
            state: ContainerState {
                status: "created".to_string(),
                ..ContainerState::default()
            },
        });
        Ok(id)
    }

    fn start_container(&self, id: &str, cancel: &CancelToken) -> Result<()> {
        cancel.check()?;
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let container = state
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| not_found(id))?;
        if state.stuck.contains(&container.spec.name) {
            return Ok(());
        }
        let exit = state
            .exit_codes
            .iter()
            .find(|(prefix, _)| container.spec.name.starts_with(prefix.as_str()))
            .map(|(_, code)| *code);
        container.state = match exit {
            Some(code) => ContainerState {
                status: "exited".to_string(),
                running: false,
                exit_code: code,
                health: None,
            },
            None => ContainerState {
                status: "running".to_string(),
                running: true,
                exit_code: 0,
                health: container
                    .spec
                    .healthcheck
                    .as_ref()
                    .map(|_| "healthy".to_string()),
            },
        };
        Ok(())
    }

    fn stop_container(&self, id: &str, _timeout: Duration, cancel: &CancelToken) -> Result<()> {
        cancel.check()?;
        let mut state = self.state.lock().unwrap();
        let container = state
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| not_found(id))?;
        container.state.running = false;
        container.state.status = "exited".to_string();
        Ok(())
    }

    fn remove_container(&self, id: &str, cancel: &CancelToken) -> Result<()> {
        cancel.check()?;
        let mut state = self.state.lock().unwrap();
        let before = state.containers.len();
        state.containers.retain(|c| c.id != id);
        if state.containers.len() == before {
            return Err(not_found(id));
        }
        state.removed.push(id.to_string());
        Ok(())
    }

    fn inspect_container(&self, id: &str, cancel: &CancelToken) -> Result<ContainerState> {
        cancel.check()?;
        let state = self.state.lock().unwrap();
        state
            .containers
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.state.clone())
            .ok_or_else(|| not_found(id))
    }

    fn list_containers(
        &self,
        filter: &LabelFilter,
        cancel: &CancelToken,
    ) -> Result<Vec<ContainerSummary>> {
        cancel.check()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .iter()
            .filter(|c| filter.matches(&c.spec.labels))
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                name: c.spec.name.clone(),
                image: c.spec.image.clone(),
                state: c.state.status.clone(),
                status: c.state.status.clone(),
                labels: c.spec.labels.clone(),
            })
            .collect())
    }

    fn create_volume(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
        cancel: &CancelToken,
    ) -> Result<()> {
        cancel.check()?;
        self.state
            .lock()
            .unwrap()
            .volumes
            .entry(name.to_string())
            .or_insert_with(|| labels.clone());
        Ok(())
    }

    fn list_volumes(&self, filter: &LabelFilter, cancel: &CancelToken) -> Result<Vec<String>> {
        cancel.check()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .volumes
            .iter()
            .filter(|(_, labels)| filter.matches(labels))
            .map(|(name, _)| name.clone())
            .collect())
    }

    fn remove_volume(&self, name: &str, cancel: &CancelToken) -> Result<()> {
        cancel.check()?;
        self.state.lock().unwrap().volumes.remove(name);
        Ok(())
    }

    fn create_network(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
        cancel: &CancelToken,
    ) -> Result<()> {
        cancel.check()?;
        let mut state = self.state.lock().unwrap();
        if state.networks.contains_key(name) {
            return Err(Error::CommandFailed {
                command: "fake network create".to_string(),
                code: Some(1),
                stderr: format!("network with name {name} already exists"),
            });
        }
        state.networks.insert(name.to_string(), labels.clone());
        Ok(())
    }

    fn list_networks(&self, filter: &LabelFilter, cancel: &CancelToken) -> Result<Vec<String>> {
        cancel.check()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .networks
            .iter()
            .filter(|(_, labels)| filter.matches(labels))
            .map(|(name, _)| name.clone())
            .collect())
    }

    fn remove_network(&self, name: &str, cancel: &CancelToken) -> Result<()> {
        cancel.check()?;
        self.state.lock().unwrap().networks.remove(name);
        Ok(())
    }

    fn exec(&self, container: &str, spec: &ExecSpec) -> Result<i32> {
        let mut state = self.state.lock().unwrap();
        state.execs.push((container.to_string(), spec.clone()));
        Ok(state.exec_exit_code)
    }

    fn logs(&self, container: &str, options: LogOptions) -> Result<i32> {
        self.state
            .lock()
            .unwrap()
            .logs
            .push((container.to_string(), options));
        Ok(0)
    }
}
