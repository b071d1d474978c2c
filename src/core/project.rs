//! In-memory project model built from a manifest checkout plus its local state.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

use super::manifest::{self, PortBinding, RawAction, RawManifest, RawService};
use super::state::{STATE_FILE_NAME, State};

/// Directory (relative to the project) holding source checkouts.
pub const SOURCES_DIR: &str = "sources";
/// User-edited environment file created by `init`.
pub const ENV_FILE_NAME: &str = ".env";

pub const LABEL_PROJECT: &str = "com.docker.compose.project";
pub const LABEL_SERVICE: &str = "com.docker.compose.service";
pub const LABEL_VERSION: &str = "com.docker.compose.version";
pub const LABEL_WORKING_DIR: &str = "com.docker.compose.project.working_dir";
pub const LABEL_CONFIG_FILES: &str = "com.docker.compose.project.config_files";
pub const LABEL_ONEOFF: &str = "com.docker.compose.oneoff";
pub const LABEL_ENVIRONMENT_FILE: &str = "com.docker.compose.project.environment_file";
pub const COMPOSE_VERSION: &str = "2.29.7";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSpec {
    /// Build context as written in the manifest, or the mounted absolute path.
    pub context: String,
    /// Dockerfile path relative to the context.
    pub dockerfile: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub name: String,
    pub image: String,
    pub build: Option<BuildSpec>,
    pub command: Vec<String>,
    pub entrypoint: Option<Vec<String>>,
    pub environment: Vec<String>,
    pub env_files: Vec<String>,
    pub volumes: Vec<String>,
    pub ports: Vec<PortBinding>,
    pub healthcheck: Option<Vec<String>>,
    pub depends_on: Vec<String>,
    pub hostname: Option<String>,
    pub host_aliases: Vec<String>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    pub stop_grace_period: Option<Duration>,
    pub labels: BTreeMap<String, String>,
    pub profiles: Vec<String>,
    /// `./sources/...` paths read by bind volumes and the build context, before remapping.
    pub source_paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub name: String,
    pub image: String,
    /// Commands run one after another, each in a disposable container.
    pub commands: Vec<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    pub environment: Vec<String>,
    pub env_files: Vec<String>,
    pub volumes: Vec<String>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub name: String,
    pub url: String,
    pub branch: Option<String>,
    pub sparse_checkout: Vec<String>,
    pub environment: Vec<String>,
}

impl Source {
    /// Project-relative path of the checkout: `./sources/<name>`.
    pub fn relative_path(&self) -> String {
        format!("./{SOURCES_DIR}/{}", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    pub name: String,
    pub service: String,
    pub description: Option<String>,
    pub command: Vec<String>,
    pub entrypoint: Option<Vec<String>>,
    pub tty: bool,
    pub stdin_open: bool,
    pub working_dir: Option<String>,
    pub user: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertConfig {
    pub domains: Vec<String>,
    pub key_file: Option<PathBuf>,
    pub cert_file: Option<PathBuf>,
}

/// Internal image built from a Dockerfile inside the project or a mounted source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDef {
    pub image: String,
    pub context: PathBuf,
    pub dockerfile: PathBuf,
}

/// A loaded project.
#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,
    pub work_dir: PathBuf,
    pub manifest_path: PathBuf,
    pub env_files: Vec<PathBuf>,
    pub services: BTreeMap<String, Service>,
    pub actions: BTreeMap<String, Action>,
    pub sources: BTreeMap<String, Source>,
    pub scenarios: BTreeMap<String, Scenario>,
    /// Hosts-file lines, `"<ip> <host> [<host>...]"`.
    pub host_entries: Vec<String>,
    pub cert: Option<CertConfig>,
    pub default_stop_grace_period: Option<Duration>,
    pub state: State,
    profiles: Vec<String>,
}

impl Project {
    /// Load `<app_dir>/<name>`, enabling services of the given compose profiles.
    pub fn load(app_dir: &Path, name: &str, profiles: &[String]) -> Result<Self> {
        let work_dir = app_dir.join(name);
        if !work_dir.is_dir() {
            return Err(Error::MissingProjectDir { path: work_dir });
        }
        let manifest_path = manifest::find_manifest(&work_dir)?;
        let raw = RawManifest::load(&manifest_path)?;
        Self::from_manifest(name, &work_dir, &manifest_path, raw, profiles)
    }

    pub(crate) fn from_manifest(
        name: &str,
        work_dir: &Path,
        manifest_path: &Path,
        raw: RawManifest,
        profiles: &[String],
    ) -> Result<Self> {
        let env_file = work_dir.join(ENV_FILE_NAME);
        let env_files = if env_file.is_file() {
            vec![env_file]
        } else {
            Vec::new()
        };

        let invalid = |message: String| Error::InvalidManifest {
            path: manifest_path.to_path_buf(),
            message,
        };

        let mut project = Project {
            name: name.to_string(),
            work_dir: work_dir.to_path_buf(),
            manifest_path: manifest_path.to_path_buf(),
            env_files,
            services: BTreeMap::new(),
            actions: BTreeMap::new(),
            sources: BTreeMap::new(),
            scenarios: BTreeMap::new(),
            host_entries: Vec::new(),
            cert: None,
            default_stop_grace_period: None,
            state: State::load(&work_dir.join(STATE_FILE_NAME))?,
            profiles: profiles.to_vec(),
        };

        for (service_name, raw_service) in raw.services {
            let service = convert_service(name, &service_name, raw_service).map_err(&invalid)?;
            if service.profiles.is_empty()
                || service.profiles.iter().any(|profile| profiles.contains(profile))
            {
                project.services.insert(service_name, service);
            }
        }
        for (action_name, raw_action) in raw.actions {
            project
                .actions
                .insert(action_name.clone(), convert_action(&action_name, raw_action));
        }

        project.apply_sources(raw.sources);
        project.apply_scenarios(raw.scenarios);
        project.apply_hosts(raw.hosts).map_err(&invalid)?;
        project.apply_cert(raw.cert);
        project
            .setup_grace_period(raw.default_stop_grace_period.as_deref())
            .map_err(&invalid)?;
        project.apply_labels();
        project.remount_sources();
        project.validate_dependencies()?;

        Ok(project)
    }

    /// Re-run loading and replace `self` as a whole.
    pub fn reload(&mut self) -> Result<()> {
        let app_dir = self
            .work_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        *self = Project::load(&app_dir, &self.name, &self.profiles)?;
        Ok(())
    }

    pub fn save_state(&self) -> Result<()> {
        self.state.save(&self.state_path())
    }

    pub fn state_path(&self) -> PathBuf {
        self.work_dir.join(STATE_FILE_NAME)
    }

    /// `devbox-<project>`.
    pub fn network_name(&self) -> String {
        format!("devbox-{}", self.name)
    }

    pub fn local_mounts(&self) -> &BTreeMap<String, String> {
        &self.state.mounts
    }

    pub fn profiles(&self) -> &[String] {
        &self.profiles
    }

    /// Absolute directory of a source checkout.
    pub fn source_dir(&self, source: &str) -> PathBuf {
        self.work_dir.join(SOURCES_DIR).join(source)
    }

    /// Resolve a manifest path (`./x`, `x` or absolute) against the project directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            clean_path(candidate)
        } else {
            clean_path(&self.work_dir.join(candidate))
        }
    }

    /// Internal images, one per distinct image reference.
    pub fn containers(&self) -> Vec<ContainerDef> {
        let mut seen = BTreeSet::new();
        let mut defs = Vec::new();
        for service in self.services.values() {
            let Some(build) = &service.build else {
                continue;
            };
            if !seen.insert(service.image.clone()) {
                continue;
            }
            let context = self.resolve(&build.context);
            defs.push(ContainerDef {
                image: service.image.clone(),
                dockerfile: context.join(&build.dockerfile),
                context,
            });
        }
        defs
    }

    /// Services reading `source_path` or a path below it that no deeper mount claims.
    pub fn services_affected_by(&self, source_path: &str) -> Vec<String> {
        let source_path = source_path.trim_end_matches('/');
        let mut keys: Vec<&str> = self
            .state
            .mounts
            .keys()
            .map(|key| key.trim_end_matches('/'))
            .collect();
        keys.push(source_path);
        self.services
            .values()
            .filter(|service| {
                service
                    .source_paths
                    .iter()
                    .any(|used| covering_key(used, &keys) == Some(source_path))
            })
            .map(|service| service.name.clone())
            .collect()
    }

    fn apply_sources(&mut self, raw: BTreeMap<String, manifest::RawSource>) {
        for (name, source) in raw {
            self.sources.insert(
                name.clone(),
                Source {
                    name,
                    url: source.url,
                    branch: source.branch.filter(|branch| !branch.is_empty()),
                    sparse_checkout: source.sparse_checkout,
                    environment: source
                        .environment
                        .map(|env| env.into_pairs())
                        .unwrap_or_default(),
                },
            );
        }
    }

    fn apply_scenarios(&mut self, raw: BTreeMap<String, manifest::RawScenario>) {
        for (name, scenario) in raw {
            self.scenarios.insert(
                name.clone(),
                Scenario {
                    name,
                    service: scenario.service,
                    description: scenario.description,
                    command: scenario
                        .command
                        .map(|command| command.into_words())
                        .unwrap_or_default(),
                    entrypoint: scenario.entrypoint.map(|entry| entry.into_words()),
                    tty: scenario.tty.unwrap_or(true),
                    stdin_open: scenario.stdin_open.unwrap_or(true),
                    working_dir: scenario.working_dir,
                    user: scenario.user,
                },
            );
        }
    }

    fn apply_hosts(&mut self, raw: Vec<manifest::RawHost>) -> std::result::Result<(), String> {
        let mut by_ip: Vec<(String, Vec<String>)> = Vec::new();
        for entry in raw {
            let ip: std::net::IpAddr = entry
                .ip
                .trim()
                .parse()
                .map_err(|_| format!("invalid IP address `{}` in x-devbox-hosts", entry.ip))?;
            let ip = ip.to_string();
            let mut hosts = Vec::with_capacity(entry.hosts.len());
            for host in &entry.hosts {
                hosts.push(
                    to_ascii_host(host)
                        .ok_or_else(|| format!("invalid host name `{host}` in x-devbox-hosts"))?,
                );
            }
            match by_ip.iter_mut().find(|(existing, _)| *existing == ip) {
                Some((_, existing)) => existing.extend(hosts),
                None => by_ip.push((ip, hosts)),
            }
        }
        self.host_entries = by_ip
            .into_iter()
            .filter(|(_, hosts)| !hosts.is_empty())
            .map(|(ip, hosts)| format!("{ip} {}", hosts.join(" ")))
            .collect();
        Ok(())
    }

    fn apply_cert(&mut self, raw: Option<manifest::RawCert>) {
        self.cert = raw.map(|cert| CertConfig {
            domains: cert.domains,
            key_file: cert.key_file.map(|file| self.resolve(&file)),
            cert_file: cert.cert_file.map(|file| self.resolve(&file)),
        });
    }

    fn setup_grace_period(&mut self, raw: Option<&str>) -> std::result::Result<(), String> {
        let Some(raw) = raw else {
            return Ok(());
        };
        let period = manifest::parse_duration(raw)
            .ok_or_else(|| format!("invalid x-devbox-default-stop-grace-period `{raw}`"))?;
        self.default_stop_grace_period = Some(period);
        for service in self.services.values_mut() {
            if service.stop_grace_period.is_none() {
                service.stop_grace_period = Some(period);
            }
        }
        Ok(())
    }

    fn apply_labels(&mut self) {
        let working_dir = self.work_dir.to_string_lossy().into_owned();
        let config_files = self.manifest_path.to_string_lossy().into_owned();
        let env_files = self
            .env_files
            .iter()
            .map(|path| path.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(",");
        for (name, service) in self.services.iter_mut() {
            let labels = &mut service.labels;
            labels.insert(LABEL_PROJECT.to_string(), self.name.clone());
            labels.insert(LABEL_SERVICE.to_string(), name.clone());
            labels.insert(LABEL_VERSION.to_string(), COMPOSE_VERSION.to_string());
            labels.insert(LABEL_WORKING_DIR.to_string(), working_dir.clone());
            labels.insert(LABEL_CONFIG_FILES.to_string(), config_files.clone());
            labels.insert(LABEL_ONEOFF.to_string(), "False".to_string());
            if !env_files.is_empty() {
                labels.insert(LABEL_ENVIRONMENT_FILE.to_string(), env_files.clone());
            }
        }
    }

    /// Point bind volumes and build contexts under `./sources/` at their local mounts.
    fn remount_sources(&mut self) {
        let mounts = self.state.mounts.clone();
        let work_dir = self.work_dir.clone();
        let sources = self.sources.clone();

        for service in self.services.values_mut() {
            let mut used_sources: BTreeSet<String> = BTreeSet::new();
            let mut mounted_sources: BTreeSet<String> = BTreeSet::new();

            for volume in service.volumes.iter_mut() {
                let Some((source, target)) = volume.split_once(':') else {
                    continue;
                };
                let Some(relative) = source_relative(source, &work_dir) else {
                    continue;
                };
                if let Some(name) = source_name(&relative) {
                    used_sources.insert(name.to_string());
                }
                service.source_paths.push(relative.clone());
                if let Some(remapped) = remap(&relative, &mounts) {
                    if let Some(name) = source_name(&relative) {
                        mounted_sources.insert(name.to_string());
                    }
                    *volume = format!("{remapped}:{target}");
                }
            }

            if let Some(build) = service.build.as_mut() {
                if let Some(relative) = source_relative(&build.context, &work_dir) {
                    if let Some(name) = source_name(&relative) {
                        used_sources.insert(name.to_string());
                    }
                    service.source_paths.push(relative.clone());
                    if let Some(remapped) = remap(&relative, &mounts) {
                        if let Some(name) = source_name(&relative) {
                            mounted_sources.insert(name.to_string());
                        }
                        build.context = remapped;
                    }
                }
            }

            for name in &used_sources {
                if let Some(source) = sources.get(name) {
                    service.environment.extend(source.environment.iter().cloned());
                }
            }
            for name in &mounted_sources {
                service.environment.push(format!(
                    "DEVBOX_{}_{}=mounted",
                    env_name(&service.name),
                    env_name(name)
                ));
            }
        }
    }

    fn validate_dependencies(&self) -> Result<()> {
        let known: BTreeSet<&str> = self
            .services
            .keys()
            .chain(self.actions.keys())
            .map(String::as_str)
            .collect();
        let entities = self
            .services
            .values()
            .map(|service| (&service.name, &service.depends_on))
            .chain(
                self.actions
                    .values()
                    .map(|action| (&action.name, &action.depends_on)),
            );
        for (entity, depends_on) in entities {
            if let Some(missing) = depends_on.iter().find(|dep| !known.contains(dep.as_str())) {
                return Err(Error::UnknownDependency {
                    entity: entity.clone(),
                    dependency: missing.clone(),
                });
            }
        }
        Ok(())
    }
}

fn convert_service(
    project: &str,
    name: &str,
    raw: RawService,
) -> std::result::Result<Service, String> {
    let build = raw.build.as_ref().map(|build| BuildSpec {
        context: build.context().to_string(),
        dockerfile: build.dockerfile().to_string(),
    });
    let image = match (&raw.image, &build) {
        (Some(image), _) => image.clone(),
        (None, Some(_)) => format!("{project}-{name}"),
        (None, None) => return Err(format!("service `{name}` declares neither image nor build")),
    };
    let ports = raw
        .ports
        .iter()
        .map(PortBinding::from_raw)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let stop_grace_period = match raw.stop_grace_period.as_deref() {
        Some(value) => Some(
            manifest::parse_duration(value)
                .ok_or_else(|| format!("invalid stop_grace_period `{value}` for `{name}`"))?,
        ),
        None => None,
    };

    Ok(Service {
        name: name.to_string(),
        image,
        build,
        command: raw.command.map(|c| c.into_words()).unwrap_or_default(),
        entrypoint: raw.entrypoint.map(|e| e.into_words()),
        environment: raw.environment.map(|e| e.into_pairs()).unwrap_or_default(),
        env_files: raw.env_file.map(|f| f.into_items()).unwrap_or_default(),
        volumes: raw.volumes,
        ports,
        healthcheck: raw.healthcheck.as_ref().and_then(|h| h.command()),
        depends_on: raw.depends_on.map(|d| d.into_names()).unwrap_or_default(),
        hostname: raw.hostname.filter(|host| !host.is_empty()),
        host_aliases: raw.host_aliases,
        working_dir: raw.working_dir,
        user: raw.user,
        stop_grace_period,
        labels: raw.labels.map(|l| l.into_map()).unwrap_or_default(),
        profiles: raw.profiles,
        source_paths: Vec::new(),
    })
}

fn convert_action(name: &str, raw: RawAction) -> Action {
    let mut commands: Vec<Vec<String>> = raw.commands.into_iter().map(|c| c.into_words()).collect();
    if let Some(command) = raw.command {
        commands.insert(0, command.into_words());
    }
    Action {
        name: name.to_string(),
        image: raw.image,
        commands,
        entrypoint: raw.entrypoint.map(|e| e.into_words()),
        environment: raw.environment.map(|e| e.into_pairs()).unwrap_or_default(),
        env_files: raw.env_file.map(|f| f.into_items()).unwrap_or_default(),
        volumes: raw.volumes,
        working_dir: raw.working_dir,
        user: raw.user,
        depends_on: raw.depends_on.map(|d| d.into_names()).unwrap_or_default(),
    }
}

/// `./sources/...` form of a path under the project's sources directory.
fn source_relative(source: &str, work_dir: &Path) -> Option<String> {
    let path = Path::new(source);
    let absolute = if path.is_absolute() {
        clean_path(path)
    } else if source.starts_with("./") || source.starts_with("../") || !source.contains(':') {
        clean_path(&work_dir.join(path))
    } else {
        return None;
    };
    let relative = absolute.strip_prefix(work_dir).ok()?;
    let relative = relative.to_string_lossy();
    relative
        .starts_with(&format!("{SOURCES_DIR}/"))
        .then(|| format!("./{relative}"))
}

/// `service-1` from `./sources/service-1/...`.
fn source_name(relative: &str) -> Option<&str> {
    relative
        .strip_prefix("./sources/")?
        .split('/')
        .next()
        .filter(|name| !name.is_empty())
}

/// Longest of `keys` equal to `relative` or a parent of it.
fn covering_key<'k>(relative: &str, keys: &[&'k str]) -> Option<&'k str> {
    keys.iter()
        .copied()
        .filter(|key| {
            relative == *key
                || relative
                    .strip_prefix(key)
                    .is_some_and(|rest| rest.starts_with('/'))
        })
        .max_by_key(|key| key.len())
}

/// Longest mount key equal to `relative` or a parent of it, with the remainder appended.
fn remap(relative: &str, mounts: &BTreeMap<String, String>) -> Option<String> {
    mounts
        .iter()
        .filter_map(|(key, target)| {
            let key_trimmed = key.trim_end_matches('/');
            if relative == key_trimmed {
                Some((key_trimmed.len(), target.clone()))
            } else {
                relative
                    .strip_prefix(key_trimmed)
                    .and_then(|rest| rest.strip_prefix('/'))
                    .map(|rest| {
                        let base = target.trim_end_matches('/');
                        (key_trimmed.len(), format!("{base}/{rest}"))
                    })
            }
        })
        .max_by_key(|(len, _)| *len)
        .map(|(_, remapped)| remapped)
}

/// Upper-case, non-alphanumeric runs collapsed to `_`, never starting with a digit.
pub fn env_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    let mut previous_underscore = false;
    for ch in name.chars() {
        if ch.is_alphanumeric() {
            result.extend(ch.to_uppercase());
            previous_underscore = false;
        } else if !previous_underscore {
            result.push('_');
            previous_underscore = true;
        }
    }
    if result.chars().next().is_some_and(|ch| !ch.is_alphabetic()) {
        result.insert(0, '_');
    }
    result
}

/// Lexically normalise `.` and `..` components.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}

/// IDNA (punycode) form of a host name; `None` for names that cannot be encoded.
pub fn to_ascii_host(host: &str) -> Option<String> {
    match url::Host::parse(host.trim()).ok()? {
        url::Host::Domain(domain) => Some(domain),
        _ => None,
    }
}
