//! Compose-style manifest subset read with `serde_yaml`.
//!
//! Only the keys devbox acts on are modelled; everything else in the document is ignored.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_yaml::Value;

use crate::error::{Error, IoAction, Result};

/// Manifest file names probed in a project directory, in order.
pub const MANIFEST_FILE_NAMES: &[&str] = &[
    "devbox.yaml",
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];

#[derive(Debug, Default, Deserialize)]
pub struct RawManifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub services: BTreeMap<String, RawService>,
    #[serde(default, rename = "x-devbox-sources")]
    pub sources: BTreeMap<String, RawSource>,
    #[serde(default, rename = "x-devbox-scenarios")]
    pub scenarios: BTreeMap<String, RawScenario>,
    #[serde(default, rename = "x-devbox-actions")]
    pub actions: BTreeMap<String, RawAction>,
    #[serde(default, rename = "x-devbox-hosts")]
    pub hosts: Vec<RawHost>,
    #[serde(default, rename = "x-devbox-cert")]
    pub cert: Option<RawCert>,
    #[serde(default, rename = "x-devbox-default-stop-grace-period")]
    pub default_stop_grace_period: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawService {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub build: Option<RawBuild>,
    #[serde(default)]
    pub command: Option<StringOrList>,
    #[serde(default)]
    pub entrypoint: Option<StringOrList>,
    #[serde(default)]
    pub environment: Option<KeyValues>,
    #[serde(default)]
    pub env_file: Option<StringOrList>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub ports: Vec<RawPort>,
    #[serde(default)]
    pub healthcheck: Option<RawHealthcheck>,
    #[serde(default)]
    pub depends_on: Option<DependsOn>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub host_aliases: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub stop_grace_period: Option<String>,
    #[serde(default)]
    pub labels: Option<KeyValues>,
    #[serde(default)]
    pub profiles: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawBuild {
    Context(String),
    Spec {
        #[serde(default)]
        context: Option<String>,
        #[serde(default)]
        dockerfile: Option<String>,
    },
}

impl RawBuild {
    pub fn context(&self) -> &str {
        match self {
            RawBuild::Context(context) => context,
            RawBuild::Spec { context, .. } => context.as_deref().unwrap_or("."),
        }
    }

    pub fn dockerfile(&self) -> &str {
        match self {
            RawBuild::Spec {
                dockerfile: Some(dockerfile),
                ..
            } => dockerfile,
            _ => "Dockerfile",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RawHealthcheck {
    #[serde(default)]
    pub test: Option<StringOrList>,
    #[serde(default)]
    pub disable: bool,
}

impl RawHealthcheck {
    /// Test command without its `CMD`/`CMD-SHELL` marker; `NONE` and `disable` yield nothing.
    pub fn command(&self) -> Option<Vec<String>> {
        if self.disable {
            return None;
        }
        match self.test.as_ref()? {
            StringOrList::One(line) => Some(vec![line.clone()]),
            StringOrList::Many(items) => match items.first().map(String::as_str) {
                Some("NONE") | None => None,
                Some("CMD") | Some("CMD-SHELL") => {
                    let rest = items[1..].to_vec();
                    (!rest.is_empty()).then_some(rest)
                }
                Some(_) => Some(items.clone()),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawPort {
    Number(u16),
    Short(String),
}

#[derive(Debug, Default, Deserialize)]
pub struct RawSource {
    pub url: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default, rename = "sparseCheckout")]
    pub sparse_checkout: Vec<String>,
    #[serde(default)]
    pub environment: Option<KeyValues>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawScenario {
    pub service: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub command: Option<StringOrList>,
    #[serde(default)]
    pub entrypoint: Option<StringOrList>,
    #[serde(default)]
    pub tty: Option<bool>,
    #[serde(default)]
    pub stdin_open: Option<bool>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawAction {
    pub image: String,
    #[serde(default)]
    pub command: Option<StringOrList>,
    #[serde(default)]
    pub commands: Vec<StringOrList>,
    #[serde(default)]
    pub entrypoint: Option<StringOrList>,
    #[serde(default)]
    pub environment: Option<KeyValues>,
    #[serde(default)]
    pub env_file: Option<StringOrList>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub depends_on: Option<DependsOn>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawHost {
    pub ip: String,
    #[serde(default)]
    pub hosts: Vec<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawCert {
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default, rename = "keyFile")]
    pub key_file: Option<String>,
    #[serde(default, rename = "certFile")]
    pub cert_file: Option<String>,
}

/// A scalar string or a list of strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    One(String),
    Many(Vec<String>),
}

impl StringOrList {
    /// Items as a list; a single string is split on whitespace.
    pub fn into_words(self) -> Vec<String> {
        match self {
            StringOrList::One(line) => line.split_whitespace().map(str::to_string).collect(),
            StringOrList::Many(items) => items,
        }
    }

    /// Items as a list; a single string stays one item.
    pub fn into_items(self) -> Vec<String> {
        match self {
            StringOrList::One(item) => vec![item],
            StringOrList::Many(items) => items,
        }
    }
}

/// `KEY=VALUE` entries given either as a list or as a mapping.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum KeyValues {
    List(Vec<String>),
    Map(BTreeMap<String, Option<Value>>),
}

impl KeyValues {
    pub fn into_pairs(self) -> Vec<String> {
        match self {
            KeyValues::List(items) => items,
            KeyValues::Map(map) => map
                .into_iter()
                .map(|(key, value)| match value.as_ref().and_then(scalar_to_string) {
                    Some(value) => format!("{key}={value}"),
                    None => key,
                })
                .collect(),
        }
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        self.into_pairs()
            .into_iter()
            .map(|pair| match pair.split_once('=') {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => (pair, String::new()),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DependsOn {
    List(Vec<String>),
    Map(BTreeMap<String, Value>),
}

impl DependsOn {
    pub fn into_names(self) -> Vec<String> {
        match self {
            DependsOn::List(names) => names,
            DependsOn::Map(map) => map.into_keys().collect(),
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(value) => Some(value.clone()),
        Value::Bool(value) => Some(value.to_string()),
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    }
}

/// Locate the manifest inside `dir`.
pub fn find_manifest(dir: &Path) -> Result<PathBuf> {
    MANIFEST_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
        .ok_or_else(|| Error::ManifestNotFound {
            dir: dir.to_path_buf(),
        })
}

impl RawManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).map_err(|source| Error::io(path, source, IoAction::Read))?;
        Self::parse(&contents, path)
    }

    pub fn parse(contents: &str, path: &Path) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents).map_err(|source| Error::ParseManifest {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Published port of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    pub host_ip: Option<String>,
    pub published: Option<u16>,
    pub target: u16,
    pub protocol: String,
}

impl PortBinding {
    /// `[host_ip:][published:]target[/protocol]`.
    pub fn parse(spec: &str) -> std::result::Result<Self, String> {
        let (address, protocol) = match spec.rsplit_once('/') {
            Some((address, protocol)) => (address, protocol.to_string()),
            None => (spec, "tcp".to_string()),
        };
        if !matches!(protocol.as_str(), "tcp" | "udp" | "sctp") {
            return Err(format!("unsupported protocol `{protocol}` in port `{spec}`"));
        }

        let parse_port = |value: &str| {
            value
                .parse::<u16>()
                .map_err(|_| format!("invalid port `{value}` in `{spec}`"))
        };

        // IPv6 host addresses are bracketed: [::1]:8080:80
        let (host_ip, rest) = match address.strip_prefix('[') {
            Some(bracketed) => match bracketed.split_once("]:") {
                Some((ip, rest)) => (Some(ip.to_string()), rest),
                None => return Err(format!("invalid address in port `{spec}`")),
            },
            None => (None, address),
        };

        let parts: Vec<&str> = rest.split(':').collect();
        match (host_ip, parts.as_slice()) {
            (None, [target]) => Ok(Self {
                host_ip: None,
                published: None,
                target: parse_port(target)?,
                protocol,
            }),
            (host_ip, [published, target]) => Ok(Self {
                host_ip,
                published: (!published.is_empty())
                    .then(|| parse_port(published))
                    .transpose()?,
                target: parse_port(target)?,
                protocol,
            }),
            (None, [ip, published, target]) => Ok(Self {
                host_ip: (!ip.is_empty()).then(|| ip.to_string()),
                published: (!published.is_empty())
                    .then(|| parse_port(published))
                    .transpose()?,
                target: parse_port(target)?,
                protocol,
            }),
            _ => Err(format!("invalid port `{spec}`")),
        }
    }

    pub fn from_raw(raw: &RawPort) -> std::result::Result<Self, String> {
        match raw {
            RawPort::Number(target) => Ok(Self {
                host_ip: None,
                published: None,
                target: *target,
                protocol: "tcp".to_string(),
            }),
            RawPort::Short(spec) => Self::parse(spec),
        }
    }
}

/// Parse durations such as `10s`, `1m30s`, `500ms` or `1h`.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if let Ok(seconds) = input.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits = rest
            .find(|ch: char| !ch.is_ascii_digit() && ch != '.')
            .unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let value: f64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];
        let unit_len = rest
            .find(|ch: char| ch.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];
        let seconds = match unit {
            "h" => value * 3600.0,
            "m" => value * 60.0,
            "s" => value,
            "ms" => value / 1_000.0,
            "us" | "µs" => value / 1_000_000.0,
            _ => return None,
        };
        total += Duration::from_secs_f64(seconds);
    }
    Some(total)
}
