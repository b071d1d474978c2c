use std::env;
use std::io::{self, IsTerminal};

use crate::core::diagnostics::Severity;
use crate::core::events::Event;
use crate::core::reporter::Reporter;

const GREEN: &str = "32";
const RED: &str = "31";
const YELLOW: &str = "33";
const DIM: &str = "2";

pub fn colorize(value: &str, code: &str, enabled: bool) -> String {
    if enabled {
        format!("\u{1b}[{code}m{value}\u{1b}[0m")
    } else {
        value.to_string()
    }
}

/// Colors need a terminal that understands escape codes.
pub fn color_enabled(term: Option<&str>, is_tty: bool) -> bool {
    is_tty && term.is_some_and(|term| !term.is_empty() && term != "dumb")
}

pub fn stdout_color() -> bool {
    color_enabled(env::var("TERM").ok().as_deref(), io::stdout().is_terminal())
}

/// A rendered event and the stream it belongs on.
#[derive(Debug, PartialEq, Eq)]
pub enum Line {
    Out(String),
    Err(String),
}

pub fn render_event(event: &Event, color: bool) -> Line {
    match event {
        Event::Message { severity, text } => match severity {
            Severity::Info => Line::Out(text.clone()),
            Severity::Warning => Line::Err(format!(
                "{} {text}",
                colorize("Warning:", YELLOW, color)
            )),
            Severity::Error => Line::Err(format!("{} {text}", colorize("Error:", RED, color))),
        },
        Event::NodeStarted { kind, reference } => {
            Line::Out(colorize(&format!("→ {kind} {reference}"), DIM, color))
        }
        Event::NodeFinished {
            kind,
            reference,
            elapsed_ms,
        } => Line::Out(format!(
            "{} {kind} {reference} ({:.1}s)",
            colorize("✔", GREEN, color),
            *elapsed_ms as f64 / 1000.0
        )),
        Event::NodeFailed {
            kind,
            reference,
            error,
        } => Line::Err(format!(
            "{} {kind} {reference}: {error}",
            colorize("✘", RED, color)
        )),
        Event::StopFailed {
            kind,
            reference,
            error,
        } => Line::Err(format!(
            "{} failed to stop {kind} {reference}: {error}",
            colorize("Warning:", YELLOW, color)
        )),
        Event::ImagePulled { image } => Line::Out(format!("Pulled image {image}")),
        Event::ImageBuilt { image } => Line::Out(format!("Built image {image}")),
        Event::SourceSynced { name, commit, .. } => Line::Out(match commit {
            Some(commit) => format!(
                "Synced source `{name}` at {} {}",
                commit.short_hash(),
                commit.message
            ),
            None => format!("Synced source `{name}`"),
        }),
        Event::ContainerStarted { name } => Line::Out(format!("Started container {name}")),
        Event::ContainerReady { name } => Line::Out(format!("Container {name} is ready")),
        Event::ContainerRemoved { name } => Line::Out(format!("Removed container {name}")),
        Event::ActionCompleted { name, commands } => Line::Out(format!(
            "Action `{name}` finished ({commands} command{})",
            if *commands == 1 { "" } else { "s" }
        )),
        Event::HostsUpdated { path, changed } => Line::Out(if *changed {
            format!("Updated hosts file {}", path.display())
        } else {
            format!("Hosts file {} is up to date", path.display())
        }),
        Event::Restarting { services } => {
            Line::Out(format!("Restarting {}", services.join(", ")))
        }
    }
}

/// Prints events as they arrive.
pub struct ConsoleReporter {
    color: bool,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self {
            color: stdout_color(),
        }
    }
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for ConsoleReporter {
    fn report(&mut self, event: Event) {
        match render_event(&event, self.color) {
            Line::Out(line) => println!("{line}"),
            Line::Err(line) => eprintln!("{line}"),
        }
    }
}
