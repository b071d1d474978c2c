use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use crate::error::{Error, Result};

use super::cancel::CancelToken;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A subprocess invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Bytes written to the child's stdin before it is closed.
    pub stdin: Option<Vec<u8>>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, bytes: Vec<u8>) -> Self {
        self.stdin = Some(bytes);
        self
    }

    /// Shell-like rendering used in error messages.
    pub fn display(&self) -> String {
        format_cli(&self.program, &self.args)
    }
}

/// Captured output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

/// Capability to run subprocesses. Git and the container engine adapter go through it.
pub trait CommandRunner: Send + Sync {
    /// Run to completion with captured output. Non-zero exit is `Error::CommandFailed`.
    fn run(&self, spec: &CommandSpec, cancel: &CancelToken) -> Result<CommandOutput>;

    /// Run attached to the caller's terminal and return the exit code.
    fn run_attached(&self, spec: &CommandSpec) -> Result<i32>;
}

/// Runs commands on the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec, cancel: &CancelToken) -> Result<CommandOutput> {
        cancel.check()?;

        let mut command = build_command(spec);
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = command.spawn().map_err(|source| Error::CommandSpawn {
            program: spec.program.clone(),
            source,
        })?;

        let writer = spec.stdin.clone().and_then(|bytes| {
            child.stdin.take().map(|mut stdin| {
                thread::spawn(move || {
                    let _ = stdin.write_all(&bytes);
                })
            })
        });
        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        let status = wait_with_cancel(&mut child, cancel, &spec.program)?;

        if let Some(handle) = writer {
            let _ = handle.join();
        }
        let stdout = join_reader(stdout_reader);
        let stderr = join_reader(stderr_reader);

        if status.success() {
            Ok(CommandOutput { stdout, stderr })
        } else {
            let detail = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            Err(Error::CommandFailed {
                command: spec.display(),
                code: status.code(),
                stderr: detail,
            })
        }
    }

    fn run_attached(&self, spec: &CommandSpec) -> Result<i32> {
        let mut command = build_command(spec);
        command.stdin(Stdio::inherit());
        command.stdout(Stdio::inherit());
        command.stderr(Stdio::inherit());
        let status = command.status().map_err(|source| Error::CommandSpawn {
            program: spec.program.clone(),
            source,
        })?;
        Ok(status.code().unwrap_or(-1))
    }
}

fn build_command(spec: &CommandSpec) -> Command {
    let mut command = Command::new(&spec.program);
    command.args(&spec.args);
    if let Some(dir) = &spec.dir {
        command.current_dir(dir);
    }
    for (key, value) in &spec.env {
        command.env(key, value);
    }
    command
}

fn wait_with_cancel(
    child: &mut Child,
    cancel: &CancelToken,
    program: &str,
) -> Result<std::process::ExitStatus> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {}
            Err(source) => {
                return Err(Error::CommandSpawn {
                    program: program.to_string(),
                    source,
                });
            }
        }
        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Cancelled);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut source: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = source.read_to_end(&mut buffer);
        String::from_utf8_lossy(&buffer).into_owned()
    })
}

fn join_reader(handle: Option<thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

pub(crate) fn format_cli(program: &str, args: &[String]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(program.to_string());
    for arg in args {
        if !arg.is_empty()
            && arg.chars().all(|ch| {
                ch.is_ascii_alphanumeric()
                    || matches!(ch, '-' | '_' | '/' | '.' | ':' | '=' | ',' | '@' | '%')
            })
        {
            parts.push(arg.clone());
        } else {
            parts.push(shell_quote(arg));
        }
    }
    parts.join(" ")
}

pub(crate) fn shell_quote(input: &str) -> String {
    let mut result = String::from("'");
    for ch in input.chars() {
        if ch == '\'' {
            result.push_str("'\\''");
        } else {
            result.push(ch);
        }
    }
    result.push('\'');
    result
}

/// Whether an error means the program itself is missing.
pub fn is_not_found(err: &Error) -> bool {
    matches!(err, Error::CommandSpawn { source, .. } if source.kind() == io::ErrorKind::NotFound)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Records every invocation and answers from a scripted queue of responses.
    #[derive(Default)]
    pub struct ScriptedRunner {
        pub calls: Mutex<Vec<CommandSpec>>,
        responses: Mutex<VecDeque<(String, Result<CommandOutput>)>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Answer the next command whose rendering contains `needle` with `stdout`.
        pub fn respond(&self, needle: &str, stdout: &str) -> &Self {
            self.responses
                .lock()
                .unwrap()
                .push_back((needle.to_string(), Ok(CommandOutput::stdout(stdout))));
            self
        }

        /// Fail the next command whose rendering contains `needle`.
        pub fn fail(&self, needle: &str, stderr: &str) -> &Self {
            self.responses.lock().unwrap().push_back((
                needle.to_string(),
                Err(Error::CommandFailed {
                    command: needle.to_string(),
                    code: Some(128),
                    stderr: stderr.to_string(),
                }),
            ));
            self
        }

        pub fn commands(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|spec| spec.args.join(" "))
                .collect()
        }

        fn answer(&self, spec: &CommandSpec) -> Result<CommandOutput> {
            self.calls.lock().unwrap().push(spec.clone());
            let rendered = spec.args.join(" ");
            let mut responses = self.responses.lock().unwrap();
            if let Some(index) = responses
                .iter()
                .position(|(needle, _)| rendered.contains(needle.as_str()))
            {
                if let Some((_, response)) = responses.remove(index) {
                    return response;
                }
            }
            Ok(CommandOutput::default())
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, spec: &CommandSpec, cancel: &CancelToken) -> Result<CommandOutput> {
            cancel.check()?;
            self.answer(spec)
        }

        fn run_attached(&self, spec: &CommandSpec) -> Result<i32> {
            self.answer(spec).map(|_| 0)
        }
    }
}
