//! Running the external tools this crate leans on (`rmapi`, `unzip`,
//! `remarks`, `pdftoppm`, `tesseract`).
//!
//! Everything goes through [`CommandRunner`] so the document stores and text
//! extractors can be driven by a scripted runner in tests.

pub mod remarks;
pub mod rmapi;

use log::debug;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("{program} not found; is it installed and on PATH?")]
    NotFound { program: String },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    /// The tool succeeded but did not leave the expected file behind.
    #[error("{program} produced no output in {}", .dir.display())]
    MissingOutput { program: String, dir: PathBuf },

    #[error("running {program}: {source}")]
    Io {
        program: String,
        source: io::Error,
    },
}

/// Adapter for `map_err` on filesystem work done on behalf of a tool.
pub(crate) fn io_error(program: &str) -> impl FnOnce(io::Error) -> ProcessError + use<> {
    let program = program.to_string();
    move |source| ProcessError::Io { program, source }
}

/// One command line, optionally run from a given directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    /// Split a configured command such as `python3 -m remarks` into program
    /// and leading arguments.
    pub fn from_command_line(command: &str) -> Self {
        let mut parts = command.split_whitespace();
        let program = parts.next().unwrap_or_default();
        let mut inv = Self::new(program);
        inv.args.extend(parts.map(str::to_string));
        inv
    }

    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        let s = path.to_string_lossy().into_owned();
        self.arg(s)
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

pub trait CommandRunner {
    /// Run to completion and return stdout. A non-zero exit is an error
    /// carrying the tool's stderr.
    fn run(&self, invocation: &Invocation) -> Result<Vec<u8>, ProcessError>;
}

/// Runs commands on the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<Vec<u8>, ProcessError> {
        debug!("[{}] {}", invocation.program, invocation.args.join(" "));

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        if let Some(dir) = &invocation.cwd {
            cmd.current_dir(dir);
        }

        let output = cmd.output().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ProcessError::NotFound {
                program: invocation.program.clone(),
            },
            _ => ProcessError::Io {
                program: invocation.program.clone(),
                source: e,
            },
        })?;

        if !output.status.success() {
            return Err(ProcessError::Failed {
                program: invocation.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_lines_split_on_whitespace() {
        let inv = Invocation::from_command_line("python3 -m remarks").arg("in");
        assert_eq!(inv.program, "python3");
        assert_eq!(inv.args, vec!["-m", "remarks", "in"]);
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_reports_failures() {
        let out = SystemRunner.run(&Invocation::new("sh").arg("-c").arg("printf hi")).unwrap();
        assert_eq!(out, b"hi");

        let err = SystemRunner
            .run(&Invocation::new("sh").arg("-c").arg("echo boom >&2; exit 3"))
            .unwrap_err();
        match err {
            ProcessError::Failed { stderr, .. } => assert_eq!(stderr, "boom"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_programs_are_not_found() {
        let err = SystemRunner
            .run(&Invocation::new("epistolary-no-such-tool"))
            .unwrap_err();
        assert!(matches!(err, ProcessError::NotFound { .. }));
    }
}
