use log::debug;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::process::{CommandRunner, Invocation, ProcessError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemotePathKind {
    File,
    Directory,
}

impl RemotePathKind {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "[f]" => Some(Self::File),
            "[d]" => Some(Self::Directory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub kind: RemotePathKind,
    pub name: String,
}

/// Wrapper around the `rmapi` CLI for the reMarkable cloud.
pub struct Rmapi {
    runner: Rc<dyn CommandRunner>,
    program: String,
    /// Working directory; `rmapi get` drops its archives here.
    cache_dir: PathBuf,
}

impl Rmapi {
    pub fn new(
        runner: Rc<dyn CommandRunner>,
        program: impl Into<String>,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            program: program.into(),
            cache_dir: cache_dir.into(),
        }
    }

    fn run(&self, inv: Invocation) -> Result<Vec<u8>, ProcessError> {
        self.runner.run(&inv.current_dir(&self.cache_dir))
    }

    fn command(&self) -> Invocation {
        Invocation::from_command_line(&self.program)
    }

    /// Fails with [`ProcessError::NotFound`] when the tool is missing.
    pub fn version(&self) -> Result<String, ProcessError> {
        let out = self.run(self.command().arg("version"))?;
        Ok(String::from_utf8_lossy(&out).trim().to_string())
    }

    pub fn ls(&self, remote_path: &str) -> Result<Vec<RemoteEntry>, ProcessError> {
        let out = self.run(self.command().arg("ls").arg(remote_path))?;
        Ok(parse_listing(&String::from_utf8_lossy(&out)))
    }

    /// Download a document and return the local path of its archive.
    pub fn download(&self, remote_path: &str) -> Result<PathBuf, ProcessError> {
        self.run(self.command().arg("get").arg(remote_path))?;

        let base = remote_path.rsplit('/').next().unwrap_or(remote_path);
        // older releases write .zip, newer ones .rmdoc
        for ext in ["zip", "rmdoc"] {
            let candidate = self.cache_dir.join(format!("{base}.{ext}"));
            if candidate.exists() {
                return Ok(candidate);
            }
        }
        Err(ProcessError::MissingOutput {
            program: self.program.clone(),
            dir: self.cache_dir.clone(),
        })
    }

    pub fn upload(&self, local_path: &Path, remote_dir: &str) -> Result<(), ProcessError> {
        self.run(self.command().arg("put").path_arg(local_path).arg(remote_dir))?;
        Ok(())
    }

    pub fn mv(&self, from: &str, to: &str) -> Result<(), ProcessError> {
        self.run(self.command().arg("mv").arg(from).arg(to))?;
        Ok(())
    }

    pub fn mkdir(&self, remote_path: &str) -> Result<(), ProcessError> {
        self.run(self.command().arg("mkdir").arg(remote_path))?;
        Ok(())
    }
}

/// Parse `rmapi ls` output: one `[f]` or `[d]` tag, a tab, then the name.
pub fn parse_listing(stdout: &str) -> Vec<RemoteEntry> {
    let mut entries = Vec::new();
    for line in stdout.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let (tag, name) = match line.split_once('\t') {
            Some(parts) => parts,
            None => match line.split_once(' ') {
                Some(parts) => parts,
                None => (line, ""),
            },
        };
        match RemotePathKind::from_tag(tag.trim()) {
            Some(kind) if !name.trim().is_empty() => entries.push(RemoteEntry {
                kind,
                name: name.trim().to_string(),
            }),
            _ => debug!("ignoring rmapi ls line {line:?}"),
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_lines() {
        let entries = parse_listing("[d]\tOutbox\n[f]\t%3Ca%40b%3E\n\n[f] spaced name\nnoise\n");
        assert_eq!(
            entries,
            vec![
                RemoteEntry {
                    kind: RemotePathKind::Directory,
                    name: "Outbox".into()
                },
                RemoteEntry {
                    kind: RemotePathKind::File,
                    name: "%3Ca%40b%3E".into()
                },
                RemoteEntry {
                    kind: RemotePathKind::File,
                    name: "spaced name".into()
                },
            ]
        );
    }
}
