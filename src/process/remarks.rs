use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::process::{CommandRunner, Invocation, ProcessError, io_error};

/// Converts reMarkable document archives to PDF with `unzip` and `remarks`.
pub struct Remarks {
    runner: Rc<dyn CommandRunner>,
    command: String,
    unzip: String,
}

impl Remarks {
    pub fn new(runner: Rc<dyn CommandRunner>, command: impl Into<String>) -> Self {
        Self {
            runner,
            command: command.into(),
            unzip: "unzip".to_string(),
        }
    }

    pub fn version(&self) -> Result<String, ProcessError> {
        let out = self
            .runner
            .run(&Invocation::from_command_line(&self.command).arg("--version"))?;
        Ok(String::from_utf8_lossy(&out).trim().to_string())
    }

    /// Convert `archive` (a zip of the tablet's native files) into a single
    /// PDF at `output_pdf`.
    pub fn archive_to_pdf(&self, archive: &Path, output_pdf: &Path) -> Result<(), ProcessError> {
        let extracted = tempfile::tempdir().map_err(io_error(&self.unzip))?;
        self.runner.run(
            &Invocation::new(&self.unzip)
                .arg("-o")
                .path_arg(archive)
                .arg("-d")
                .path_arg(extracted.path()),
        )?;

        // remarks writes a directory of output; the PDF inside is moved out
        let out_dir = output_pdf.with_extension("");
        fs::create_dir_all(&out_dir).map_err(io_error(&self.command))?;
        self.runner.run(
            &Invocation::from_command_line(&self.command)
                .path_arg(extracted.path())
                .path_arg(&out_dir),
        )?;

        let pdf = find_pdf(&out_dir).ok_or_else(|| ProcessError::MissingOutput {
            program: self.command.clone(),
            dir: out_dir.clone(),
        })?;
        fs::rename(&pdf, output_pdf).map_err(io_error(&self.command))?;
        let _ = fs::remove_dir_all(&out_dir);
        Ok(())
    }
}

/// First PDF directly in `dir`, or one level below it.
fn find_pdf(dir: &Path) -> Option<PathBuf> {
    let mut subdirs = Vec::new();
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    for path in entries {
        if path.is_dir() {
            subdirs.push(path);
        } else if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("pdf")) {
            return Some(path);
        }
    }
    subdirs.into_iter().find_map(|d| {
        fs::read_dir(d)
            .ok()?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .find(|p| p.extension().is_some_and(|e| e.eq_ignore_ascii_case("pdf")))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_nested_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("doc");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("doc.pdf"), b"%PDF").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        assert_eq!(find_pdf(dir.path()), Some(nested.join("doc.pdf")));
    }

    #[test]
    fn no_pdf_means_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(find_pdf(dir.path()), None);
    }
}
