use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::rc::Rc;

use crate::domain::document::Page;
use crate::process::{CommandRunner, Invocation, ProcessError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterOptions {
    pub program: String,
    pub dpi: u32,
}

impl Default for RasterOptions {
    fn default() -> Self {
        Self {
            program: "pdftoppm".to_string(),
            dpi: 100,
        }
    }
}

/// Renders single pages to PNG with poppler's `pdftoppm`.
pub struct Rasterizer {
    runner: Rc<dyn CommandRunner>,
    options: RasterOptions,
}

impl Rasterizer {
    pub fn new(runner: Rc<dyn CommandRunner>, options: RasterOptions) -> Self {
        Self { runner, options }
    }

    pub fn render_png(&self, page: &Page<'_>) -> Result<Vec<u8>> {
        let work = tempfile::tempdir()?;
        let input = work.path().join("document.pdf");
        fs::write(&input, page.document.to_bytes()?)?;

        let prefix = work.path().join("page");
        let number = page.number.to_string();
        self.runner.run(
            &Invocation::from_command_line(&self.options.program)
                .arg("-png")
                .arg("-r")
                .arg(self.options.dpi.to_string())
                .arg("-f")
                .arg(&number)
                .arg("-l")
                .arg(&number)
                .arg("-singlefile")
                .path_arg(&input)
                .path_arg(&prefix),
        )?;

        let output = prefix.with_extension("png");
        if !output.exists() {
            return Err(ProcessError::MissingOutput {
                program: self.options.program.clone(),
                dir: work.path().to_path_buf(),
            }
            .into());
        }
        fs::read(&output).with_context(|| format!("reading {}", output.display()))
    }
}
