use anyhow::Result;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::rc::Rc;

use crate::domain::document::Page;
use crate::extract::TextExtractor;
use crate::extract::raster::Rasterizer;
use crate::process::{CommandRunner, Invocation};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseractOptions {
    pub program: String,
    /// Passed as `-l`; tesseract's own default when unset.
    pub language: Option<String>,
}

impl Default for TesseractOptions {
    fn default() -> Self {
        Self {
            program: "tesseract".to_string(),
            language: None,
        }
    }
}

/// Local OCR through the `tesseract` CLI.
pub struct TesseractTextExtractor {
    rasterizer: Rasterizer,
    runner: Rc<dyn CommandRunner>,
    options: TesseractOptions,
}

impl TesseractTextExtractor {
    pub fn new(
        rasterizer: Rasterizer,
        runner: Rc<dyn CommandRunner>,
        options: TesseractOptions,
    ) -> Self {
        Self {
            rasterizer,
            runner,
            options,
        }
    }
}

impl TextExtractor for TesseractTextExtractor {
    fn extract_text_from_page(&self, page: &Page<'_>) -> Result<String> {
        let png = self.rasterizer.render_png(page)?;
        let work = tempfile::tempdir()?;
        let image = work.path().join("page.png");
        fs::write(&image, png)?;

        let mut inv = Invocation::from_command_line(&self.options.program)
            .path_arg(&image)
            .arg("stdout");
        if let Some(lang) = &self.options.language {
            inv = inv.arg("-l").arg(lang);
        }
        let out = self.runner.run(&inv)?;
        let text = String::from_utf8_lossy(&out).trim().to_string();
        debug!("tesseract read {} chars from page {}", text.len(), page.number);
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::raster::RasterOptions;
    use crate::process::ProcessError;
    use crate::render::render_lines;
    use std::cell::RefCell;
    use std::path::Path;

    /// Plays both pdftoppm and tesseract.
    #[derive(Default)]
    struct FakeTools {
        tesseract_args: RefCell<Vec<String>>,
    }

    impl CommandRunner for FakeTools {
        fn run(&self, inv: &Invocation) -> Result<Vec<u8>, ProcessError> {
            match inv.program.as_str() {
                "pdftoppm" => {
                    let prefix = inv.args.last().unwrap();
                    fs::write(Path::new(prefix).with_extension("png"), b"png").unwrap();
                    Ok(vec![])
                }
                "tesseract" => {
                    *self.tesseract_args.borrow_mut() = inv.args.clone();
                    Ok(b"  Dear Ada,\nsee you Tuesday.\n\n".to_vec())
                }
                other => panic!("unexpected program {other}"),
            }
        }
    }

    #[test]
    fn reads_stdout_and_passes_language() {
        let tools = Rc::new(FakeTools::default());
        let extractor = TesseractTextExtractor::new(
            Rasterizer::new(tools.clone(), RasterOptions::default()),
            tools.clone(),
            TesseractOptions {
                language: Some("deu".into()),
                ..Default::default()
            },
        );
        let doc = render_lines(&[]).unwrap();
        let text = extractor
            .extract_text_from_page(&doc.page(1).unwrap())
            .unwrap();

        assert_eq!(text, "Dear Ada,\nsee you Tuesday.");
        let args = tools.tesseract_args.borrow();
        assert_eq!(&args[1..], &["stdout", "-l", "deu"]);
    }
}
