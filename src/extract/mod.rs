//! Turning a handwritten page back into text.

pub mod openai;
pub mod raster;
pub mod tesseract;

use anyhow::Result;

use crate::domain::document::Page;

pub trait TextExtractor {
    /// Text written on `page`. An empty string when nothing was recognised.
    fn extract_text_from_page(&self, page: &Page<'_>) -> Result<String>;
}
