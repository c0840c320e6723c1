use anyhow::{Result, anyhow};
use lopdf::content::{Content, Operation};
use lopdf::{Object, ObjectId, Stream, dictionary};

pub type DocumentId = String;

/// US letter, in PDF points.
pub const PAGE_WIDTH: f32 = 612.0;
pub const PAGE_HEIGHT: f32 = 792.0;

/// What the page appended for a handwritten reply looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyPage {
    #[default]
    Blank,
    /// Light grey writing lines; no text is drawn.
    Ruled,
}

/// A paged PDF held in memory.
#[derive(Debug, Clone)]
pub struct Document {
    pdf: lopdf::Document,
}

/// One page of a [`Document`], numbered from 1.
#[derive(Debug, Clone, Copy)]
pub struct Page<'a> {
    pub document: &'a Document,
    pub number: u32,
}

impl Document {
    pub(crate) fn from_pdf(pdf: lopdf::Document) -> Self {
        Self { pdf }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let pdf = lopdf::Document::load_mem(bytes)?;
        Ok(Self { pdf })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut pdf = self.pdf.clone();
        let mut out = Vec::new();
        pdf.save_to(&mut out)?;
        Ok(out)
    }

    pub fn page_count(&self) -> u32 {
        self.pdf.get_pages().len() as u32
    }

    pub fn page(&self, number: u32) -> Option<Page<'_>> {
        if number == 0 || number > self.page_count() {
            return None;
        }
        Some(Page {
            document: self,
            number,
        })
    }

    pub fn last_page(&self) -> Option<Page<'_>> {
        self.page(self.page_count())
    }

    /// Strings drawn with `Tj` on the given page, in content-stream order.
    ///
    /// Only understands the single-byte literal strings this crate writes;
    /// handwriting and images are invisible here.
    pub fn page_text(&self, number: u32) -> Result<Vec<String>> {
        let pages = self.pdf.get_pages();
        let page_id = pages
            .get(&number)
            .ok_or_else(|| anyhow!("page {number} out of range"))?;
        let content = Content::decode(&self.pdf.get_page_content(*page_id)?)?;

        let mut runs = Vec::new();
        for op in content.operations {
            if op.operator != "Tj" {
                continue;
            }
            if let Some(Object::String(bytes, _)) = op.operands.first() {
                runs.push(bytes.iter().map(|&b| b as char).collect());
            }
        }
        Ok(runs)
    }

    /// Returns a NEW document with a trailing page for a handwritten reply.
    pub fn with_reply_page(&self, style: ReplyPage) -> Result<Document> {
        let mut pdf = self.pdf.clone();
        let pages_id = pages_root(&pdf)?;

        let content = match style {
            ReplyPage::Blank => Content { operations: vec![] },
            ReplyPage::Ruled => ruled_lines(),
        };
        let content_id = pdf.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = pdf.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
            "Contents" => content_id,
        });

        let pages = pdf.get_object_mut(pages_id)?.as_dict_mut()?;
        pages.get_mut(b"Kids")?.as_array_mut()?.push(page_id.into());
        let count = pages.get(b"Count")?.as_i64()?;
        pages.set("Count", count + 1);

        Ok(Document { pdf })
    }
}

fn pages_root(pdf: &lopdf::Document) -> Result<ObjectId> {
    let root = pdf.trailer.get(b"Root")?.as_reference()?;
    let catalog = pdf.get_object(root)?.as_dict()?;
    Ok(catalog.get(b"Pages")?.as_reference()?)
}

fn ruled_lines() -> Content {
    const MARGIN: f32 = 36.0;
    const SPACING: f32 = 28.0;

    let mut operations = vec![
        Operation::new("RG", vec![0.8f32.into(), 0.8f32.into(), 0.8f32.into()]),
        Operation::new("w", vec![0.5f32.into()]),
    ];
    let mut y = PAGE_HEIGHT - MARGIN - SPACING;
    while y > MARGIN {
        operations.push(Operation::new("m", vec![MARGIN.into(), y.into()]));
        operations.push(Operation::new("l", vec![(PAGE_WIDTH - MARGIN).into(), y.into()]));
        y -= SPACING;
    }
    operations.push(Operation::new("S", vec![]));
    Content { operations }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::render_lines;

    fn sample() -> Document {
        render_lines(&[("Ada".to_string(), true), ("hello".to_string(), false)]).unwrap()
    }

    #[test]
    fn reply_page_leaves_original_untouched() {
        let doc = sample();
        let before = doc.page_count();
        let with_reply = doc.with_reply_page(ReplyPage::Blank).unwrap();
        assert_eq!(doc.page_count(), before);
        assert_eq!(with_reply.page_count(), before + 1);
    }

    #[test]
    fn ruled_reply_page_has_no_text() {
        let doc = sample().with_reply_page(ReplyPage::Ruled).unwrap();
        let last = doc.last_page().unwrap().number;
        assert!(doc.page_text(last).unwrap().is_empty());
    }

    #[test]
    fn survives_a_save_and_load() {
        let doc = sample().with_reply_page(ReplyPage::Blank).unwrap();
        let loaded = Document::from_bytes(&doc.to_bytes().unwrap()).unwrap();
        assert_eq!(loaded.page_count(), 2);
        assert_eq!(loaded.page_text(1).unwrap(), vec!["Ada", "hello"]);
    }

    #[test]
    fn page_numbers_are_one_based() {
        let doc = sample();
        assert!(doc.page(0).is_none());
        assert!(doc.page(2).is_none());
        assert_eq!(doc.last_page().unwrap().number, 1);
    }
}
