//! Lays an email out as a flowing, paginated PDF.

use anyhow::Result;
use lopdf::content::{Content, Operation};
use lopdf::{Object, StringFormat, dictionary};
use unicode_width::UnicodeWidthChar;

use crate::domain::document::{Document, PAGE_HEIGHT, PAGE_WIDTH};
use crate::domain::email::Email;

const MARGIN: f32 = 36.0; // 0.5in
const FONT_SIZE: f32 = 11.0;
const LEADING: f32 = 14.0;
/// Rough Helvetica advance per column at `FONT_SIZE`; keeps lines inside the margins.
const COLUMN_WIDTH: f32 = FONT_SIZE * 0.55;

/// Render sender, subject and body into a new document.
pub fn email_to_document(email: &Email) -> Result<Document> {
    let width = max_columns();
    let mut lines: Vec<(String, bool)> = Vec::new();

    for l in wrap(&email.from, width) {
        lines.push((l, true));
    }
    for l in wrap(&email.subject, width) {
        lines.push((l, true));
    }
    lines.push((String::new(), false));
    for l in wrap(&email.display_body(width), width) {
        lines.push((l, false));
    }

    render_lines(&lines)
}

fn max_columns() -> usize {
    ((PAGE_WIDTH - 2.0 * MARGIN) / COLUMN_WIDTH) as usize
}

fn lines_per_page() -> usize {
    ((PAGE_HEIGHT - 2.0 * MARGIN) / LEADING) as usize
}

/// Lay out pre-wrapped lines; `true` marks a bold line.
pub(crate) fn render_lines(lines: &[(String, bool)]) -> Result<Document> {
    let mut pdf = lopdf::Document::with_version("1.5");
    let pages_id = pdf.new_object_id();

    let regular_id = pdf.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let bold_id = pdf.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = pdf.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => regular_id,
            "F2" => bold_id,
        },
    });

    let per_page = lines_per_page();
    let mut kids: Vec<Object> = Vec::new();
    // Always emit at least one page, even for an empty message.
    let chunks: Vec<&[(String, bool)]> = if lines.is_empty() {
        vec![lines]
    } else {
        lines.chunks(per_page).collect()
    };

    for chunk in chunks {
        let mut operations = Vec::new();
        let mut y = PAGE_HEIGHT - MARGIN - FONT_SIZE;
        for (text, bold) in chunk {
            if !text.is_empty() {
                let font = if *bold { "F2" } else { "F1" };
                operations.push(Operation::new("BT", vec![]));
                operations.push(Operation::new("Tf", vec![font.into(), FONT_SIZE.into()]));
                operations.push(Operation::new("Td", vec![MARGIN.into(), y.into()]));
                operations.push(Operation::new(
                    "Tj",
                    vec![Object::String(win_ansi(text), StringFormat::Literal)],
                ));
                operations.push(Operation::new("ET", vec![]));
            }
            y -= LEADING;
        }
        let content = Content { operations };
        let content_id = pdf.add_object(lopdf::Stream::new(dictionary! {}, content.encode()?));
        let page_id = pdf.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    pdf.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        }),
    );
    let catalog_id = pdf.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    pdf.trailer.set("Root", catalog_id);

    Ok(Document::from_pdf(pdf))
}

/// Greedy word wrap by display columns. Hard newlines are kept; words longer
/// than a line are split.
pub fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut out = Vec::new();
    for raw_line in text.lines() {
        let raw_line = raw_line.trim_end();
        if raw_line.is_empty() {
            out.push(String::new());
            continue;
        }

        let mut line = String::new();
        let mut line_width = 0;
        for word in raw_line.split_whitespace() {
            let word_width = str_width(word);
            let sep = if line.is_empty() { 0 } else { 1 };
            if line_width + sep + word_width <= width {
                if sep == 1 {
                    line.push(' ');
                }
                line.push_str(word);
                line_width += sep + word_width;
                continue;
            }
            if !line.is_empty() {
                out.push(std::mem::take(&mut line));
                line_width = 0;
            }
            // word alone may still not fit
            for ch in word.chars() {
                let w = ch.width().unwrap_or(0);
                if line_width + w > width && !line.is_empty() {
                    out.push(std::mem::take(&mut line));
                    line_width = 0;
                }
                line.push(ch);
                line_width += w;
            }
        }
        if !line.is_empty() {
            out.push(line);
        }
    }
    out
}

fn str_width(s: &str) -> usize {
    s.chars().map(|c| c.width().unwrap_or(0)).sum()
}

/// Encode for the standard 14 fonts with WinAnsiEncoding.
fn win_ansi(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\t' => out.extend_from_slice(b"    "),
            '\u{2018}' | '\u{2019}' => out.push(b'\''),
            '\u{201C}' | '\u{201D}' => out.push(b'"'),
            '\u{2013}' | '\u{2014}' => out.push(b'-'),
            '\u{2026}' => out.extend_from_slice(b"..."),
            '\u{00A0}' => out.push(b' '),
            c if (' '..='~').contains(&c) => out.push(c as u8),
            c if ('\u{00A1}'..='\u{00FF}').contains(&c) => out.push(c as u32 as u8),
            _ => out.push(b'?'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::document::ReplyPage;

    fn email(body: &str) -> Email {
        Email {
            id: "<1@x>".into(),
            uid: 7,
            from: "Grace Hopper <grace@navy.mil>".into(),
            subject: "Bug report".into(),
            text_body: body.into(),
            html_body: String::new(),
        }
    }

    #[test]
    fn wrap_respects_width_and_newlines() {
        let lines = wrap("one two three\n\nfour", 7);
        assert_eq!(lines, vec!["one two", "three", "", "four"]);
    }

    #[test]
    fn wrap_splits_long_words() {
        assert_eq!(wrap("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn header_lines_lead_the_first_page() {
        let doc = email_to_document(&email("A moth was found in relay 70.")).unwrap();
        let text = doc.page_text(1).unwrap();
        assert_eq!(text[0], "Grace Hopper <grace@navy.mil>");
        assert_eq!(text[1], "Bug report");
        assert_eq!(text[2], "A moth was found in relay 70.");
    }

    #[test]
    fn long_bodies_flow_onto_more_pages() {
        let body = "line\n".repeat(lines_per_page() * 2);
        let doc = email_to_document(&email(&body)).unwrap();
        assert_eq!(doc.page_count(), 3);
    }

    #[test]
    fn appended_reply_page_is_empty() {
        let doc = email_to_document(&email("hi"))
            .unwrap()
            .with_reply_page(ReplyPage::Blank)
            .unwrap();
        assert_eq!(doc.page_count(), 2);
        assert!(doc.page_text(2).unwrap().is_empty());
    }

    #[test]
    fn non_latin_text_is_replaced() {
        assert_eq!(win_ansi("caf\u{e9} \u{2014} \u{4e2d}"), b"caf\xe9 - ?".to_vec());
    }
}
