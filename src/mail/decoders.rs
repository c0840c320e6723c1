use anyhow::Result;
use base64::{Engine as _, engine::general_purpose};
use mailparse::{MailHeader, MailHeaderMap, ParsedMail};

use crate::domain::email::{Email, EmailId};
use crate::error::EpistolaryError;

/// Header names that have been seen carrying the message identifier.
/// Lookup is case-insensitive, so `Message-Id`, `message-id` and friends
/// are covered by the first entry.
const MESSAGE_ID_HEADERS: &[&str] = &["Message-ID", "Message_ID", "MessageID"];

pub fn message_id_from_headers(headers: &[MailHeader]) -> Result<EmailId> {
    for key in MESSAGE_ID_HEADERS {
        if let Some(v) = headers.get_first_value(key) {
            let v = v.trim();
            if !v.is_empty() {
                return Ok(v.to_string());
            }
        }
    }
    Err(EpistolaryError::MissingMessageId.into())
}

/// Only the identifier out of a raw header block.
pub fn message_id_from_header_bytes(raw: &[u8]) -> Result<EmailId> {
    let (headers, _) = mailparse::parse_headers(raw)?;
    message_id_from_headers(&headers)
}

/// Build an [`Email`] out of a raw RFC 822 message.
pub fn parse_email(uid: u32, raw_rfc822: &[u8]) -> Result<Email> {
    let parsed = mailparse::parse_mail(raw_rfc822)?;
    let id = message_id_from_headers(&parsed.headers)?;

    let from = parsed
        .headers
        .get_first_value("From")
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    let subject = parsed
        .headers
        .get_first_value("Subject")
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    let text_body = find_part(&parsed, "text/plain").unwrap_or_default();
    let html_body = find_part(&parsed, "text/html").unwrap_or_default();

    Ok(Email {
        id,
        uid,
        from,
        subject,
        text_body,
        html_body,
    })
}

/// First part of the given MIME type, depth first. Attachments are skipped.
fn find_part(p: &ParsedMail, mimetype: &str) -> Option<String> {
    let is_attachment = matches!(
        p.get_content_disposition().disposition,
        mailparse::DispositionType::Attachment
    );

    if p.subparts.is_empty() {
        if !is_attachment && p.ctype.mimetype.eq_ignore_ascii_case(mimetype) {
            return p.get_body().ok();
        }
        return None;
    }

    for sp in &p.subparts {
        if let Some(t) = find_part(sp, mimetype) {
            return Some(t);
        }
    }
    None
}

/// Some senders ship the plain part as a bare base64 blob without a
/// transfer-encoding header. Decode it when it clearly is one, else keep
/// the text as it is.
pub fn decode_text_body(text: &str) -> String {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.len() < 8 || compact.len() % 4 != 0 {
        return text.to_string();
    }
    if !compact
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=')
    {
        return text.to_string();
    }

    let Ok(bytes) = general_purpose::STANDARD.decode(compact.as_bytes()) else {
        return text.to_string();
    };
    match String::from_utf8(bytes) {
        Ok(decoded)
            if decoded
                .chars()
                .all(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t')) =>
        {
            decoded
        }
        _ => text.to_string(),
    }
}

pub fn html_to_text(html: &str, width: usize) -> String {
    if html.trim().is_empty() {
        return String::new();
    }
    html2text::from_read(html.as_bytes(), width).unwrap_or_else(|_| html.to_string())
}

/// Minimal escaping for the HTML alternative of an outgoing plain-text body.
pub fn text_to_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\n' => out.push_str("<br />"),
            '\r' => {}
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTIPART: &[u8] = b"From: Ada <ada@example.com>\r\n\
Subject: =?UTF-8?Q?Caf=C3=A9?=\r\n\
message-id: <m1@example.com>\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/alternative; boundary=\"b\"\r\n\
\r\n\
--b\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
aGVsbG8gd29ybGQ=\r\n\
--b\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p>hello <b>world</b></p>\r\n\
--b--\r\n";

    #[test]
    fn parses_multipart_message() {
        let email = parse_email(42, MULTIPART).unwrap();
        assert_eq!(email.id, "<m1@example.com>");
        assert_eq!(email.uid, 42);
        assert_eq!(email.from, "Ada <ada@example.com>");
        assert_eq!(email.subject, "Café");
        assert_eq!(email.text_body.trim(), "hello world");
        assert!(email.html_body.contains("<b>world</b>"));
    }

    #[test]
    fn missing_message_id_is_reported() {
        let raw = b"From: a@b\r\nSubject: x\r\n\r\nbody\r\n";
        let err = parse_email(1, raw).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EpistolaryError>(),
            Some(EpistolaryError::MissingMessageId)
        ));
    }

    #[test]
    fn message_id_header_variants() {
        for raw in [
            &b"Message-Id: <x@y>\r\n\r\n"[..],
            &b"message_id: <x@y>\r\n\r\n"[..],
            &b"messageid: <x@y>\r\n\r\n"[..],
        ] {
            assert_eq!(message_id_from_header_bytes(raw).unwrap(), "<x@y>");
        }
    }

    #[test]
    fn decodes_bare_base64_bodies() {
        assert_eq!(decode_text_body("aGVsbG8gd29ybGQ="), "hello world");
        // looks like base64 but decodes to binary
        assert_eq!(decode_text_body("AAECAwQFBgc="), "AAECAwQFBgc=");
        assert_eq!(decode_text_body("Just a note."), "Just a note.");
        assert_eq!(decode_text_body("test"), "test");
    }

    #[test]
    fn text_to_html_escapes() {
        assert_eq!(text_to_html("a < b\nc & d"), "a &lt; b<br />c &amp; d");
    }
}
