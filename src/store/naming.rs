//! Document IDs are message IDs such as `<CAF+x/9@mail.example.com>`, which
//! are not safe as file names. They are percent-encoded into a stem and
//! decoded back when listing.

use anyhow::Result;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

/// Everything except ASCII alphanumerics and a few harmless punctuation marks.
const STEM: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'@')
    .remove(b'+')
    .remove(b'=');

pub fn id_to_stem(id: &str) -> String {
    let stem = utf8_percent_encode(id, STEM).to_string();
    // keep the result from being a hidden file
    match stem.strip_prefix('.') {
        Some(rest) => format!("%2E{rest}"),
        None => stem,
    }
}

pub fn stem_to_id(stem: &str) -> Result<String> {
    Ok(percent_decode_str(stem).decode_utf8()?.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_become_safe_stems() {
        let id = "<CAF+x/9=q@mail.example.com>";
        let stem = id_to_stem(id);
        assert_eq!(stem, "%3CCAF+x%2F9=q@mail.example.com%3E");
        assert!(!stem.contains('/'));
        assert_eq!(stem_to_id(&stem).unwrap(), id);
    }

    #[test]
    fn leading_dots_are_encoded() {
        assert_eq!(id_to_stem(".hidden"), "%2Ehidden");
        assert_eq!(stem_to_id("%2Ehidden").unwrap(), ".hidden");
    }

    #[test]
    fn percent_signs_roundtrip() {
        let id = "100%<x>";
        assert_eq!(stem_to_id(&id_to_stem(id)).unwrap(), id);
    }
}
