pub mod filesystem;
pub mod naming;
pub mod remarkable;

use anyhow::Result;
use std::collections::BTreeMap;

use crate::domain::document::{Document, DocumentId, ReplyPage};

/// A place documents live: a local directory, or a tablet.
///
/// Documents are split between an inbox (what refresh writes) and an
/// outbox (documents the user moved there after writing a reply).
pub trait DocumentManager {
    /// IDs of the documents in the inbox.
    fn list_documents(&self) -> Result<Vec<DocumentId>>;

    fn get_document(&self, id: &str) -> Result<Document>;

    /// True if `id` is stored in either the inbox or the outbox.
    fn has_document(&self, id: &str) -> Result<bool>;

    /// Store `document` in the inbox under `requested_id`.
    ///
    /// Fails with `EpistolaryError::DocumentExists` if the ID is already
    /// taken; the stored document is left as it was.
    fn put_document(&self, document: &Document, requested_id: &str) -> Result<DocumentId>;

    /// Remove a document from wherever it is. `Ok(false)` when nothing was
    /// removed.
    fn delete_document(&self, id: &str) -> Result<bool>;

    /// IDs of the documents in the outbox.
    fn list_edited_documents(&self) -> Result<Vec<DocumentId>>;

    /// The outbox copy of `id`, even when an inbox copy also exists.
    fn get_edited_document(&self, id: &str) -> Result<Document>;

    /// Remove the outbox copy of `id` only. `Ok(false)` when nothing was
    /// removed.
    fn delete_edited_document(&self, id: &str) -> Result<bool>;

    /// Every inbox document. Slow on remote stores.
    fn get_documents(&self) -> Result<BTreeMap<DocumentId, Document>> {
        let mut out = BTreeMap::new();
        for id in self.list_documents()? {
            let doc = self.get_document(&id)?;
            out.insert(id, doc);
        }
        Ok(out)
    }

    fn get_edited_documents(&self) -> Result<BTreeMap<DocumentId, Document>> {
        let mut out = BTreeMap::new();
        for id in self.list_edited_documents()? {
            let doc = self.get_edited_document(&id)?;
            out.insert(id, doc);
        }
        Ok(out)
    }

    /// A NEW document with a page for the reply; `document` is untouched.
    fn append_ruled_page(&self, document: &Document, style: ReplyPage) -> Result<Document> {
        document.with_reply_page(style)
    }
}
