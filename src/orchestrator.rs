use anyhow::{Context, Result, anyhow};
use log::{debug, info, warn};
use std::collections::HashSet;

use crate::domain::document::{Document, DocumentId, ReplyPage};
use crate::domain::email::{Email, EmailId, OutgoingMessage};
use crate::extract::TextExtractor;
use crate::mail::{DEFAULT_FOLDER, MailboxManager};
use crate::render::email_to_document;
use crate::store::DocumentManager;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub folder: String,
    /// How many unread messages one refresh looks at.
    pub fetch_limit: Option<usize>,
    pub ignore_marketing: bool,
    pub reply_page: ReplyPage,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            folder: DEFAULT_FOLDER.to_string(),
            fetch_limit: Some(10),
            ignore_marketing: true,
            reply_page: ReplyPage::Blank,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    pub created: Vec<DocumentId>,
    pub deleted: Vec<DocumentId>,
    /// Already stored, or filtered out as marketing.
    pub skipped: Vec<EmailId>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub sent: Vec<DocumentId>,
    /// Documents left in the outbox because something went wrong.
    pub failed: Vec<(DocumentId, String)>,
    /// Documents left in the outbox because no text was recognised.
    pub skipped_empty: Vec<DocumentId>,
    /// Sent, but the outbox copy could not be removed. The next send will
    /// answer these again unless they are cleared by hand.
    pub undeleted: Vec<DocumentId>,
}

/// Moves mail to the document store and handwritten replies back to mail.
///
/// Holds no state of its own; everything it knows comes from the three
/// components on each call.
pub struct Orchestrator<'a> {
    mailbox: &'a dyn MailboxManager,
    documents: &'a dyn DocumentManager,
    extractor: &'a dyn TextExtractor,
    options: SyncOptions,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        mailbox: &'a dyn MailboxManager,
        documents: &'a dyn DocumentManager,
        extractor: &'a dyn TextExtractor,
        options: SyncOptions,
    ) -> Self {
        Self {
            mailbox,
            documents,
            extractor,
            options,
        }
    }

    /// Bring the document inbox in line with the mailbox: drop documents for
    /// mail that is gone, add documents for new mail.
    pub fn refresh(&self) -> Result<RefreshReport> {
        let folder = &self.options.folder;
        let emails = self.mailbox.get_emails(folder, self.options.fetch_limit)?;
        info!("{} unread message(s) in {folder}", emails.len());

        // fetched mail counts as present even if the listing raced with it
        let mut present: HashSet<EmailId> = self.mailbox.list_email_ids(folder)?;
        present.extend(emails.iter().map(|e| e.id.clone()));

        let mut report = RefreshReport::default();
        for id in self.documents.list_documents()? {
            if present.contains(&id) {
                continue;
            }
            info!("{id} is no longer in {folder}; removing its document");
            if self.documents.delete_document(&id)? {
                report.deleted.push(id);
            }
        }

        for email in &emails {
            if self.documents.has_document(&email.id)? {
                debug!("{} already has a document", email.id);
                report.skipped.push(email.id.clone());
                continue;
            }
            if self.options.ignore_marketing && email.is_marketing() {
                debug!("{} looks like marketing; skipping", email.id);
                report.skipped.push(email.id.clone());
                continue;
            }
            report.created.push(self.upload_email(email)?);
        }
        Ok(report)
    }

    /// Render `email`, add a page to write the reply on and store it under
    /// the message ID.
    pub fn upload_email(&self, email: &Email) -> Result<DocumentId> {
        let rendered = email_to_document(email)
            .with_context(|| format!("rendering {}", email.id))?;
        let document = self
            .documents
            .append_ruled_page(&rendered, self.options.reply_page)?;
        let id = self.documents.put_document(&document, &email.id)?;
        info!("stored \"{}\" from {} as {id}", email.subject, email.from);
        Ok(id)
    }

    pub fn last_page_text(&self, document: &Document) -> Result<String> {
        let page = document
            .last_page()
            .ok_or_else(|| anyhow!("document has no pages"))?;
        self.extractor.extract_text_from_page(&page)
    }

    /// Send one reply per outbox document, deleting each one that went out.
    pub fn send_outbox(&self) -> Result<SendReport> {
        let mut report = SendReport::default();
        for id in self.documents.list_edited_documents()? {
            match self.send_reply(&id) {
                Ok(true) => {
                    if !self.clear_sent(&id) {
                        report.undeleted.push(id.clone());
                    }
                    report.sent.push(id);
                }
                Ok(false) => {
                    warn!("no text found on the last page of {id}; leaving it in the outbox");
                    report.skipped_empty.push(id);
                }
                Err(e) => {
                    warn!("could not send reply for {id}: {e:#}");
                    report.failed.push((id, format!("{e:#}")));
                }
            }
        }
        Ok(report)
    }

    /// Remove a sent reply from the outbox, then any inbox copy left behind.
    /// `false` when the outbox copy is still there.
    fn clear_sent(&self, id: &str) -> bool {
        match self.documents.delete_edited_document(id) {
            Ok(true) => {}
            Ok(false) => {
                warn!("sent reply {id} was not found in the outbox to remove");
                return false;
            }
            Err(e) => {
                warn!("sent reply {id} but could not remove it from the outbox: {e:#}");
                return false;
            }
        }
        match self.documents.has_document(id) {
            Ok(true) => {
                if let Err(e) = self.documents.delete_document(id) {
                    warn!("could not remove the inbox copy of {id}: {e:#}");
                }
            }
            Ok(false) => {}
            Err(e) => warn!("could not look for an inbox copy of {id}: {e:#}"),
        }
        true
    }

    /// `Ok(false)` when the page carried no text and nothing was sent.
    fn send_reply(&self, id: &str) -> Result<bool> {
        let document = self.documents.get_edited_document(id)?;
        let text = self.last_page_text(&document)?;
        if text.trim().is_empty() {
            return Ok(false);
        }

        let original = self.mailbox.get_email(&self.options.folder, id)?;
        let reply = OutgoingMessage::reply_to(&original, text);
        self.mailbox.send_message(&reply)?;
        info!("sent \"{}\" to {}", reply.subject, reply.to);

        match self.mailbox.mark_answered(&self.options.folder, id) {
            Ok(true) => debug!("flagged {id} as answered"),
            Ok(false) => warn!("{id} is no longer in {}; not flagged", self.options.folder),
            Err(e) => warn!("could not flag {id} as answered: {e:#}"),
        }
        Ok(true)
    }
}
