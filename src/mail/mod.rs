pub mod decoders;
pub mod smtp_imap;

use anyhow::Result;
use std::collections::HashSet;

use crate::domain::email::{Email, EmailId, OutgoingMessage};

pub const DEFAULT_FOLDER: &str = "INBOX";

/// Read and send access to one mail account.
pub trait MailboxManager {
    /// Unseen messages in `folder`, newest first, at most `limit` of them.
    /// Messages without a usable message ID are left out.
    fn get_emails(&self, folder: &str, limit: Option<usize>) -> Result<Vec<Email>>;

    /// Message IDs of everything currently in `folder`, seen or not.
    fn list_email_ids(&self, folder: &str) -> Result<HashSet<EmailId>>;

    fn get_email(&self, folder: &str, id: &str) -> Result<Email>;

    fn send_message(&self, message: &OutgoingMessage) -> Result<()>;

    /// Flag the message `id` as seen and answered, so it no longer counts
    /// as new mail. `Ok(false)` when no such message is in `folder`.
    fn mark_answered(&self, folder: &str, id: &str) -> Result<bool>;
}
