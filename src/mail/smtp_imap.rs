use anyhow::{Result, anyhow};
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use log::{debug, info, warn};
use native_tls::TlsConnector;
use std::collections::HashSet;

use crate::domain::email::{Email, EmailId, OutgoingMessage};
use crate::mail::MailboxManager;
use crate::mail::decoders::{message_id_from_header_bytes, parse_email, text_to_html};

type ImapSession = imap::Session<native_tls::TlsStream<std::net::TcpStream>>;

/// Just the identifier headers; a full header fetch of every message is slow
/// on big folders.
const MESSAGE_ID_FIELDS: &str = "(UID BODY.PEEK[HEADER.FIELDS (MESSAGE-ID MESSAGE_ID MESSAGEID)])";
const ANSWERED_FLAGS: &str = "+FLAGS (\\Seen \\Answered)";

#[derive(Debug, Clone)]
pub struct ServerAccount {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// IMAP for reading, SMTP for sending. Every call opens its own session.
pub struct SmtpImapMailbox {
    pub imap: ServerAccount,
    pub smtp: ServerAccount,
    /// Address replies are sent from.
    pub from: String,
}

impl SmtpImapMailbox {
    pub fn new(imap: ServerAccount, smtp: ServerAccount, from: impl Into<String>) -> Self {
        Self {
            imap,
            smtp,
            from: from.into(),
        }
    }

    fn connect(&self) -> Result<ImapSession> {
        let tls = TlsConnector::builder().build()?;
        let client = imap::connect(
            (self.imap.host.as_str(), self.imap.port),
            self.imap.host.as_str(),
            &tls,
        )?;
        let session = client
            .login(&self.imap.username, &self.imap.password)
            .map_err(|(e, _)| anyhow!("IMAP login failed for {}: {e}", self.imap.username))?;
        Ok(session)
    }

    /// Log in to both servers and hang up again.
    pub fn verify_login(&self) -> Result<()> {
        let mut session = self.connect()?;
        session.logout()?;
        let mailer = self.transport()?;
        if !mailer.test_connection()? {
            return Err(anyhow!("SMTP server {} refused the connection", self.smtp.host));
        }
        Ok(())
    }

    fn transport(&self) -> Result<SmtpTransport> {
        let builder = if self.smtp.port == 465 {
            SmtpTransport::relay(&self.smtp.host)?
        } else {
            SmtpTransport::starttls_relay(&self.smtp.host)?
        };
        Ok(builder
            .port(self.smtp.port)
            .credentials(Credentials::new(
                self.smtp.username.clone(),
                self.smtp.password.clone(),
            ))
            .build())
    }

    fn fetch_full(&self, session: &mut ImapSession, uids: &[u32]) -> Result<Vec<Email>> {
        if uids.is_empty() {
            return Ok(vec![]);
        }
        let set = uid_set(uids);
        let fetches = session.uid_fetch(&set, "(UID BODY.PEEK[])")?;

        let mut out = Vec::with_capacity(uids.len());
        for f in fetches.iter() {
            let uid = f.uid.unwrap_or(0);
            let Some(raw) = f.body() else {
                warn!("UID {uid}: missing body; skipping");
                continue;
            };
            match parse_email(uid, raw) {
                Ok(email) => out.push(email),
                Err(e) => warn!("UID {uid}: {e}; skipping"),
            }
        }
        // keep the requested (newest first) order
        out.sort_by_key(|e| std::cmp::Reverse(e.uid));
        Ok(out)
    }

    /// UIDs in the selected folder whose message ID is exactly `id`.
    fn uids_for_id(&self, session: &mut ImapSession, id: &str) -> Result<Vec<u32>> {
        let query = format!("HEADER Message-ID {}", quote(id));
        let candidates: Vec<u32> = session.uid_search(&query)?.into_iter().collect();
        if candidates.is_empty() {
            return Ok(vec![]);
        }
        // servers match HEADER searches by substring, so confirm the exact ID
        let fetches = session.uid_fetch(uid_set(&candidates), MESSAGE_ID_FIELDS)?;
        let mut uids: Vec<u32> = fetches
            .iter()
            .filter(|f| {
                header_fields(f).is_some_and(|h| {
                    message_id_from_header_bytes(h).is_ok_and(|found| found == id)
                })
            })
            .filter_map(|f| f.uid)
            .collect();
        uids.sort_unstable();
        Ok(uids)
    }
}

impl MailboxManager for SmtpImapMailbox {
    fn get_emails(&self, folder: &str, limit: Option<usize>) -> Result<Vec<Email>> {
        let mut session = self.connect()?;
        session.select(folder)?;

        let mut uids: Vec<u32> = session.uid_search("UNSEEN")?.into_iter().collect();
        uids.sort_unstable_by(|a, b| b.cmp(a));
        if let Some(n) = limit {
            uids.truncate(n);
        }
        debug!("{folder}: fetching {} unseen message(s)", uids.len());

        let emails = self.fetch_full(&mut session, &uids)?;
        session.logout()?;
        Ok(emails)
    }

    fn list_email_ids(&self, folder: &str) -> Result<HashSet<EmailId>> {
        let mut session = self.connect()?;
        let mailbox = session.select(folder)?;
        if mailbox.exists == 0 {
            session.logout()?;
            return Ok(HashSet::new());
        }

        let fetches = session.fetch("1:*", MESSAGE_ID_FIELDS)?;
        let mut ids = HashSet::new();
        for f in fetches.iter() {
            let Some(header) = header_fields(f) else { continue };
            match message_id_from_header_bytes(header) {
                Ok(id) => {
                    ids.insert(id);
                }
                Err(e) => debug!("UID {:?}: {e}", f.uid),
            }
        }
        session.logout()?;
        Ok(ids)
    }

    fn get_email(&self, folder: &str, id: &str) -> Result<Email> {
        let mut session = self.connect()?;
        session.select(folder)?;

        let uid = self
            .uids_for_id(&mut session, id)?
            .last()
            .copied()
            .ok_or_else(|| anyhow!("email {id} not found in {folder}"))?;

        let mut emails = self.fetch_full(&mut session, &[uid])?;
        session.logout()?;
        emails.retain(|e| e.id == id);
        emails
            .pop()
            .ok_or_else(|| anyhow!("email {id} not found in {folder}"))
    }

    fn send_message(&self, message: &OutgoingMessage) -> Result<()> {
        let from: Mailbox = self.from.parse()?;
        let to: Mailbox = message.to.parse()?;

        let mut builder = Message::builder()
            .from(from)
            .to(to)
            .subject(message.subject.clone());
        if let Some(reply_to) = &message.in_reply_to {
            builder = builder
                .in_reply_to(reply_to.clone())
                .references(reply_to.clone());
        }
        let email = builder.multipart(MultiPart::alternative_plain_html(
            message.body.clone(),
            text_to_html(&message.body),
        ))?;

        self.transport()?.send(&email)?;
        info!("sent \"{}\" to {}", message.subject, message.to);
        Ok(())
    }

    fn mark_answered(&self, folder: &str, id: &str) -> Result<bool> {
        let mut session = self.connect()?;
        session.select(folder)?;
        let uids = self.uids_for_id(&mut session, id)?;
        if uids.is_empty() {
            session.logout()?;
            return Ok(false);
        }
        session.uid_store(uid_set(&uids), ANSWERED_FLAGS)?;
        session.logout()?;
        debug!("{folder}: flagged {id} as answered");
        Ok(true)
    }
}

/// Header lines from a `HEADER.FIELDS` fetch. Servers label the section
/// differently, so both accessors are tried.
fn header_fields<'a>(fetch: &'a imap::types::Fetch) -> Option<&'a [u8]> {
    fetch.header().or_else(|| fetch.body())
}

fn uid_set(uids: &[u32]) -> String {
    uids.iter()
        .map(|u| u.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// IMAP quoted string.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_sets_are_comma_separated() {
        assert_eq!(uid_set(&[9, 3, 4]), "9,3,4");
    }

    #[test]
    fn id_listing_fetches_only_identifier_headers() {
        assert!(MESSAGE_ID_FIELDS.contains("BODY.PEEK[HEADER.FIELDS (MESSAGE-ID"));
        assert!(!MESSAGE_ID_FIELDS.contains("RFC822"));
        // what a server sends back for that section
        let section = b"Message-ID: <a@b>\r\n\r\n";
        assert_eq!(message_id_from_header_bytes(section).unwrap(), "<a@b>");
    }

    #[test]
    fn answering_sets_seen_and_answered() {
        assert_eq!(ANSWERED_FLAGS, r"+FLAGS (\Seen \Answered)");
    }

    #[test]
    fn quotes_imap_strings() {
        assert_eq!(quote("<a\"b\\c@x>"), "\"<a\\\"b\\\\c@x>\"");
    }
}
