use crate::mail::decoders::{decode_text_body, html_to_text};

pub type EmailId = String;

#[derive(Debug, Clone)]
pub struct Email {
    pub id: EmailId,
    /// IMAP UID within the folder it was fetched from (0 when unknown).
    pub uid: u32,
    pub from: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

impl Email {
    /// Heuristic for promotional mail: any body mentions "unsubscribe".
    pub fn is_marketing(&self) -> bool {
        self.text_body.to_lowercase().contains("unsubscribe")
            || self.html_body.to_lowercase().contains("unsubscribe")
    }

    /// Body text to lay out on paper: the plain part (base64-decoded when it
    /// turns out to be an encoded blob), else the HTML part flattened to text.
    pub fn display_body(&self, width: usize) -> String {
        let text = decode_text_body(&self.text_body);
        if !text.trim().is_empty() {
            return text.trim().to_string();
        }
        html_to_text(&self.html_body, width)
    }
}

/// A message about to be handed to the SMTP side.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub in_reply_to: Option<EmailId>,
}

impl OutgoingMessage {
    /// Reply to `original`, quoting nothing and threading on its message ID.
    pub fn reply_to(original: &Email, body: impl Into<String>) -> Self {
        Self {
            to: original.from.clone(),
            subject: format!("Re: {}", original.subject),
            body: body.into(),
            in_reply_to: Some(original.id.clone()),
        }
    }
}
