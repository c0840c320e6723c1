use thiserror::Error;

/// Failures the orchestrator and CLI need to tell apart.
///
/// Everything else travels as a plain `anyhow::Error`; these are raised
/// inside `anyhow` and recovered with `downcast_ref` where it matters.
#[derive(Error, Debug)]
pub enum EpistolaryError {
    /// None of the known message-identifier headers was present.
    #[error("no message ID found in message headers")]
    MissingMessageId,

    /// A document with the requested ID is already stored.
    #[error("document already exists: {id}")]
    DocumentExists { id: String },

    #[error("document not found: {id}")]
    DocumentNotFound { id: String },

    /// The hosted extraction API answered without an assistant choice.
    #[error("no assistant response from text extraction API")]
    NoAssistantResponse,

    #[error("configuration error: {0}")]
    Config(String),
}
