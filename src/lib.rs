//! Email on paper: unread mail becomes PDF documents on a tablet (or in a
//! directory), and handwritten replies on the last page go back out as
//! email.

pub mod components;
pub mod config;
pub mod daemon;
pub mod domain;
pub mod error;
pub mod extract;
pub mod mail;
pub mod orchestrator;
pub mod process;
pub mod render;
pub mod secrets;
pub mod store;
