pub mod document;
pub mod email;
