pub mod decoders;
pub mod gmail;

pub use gmail::{GmailClient, MessageFilter};
