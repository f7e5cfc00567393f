pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod llm;
pub mod mail;
pub mod notifier;
pub mod pipeline;
pub mod retry;
pub mod rules;
pub mod store;
