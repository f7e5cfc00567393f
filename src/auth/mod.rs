pub mod credentials;
pub mod oauth;
pub mod token_store;
pub mod tokens_file;

pub use credentials::CredentialStore;
