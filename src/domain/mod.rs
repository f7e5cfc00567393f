pub mod digest;
pub mod email;
