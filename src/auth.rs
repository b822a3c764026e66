//! Credential models, redacted secrets, scope sets, and the client configuration file.

pub mod client_config;
pub mod credential;
pub mod scope;
pub mod secret;

pub use client_config::*;
pub use credential::*;
pub use scope::*;
pub use secret::*;
