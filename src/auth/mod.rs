//! Authentication
//!
//! OAuth2 refresh-token credential provider with cached access tokens.

mod provider;

pub use provider::{CredentialProvider, Credentials};
