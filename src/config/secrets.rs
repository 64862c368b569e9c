//! Secret handling.
//!
//! Re-exports the secrecy types callers need to read the API key back out of
//! [`Config`](super::Config) when handing it to a transport.

pub use secrecy::{ExposeSecret, SecretString};
