//! Secret-store access for vision.
//!
//! Secrets never persist locally. This crate holds the HTTP client for
//! the external store, key normalization, and the credential service that
//! joins reference rows with fetched values.

pub mod client;
pub mod credentials;
pub mod error;
pub mod keys;

pub use {
    client::VaultClient,
    credentials::{CredentialService, SecretValue, matches_url},
    error::{Error as VaultError, Result},
    keys::{credential_key, normalize_key},
};
