//! CampusCoin keystore
//!
//! The minting authority signs every privileged chain transaction with a
//! single ed25519 key. This crate loads that key from disk, generating
//! and persisting a fresh one on first run. Student wallet keys do NOT
//! live here; they are provisioned by the wallet service and stored with
//! the wallet row.

mod authority;
mod paths;

pub use authority::{load_or_generate_authority_key, AuthorityKey, KeystoreError};
pub use paths::{default_authority_keyfile, default_data_dir, expand_path};
