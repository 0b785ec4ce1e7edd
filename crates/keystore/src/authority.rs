//! Authority key management

use std::path::Path;

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use thiserror::Error;
use tracing::info;

use crate::paths::expand_path;

#[derive(Error, Debug)]
pub enum KeystoreError {
    #[error("failed to read keyfile: {0}")]
    Read(std::io::Error),

    #[error("failed to write keyfile: {0}")]
    Write(std::io::Error),

    #[error("invalid keyfile format: {0}")]
    InvalidFormat(String),

    #[error("failed to create directory: {0}")]
    CreateDir(std::io::Error),
}

/// The authority signing key together with its raw secret bytes.
///
/// The chain gateway consumes the 32-byte secret directly; the derived
/// public key is exposed for logging and address display.
pub struct AuthorityKey {
    secret: [u8; 32],
    signing_key: SigningKey,
}

impl AuthorityKey {
    fn from_secret(secret: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&secret);
        Self { secret, signing_key }
    }

    /// The 32-byte ed25519 secret key
    pub fn secret_bytes(&self) -> &[u8; 32] {
        &self.secret
    }

    /// The 32-byte public key (the authority's on-chain address)
    pub fn public_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }
}

/// Load the authority key from `keyfile`, or generate and persist a new
/// one if the file does not exist.
///
/// The keyfile holds exactly the 32-byte secret. `~` in the path is
/// expanded to the user's home directory.
pub fn load_or_generate_authority_key(keyfile: &Path) -> Result<AuthorityKey, KeystoreError> {
    let path = expand_path(keyfile);

    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(KeystoreError::CreateDir)?;
        }
    }

    if path.exists() {
        let bytes = std::fs::read(&path).map_err(KeystoreError::Read)?;
        if bytes.len() != 32 {
            return Err(KeystoreError::InvalidFormat(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut secret = [0u8; 32];
        secret.copy_from_slice(&bytes);
        info!("Loaded authority key from {:?}", path);
        return Ok(AuthorityKey::from_secret(secret));
    }

    let signing_key = SigningKey::generate(&mut OsRng);
    let secret = signing_key.to_bytes();
    std::fs::write(&path, secret).map_err(KeystoreError::Write)?;

    info!("Generated new authority key, saved to {:?}", path);
    Ok(AuthorityKey::from_secret(secret))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_generate_then_load_is_stable() {
        let temp_dir = std::env::temp_dir().join("campuscoin_test_authority");
        let _ = fs::remove_dir_all(&temp_dir);
        fs::create_dir_all(&temp_dir).unwrap();

        let keyfile = temp_dir.join("authority.key");

        let key1 = load_or_generate_authority_key(&keyfile).unwrap();
        assert!(keyfile.exists());

        let key2 = load_or_generate_authority_key(&keyfile).unwrap();
        assert_eq!(key1.public_bytes(), key2.public_bytes());
        assert_eq!(key1.secret_bytes(), key2.secret_bytes());

        let _ = fs::remove_dir_all(&temp_dir);
    }

    #[test]
    fn test_rejects_wrong_length_keyfile() {
        let temp_dir = std::env::temp_dir().join("campuscoin_test_badkey");
        let _ = fs::remove_dir_all(&temp_dir);
        fs::create_dir_all(&temp_dir).unwrap();

        let keyfile = temp_dir.join("authority.key");
        fs::write(&keyfile, b"short").unwrap();

        assert!(matches!(
            load_or_generate_authority_key(&keyfile),
            Err(KeystoreError::InvalidFormat(_))
        ));

        let _ = fs::remove_dir_all(&temp_dir);
    }

    #[test]
    fn test_creates_parent_directories() {
        let temp_dir = std::env::temp_dir().join("campuscoin_test_nested");
        let _ = fs::remove_dir_all(&temp_dir);

        let keyfile = temp_dir.join("a/b/authority.key");
        load_or_generate_authority_key(&keyfile).unwrap();
        assert!(keyfile.exists());

        let _ = fs::remove_dir_all(&temp_dir);
    }
}
