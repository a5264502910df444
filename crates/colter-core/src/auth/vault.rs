//! The `vault` config section: the per-config salt plus a sentinel value
//! used to check a key before any real secret is touched.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use super::crypto::{self, DerivedKey, EncryptedBlob, SALT_LEN};
use crate::error::{CredentialError, CryptoError};

/// Known plaintext sealed into the sentinel
const SENTINEL_PLAINTEXT: &[u8] = b"colter-vault-v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    /// Base64 salt shared by every encrypted field of this config
    pub salt: String,
    pub sentinel: EncryptedBlob,
}

impl Vault {
    /// Create a vault for a freshly chosen master password
    pub fn create(password: &str) -> Result<(Self, DerivedKey), CredentialError> {
        let key = crypto::derive_key(password, &crypto::generate_salt())?;
        let sentinel = crypto::encrypt_with_key(SENTINEL_PLAINTEXT, &key)?;
        let vault = Self {
            salt: BASE64.encode(key.salt()),
            sentinel,
        };
        Ok((vault, key))
    }

    pub fn salt_bytes(&self) -> Result<[u8; SALT_LEN], CryptoError> {
        let bytes = BASE64
            .decode(self.salt.trim())
            .map_err(|e| CryptoError::MalformedBlob(format!("vault salt: {}", e)))?;
        bytes
            .try_into()
            .map_err(|_| CryptoError::MalformedBlob("vault salt has wrong length".to_string()))
    }

    /// Derive the key for `password` from this vault's salt
    pub fn derive(&self, password: &str) -> Result<DerivedKey, CryptoError> {
        crypto::derive_key(password, &self.salt_bytes()?)
    }

    /// Check that `key` opens the sentinel
    pub fn verify(&self, key: &DerivedKey) -> Result<(), CryptoError> {
        let plain = crypto::decrypt_with_key(&self.sentinel, key)?;
        if plain == SENTINEL_PLAINTEXT {
            Ok(())
        } else {
            Err(CryptoError::AuthenticationFailed)
        }
    }
}
