//! Password-based authenticated encryption for config secrets.
//!
//! Keys are derived with Argon2id and every value is sealed with
//! XChaCha20-Poly1305. The salt travels inside each blob and is bound to the
//! ciphertext as associated data, so swapping salts between blobs is detected
//! just like a flipped ciphertext byte.

use std::fmt;
use std::str::FromStr;

use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    Key, XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Salt length in bytes
pub const SALT_LEN: usize = 16;

/// Nonce length in bytes (192 bits for XChaCha20)
pub const NONCE_LEN: usize = 24;

/// Derived key length in bytes
pub const KEY_LEN: usize = 32;

/// Argon2id cost parameters. Changing any of these makes existing configs
/// unreadable, so they are fixed for a blob version.
const KDF_MEMORY_KIB: u32 = 19_456;
const KDF_ITERATIONS: u32 = 2;
const KDF_PARALLELISM: u32 = 1;

/// Current blob format version
const BLOB_VERSION: &str = "v1";

/// A key derived from the master password, zeroed on drop.
#[derive(Clone)]
pub struct DerivedKey {
    bytes: Zeroizing<[u8; KEY_LEN]>,
    salt: [u8; SALT_LEN],
}

impl DerivedKey {
    /// Rebuild a key from previously derived material (e.g. a cached session)
    pub fn from_parts(bytes: [u8; KEY_LEN], salt: [u8; SALT_LEN]) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
            salt,
        }
    }

    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    pub(crate) fn expose(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKey")
            .field("salt", &BASE64.encode(self.salt))
            .finish_non_exhaustive()
    }
}

/// Ciphertext plus everything needed to open it again with the password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EncryptedBlob {
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

impl EncryptedBlob {
    /// Serialize as `v1$salt$nonce$ciphertext` (each part base64)
    pub fn encode(&self) -> String {
        format!(
            "{}${}${}${}",
            BLOB_VERSION,
            BASE64.encode(self.salt),
            BASE64.encode(self.nonce),
            BASE64.encode(&self.ciphertext)
        )
    }

    pub fn decode(value: &str) -> Result<Self, CryptoError> {
        let mut parts = value.trim().split('$');
        let version = parts.next().unwrap_or_default();
        if version != BLOB_VERSION {
            return Err(CryptoError::MalformedBlob(format!(
                "unsupported version '{}'",
                version
            )));
        }

        let (Some(salt), Some(nonce), Some(ciphertext), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(CryptoError::MalformedBlob(
                "expected four '$'-separated parts".to_string(),
            ));
        };

        Ok(Self {
            salt: decode_fixed(salt, "salt")?,
            nonce: decode_fixed(nonce, "nonce")?,
            ciphertext: BASE64
                .decode(ciphertext)
                .map_err(|e| CryptoError::MalformedBlob(format!("ciphertext: {}", e)))?,
        })
    }
}

fn decode_fixed<const N: usize>(part: &str, what: &str) -> Result<[u8; N], CryptoError> {
    let bytes = BASE64
        .decode(part)
        .map_err(|e| CryptoError::MalformedBlob(format!("{}: {}", what, e)))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        CryptoError::MalformedBlob(format!("{} must be {} bytes, got {}", what, N, b.len()))
    })
}

impl fmt::Display for EncryptedBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for EncryptedBlob {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl TryFrom<String> for EncryptedBlob {
    type Error = CryptoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::decode(&value)
    }
}

impl From<EncryptedBlob> for String {
    fn from(blob: EncryptedBlob) -> Self {
        blob.encode()
    }
}

/// Generate a fresh random salt
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Derive the symmetric key for `password` and `salt` with Argon2id
pub fn derive_key(password: &str, salt: &[u8; SALT_LEN]) -> Result<DerivedKey, CryptoError> {
    if password.is_empty() {
        return Err(CryptoError::EmptyPassword);
    }

    let params = Params::new(KDF_MEMORY_KIB, KDF_ITERATIONS, KDF_PARALLELISM, Some(KEY_LEN))
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut bytes[..])
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    Ok(DerivedKey { bytes, salt: *salt })
}

/// Encrypt `plaintext` under a key derived from `password` and a fresh salt
pub fn encrypt(plaintext: &[u8], password: &str) -> Result<EncryptedBlob, CryptoError> {
    let key = derive_key(password, &generate_salt())?;
    encrypt_with_key(plaintext, &key)
}

/// Decrypt a blob with `password`, re-deriving the key from the blob's salt
pub fn decrypt(blob: &EncryptedBlob, password: &str) -> Result<Vec<u8>, CryptoError> {
    let key = derive_key(password, &blob.salt)?;
    decrypt_with_key(blob, &key)
}

/// Encrypt with an already-derived key; the blob records the key's salt
pub fn encrypt_with_key(plaintext: &[u8], key: &DerivedKey) -> Result<EncryptedBlob, CryptoError> {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.expose()));
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: key.salt(),
            },
        )
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok(EncryptedBlob {
        salt: *key.salt(),
        nonce,
        ciphertext,
    })
}

/// Decrypt with an already-derived key. A key only opens blobs sealed under
/// its own salt.
pub fn decrypt_with_key(blob: &EncryptedBlob, key: &DerivedKey) -> Result<Vec<u8>, CryptoError> {
    if blob.salt != *key.salt() {
        return Err(CryptoError::AuthenticationFailed);
    }

    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.expose()));
    cipher
        .decrypt(
            XNonce::from_slice(&blob.nonce),
            Payload {
                msg: &blob.ciphertext,
                aad: &blob.salt,
            },
        )
        .map_err(|_| CryptoError::AuthenticationFailed)
}
