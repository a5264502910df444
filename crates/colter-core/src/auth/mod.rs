//! Master-password protection for stored credentials.
//!
//! This module provides:
//! - `crypto`: Argon2id key derivation and XChaCha20-Poly1305 sealing
//! - `Vault`: per-config salt and sentinel used to verify a key
//! - `CredentialStore`: OS keyring access behind a small trait
//! - `SessionCache`: cached unlock that expires after 30 minutes
//! - `UnlockFlow`: session check, prompt, verify, refresh

pub mod credentials;
pub mod crypto;
pub mod secret;
pub mod session;
pub mod unlock;
pub mod vault;

pub use credentials::{CredentialStore, KeyringStore, MemoryStore};
pub use crypto::{DerivedKey, EncryptedBlob};
pub use secret::SecretString;
pub use session::{SessionCache, SessionData};
pub use unlock::{PasswordPrompt, UnlockFlow, UnlockSource, Unlocked};
pub use vault::Vault;
