//! OS credential storage.
//!
//! The session cache only needs `get/set/delete` on string values, so the
//! keyring sits behind the `CredentialStore` trait and tests swap in
//! `MemoryStore`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use keyring::Entry;

use crate::error::CredentialError;

/// Keyring service name for every entry this tool writes
pub const SERVICE_NAME: &str = "colter";

pub trait CredentialStore: Send + Sync {
    /// Read a value; `Ok(None)` when no entry exists
    fn get(&self, account: &str) -> Result<Option<String>, CredentialError>;

    /// Write a value, replacing any existing entry
    fn set(&self, account: &str, value: &str) -> Result<(), CredentialError>;

    /// Delete an entry. Deleting a missing entry succeeds.
    fn delete(&self, account: &str) -> Result<(), CredentialError>;
}

impl<T: CredentialStore + ?Sized> CredentialStore for Arc<T> {
    fn get(&self, account: &str) -> Result<Option<String>, CredentialError> {
        (**self).get(account)
    }

    fn set(&self, account: &str, value: &str) -> Result<(), CredentialError> {
        (**self).set(account, value)
    }

    fn delete(&self, account: &str) -> Result<(), CredentialError> {
        (**self).delete(account)
    }
}

/// Credentials kept in the platform keychain (macOS Keychain, Windows
/// Credential Manager, Linux kernel keyutils)
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, account: &str) -> Result<Entry, CredentialError> {
        Entry::new(&self.service, account).map_err(|e| {
            CredentialError::Store(format!("Failed to create keyring entry: {}", e))
        })
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringStore {
    fn get(&self, account: &str) -> Result<Option<String>, CredentialError> {
        match self.entry(account)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(CredentialError::Store(format!(
                "Failed to retrieve {} from keychain: {}",
                account, e
            ))),
        }
    }

    fn set(&self, account: &str, value: &str) -> Result<(), CredentialError> {
        self.entry(account)?.set_password(value).map_err(|e| {
            CredentialError::Store(format!("Failed to store {} in keychain: {}", account, e))
        })
    }

    fn delete(&self, account: &str) -> Result<(), CredentialError> {
        match self.entry(account)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(CredentialError::Store(format!(
                "Failed to delete {} from keychain: {}",
                account, e
            ))),
        }
    }
}

/// In-process store with the same semantics as the keyring
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, CredentialError> {
        self.entries
            .lock()
            .map_err(|_| CredentialError::Store("memory store lock poisoned".to_string()))
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, account: &str) -> Result<Option<String>, CredentialError> {
        Ok(self.lock()?.get(account).cloned())
    }

    fn set(&self, account: &str, value: &str) -> Result<(), CredentialError> {
        self.lock()?.insert(account.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, account: &str) -> Result<(), CredentialError> {
        self.lock()?.remove(account);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_semantics() {
        let store = MemoryStore::new();
        assert_eq!(store.get("session").unwrap(), None);

        store.set("session", "one").unwrap();
        store.set("session", "two").unwrap();
        assert_eq!(store.get("session").unwrap().as_deref(), Some("two"));

        store.delete("session").unwrap();
        store.delete("session").unwrap();
        assert_eq!(store.get("session").unwrap(), None);
    }

    #[test]
    fn test_shared_store_through_arc() {
        let store = Arc::new(MemoryStore::new());
        let other = store.clone();
        store.set("session", "value").unwrap();
        assert_eq!(other.get("session").unwrap().as_deref(), Some("value"));
    }
}
