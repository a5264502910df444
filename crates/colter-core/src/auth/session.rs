use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use zeroize::Zeroize;

use super::credentials::CredentialStore;
use super::crypto::{DerivedKey, KEY_LEN, SALT_LEN};
use crate::error::{CredentialError, CryptoError};

/// Keyring account holding the session
const SESSION_ACCOUNT: &str = "session";

/// Keyring account holding the time of the last explicit logout
const LOGOUT_ACCOUNT: &str = "logout";

/// Session lifetime in minutes
pub const SESSION_EXPIRY_MINUTES: i64 = 30;

/// Cached proof of a successful unlock.
///
/// Holds the derived key (never the password) and the salt it belongs to,
/// so a later invocation can open the config without prompting while the
/// password itself stays unrecoverable.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionData {
    key: String,
    salt: String,
    pub created_at: DateTime<Utc>,
}

impl SessionData {
    pub fn new(key: &DerivedKey, created_at: DateTime<Utc>) -> Self {
        Self {
            key: BASE64.encode(key.expose()),
            salt: BASE64.encode(key.salt()),
            created_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        !self.is_valid_at(Utc::now())
    }

    /// Valid iff `0 <= now - created_at < 30 minutes`. A timestamp in the
    /// future (clock rollback) is not trusted.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        let elapsed = now - self.created_at;
        elapsed >= Duration::zero() && elapsed < Duration::minutes(SESSION_EXPIRY_MINUTES)
    }

    pub fn time_until_expiry(&self) -> Duration {
        let expiry = self.created_at + Duration::minutes(SESSION_EXPIRY_MINUTES);
        expiry - Utc::now()
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> i64 {
        self.time_until_expiry().num_minutes().max(0)
    }

    /// Whether this session was created for a config with `salt`
    pub fn matches_salt(&self, salt: &[u8; SALT_LEN]) -> bool {
        BASE64.encode(salt) == self.salt
    }

    /// Rebuild the cached key
    pub fn to_key(&self) -> Result<DerivedKey, CryptoError> {
        let mut key_bytes = BASE64
            .decode(&self.key)
            .map_err(|e| CryptoError::MalformedBlob(format!("session key: {}", e)))?;
        let salt_bytes = BASE64
            .decode(&self.salt)
            .map_err(|e| CryptoError::MalformedBlob(format!("session salt: {}", e)))?;

        let key: Result<[u8; KEY_LEN], _> = key_bytes.as_slice().try_into();
        key_bytes.zeroize();
        let mut key = key
            .map_err(|_| CryptoError::MalformedBlob("session key has wrong length".to_string()))?;
        let salt: [u8; SALT_LEN] = salt_bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::MalformedBlob("session salt has wrong length".to_string()))?;

        let derived = DerivedKey::from_parts(key, salt);
        key.zeroize();
        Ok(derived)
    }
}

impl Drop for SessionData {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for SessionData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionData")
            .field("salt", &self.salt)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// The single session entry in the credential store.
///
/// Expiry is checked lazily by callers; nothing purges the entry in the
/// background.
pub struct SessionCache<S> {
    store: S,
}

impl<S: CredentialStore> SessionCache<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Write a fresh session for `key`, overwriting any prior entry
    pub fn store(&self, key: &DerivedKey) -> Result<(), CredentialError> {
        self.store_at(key, Utc::now())
    }

    pub fn store_at(&self, key: &DerivedKey, now: DateTime<Utc>) -> Result<(), CredentialError> {
        let data = SessionData::new(key, now);
        let mut json = serde_json::to_string(&data)
            .map_err(|e| CredentialError::Store(format!("Failed to encode session: {}", e)))?;
        let result = self.store.set(SESSION_ACCOUNT, &json);
        json.zeroize();
        result?;
        debug!("Session stored in credential store");
        Ok(())
    }

    /// Read the session. Absent, unreadable and unparseable entries all
    /// yield `None`; an unparseable entry is removed.
    pub fn load(&self) -> Option<SessionData> {
        let mut json = match self.store.get(SESSION_ACCOUNT) {
            Ok(Some(json)) => json,
            Ok(None) => {
                debug!("No session found in credential store");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read session");
                return None;
            }
        };

        let parsed = serde_json::from_str::<SessionData>(&json);
        json.zeroize();
        match parsed {
            Ok(data) => Some(data),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable session");
                if let Err(e) = self.clear() {
                    warn!(error = %e, "Failed to clear unreadable session");
                }
                None
            }
        }
    }

    pub fn is_valid(&self, session: &SessionData) -> bool {
        session.is_valid_at(Utc::now())
    }

    /// Delete the session; succeeds when there is none
    pub fn clear(&self) -> Result<(), CredentialError> {
        self.store.delete(SESSION_ACCOUNT)?;
        debug!("Session cleared");
        Ok(())
    }

    /// Explicit logout: delete the session and record when it happened, so a
    /// running daemon can tell a logout from an entry that merely expired
    pub fn logout(&self) -> Result<(), CredentialError> {
        self.logout_at(Utc::now())
    }

    pub fn logout_at(&self, now: DateTime<Utc>) -> Result<(), CredentialError> {
        self.clear()?;
        self.store.set(LOGOUT_ACCOUNT, &now.to_rfc3339())?;
        debug!("Logout recorded");
        Ok(())
    }

    /// Time of the last `logout`, if any was recorded
    pub fn logged_out_at(&self) -> Result<Option<DateTime<Utc>>, CredentialError> {
        let Some(value) = self.store.get(LOGOUT_ACCOUNT)? else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(&value) {
            Ok(at) => Ok(Some(at.with_timezone(&Utc))),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable logout marker");
                Ok(None)
            }
        }
    }
}
