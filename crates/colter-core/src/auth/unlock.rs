//! Credential unlock flow.
//!
//! ```text
//! NO_SESSION ──┐
//!              ├─> PROMPTING ─> VERIFYING ─> UNLOCKED
//! EXPIRED ─────┘
//! ```
//!
//! A valid cached session skips straight to verification with the cached
//! key. The user is prompted at most once per process; a wrong password
//! ends the run.

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::credentials::CredentialStore;
use super::crypto::DerivedKey;
use super::session::SessionCache;
use super::vault::Vault;
use crate::error::CredentialError;

/// Source of an interactively entered password
pub trait PasswordPrompt {
    fn prompt(&self, message: &str) -> Result<Zeroizing<String>, CredentialError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockState {
    NoSession,
    Expired,
    Prompting,
    Verifying,
    Unlocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockSource {
    CachedSession,
    Prompted,
}

#[derive(Debug)]
pub struct Unlocked {
    pub key: DerivedKey,
    pub source: UnlockSource,
    /// Minutes left on the session that unlocked the vault
    pub minutes_remaining: i64,
}

pub struct UnlockFlow<'a, S, P: ?Sized> {
    sessions: &'a SessionCache<S>,
    prompt: &'a P,
}

impl<'a, S: CredentialStore, P: PasswordPrompt + ?Sized> UnlockFlow<'a, S, P> {
    pub fn new(sessions: &'a SessionCache<S>, prompt: &'a P) -> Self {
        Self { sessions, prompt }
    }

    /// Produce a key that opens `vault`, from the session cache if possible
    pub fn unlock(&self, vault: &Vault) -> Result<Unlocked, CredentialError> {
        let state = match self.sessions.load() {
            Some(session) if self.sessions.is_valid(&session) => {
                debug!(state = ?UnlockState::Verifying, "Trying cached session");
                match self.try_cached(&session, vault) {
                    Some(key) => {
                        let minutes_remaining = session.minutes_until_expiry();
                        info!(minutes_remaining, "Unlocked with cached session");
                        return Ok(Unlocked {
                            key,
                            source: UnlockSource::CachedSession,
                            minutes_remaining,
                        });
                    }
                    None => {
                        warn!("Cached session does not match the config, discarding it");
                        self.clear_quietly();
                        UnlockState::NoSession
                    }
                }
            }
            Some(_) => {
                debug!("Session has expired");
                self.clear_quietly();
                UnlockState::Expired
            }
            None => UnlockState::NoSession,
        };

        debug!(from = ?state, state = ?UnlockState::Prompting, "Prompting for master password");
        let password = self.prompt.prompt("Enter your master password: ")?;
        if password.is_empty() {
            return Err(CredentialError::EmptyPassword);
        }

        debug!(state = ?UnlockState::Verifying, "Verifying master password");
        let key = vault.derive(&password)?;
        drop(password);
        vault.verify(&key)?;

        if let Err(e) = self.sessions.store(&key) {
            warn!(error = %e, "Failed to cache session, you will be prompted again next run");
        }
        debug!(state = ?UnlockState::Unlocked, "Vault unlocked");

        Ok(Unlocked {
            key,
            source: UnlockSource::Prompted,
            minutes_remaining: super::session::SESSION_EXPIRY_MINUTES,
        })
    }

    /// Ask for a new master password (twice) and create a vault for it
    pub fn create_vault(&self) -> Result<(Vault, DerivedKey), CredentialError> {
        let password = self.prompt.prompt("Choose a master password: ")?;
        if password.is_empty() {
            return Err(CredentialError::EmptyPassword);
        }
        let confirm = self.prompt.prompt("Confirm master password: ")?;
        if *password != *confirm {
            return Err(CredentialError::ConfirmationMismatch);
        }

        let (vault, key) = Vault::create(&password)?;
        if let Err(e) = self.sessions.store(&key) {
            warn!(error = %e, "Failed to cache session");
        }
        Ok((vault, key))
    }

    fn try_cached(&self, session: &super::session::SessionData, vault: &Vault) -> Option<DerivedKey> {
        let salt = vault.salt_bytes().ok()?;
        if !session.matches_salt(&salt) {
            return None;
        }
        let key = session.to_key().ok()?;
        vault.verify(&key).ok()?;
        Some(key)
    }

    fn clear_quietly(&self) {
        if let Err(e) = self.sessions.clear() {
            warn!(error = %e, "Failed to clear session");
        }
    }
}
