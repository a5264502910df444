use std::path::PathBuf;

use thiserror::Error;

use crate::utils::truncate_string;

/// Maximum length for response bodies carried in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Decryption failed - wrong password or tampered data")]
    AuthenticationFailed,

    #[error("Password must not be empty")]
    EmptyPassword,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Malformed encrypted value: {0}")]
    MalformedBlob(String),
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("No master password entered")]
    EmptyPassword,

    #[error("Master password is incorrect")]
    WrongPassword,

    #[error("Passwords do not match")]
    ConfirmationMismatch,

    #[error("Failed to read master password: {0}")]
    Prompt(#[source] std::io::Error),

    #[error("Credential store error: {0}")]
    Store(String),

    #[error(transparent)]
    Crypto(CryptoError),
}

impl From<CryptoError> for CredentialError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::AuthenticationFailed => CredentialError::WrongPassword,
            CryptoError::EmptyPassword => CredentialError::EmptyPassword,
            other => CredentialError::Crypto(other),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found at {0} - run with --generate-config first")]
    NotFound(PathBuf),

    #[error("Could not determine the {0} directory")]
    NoDirectory(&'static str),

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Configuration has no vault section - run with --generate-config")]
    MissingVault,

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Could not decrypt {field}: {source}")]
    Undecryptable {
        field: &'static str,
        #[source]
        source: CryptoError,
    },
}

#[derive(Error, Debug)]
pub enum SinkDispatchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Email delivery failed: {0}")]
    Email(String),
}

impl SinkDispatchError {
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        SinkDispatchError::Rejected {
            status: status.as_u16(),
            body: truncate_string(body, MAX_ERROR_BODY_LENGTH),
        }
    }

    /// Whether another attempt might succeed
    pub fn is_transient(&self) -> bool {
        match self {
            SinkDispatchError::Network(_) => true,
            SinkDispatchError::Rejected { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crypto_auth_failure_maps_to_wrong_password() {
        let err: CredentialError = CryptoError::AuthenticationFailed.into();
        assert!(matches!(err, CredentialError::WrongPassword));

        let err: CredentialError = CryptoError::KeyDerivation("bad params".into()).into();
        assert!(matches!(err, CredentialError::Crypto(_)));
    }

    #[test]
    fn test_encryption_failure_reported_as_encryption() {
        let err = CryptoError::Encryption("aead::Error".into());
        assert_eq!(err.to_string(), "Encryption failed: aead::Error");

        let err: CredentialError = err.into();
        assert!(matches!(err, CredentialError::Crypto(CryptoError::Encryption(_))));
    }

    #[test]
    fn test_sink_error_transient() {
        let server = SinkDispatchError::from_status(reqwest::StatusCode::BAD_GATEWAY, "oops");
        assert!(server.is_transient());

        let limited = SinkDispatchError::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "");
        assert!(limited.is_transient());

        let denied = SinkDispatchError::from_status(reqwest::StatusCode::UNAUTHORIZED, "no");
        assert!(!denied.is_transient());
    }

    #[test]
    fn test_rejected_body_truncated() {
        let body = "x".repeat(2000);
        match SinkDispatchError::from_status(reqwest::StatusCode::BAD_REQUEST, &body) {
            SinkDispatchError::Rejected { body, status } => {
                assert_eq!(status, 400);
                assert_eq!(body.len(), MAX_ERROR_BODY_LENGTH);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
