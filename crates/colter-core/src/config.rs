//! Configuration file management.
//!
//! The config is YAML at `~/.config/colter/config.yaml`. Tokens and
//! passwords are stored as encrypted blobs; `SealedConfig` is what lives on
//! disk and `Config` is the same shape with secrets opened.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::crypto::{self, DerivedKey, EncryptedBlob};
use crate::auth::{SecretString, Vault};
use crate::error::{ConfigError, CryptoError};

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "colter";

/// Config file name
const CONFIG_FILE: &str = "config.yaml";

/// Log directory under the cache directory
const LOG_DIR: &str = "logs";

const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_PROMETHEUS_JOB: &str = "colter";
const DEFAULT_PROMETHEUS_INSTANCE: &str = "colter";

/// Config file contents, generic over how secrets are held
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "S: Deserialize<'de>"))]
pub struct ConfigFile<S> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault: Option<Vault>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<GithubConfig<S>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pypi: Option<PypiConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub influxdb: Option<InfluxConfig<S>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<PrometheusConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp: Option<SmtpConfig<S>>,
}

/// As stored on disk
pub type SealedConfig = ConfigFile<EncryptedBlob>;

/// Secrets opened with the master password
pub type Config = ConfigFile<SecretString>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig<S> {
    pub token: S,
    /// `owner/name` entries; empty means every repository of the token's user
    #[serde(default)]
    pub repos: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PypiConfig {
    #[serde(default)]
    pub packages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfluxConfig<S> {
    pub url: String,
    pub org: String,
    pub bucket: String,
    pub token: S,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Pushgateway base URL
    pub gateway: String,
    #[serde(default = "default_job")]
    pub job: String,
    #[serde(default = "default_instance")]
    pub instance: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig<S> {
    pub smtp_server: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub username: String,
    pub password: S,
    pub sender: String,
    pub recipient: String,
}

fn default_job() -> String {
    DEFAULT_PROMETHEUS_JOB.to_string()
}

fn default_instance() -> String {
    DEFAULT_PROMETHEUS_INSTANCE.to_string()
}

fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}

impl<S> Default for ConfigFile<S> {
    fn default() -> Self {
        Self {
            vault: None,
            github: None,
            pypi: None,
            influxdb: None,
            prometheus: None,
            smtp: None,
        }
    }
}

impl<S> ConfigFile<S> {
    /// Convert every secret with `f`, which receives the field name for
    /// error reporting. Non-secret fields are copied.
    pub fn try_map_secrets<T, E>(
        &self,
        mut f: impl FnMut(&'static str, &S) -> Result<T, E>,
    ) -> Result<ConfigFile<T>, E> {
        let github = match &self.github {
            Some(g) => Some(GithubConfig {
                token: f("github.token", &g.token)?,
                repos: g.repos.clone(),
            }),
            None => None,
        };
        let influxdb = match &self.influxdb {
            Some(i) => Some(InfluxConfig {
                url: i.url.clone(),
                org: i.org.clone(),
                bucket: i.bucket.clone(),
                token: f("influxdb.token", &i.token)?,
            }),
            None => None,
        };
        let smtp = match &self.smtp {
            Some(s) => Some(SmtpConfig {
                smtp_server: s.smtp_server.clone(),
                smtp_port: s.smtp_port,
                username: s.username.clone(),
                password: f("smtp.password", &s.password)?,
                sender: s.sender.clone(),
                recipient: s.recipient.clone(),
            }),
            None => None,
        };

        Ok(ConfigFile {
            vault: self.vault.clone(),
            github,
            pypi: self.pypi.clone(),
            influxdb,
            prometheus: self.prometheus.clone(),
            smtp,
        })
    }

    /// Check the non-secret fields
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(github) = &self.github {
            for repo in &github.repos {
                let valid = matches!(
                    repo.split_once('/'),
                    Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/')
                );
                if !valid {
                    return Err(ConfigError::Invalid(format!(
                        "github repo '{}' must be in owner/name form",
                        repo
                    )));
                }
            }
        }
        if let Some(influx) = &self.influxdb {
            require_url("influxdb.url", &influx.url)?;
            if influx.org.trim().is_empty() || influx.bucket.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "influxdb.org and influxdb.bucket are required".to_string(),
                ));
            }
        }
        if let Some(prometheus) = &self.prometheus {
            require_url("prometheus.gateway", &prometheus.gateway)?;
        }
        if let Some(smtp) = &self.smtp {
            if smtp.smtp_server.trim().is_empty() || smtp.recipient.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "smtp.smtp_server and smtp.recipient are required".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn require_url(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{} must be an http(s) URL, got '{}'",
            field, value
        )))
    }
}

impl SealedConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&contents)?;
        config.validate()?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Write the config, readable only by the owner on Unix
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let contents = serde_yaml::to_string(self)?;
        write_private(path, contents.as_bytes()).map_err(io_err)?;
        debug!(path = %path.display(), "Saved configuration");
        Ok(())
    }

    /// Open every secret with `key` after checking it against the vault
    pub fn unseal(&self, key: &DerivedKey) -> Result<Config, ConfigError> {
        let vault = self.vault.as_ref().ok_or(ConfigError::MissingVault)?;
        vault
            .verify(key)
            .map_err(|source| ConfigError::Undecryptable {
                field: "vault.sentinel",
                source,
            })?;

        self.try_map_secrets(|field, blob| {
            let plain = crypto::decrypt_with_key(blob, key)
                .map_err(|source| ConfigError::Undecryptable { field, source })?;
            String::from_utf8(plain)
                .map(SecretString::from)
                .map_err(|_| ConfigError::Undecryptable {
                    field,
                    source: CryptoError::MalformedBlob("secret is not valid UTF-8".to_string()),
                })
        })
    }
}

impl Config {
    /// Encrypt every secret under `key` and attach `vault`
    pub fn seal(&self, vault: &Vault, key: &DerivedKey) -> Result<SealedConfig, CryptoError> {
        let mut sealed =
            self.try_map_secrets(|_, secret| crypto::encrypt_with_key(secret.expose().as_bytes(), key))?;
        sealed.vault = Some(vault.clone());
        Ok(sealed)
    }
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // mode() only applies on creation
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, contents)
}

/// `<config_dir>/colter/config.yaml`
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let config_dir = dirs::config_dir().ok_or(ConfigError::NoDirectory("config"))?;
    Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
}

/// `<cache_dir>/colter/logs`
pub fn log_dir() -> Result<PathBuf, ConfigError> {
    let cache_dir = dirs::cache_dir().ok_or(ConfigError::NoDirectory("cache"))?;
    Ok(cache_dir.join(APP_NAME).join(LOG_DIR))
}

/// Modification time of the config file, for hot reload
pub fn modified_time(path: &Path) -> Result<SystemTime, ConfigError> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Config {
        Config {
            vault: None,
            github: Some(GithubConfig {
                token: SecretString::new("ghp_example"),
                repos: vec!["octo/widgets".to_string(), "octo/gears".to_string()],
            }),
            pypi: Some(PypiConfig {
                packages: vec!["widgets".to_string()],
            }),
            influxdb: Some(InfluxConfig {
                url: "http://localhost:8086".to_string(),
                org: "home".to_string(),
                bucket: "metrics".to_string(),
                token: SecretString::new("influx-token"),
            }),
            prometheus: Some(PrometheusConfig {
                gateway: "http://localhost:9091".to_string(),
                job: default_job(),
                instance: default_instance(),
            }),
            smtp: Some(SmtpConfig {
                smtp_server: "smtp.example.com".to_string(),
                smtp_port: 587,
                username: "alerts".to_string(),
                password: SecretString::new("smtp-pass"),
                sender: "alerts@example.com".to_string(),
                recipient: "me@example.com".to_string(),
            }),
        }
    }

    #[test]
    fn test_seal_save_load_unseal_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("colter").join(CONFIG_FILE);

        let (vault, key) = Vault::create("correct-horse").unwrap();
        let sealed = sample_config().seal(&vault, &key).unwrap();
        sealed.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("ghp_example"));
        assert!(!raw.contains("smtp-pass"));
        assert!(raw.contains("octo/widgets"));

        let loaded = SealedConfig::load(&path).unwrap();
        let config = loaded.unseal(&key).unwrap();
        assert_eq!(config.github.as_ref().unwrap().token.expose(), "ghp_example");
        assert_eq!(config.influxdb.as_ref().unwrap().token.expose(), "influx-token");
        assert_eq!(config.smtp.as_ref().unwrap().password.expose(), "smtp-pass");
        assert_eq!(config.github.unwrap().repos.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "{}").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        SealedConfig::default().save(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_unseal_with_wrong_key() {
        let (vault, key) = Vault::create("correct-horse").unwrap();
        let sealed = sample_config().seal(&vault, &key).unwrap();

        let wrong = vault.derive("battery-staple").unwrap();
        match sealed.unseal(&wrong) {
            Err(ConfigError::Undecryptable { field, .. }) => assert_eq!(field, "vault.sentinel"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_unseal_without_vault() {
        let (vault, key) = Vault::create("correct-horse").unwrap();
        let mut sealed = sample_config().seal(&vault, &key).unwrap();
        sealed.vault = None;
        assert!(matches!(sealed.unseal(&key), Err(ConfigError::MissingVault)));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.yaml");
        assert!(matches!(SealedConfig::load(&path), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_malformed_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "github: [not, a, map").unwrap();
        assert!(matches!(SealedConfig::load(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_partial_config_defaults() {
        let yaml = r#"
pypi:
  packages: [widgets]
prometheus:
  gateway: http://localhost:9091
"#;
        let config: SealedConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.github.is_none());
        assert!(config.smtp.is_none());
        let prometheus = config.prometheus.unwrap();
        assert_eq!(prometheus.job, "colter");
        assert_eq!(prometheus.instance, "colter");
    }

    #[test]
    fn test_validate_repo_format() {
        let mut config = sample_config();
        config.github.as_mut().unwrap().repos.push("no-slash".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = sample_config();
        config.github.as_mut().unwrap().repos = vec!["a/b/c".to_string()];
        assert!(config.validate().is_err());

        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn test_validate_urls() {
        let mut config = sample_config();
        config.influxdb.as_mut().unwrap().url = "localhost:8086".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_modified_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        assert!(modified_time(&path).is_err());
        std::fs::write(&path, "{}").unwrap();
        assert!(modified_time(&path).is_ok());
    }
}
