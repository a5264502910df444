//! Interactive `--generate-config`.
//!
//! Walks through each config section with the current values as defaults,
//! then seals the secrets and writes the file. An existing config is
//! unlocked first so its secrets can be kept by leaving the answer blank.

use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use colter_core::auth::{CredentialStore, PasswordPrompt, SecretString, SessionCache, UnlockFlow};
use colter_core::config::{
    Config, GithubConfig, InfluxConfig, PrometheusConfig, PypiConfig, SealedConfig, SmtpConfig,
};

use crate::prompt::Ask;

const DEFAULT_INFLUX_URL: &str = "http://localhost:8086";
const DEFAULT_GATEWAY_URL: &str = "http://localhost:9091";
const DEFAULT_SMTP_PORT: u16 = 587;

pub fn run<P, S>(path: &Path, sessions: &SessionCache<S>, prompt: &P) -> Result<()>
where
    P: Ask + PasswordPrompt,
    S: CredentialStore,
{
    let flow = UnlockFlow::new(sessions, prompt);

    let (vault, key, current) = if path.exists() {
        let sealed = SealedConfig::load(path)?;
        match &sealed.vault {
            Some(vault) => {
                let unlocked = flow.unlock(vault)?;
                let current = sealed.unseal(&unlocked.key)?;
                (vault.clone(), unlocked.key, current)
            }
            None => {
                warn!("Existing config has no vault, secrets will be asked for again");
                println!("Existing config has no master password yet.");
                let (vault, key) = flow.create_vault()?;
                let current = Config {
                    pypi: sealed.pypi,
                    prometheus: sealed.prometheus,
                    ..Config::default()
                };
                (vault, key, current)
            }
        }
    } else {
        println!("Creating {}", path.display());
        let (vault, key) = flow.create_vault()?;
        (vault, key, Config::default())
    };

    let config = edit_config(prompt, current).context("Setup aborted")?;
    config.validate()?;
    config
        .seal(&vault, &key)
        .context("Failed to encrypt secrets")?
        .save(path)?;

    info!(path = %path.display(), "Configuration written");
    println!("Configuration saved to {}", path.display());
    Ok(())
}

/// Ask for every section, starting from `current`
pub fn edit_config<A: Ask + ?Sized>(ask: &A, current: Config) -> io::Result<Config> {
    Ok(Config {
        vault: None,
        github: edit_github(ask, current.github)?,
        pypi: edit_pypi(ask, current.pypi)?,
        influxdb: edit_influx(ask, current.influxdb)?,
        prometheus: edit_prometheus(ask, current.prometheus)?,
        smtp: edit_smtp(ask, current.smtp)?,
    })
}

fn edit_github<A: Ask + ?Sized>(
    ask: &A,
    current: Option<GithubConfig<SecretString>>,
) -> io::Result<Option<GithubConfig<SecretString>>> {
    if !ask.confirm("Track GitHub repositories?", current.is_some())? {
        return Ok(None);
    }
    let repos_default = current.as_ref().map(|c| c.repos.join(", "));
    let repos = split_list(&ask.line(
        "Repositories (owner/name, comma separated, blank for all of yours)",
        repos_default.as_deref(),
    )?);
    let token = ask_secret(ask, "GitHub token", current.map(|c| c.token))?;
    Ok(Some(GithubConfig { token, repos }))
}

fn edit_pypi<A: Ask + ?Sized>(ask: &A, current: Option<PypiConfig>) -> io::Result<Option<PypiConfig>> {
    if !ask.confirm("Track PyPI packages?", current.is_some())? {
        return Ok(None);
    }
    let default = current.map(|c| c.packages.join(", "));
    let packages = loop {
        let packages = split_list(&ask.line("Packages (comma separated)", default.as_deref())?);
        if !packages.is_empty() {
            break packages;
        }
        println!("At least one package is required.");
    };
    Ok(Some(PypiConfig { packages }))
}

fn edit_influx<A: Ask + ?Sized>(
    ask: &A,
    current: Option<InfluxConfig<SecretString>>,
) -> io::Result<Option<InfluxConfig<SecretString>>> {
    if !ask.confirm("Export to InfluxDB?", current.is_some())? {
        return Ok(None);
    }
    let url = required(ask, "InfluxDB URL", Some(current.as_ref().map_or(DEFAULT_INFLUX_URL, |c| c.url.as_str())))?;
    let org = required(ask, "Organization", current.as_ref().map(|c| c.org.as_str()))?;
    let bucket = required(ask, "Bucket", current.as_ref().map(|c| c.bucket.as_str()))?;
    let token = ask_secret(ask, "InfluxDB token", current.map(|c| c.token))?;
    Ok(Some(InfluxConfig {
        url,
        org,
        bucket,
        token,
    }))
}

fn edit_prometheus<A: Ask + ?Sized>(
    ask: &A,
    current: Option<PrometheusConfig>,
) -> io::Result<Option<PrometheusConfig>> {
    if !ask.confirm("Push to a Prometheus Pushgateway?", current.is_some())? {
        return Ok(None);
    }
    let gateway = required(
        ask,
        "Pushgateway URL",
        Some(current.as_ref().map_or(DEFAULT_GATEWAY_URL, |c| c.gateway.as_str())),
    )?;
    let job = required(ask, "Job label", Some(current.as_ref().map_or("colter", |c| c.job.as_str())))?;
    let instance = required(
        ask,
        "Instance label",
        Some(current.as_ref().map_or("colter", |c| c.instance.as_str())),
    )?;
    Ok(Some(PrometheusConfig {
        gateway,
        job,
        instance,
    }))
}

fn edit_smtp<A: Ask + ?Sized>(
    ask: &A,
    current: Option<SmtpConfig<SecretString>>,
) -> io::Result<Option<SmtpConfig<SecretString>>> {
    if !ask.confirm("Send email alerts?", current.is_some())? {
        return Ok(None);
    }
    let smtp_server = required(ask, "SMTP server", current.as_ref().map(|c| c.smtp_server.as_str()))?;
    let port_default = current
        .as_ref()
        .map_or(DEFAULT_SMTP_PORT, |c| c.smtp_port)
        .to_string();
    let smtp_port = loop {
        match ask.line("SMTP port", Some(&port_default))?.parse::<u16>() {
            Ok(port) if port > 0 => break port,
            _ => println!("Enter a port between 1 and 65535."),
        }
    };
    let username = required(ask, "SMTP username", current.as_ref().map(|c| c.username.as_str()))?;
    let sender = required(ask, "Sender address", current.as_ref().map(|c| c.sender.as_str()))?;
    let recipient = required(ask, "Recipient address", current.as_ref().map(|c| c.recipient.as_str()))?;
    let password = ask_secret(ask, "SMTP password", current.map(|c| c.password))?;
    Ok(Some(SmtpConfig {
        smtp_server,
        smtp_port,
        username,
        password,
        sender,
        recipient,
    }))
}

/// Re-ask until the answer is not blank
fn required<A: Ask + ?Sized>(ask: &A, question: &str, default: Option<&str>) -> io::Result<String> {
    loop {
        let answer = ask.line(question, default)?;
        if !answer.trim().is_empty() {
            return Ok(answer.trim().to_string());
        }
        println!("{} is required.", question);
    }
}

/// Hidden input; blank keeps `current` when there is one
fn ask_secret<A: Ask + ?Sized>(
    ask: &A,
    label: &str,
    current: Option<SecretString>,
) -> io::Result<SecretString> {
    let question = if current.is_some() {
        format!("{} (blank keeps current)", label)
    } else {
        label.to_string()
    };
    loop {
        let answer = ask.secret(&question)?;
        if !answer.is_empty() {
            return Ok(SecretString::new(answer.as_str()));
        }
        if let Some(current) = &current {
            return Ok(current.clone());
        }
        println!("{} is required.", label);
    }
}

fn split_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::sync::Arc;

    use zeroize::Zeroizing;

    use super::*;
    use crate::prompt::parse_yes_no;
    use colter_core::auth::MemoryStore;
    use colter_core::CredentialError;

    /// Answers questions from a script, in order
    struct Script {
        answers: RefCell<VecDeque<&'static str>>,
    }

    impl Script {
        fn new(answers: &[&'static str]) -> Self {
            Self {
                answers: RefCell::new(answers.iter().copied().collect()),
            }
        }

        fn next(&self) -> io::Result<&'static str> {
            self.answers
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "script exhausted"))
        }

        fn is_done(&self) -> bool {
            self.answers.borrow().is_empty()
        }
    }

    impl Ask for Script {
        fn line(&self, _question: &str, default: Option<&str>) -> io::Result<String> {
            let answer = self.next()?;
            if answer.is_empty() {
                Ok(default.unwrap_or_default().to_string())
            } else {
                Ok(answer.to_string())
            }
        }

        fn secret(&self, _question: &str) -> io::Result<Zeroizing<String>> {
            self.next().map(|a| Zeroizing::new(a.to_string()))
        }

        fn confirm(&self, _question: &str, default: bool) -> io::Result<bool> {
            let answer = self.next()?;
            parse_yes_no(answer, default)
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, answer))
        }
    }

    impl PasswordPrompt for Script {
        fn prompt(&self, _message: &str) -> Result<Zeroizing<String>, CredentialError> {
            self.next()
                .map(|a| Zeroizing::new(a.to_string()))
                .map_err(CredentialError::Prompt)
        }
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(" a/b, c/d ,,"), vec!["a/b", "c/d"]);
        assert!(split_list("  ").is_empty());
    }

    #[test]
    fn test_required_reasks_blank() {
        let script = Script::new(&["", "  ", "acme"]);
        assert_eq!(required(&script, "Organization", None).unwrap(), "acme");
    }

    #[test]
    fn test_generate_then_edit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("colter").join("config.yaml");
        let store = Arc::new(MemoryStore::new());
        let sessions = SessionCache::new(store.clone());

        let first = Script::new(&[
            // new master password, confirmed
            "correct-horse",
            "correct-horse",
            // github
            "y",
            "octo/a, octo/b",
            "ghp_first",
            // pypi
            "y",
            "widgets",
            // influx, prometheus
            "n",
            "n",
            // smtp
            "y",
            "smtp.example.com",
            "",
            "alerts",
            "alerts@example.com",
            "me@example.com",
            "mail-pass",
        ]);
        run(&path, &sessions, &first).unwrap();
        assert!(first.is_done());

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("ghp_first"));
        assert!(!raw.contains("mail-pass"));

        // Session from the first run is still valid, so no password prompt
        let second = Script::new(&[
            // github kept, repos and token unchanged
            "",
            "",
            "",
            // drop pypi
            "n",
            "n",
            "n",
            // smtp kept as is
            "",
            "",
            "",
            "",
            "",
            "",
            "",
        ]);
        run(&path, &sessions, &second).unwrap();
        assert!(second.is_done());

        let sealed = SealedConfig::load(&path).unwrap();
        let key = sessions.load().unwrap().to_key().unwrap();
        let config = sealed.unseal(&key).unwrap();

        let github = config.github.unwrap();
        assert_eq!(github.repos, vec!["octo/a", "octo/b"]);
        assert_eq!(github.token.expose(), "ghp_first");
        assert!(config.pypi.is_none());
        let smtp = config.smtp.unwrap();
        assert_eq!(smtp.smtp_port, 587);
        assert_eq!(smtp.password.expose(), "mail-pass");
    }

    #[test]
    fn test_mismatched_confirmation_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let sessions = SessionCache::new(MemoryStore::new());

        let script = Script::new(&["correct-horse", "battery-staple"]);
        let err = run(&path, &sessions, &script).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CredentialError>(),
            Some(CredentialError::ConfirmationMismatch)
        ));
        assert!(!path.exists());
    }
}
