//! colter - track GitHub and PyPI metrics and export them to InfluxDB and
//! Prometheus, with email alerts.
//!
//! Secrets in the config file are sealed with a master password. A
//! successful unlock is cached in the OS keyring for 30 minutes so
//! scheduled runs do not prompt every time.

mod cli;
mod logging;
mod prompt;
mod setup;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use colter_core::api;
use colter_core::auth::{CredentialStore, KeyringStore, SessionCache, UnlockFlow, UnlockSource};
use colter_core::config::{self, SealedConfig};
use colter_core::cycle::{ConfigReload, CycleRunner, Pipeline};
use colter_core::scheduler::Scheduler;
use colter_core::{ConfigError, CredentialError};

use cli::Args;
use prompt::TerminalPrompt;

// ============================================================================
// Exit codes
// ============================================================================

const EXIT_CREDENTIAL: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_RUNTIME: u8 = 3;

/// Map a fatal error to its exit status
fn exit_code(err: &anyhow::Error) -> u8 {
    if err.chain().any(|cause| cause.is::<CredentialError>()) {
        EXIT_CREDENTIAL
    } else if err.chain().any(|cause| cause.is::<ConfigError>()) {
        EXIT_CONFIG
    } else {
        EXIT_RUNTIME
    }
}

/// Process status for the outcome of `run`
fn status_code(result: &Result<()>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(e) => exit_code(e),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Guard must outlive every log call so the file writer flushes
    let _guard = match config::log_dir()
        .map_err(anyhow::Error::from)
        .and_then(|dir| logging::init(&dir, args.verbose))
    {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: failed to set up logging: {:#}", e);
            return ExitCode::from(EXIT_RUNTIME);
        }
    };
    info!(version = env!("CARGO_PKG_VERSION"), "colter starting");

    let result = run(args).await;
    if let Err(e) = &result {
        error!(error = %format!("{:#}", e), "Fatal error");
        eprintln!("Error: {:#}", e);
    }
    ExitCode::from(status_code(&result))
}

/// Delete the cached session and record the logout for running daemons
fn logout<S: CredentialStore>(sessions: &SessionCache<S>) -> Result<()> {
    sessions.logout().context("Failed to clear cached session")?;
    info!("Session cleared");
    println!("Logged out.");
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let sessions = SessionCache::new(KeyringStore::new());

    if args.logout {
        return logout(&sessions);
    }

    let path = match &args.config {
        Some(path) => path.clone(),
        None => config::default_config_path()?,
    };

    if args.generate_config {
        return setup::run(&path, &sessions, &TerminalPrompt);
    }

    // Fatal checks happen before any network I/O
    let sealed = SealedConfig::load(&path)?;
    let vault = sealed.vault.as_ref().ok_or(ConfigError::MissingVault)?;
    let unlocked = UnlockFlow::new(&sessions, &TerminalPrompt).unlock(vault)?;
    if unlocked.source == UnlockSource::CachedSession {
        info!(minutes_remaining = unlocked.minutes_remaining, "Using cached session");
        eprintln!(
            "Using cached session ({} minutes remaining)",
            unlocked.minutes_remaining
        );
    }
    let config = sealed.unseal(&unlocked.key)?;

    let client = api::http_client().context("Failed to build HTTP client")?;
    let selection = args.selection();
    let options = args.cycle_options();
    let pipeline = Pipeline::from_config(&config, &selection, options, client.clone())?;
    drop(config);

    let mut runner = CycleRunner::new(pipeline, unlocked.key).on_summary(|summary| {
        print!("{}", summary.render());
    });

    let scheduler = match args.schedule {
        Some(minutes) => {
            info!(interval_minutes = minutes, "Starting scheduled collection");
            runner = runner
                .with_keep_alive(SessionCache::new(KeyringStore::new()))
                .with_reload(ConfigReload::new(path, selection, options, client));
            Scheduler::every(Duration::from_secs(minutes * 60))
        }
        None => Scheduler::once(),
    };

    // First signal stops after the current cycle, a second one aborts it
    let token = scheduler.cancellation_token();
    let interrupt = async {
        shutdown_signal().await;
        info!("Shutdown requested, finishing current cycle");
        token.cancel();
        shutdown_signal().await;
    };

    tokio::select! {
        cycles = scheduler.run(&mut runner) => info!(cycles, "Finished"),
        _ = interrupt => warn!("Interrupted during a cycle"),
    }
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use colter_core::auth::{MemoryStore, Vault};
    use colter_core::CryptoError;

    #[test]
    fn test_exit_codes() {
        let err = anyhow::Error::from(CredentialError::WrongPassword);
        assert_eq!(exit_code(&err), EXIT_CREDENTIAL);

        let err = anyhow::Error::from(ConfigError::MissingVault).context("Loading config");
        assert_eq!(exit_code(&err), EXIT_CONFIG);

        let err = anyhow::Error::from(ConfigError::Undecryptable {
            field: "github.token",
            source: CryptoError::AuthenticationFailed,
        });
        assert_eq!(exit_code(&err), EXIT_CONFIG);

        assert_eq!(exit_code(&anyhow::anyhow!("disk full")), EXIT_RUNTIME);
    }

    #[test]
    fn test_logout_removes_session_and_succeeds() {
        let sessions = SessionCache::new(MemoryStore::new());
        let (_, key) = Vault::create("correct-horse").unwrap();
        sessions.store(&key).unwrap();
        assert!(sessions.load().is_some());

        let result = logout(&sessions);
        assert_eq!(status_code(&result), 0);
        assert!(sessions.load().is_none());
        assert!(sessions.logged_out_at().unwrap().is_some());
    }

    #[test]
    fn test_logout_without_session_succeeds() {
        let sessions = SessionCache::new(MemoryStore::new());
        assert_eq!(status_code(&logout(&sessions)), 0);
    }
}
