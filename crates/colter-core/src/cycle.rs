//! One collect-then-dispatch pass, and the daemon job that repeats it.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::{Instant, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::api::{GithubSource, PypiSource};
use crate::auth::{CredentialStore, DerivedKey, SessionCache};
use crate::collector::{Collector, MetricSource};
use crate::config::{self, Config, SealedConfig};
use crate::error::ConfigError;
use crate::models::{Alert, MetricRecord, OutputKind, SinkOutcome, SinkResult, SourceKind, Unit};
use crate::scheduler::{CycleControl, CycleJob};
use crate::sinks::{DispatchBatch, Dispatcher, EmailSink, InfluxSink, PrometheusSink, Sink, SmtpNotifier};
use crate::utils::format_number;

/// Which sources to collect and which time-series sinks to feed
#[derive(Debug, Clone)]
pub struct RunSelection {
    pub sources: Vec<SourceKind>,
    pub outputs: Vec<OutputKind>,
}

impl Default for RunSelection {
    fn default() -> Self {
        Self {
            sources: SourceKind::ALL.to_vec(),
            outputs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CycleOptions {
    /// Collect but send nothing
    pub dry_run: bool,
    /// Add a synthetic alert so the email path can be checked
    pub test_email: bool,
}

/// Outcome of one cycle
#[derive(Debug)]
pub struct CycleSummary {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed: std::time::Duration,
    pub dry_run: bool,
    pub entities: usize,
    pub records: Vec<MetricRecord>,
    pub alerts: usize,
    /// `(entity, error)` for entities that could not be collected
    pub source_failures: Vec<(String, String)>,
    pub details: Vec<(String, String)>,
    pub sink_results: Vec<SinkResult>,
    /// What each sink would have received, in dry-run mode
    pub previews: Vec<(&'static str, String)>,
}

impl CycleSummary {
    pub fn failed_sinks(&self) -> impl Iterator<Item = &SinkResult> {
        self.sink_results.iter().filter(|r| !r.is_success())
    }

    pub fn has_failures(&self) -> bool {
        !self.source_failures.is_empty() || self.failed_sinks().next().is_some()
    }

    /// Emit the end-of-cycle log lines; recoverable failures at warn level
    pub fn log(&self) {
        for (entity, error) in &self.source_failures {
            warn!(cycle = self.cycle, entity = %entity, error = %error, "Entity skipped");
        }
        for result in &self.sink_results {
            match &result.outcome {
                SinkOutcome::Delivered(count) => {
                    info!(cycle = self.cycle, sink = %result.sink, count, "Sink delivered")
                }
                SinkOutcome::Failed(e) => {
                    warn!(cycle = self.cycle, sink = %result.sink, error = %e, "Sink failed")
                }
            }
        }
        info!(
            cycle = self.cycle,
            records = self.records.len(),
            entities = self.entities,
            source_failures = self.source_failures.len(),
            sink_failures = self.failed_sinks().count(),
            elapsed_ms = self.elapsed.as_millis() as u64,
            dry_run = self.dry_run,
            "Cycle complete"
        );
    }

    /// Console report
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Cycle {} ({}): {} records from {} entities in {:.1}s{}",
            self.cycle,
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.records.len(),
            self.entities,
            self.elapsed.as_secs_f64(),
            if self.dry_run { " [dry run]" } else { "" }
        );

        for (entity, detail) in &self.details {
            let _ = writeln!(out, "  {}: {}", entity, detail);
        }

        if self.dry_run {
            for record in &self.records {
                let value = match record.unit {
                    Unit::Count => format_number(record.value.as_f64()),
                    _ => record.value.to_string(),
                };
                let category = record
                    .category
                    .as_deref()
                    .map(|c| format!(" [{}]", c))
                    .unwrap_or_default();
                let _ = writeln!(
                    out,
                    "  {} {}{} = {}",
                    record.entity_id, record.metric_name, category, value
                );
            }
            for (sink, preview) in &self.previews {
                let _ = writeln!(out, "  would send to {}:\n{}", sink, indent(preview, 4));
            }
        }

        for result in &self.sink_results {
            match &result.outcome {
                SinkOutcome::Delivered(count) => {
                    let _ = writeln!(out, "  {}: delivered {}", result.sink, count);
                }
                SinkOutcome::Failed(e) => {
                    let _ = writeln!(out, "  {}: FAILED - {}", result.sink, e);
                }
            }
        }
        for (entity, error) in &self.source_failures {
            let _ = writeln!(out, "  {}: skipped - {}", entity, error);
        }
        out
    }
}

fn indent(text: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    text.lines()
        .map(|l| format!("{}{}", pad, l))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Sources and sinks wired from a config
pub struct Pipeline {
    collector: Collector,
    dispatcher: Dispatcher,
    options: CycleOptions,
}

impl Pipeline {
    pub fn new(collector: Collector, dispatcher: Dispatcher, options: CycleOptions) -> Self {
        Self {
            collector,
            dispatcher,
            options,
        }
    }

    /// Build sources and sinks for `selection`. Selected entries whose
    /// config section is missing are skipped with a warning.
    pub fn from_config(
        config: &Config,
        selection: &RunSelection,
        options: CycleOptions,
        client: Client,
    ) -> Result<Self, ConfigError> {
        let mut sources: Vec<Box<dyn MetricSource>> = Vec::new();
        for kind in &selection.sources {
            match kind {
                SourceKind::Github => match &config.github {
                    Some(github) => sources.push(Box::new(GithubSource::new(client.clone(), github))),
                    None => warn!("GitHub is not configured, skipping (run with --generate-config)"),
                },
                SourceKind::Pypi => match &config.pypi {
                    Some(pypi) => sources.push(Box::new(PypiSource::new(client.clone(), pypi))),
                    None => warn!("PyPI is not configured, skipping (run with --generate-config)"),
                },
            }
        }

        let invalid = |e: crate::error::SinkDispatchError| ConfigError::Invalid(e.to_string());
        let mut sinks: Vec<Box<dyn Sink>> = Vec::new();
        for output in &selection.outputs {
            match output {
                OutputKind::Influx => match &config.influxdb {
                    Some(influx) => sinks.push(Box::new(InfluxSink::new(client.clone(), influx).map_err(invalid)?)),
                    None => warn!("InfluxDB is not configured, skipping (run with --generate-config)"),
                },
                OutputKind::Prometheus => match &config.prometheus {
                    Some(prometheus) => sinks.push(Box::new(
                        PrometheusSink::new(client.clone(), prometheus).map_err(invalid)?,
                    )),
                    None => warn!("Prometheus is not configured, skipping (run with --generate-config)"),
                },
            }
        }
        if let Some(smtp) = &config.smtp {
            sinks.push(Box::new(EmailSink::new(SmtpNotifier::new(smtp).map_err(invalid)?)));
        } else if options.test_email {
            warn!("--test-email requested but SMTP is not configured");
        }

        let collector = Collector::new(sources);
        let dispatcher = Dispatcher::new(sinks);
        debug!(
            sources = ?collector.source_kinds(),
            sinks = ?dispatcher.sink_names(),
            "Pipeline ready"
        );
        Ok(Self::new(collector, dispatcher, options))
    }

    pub async fn run_cycle(&self, cycle: u64) -> CycleSummary {
        let started_at = Utc::now();
        let started = Instant::now();
        info!(cycle, dry_run = self.options.dry_run, "Starting cycle");

        let report = self.collector.collect().await;

        let mut alerts = report.alerts_with_failures();
        if self.options.test_email && !self.options.dry_run {
            alerts.push(Alert::test());
        }
        let source_failures = report
            .failures
            .iter()
            .map(|f| (f.entity_id.clone(), f.error.to_string()))
            .collect();
        let batch = DispatchBatch::new(report.records, alerts);

        let (sink_results, previews) = if self.options.dry_run {
            let previews = self.dispatcher.preview(&batch);
            for (sink, preview) in &previews {
                info!(sink, "Dry run, would send:\n{}", preview);
            }
            (Vec::new(), previews)
        } else {
            (self.dispatcher.dispatch(&batch).await, Vec::new())
        };

        CycleSummary {
            cycle,
            started_at,
            elapsed: started.elapsed(),
            dry_run: self.options.dry_run,
            entities: report.entities_collected,
            alerts: batch.alerts.len(),
            records: batch.records,
            source_failures,
            details: report.details,
            sink_results,
            previews,
        }
    }
}

/// Everything needed to rebuild the pipeline when the config file changes
pub struct ConfigReload {
    path: PathBuf,
    last_modified: Option<SystemTime>,
    selection: RunSelection,
    options: CycleOptions,
    client: Client,
}

impl ConfigReload {
    pub fn new(path: PathBuf, selection: RunSelection, options: CycleOptions, client: Client) -> Self {
        let last_modified = config::modified_time(&path).ok();
        Self {
            path,
            last_modified,
            selection,
            options,
            client,
        }
    }

    /// A new pipeline when the file changed since the last check
    fn check(&mut self, key: &DerivedKey) -> Option<Pipeline> {
        let modified = match config::modified_time(&self.path) {
            Ok(modified) => modified,
            Err(e) => {
                warn!(error = %e, "Cannot stat config, keeping current settings");
                return None;
            }
        };
        if self.last_modified == Some(modified) {
            return None;
        }
        self.last_modified = Some(modified);

        info!(path = %self.path.display(), "Config changed, reloading");
        let rebuilt = SealedConfig::load(&self.path)
            .and_then(|sealed| sealed.unseal(key))
            .and_then(|config| {
                Pipeline::from_config(&config, &self.selection, self.options, self.client.clone())
            });
        match rebuilt {
            Ok(pipeline) => Some(pipeline),
            Err(e) => {
                warn!(error = %e, "Config reload failed, keeping previous settings");
                None
            }
        }
    }
}

/// Scheduler job: keeps the session alive, reloads config, runs the cycle
pub struct CycleRunner<S> {
    pipeline: Pipeline,
    key: DerivedKey,
    keep_alive: Option<SessionCache<S>>,
    /// A logout recorded after this instant stops the runner
    keep_alive_since: DateTime<Utc>,
    reload: Option<ConfigReload>,
    on_summary: Option<Box<dyn Fn(&CycleSummary) + Send + Sync>>,
}

impl<S: CredentialStore> CycleRunner<S> {
    pub fn new(pipeline: Pipeline, key: DerivedKey) -> Self {
        Self {
            pipeline,
            key,
            keep_alive: None,
            keep_alive_since: Utc::now(),
            reload: None,
            on_summary: None,
        }
    }

    /// Extend a still-valid session every cycle; stop once a logout is
    /// recorded. Expired or missing entries are left alone.
    pub fn with_keep_alive(mut self, sessions: SessionCache<S>) -> Self {
        self.keep_alive = Some(sessions);
        self.keep_alive_since = Utc::now();
        self
    }

    pub fn with_reload(mut self, reload: ConfigReload) -> Self {
        self.reload = Some(reload);
        self
    }

    pub fn on_summary(mut self, report: impl Fn(&CycleSummary) + Send + Sync + 'static) -> Self {
        self.on_summary = Some(Box::new(report));
        self
    }

    fn keep_session_alive(&self) -> CycleControl {
        let Some(sessions) = &self.keep_alive else {
            return CycleControl::Continue;
        };
        match sessions.logged_out_at() {
            Ok(Some(at)) if at >= self.keep_alive_since => {
                info!(logged_out_at = %at, "Logout recorded, stopping");
                return CycleControl::Stop;
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to read logout marker"),
        }

        match sessions.load() {
            Some(session) if sessions.is_valid(&session) && session.matches_salt(self.key.salt()) => {
                if let Err(e) = sessions.store(&self.key) {
                    warn!(error = %e, "Failed to refresh session");
                }
            }
            Some(_) => debug!("Session expired or replaced, not refreshing"),
            None => debug!("No session to refresh"),
        }
        CycleControl::Continue
    }
}

#[async_trait]
impl<S: CredentialStore> CycleJob for CycleRunner<S> {
    async fn run_cycle(&mut self, cycle: u64) -> anyhow::Result<CycleControl> {
        if self.keep_session_alive() == CycleControl::Stop {
            return Ok(CycleControl::Stop);
        }

        if let Some(reload) = self.reload.as_mut() {
            if let Some(pipeline) = reload.check(&self.key) {
                self.pipeline = pipeline;
            }
        }

        let summary = self.pipeline.run_cycle(cycle).await;
        summary.log();
        if let Some(report) = &self.on_summary {
            report(&summary);
        }
        Ok(CycleControl::Continue)
    }
}
