//! Metric collection across sources.
//!
//! Every configured source is asked for its entities and each entity is
//! fetched on its own. A failing entity is recorded and skipped; the rest of
//! the cycle carries on with partial results.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::api::SourceFetchError;
use crate::models::{Alert, MetricRecord, SourceKind};

/// Everything one entity produced in a cycle
#[derive(Debug, Default)]
pub struct EntityReport {
    pub records: Vec<MetricRecord>,
    pub alerts: Vec<Alert>,
    /// Extra line for the console summary (e.g. the latest package version)
    pub detail: Option<String>,
}

#[async_trait]
pub trait MetricSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Entities to track this cycle
    async fn entities(&self) -> Result<Vec<String>, SourceFetchError>;

    async fn fetch(&self, entity: &str) -> Result<EntityReport, SourceFetchError>;
}

#[derive(Debug)]
pub struct FailedEntity {
    pub source: SourceKind,
    pub entity_id: String,
    pub error: SourceFetchError,
}

#[derive(Debug, Default)]
pub struct CollectionReport {
    pub records: Vec<MetricRecord>,
    pub alerts: Vec<Alert>,
    pub failures: Vec<FailedEntity>,
    /// `(entity, detail)` pairs for the console summary
    pub details: Vec<(String, String)>,
    pub entities_collected: usize,
}

impl CollectionReport {
    /// Alerts plus one alert per failed entity, for the email sink
    pub fn alerts_with_failures(&self) -> Vec<Alert> {
        let mut alerts = self.alerts.clone();
        alerts.extend(self.failures.iter().map(|f| {
            Alert::collection_failure(
                f.entity_id.clone(),
                format!("Failed to collect {} metrics: {}", f.source, f.error),
            )
        }));
        alerts
    }
}

/// Runs each source in turn
pub struct Collector {
    sources: Vec<Box<dyn MetricSource>>,
}

impl Collector {
    pub fn new(sources: Vec<Box<dyn MetricSource>>) -> Self {
        Self { sources }
    }

    pub fn source_kinds(&self) -> Vec<SourceKind> {
        self.sources.iter().map(|s| s.kind()).collect()
    }

    pub async fn collect(&self) -> CollectionReport {
        let mut report = CollectionReport::default();

        for source in &self.sources {
            let kind = source.kind();
            let entities = match source.entities().await {
                Ok(entities) => entities,
                Err(error) => {
                    warn!(source = %kind, error = %error, "Failed to list entities");
                    report.failures.push(FailedEntity {
                        source: kind,
                        entity_id: kind.to_string(),
                        error,
                    });
                    continue;
                }
            };
            debug!(source = %kind, count = entities.len(), "Collecting metrics");

            for entity in entities {
                match source.fetch(&entity).await {
                    Ok(entity_report) => {
                        debug!(
                            source = %kind,
                            entity = %entity,
                            records = entity_report.records.len(),
                            "Collected entity"
                        );
                        report.entities_collected += 1;
                        report.records.extend(entity_report.records);
                        report.alerts.extend(entity_report.alerts);
                        if let Some(detail) = entity_report.detail {
                            report.details.push((entity, detail));
                        }
                    }
                    Err(error) => {
                        warn!(source = %kind, entity = %entity, error = %error, "Failed to collect entity");
                        report.failures.push(FailedEntity {
                            source: kind,
                            entity_id: entity,
                            error,
                        });
                    }
                }
            }
        }

        info!(
            records = report.records.len(),
            entities = report.entities_collected,
            failures = report.failures.len(),
            "Collection finished"
        );
        report
    }
}
