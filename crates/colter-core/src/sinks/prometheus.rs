//! Prometheus Pushgateway export.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use async_trait::async_trait;
use reqwest::{header, Client, Url};
use tracing::debug;

use super::{check_status, with_retry, DispatchBatch, Sink};
use crate::config::PrometheusConfig;
use crate::error::SinkDispatchError;
use crate::models::{MetricRecord, SourceKind};

/// Content type of the text exposition format
const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

pub struct PrometheusSink {
    client: Client,
    push_url: Url,
}

impl PrometheusSink {
    pub fn new(client: Client, config: &PrometheusConfig) -> Result<Self, SinkDispatchError> {
        Ok(Self {
            client,
            push_url: push_url(&config.gateway, &config.job, &config.instance)?,
        })
    }
}

/// `{gateway}/metrics/job/{job}/instance/{instance}` with each grouping
/// value percent-encoded as a path segment
pub fn push_url(gateway: &str, job: &str, instance: &str) -> Result<Url, SinkDispatchError> {
    let mut url = Url::parse(gateway)
        .map_err(|e| SinkDispatchError::InvalidEndpoint(format!("{}: {}", gateway, e)))?;
    url.path_segments_mut()
        .map_err(|_| SinkDispatchError::InvalidEndpoint(format!("{} cannot be a base URL", gateway)))?
        .pop_if_empty()
        .extend(["metrics", "job", job, "instance", instance]);
    Ok(url)
}

fn family_name(record: &MetricRecord) -> String {
    let prefix = match record.source {
        SourceKind::Github => "github_repo",
        SourceKind::Pypi => "pypi_package",
    };
    let name = format!("{}_{}", prefix, record.metric_name);
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == ':' { c } else { '_' })
        .collect()
}

fn escape_label_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

fn labels(record: &MetricRecord) -> String {
    let entity_label = match record.source {
        SourceKind::Github => "repo",
        SourceKind::Pypi => "package",
    };
    let mut out = format!("{}=\"{}\"", entity_label, escape_label_value(&record.entity_id));
    if let Some(category) = &record.category {
        let _ = write!(out, ",category=\"{}\"", escape_label_value(category));
    }
    out
}

/// Render records in the text exposition format, one gauge family per
/// metric with a single `# TYPE` line each
pub fn to_exposition(records: &[MetricRecord]) -> String {
    let mut families: BTreeMap<String, Vec<&MetricRecord>> = BTreeMap::new();
    for record in records {
        families.entry(family_name(record)).or_default().push(record);
    }

    let mut out = String::new();
    for (family, samples) in families {
        let _ = writeln!(out, "# TYPE {} gauge", family);
        for sample in samples {
            let _ = writeln!(out, "{}{{{}}} {}", family, labels(sample), sample.value);
        }
    }
    out
}

#[async_trait]
impl Sink for PrometheusSink {
    fn name(&self) -> &'static str {
        "prometheus"
    }

    async fn send(&self, batch: &DispatchBatch) -> Result<usize, SinkDispatchError> {
        if batch.records.is_empty() {
            debug!("No samples to push to Prometheus");
            return Ok(0);
        }

        let body = to_exposition(&batch.records);
        let body = &body;
        with_retry(self.name(), || async move {
            let response = self
                .client
                .put(self.push_url.clone())
                .header(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)
                .body(body.clone())
                .send()
                .await?;
            check_status(response).await
        })
        .await?;

        Ok(batch.records.len())
    }

    fn preview(&self, batch: &DispatchBatch) -> String {
        format!("PUT {}\n{}", self.push_url, to_exposition(&batch.records))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn test_exposition_groups_families() {
        let now = Utc::now();
        let records = vec![
            MetricRecord::count(SourceKind::Github, "octo/a", "stars", 5, now),
            MetricRecord::count(SourceKind::Github, "octo/b", "stars", 7, now),
            MetricRecord::count(SourceKind::Github, "octo/a", "forks", 1, now),
        ];
        let text = to_exposition(&records);
        assert_eq!(
            text,
            "# TYPE github_repo_forks gauge\n\
             github_repo_forks{repo=\"octo/a\"} 1\n\
             # TYPE github_repo_stars gauge\n\
             github_repo_stars{repo=\"octo/a\"} 5\n\
             github_repo_stars{repo=\"octo/b\"} 7\n"
        );
        assert_eq!(text.matches("# TYPE github_repo_stars").count(), 1);
    }

    #[test]
    fn test_pypi_category_label() {
        let record = MetricRecord::count(SourceKind::Pypi, "widgets", "python_minor_downloads", 12, Utc::now())
            .with_category("3.12");
        assert_eq!(
            to_exposition(&[record]),
            "# TYPE pypi_package_python_minor_downloads gauge\n\
             pypi_package_python_minor_downloads{package=\"widgets\",category=\"3.12\"} 12\n"
        );
    }

    #[test]
    fn test_label_escaping() {
        assert_eq!(escape_label_value(r#"a"b\c"#), r#"a\"b\\c"#);
        assert_eq!(escape_label_value("line\nbreak"), "line\\nbreak");
    }

    #[test]
    fn test_family_name_sanitized() {
        let record = MetricRecord::count(SourceKind::Pypi, "widgets", "odd-name.x", 1, Utc::now());
        assert_eq!(family_name(&record), "pypi_package_odd_name_x");
    }

    #[test]
    fn test_push_url() {
        let url = push_url("http://localhost:9091/", "colter", "my host").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:9091/metrics/job/colter/instance/my%20host"
        );
        assert!(push_url("localhost", "j", "i").is_err());
    }
}
