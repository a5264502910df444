//! InfluxDB v2 export.
//!
//! Records are grouped into one point per entity (and breakdown category)
//! and written as line protocol with second precision.

use std::borrow::Cow;
use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{header, Client, Url};
use tracing::{debug, warn};

use super::{check_status, with_retry, DispatchBatch, Sink};
use crate::auth::SecretString;
use crate::config::InfluxConfig;
use crate::error::SinkDispatchError;
use crate::models::{MetricRecord, MetricValue, SourceKind};

/// Lines per write request
const BATCH_SIZE: usize = 10;

pub struct InfluxSink {
    client: Client,
    write_url: Url,
    token: SecretString,
}

impl InfluxSink {
    pub fn new(client: Client, config: &InfluxConfig<SecretString>) -> Result<Self, SinkDispatchError> {
        Ok(Self {
            client,
            write_url: write_url(&config.url, &config.org, &config.bucket)?,
            token: config.token.clone(),
        })
    }

    async fn write_batch(&self, body: String) -> Result<(), SinkDispatchError> {
        let body = &body;
        with_retry(self.name(), || async move {
            let response = self
                .client
                .post(self.write_url.clone())
                .header(header::AUTHORIZATION, format!("Token {}", self.token.expose()))
                .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
                .body(body.clone())
                .send()
                .await?;
            check_status(response).await
        })
        .await
    }
}

/// `{base}/api/v2/write?org=..&bucket=..&precision=s`
pub fn write_url(base: &str, org: &str, bucket: &str) -> Result<Url, SinkDispatchError> {
    let endpoint = format!("{}/api/v2/write", base.trim_end_matches('/'));
    Url::parse_with_params(
        &endpoint,
        &[("org", org), ("bucket", bucket), ("precision", "s")],
    )
    .map_err(|e| SinkDispatchError::InvalidEndpoint(format!("{}: {}", endpoint, e)))
}

fn measurement(source: SourceKind) -> &'static str {
    match source {
        SourceKind::Github => "github_repo_stats",
        SourceKind::Pypi => "pypi_package_stats",
    }
}

/// Escape commas, spaces and equals signs in measurement names, tag
/// keys, tag values and field keys
fn escape(s: &str) -> Cow<'_, str> {
    if s.contains([',', ' ', '=', '\\']) {
        let mut out = String::with_capacity(s.len() + 4);
        for c in s.chars() {
            if matches!(c, ',' | ' ' | '=' | '\\') {
                out.push('\\');
            }
            out.push(c);
        }
        Cow::Owned(out)
    } else {
        Cow::Borrowed(s)
    }
}

fn tags(record: &MetricRecord) -> Vec<(&'static str, String)> {
    let mut tags = match record.source {
        SourceKind::Github => match record.entity_id.split_once('/') {
            Some((owner, repo)) => vec![("owner", owner.to_string()), ("repo", repo.to_string())],
            None => vec![("repo", record.entity_id.clone())],
        },
        SourceKind::Pypi => vec![("package", record.entity_id.clone())],
    };
    if let Some(category) = &record.category {
        tags.push(("category", category.clone()));
    }
    tags.sort_by_key(|(k, _)| *k);
    tags
}

fn field_value(value: &MetricValue) -> Option<String> {
    match value {
        MetricValue::Integer(v) => Some(format!("{}i", v)),
        MetricValue::Float(v) if v.is_finite() => Some(v.to_string()),
        MetricValue::Float(_) => None,
    }
}

/// Render records as line protocol, one line per entity and category
pub fn to_line_protocol(records: &[MetricRecord]) -> Vec<String> {
    type Key<'a> = (&'static str, &'a str, Option<&'a str>);
    let mut points: BTreeMap<Key<'_>, Vec<&MetricRecord>> = BTreeMap::new();
    for record in records {
        let key = (
            measurement(record.source),
            record.entity_id.as_str(),
            record.category.as_deref(),
        );
        points.entry(key).or_default().push(record);
    }

    let mut lines = Vec::with_capacity(points.len());
    for ((measurement, _, _), group) in points {
        let fields: Vec<String> = group
            .iter()
            .filter_map(|r| {
                field_value(&r.value).map(|v| format!("{}={}", escape(&r.metric_name), v))
            })
            .collect();
        if fields.is_empty() {
            continue;
        }

        let mut line = escape(measurement).into_owned();
        for (key, value) in tags(group[0]) {
            line.push(',');
            line.push_str(&escape(key));
            line.push('=');
            line.push_str(&escape(&value));
        }
        line.push(' ');
        line.push_str(&fields.join(","));
        line.push(' ');
        line.push_str(&group[0].timestamp.timestamp().to_string());
        lines.push(line);
    }
    lines
}

#[async_trait]
impl Sink for InfluxSink {
    fn name(&self) -> &'static str {
        "influx"
    }

    async fn send(&self, batch: &DispatchBatch) -> Result<usize, SinkDispatchError> {
        let lines = to_line_protocol(&batch.records);
        if lines.is_empty() {
            debug!("No points to write to InfluxDB");
            return Ok(0);
        }

        let mut written = 0;
        let mut first_error = None;
        for (index, chunk) in lines.chunks(BATCH_SIZE).enumerate() {
            match self.write_batch(chunk.join("\n")).await {
                Ok(()) => written += chunk.len(),
                Err(e) => {
                    warn!(batch = index + 1, error = %e, "InfluxDB batch failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => {
                warn!(written, total = lines.len(), "InfluxDB export incomplete");
                Err(e)
            }
            None => Ok(written),
        }
    }

    fn preview(&self, batch: &DispatchBatch) -> String {
        to_line_protocol(&batch.records).join("\n")
    }
}
