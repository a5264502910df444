use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// External system a metric was collected from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Github,
    Pypi,
}

impl SourceKind {
    pub const ALL: [SourceKind; 2] = [SourceKind::Github, SourceKind::Pypi];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Github => "github",
            SourceKind::Pypi => "pypi",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Integer(i64),
    Float(f64),
}

impl MetricValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            MetricValue::Integer(v) => *v as f64,
            MetricValue::Float(v) => *v,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Integer(v) => write!(f, "{}", v),
            MetricValue::Float(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Integer(v)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Count,
    /// Unix timestamp in seconds
    Seconds,
    Ratio,
}

/// A single measurement, immutable once produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub source: SourceKind,
    /// `owner/name` for GitHub, the package name for PyPI
    pub entity_id: String,
    pub metric_name: String,
    pub value: MetricValue,
    pub unit: Unit,
    pub timestamp: DateTime<Utc>,
    /// Breakdown dimension, e.g. the Python version of a download count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl MetricRecord {
    pub fn new(
        source: SourceKind,
        entity_id: impl Into<String>,
        metric_name: impl Into<String>,
        value: impl Into<MetricValue>,
        unit: Unit,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            source,
            entity_id: entity_id.into(),
            metric_name: metric_name.into(),
            value: value.into(),
            unit,
            timestamp,
            category: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn count(
        source: SourceKind,
        entity_id: &str,
        metric_name: &str,
        value: i64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::new(source, entity_id, metric_name, value, Unit::Count, timestamp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    OpenIssue,
    CollectionFailure,
    Test,
}

/// Something worth telling a human about, delivered by email
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub entity_id: String,
    pub title: String,
    pub kind: AlertKind,
}

impl Alert {
    pub fn open_issue(entity_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            title: title.into(),
            kind: AlertKind::OpenIssue,
        }
    }

    pub fn collection_failure(entity_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            title: reason.into(),
            kind: AlertKind::CollectionFailure,
        }
    }

    /// Synthetic alert injected by `--test-email`
    pub fn test() -> Self {
        Self {
            entity_id: "colter/test".to_string(),
            title: "This is a test issue for email alert.".to_string(),
            kind: AlertKind::Test,
        }
    }
}
