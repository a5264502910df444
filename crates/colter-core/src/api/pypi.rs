//! PyPI download statistics from pypistats.org, plus the latest version
//! from the PyPI JSON API.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize};
use tracing::warn;

use super::{get_json, SourceFetchError};
use crate::collector::{EntityReport, MetricSource};
use crate::config::PypiConfig;
use crate::models::{MetricRecord, SourceKind};

const PYPISTATS_BASE_URL: &str = "https://pypistats.org/api/packages";
const PYPI_BASE_URL: &str = "https://pypi.org/pypi";

/// Overall series category that excludes mirror traffic
const WITHOUT_MIRRORS: &str = "without_mirrors";

/// Label for rows pypistats could not attribute
const UNKNOWN_CATEGORY: &str = "unknown";

#[derive(Debug, Deserialize)]
struct StatsResponse<T> {
    data: T,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RecentDownloads {
    #[serde(default)]
    pub last_day: i64,
    #[serde(default)]
    pub last_week: i64,
    #[serde(default)]
    pub last_month: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryRow {
    pub category: Option<String>,
    #[serde(default)]
    pub downloads: i64,
}

#[derive(Debug, Deserialize)]
struct PackageDocument {
    info: PackageInfo,
}

#[derive(Debug, Deserialize)]
struct PackageInfo {
    version: String,
}

/// Per-category download series for one package
#[derive(Debug, Default)]
pub struct Breakdowns {
    pub python_major: Option<Vec<CategoryRow>>,
    pub python_minor: Option<Vec<CategoryRow>>,
    pub system: Option<Vec<CategoryRow>>,
}

pub struct PypiSource {
    client: Client,
    packages: Vec<String>,
}

impl PypiSource {
    pub fn new(client: Client, config: &PypiConfig) -> Self {
        Self {
            client,
            packages: config.packages.clone(),
        }
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, SourceFetchError> {
        get_json(url, || self.client.get(url)).await
    }

    async fn stats<T: DeserializeOwned>(&self, package: &str, kind: &str) -> Result<T, SourceFetchError> {
        let response: StatsResponse<T> = self
            .get(&format!("{}/{}/{}", PYPISTATS_BASE_URL, package, kind))
            .await?;
        Ok(response.data)
    }

    pub async fn latest_version(&self, package: &str) -> Result<String, SourceFetchError> {
        let doc: PackageDocument = self
            .get(&format!("{}/{}/json", PYPI_BASE_URL, package))
            .await?;
        Ok(doc.info.version)
    }
}

/// Total downloads by category, in category order
pub fn sum_by_category(rows: &[CategoryRow]) -> BTreeMap<String, i64> {
    let mut totals = BTreeMap::new();
    for row in rows {
        let category = row.category.as_deref().unwrap_or(UNKNOWN_CATEGORY);
        *totals.entry(category.to_string()).or_insert(0) += row.downloads;
    }
    totals
}

/// Sum of the overall series, ignoring mirror downloads
pub fn total_without_mirrors(rows: &[CategoryRow]) -> i64 {
    rows.iter()
        .filter(|r| r.category.as_deref() == Some(WITHOUT_MIRRORS))
        .map(|r| r.downloads)
        .sum()
}

/// Normalize one package into metric records
pub fn package_records(
    package: &str,
    recent: &RecentDownloads,
    total: i64,
    breakdowns: &Breakdowns,
    now: DateTime<Utc>,
) -> Vec<MetricRecord> {
    let count = |name: &str, value: i64| MetricRecord::count(SourceKind::Pypi, package, name, value, now);

    let mut records = vec![
        count("downloads_last_day", recent.last_day),
        count("downloads_last_week", recent.last_week),
        count("downloads_last_month", recent.last_month),
        count("downloads_total", total),
    ];

    let series = [
        ("python_major_downloads", &breakdowns.python_major),
        ("python_minor_downloads", &breakdowns.python_minor),
        ("system_downloads", &breakdowns.system),
    ];
    for (name, rows) in series {
        let Some(rows) = rows else { continue };
        for (category, downloads) in sum_by_category(rows) {
            records.push(count(name, downloads).with_category(category));
        }
    }
    records
}

fn optional<T>(package: &str, what: &str, result: Result<T, SourceFetchError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(package, metric = what, error = %e, "Skipping metric");
            None
        }
    }
}

#[async_trait]
impl MetricSource for PypiSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Pypi
    }

    async fn entities(&self) -> Result<Vec<String>, SourceFetchError> {
        Ok(self.packages.clone())
    }

    async fn fetch(&self, entity: &str) -> Result<EntityReport, SourceFetchError> {
        let recent: RecentDownloads = self.stats(entity, "recent").await?;
        let overall: Vec<CategoryRow> = self.stats(entity, "overall").await?;

        let (major, minor, system, version) = tokio::join!(
            self.stats::<Vec<CategoryRow>>(entity, "python_major"),
            self.stats::<Vec<CategoryRow>>(entity, "python_minor"),
            self.stats::<Vec<CategoryRow>>(entity, "system"),
            self.latest_version(entity),
        );
        let breakdowns = Breakdowns {
            python_major: optional(entity, "python_major", major),
            python_minor: optional(entity, "python_minor", minor),
            system: optional(entity, "system", system),
        };

        Ok(EntityReport {
            records: package_records(
                entity,
                &recent,
                total_without_mirrors(&overall),
                &breakdowns,
                Utc::now(),
            ),
            alerts: Vec::new(),
            detail: optional(entity, "version", version).map(|v| format!("version {}", v)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricValue;

    #[test]
    fn test_parse_recent() {
        let json = r#"{"data": {"last_day": 12, "last_month": 900, "last_week": 150}, "package": "widgets", "type": "recent_downloads"}"#;
        let response: StatsResponse<RecentDownloads> = serde_json::from_str(json).unwrap();
        assert_eq!(response.data.last_day, 12);
        assert_eq!(response.data.last_week, 150);
        assert_eq!(response.data.last_month, 900);
    }

    #[test]
    fn test_total_without_mirrors() {
        let json = r#"{"data": [
            {"category": "with_mirrors", "date": "2024-03-01", "downloads": 100},
            {"category": "without_mirrors", "date": "2024-03-01", "downloads": 80},
            {"category": "without_mirrors", "date": "2024-03-02", "downloads": 20}
        ]}"#;
        let response: StatsResponse<Vec<CategoryRow>> = serde_json::from_str(json).unwrap();
        assert_eq!(total_without_mirrors(&response.data), 100);
    }

    #[test]
    fn test_sum_by_category_handles_null() {
        let json = r#"[
            {"category": "3", "date": "2024-03-01", "downloads": 70},
            {"category": "3", "date": "2024-03-02", "downloads": 30},
            {"category": "2", "date": "2024-03-01", "downloads": 5},
            {"category": null, "date": "2024-03-01", "downloads": 1}
        ]"#;
        let rows: Vec<CategoryRow> = serde_json::from_str(json).unwrap();
        let totals = sum_by_category(&rows);
        assert_eq!(totals.get("3"), Some(&100));
        assert_eq!(totals.get("2"), Some(&5));
        assert_eq!(totals.get("unknown"), Some(&1));
    }

    #[test]
    fn test_package_records() {
        let recent = RecentDownloads {
            last_day: 1,
            last_week: 7,
            last_month: 30,
        };
        let breakdowns = Breakdowns {
            python_major: Some(vec![CategoryRow {
                category: Some("3".to_string()),
                downloads: 30,
            }]),
            python_minor: None,
            system: Some(vec![
                CategoryRow {
                    category: Some("Linux".to_string()),
                    downloads: 20,
                },
                CategoryRow {
                    category: Some("Darwin".to_string()),
                    downloads: 10,
                },
            ]),
        };
        let records = package_records("widgets", &recent, 500, &breakdowns, Utc::now());

        assert_eq!(records.len(), 7);
        let total = records.iter().find(|r| r.metric_name == "downloads_total").unwrap();
        assert_eq!(total.value, MetricValue::Integer(500));
        assert!(total.category.is_none());

        let linux = records
            .iter()
            .find(|r| r.metric_name == "system_downloads" && r.category.as_deref() == Some("Linux"))
            .unwrap();
        assert_eq!(linux.value, MetricValue::Integer(20));
    }

    #[test]
    fn test_parse_package_document() {
        let json = r#"{"info": {"name": "widgets", "version": "2.1.0"}, "releases": {}}"#;
        let doc: PackageDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.info.version, "2.1.0");
    }
}
