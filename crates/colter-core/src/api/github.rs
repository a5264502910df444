//! GitHub repository statistics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client};
use serde::{
    de::{DeserializeOwned, IgnoredAny},
    Deserialize,
};
use tracing::{debug, warn};

use super::{get_json, SourceFetchError};
use crate::auth::SecretString;
use crate::collector::{EntityReport, MetricSource};
use crate::config::GithubConfig;
use crate::models::{Alert, MetricRecord, SourceKind, Unit};

// ============================================================================
// Constants
// ============================================================================

const API_BASE_URL: &str = "https://api.github.com";

/// Page size for list endpoints (GitHub maximum)
const PER_PAGE: usize = 100;

/// Upper bound on pages fetched from one list endpoint
const MAX_PAGES: usize = 10;

const ACCEPT_JSON: &str = "application/vnd.github+json";

// ============================================================================
// API response types
// ============================================================================

#[derive(Debug, Deserialize)]
struct RepoSummary {
    full_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepoInfo {
    pub full_name: String,
    #[serde(default)]
    pub forks_count: i64,
    #[serde(default)]
    pub stargazers_count: i64,
    /// Actual watchers; `watchers_count` is an alias for stars
    #[serde(default)]
    pub subscribers_count: i64,
    #[serde(default)]
    pub open_issues_count: i64,
    pub pushed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct Release {
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    #[serde(default)]
    download_count: i64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CloneTraffic {
    #[serde(default)]
    pub count: i64,
    #[serde(default)]
    pub uniques: i64,
}

#[derive(Debug, Deserialize)]
struct Issue {
    title: String,
    /// Present when the "issue" is really a pull request
    pull_request: Option<serde_json::Value>,
}

/// Metrics from endpoints other than the repository document. Any of them
/// may be missing (e.g. traffic needs push access).
#[derive(Debug, Default, Clone, Copy)]
pub struct AuxMetrics {
    pub branches: Option<i64>,
    pub release_downloads: Option<i64>,
    pub clones: Option<CloneTraffic>,
}

// ============================================================================
// Source
// ============================================================================

pub struct GithubSource {
    client: Client,
    token: SecretString,
    repos: Vec<String>,
}

impl GithubSource {
    pub fn new(client: Client, config: &GithubConfig<SecretString>) -> Self {
        Self {
            client,
            token: config.token.clone(),
            repos: config.repos.clone(),
        }
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, SourceFetchError> {
        get_json(url, || {
            self.client
                .get(url)
                .header(header::ACCEPT, ACCEPT_JSON)
                .bearer_auth(self.token.expose())
        })
        .await
    }

    /// Follow `page=N` until a short page or the page cap
    async fn get_paginated<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>, SourceFetchError> {
        let separator = if url.contains('?') { '&' } else { '?' };
        let mut items = Vec::new();

        for page in 1..=MAX_PAGES {
            let page_url = format!("{}{}per_page={}&page={}", url, separator, PER_PAGE, page);
            let batch: Vec<T> = self.get(&page_url).await?;
            let done = batch.len() < PER_PAGE;
            items.extend(batch);
            if done {
                return Ok(items);
            }
        }

        warn!(url, max_pages = MAX_PAGES, "Stopped paginating at page cap");
        Ok(items)
    }

    pub async fn fetch_repo(&self, repo: &str) -> Result<RepoInfo, SourceFetchError> {
        self.get(&format!("{}/repos/{}", API_BASE_URL, repo)).await
    }

    async fn fetch_branch_count(&self, repo: &str) -> Result<i64, SourceFetchError> {
        let branches: Vec<IgnoredAny> = self
            .get_paginated(&format!("{}/repos/{}/branches", API_BASE_URL, repo))
            .await?;
        Ok(branches.len() as i64)
    }

    async fn fetch_release_downloads(&self, repo: &str) -> Result<i64, SourceFetchError> {
        let releases: Vec<Release> = self
            .get_paginated(&format!("{}/repos/{}/releases", API_BASE_URL, repo))
            .await?;
        Ok(sum_release_downloads(&releases))
    }

    async fn fetch_clones(&self, repo: &str) -> Result<CloneTraffic, SourceFetchError> {
        self.get(&format!("{}/repos/{}/traffic/clones", API_BASE_URL, repo))
            .await
    }

    async fn fetch_open_issue_titles(&self, repo: &str) -> Result<Vec<String>, SourceFetchError> {
        let issues: Vec<Issue> = self
            .get_paginated(&format!("{}/repos/{}/issues?state=open", API_BASE_URL, repo))
            .await?;
        Ok(issue_titles(issues))
    }
}

/// Log a failed auxiliary fetch and drop its metric
fn optional<T>(repo: &str, what: &str, result: Result<T, SourceFetchError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(repo, metric = what, error = %e, "Skipping metric");
            None
        }
    }
}

fn sum_release_downloads(releases: &[Release]) -> i64 {
    releases
        .iter()
        .flat_map(|r| r.assets.iter())
        .map(|a| a.download_count)
        .sum()
}

/// Alerts carry the same repository name as the records
pub fn issue_alerts(repo: &RepoInfo, titles: Vec<String>) -> Vec<Alert> {
    titles
        .into_iter()
        .map(|title| Alert::open_issue(repo.full_name.as_str(), title))
        .collect()
}

fn issue_titles(issues: Vec<Issue>) -> Vec<String> {
    issues
        .into_iter()
        .filter(|i| i.pull_request.is_none())
        .map(|i| i.title)
        .collect()
}

/// Normalize one repository into metric records
pub fn repo_records(repo: &RepoInfo, aux: &AuxMetrics, now: DateTime<Utc>) -> Vec<MetricRecord> {
    let entity = repo.full_name.as_str();
    let count = |name: &str, value: i64| MetricRecord::count(SourceKind::Github, entity, name, value, now);

    let mut records = vec![
        count("forks", repo.forks_count),
        count("stars", repo.stargazers_count),
        count("watchers", repo.subscribers_count),
        count("open_issues", repo.open_issues_count),
    ];
    if let Some(branches) = aux.branches {
        records.push(count("branches", branches));
    }
    if let Some(downloads) = aux.release_downloads {
        records.push(count("release_downloads", downloads));
    }
    if let Some(clones) = aux.clones {
        records.push(count("clones_total", clones.count));
        records.push(count("clones_unique", clones.uniques));
    }
    if let Some(pushed_at) = repo.pushed_at {
        records.push(MetricRecord::new(
            SourceKind::Github,
            entity,
            "last_push",
            pushed_at.timestamp(),
            Unit::Seconds,
            now,
        ));
    }
    records
}

#[async_trait]
impl MetricSource for GithubSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Github
    }

    async fn entities(&self) -> Result<Vec<String>, SourceFetchError> {
        if !self.repos.is_empty() {
            return Ok(self.repos.clone());
        }
        debug!("No repos configured, listing the token owner's repositories");
        let repos: Vec<RepoSummary> = self
            .get_paginated(&format!("{}/user/repos", API_BASE_URL))
            .await?;
        Ok(repos.into_iter().map(|r| r.full_name).collect())
    }

    async fn fetch(&self, entity: &str) -> Result<EntityReport, SourceFetchError> {
        let repo = self.fetch_repo(entity).await?;

        let (branches, downloads, clones, issues) = tokio::join!(
            self.fetch_branch_count(entity),
            self.fetch_release_downloads(entity),
            self.fetch_clones(entity),
            self.fetch_open_issue_titles(entity),
        );
        let aux = AuxMetrics {
            branches: optional(entity, "branches", branches),
            release_downloads: optional(entity, "release_downloads", downloads),
            clones: optional(entity, "clones", clones),
        };
        let alerts = issue_alerts(&repo, optional(entity, "issues", issues).unwrap_or_default());

        Ok(EntityReport {
            records: repo_records(&repo, &aux, Utc::now()),
            alerts,
            detail: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricValue;

    const REPO_JSON: &str = r#"{
        "id": 1296269,
        "full_name": "octo/widgets",
        "private": false,
        "forks_count": 9,
        "stargazers_count": 80,
        "watchers_count": 80,
        "subscribers_count": 42,
        "open_issues_count": 3,
        "pushed_at": "2024-03-01T12:00:00Z"
    }"#;

    fn value_of(records: &[MetricRecord], name: &str) -> Option<MetricValue> {
        records.iter().find(|r| r.metric_name == name).map(|r| r.value)
    }

    #[test]
    fn test_parse_repo() {
        let repo: RepoInfo = serde_json::from_str(REPO_JSON).unwrap();
        assert_eq!(repo.full_name, "octo/widgets");
        assert_eq!(repo.subscribers_count, 42);
        assert_eq!(repo.pushed_at.unwrap().timestamp(), 1_709_294_400);
    }

    #[test]
    fn test_repo_records_full() {
        let repo: RepoInfo = serde_json::from_str(REPO_JSON).unwrap();
        let aux = AuxMetrics {
            branches: Some(4),
            release_downloads: Some(1200),
            clones: Some(CloneTraffic { count: 30, uniques: 7 }),
        };
        let records = repo_records(&repo, &aux, Utc::now());

        assert_eq!(records.len(), 9);
        assert_eq!(value_of(&records, "stars"), Some(MetricValue::Integer(80)));
        assert_eq!(value_of(&records, "watchers"), Some(MetricValue::Integer(42)));
        assert_eq!(value_of(&records, "clones_unique"), Some(MetricValue::Integer(7)));
        assert_eq!(
            value_of(&records, "last_push"),
            Some(MetricValue::Integer(1_709_294_400))
        );
        assert!(records.iter().all(|r| r.entity_id == "octo/widgets"));
    }

    #[test]
    fn test_repo_records_without_aux() {
        let repo: RepoInfo = serde_json::from_str(r#"{"full_name": "octo/empty"}"#).unwrap();
        let records = repo_records(&repo, &AuxMetrics::default(), Utc::now());
        assert_eq!(records.len(), 4);
        assert!(value_of(&records, "last_push").is_none());
        assert!(value_of(&records, "branches").is_none());
    }

    #[test]
    fn test_alerts_use_canonical_repo_name() {
        // Configured as "Octo/Widgets", GitHub answers with its own casing
        let repo: RepoInfo = serde_json::from_str(REPO_JSON).unwrap();
        let records = repo_records(&repo, &AuxMetrics::default(), Utc::now());
        let alerts = issue_alerts(&repo, vec!["Crash on start".to_string()]);

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].entity_id, "octo/widgets");
        assert!(records.iter().all(|r| r.entity_id == alerts[0].entity_id));
    }

    #[test]
    fn test_sum_release_downloads() {
        let json = r#"[
            {"tag_name": "v1", "assets": [{"download_count": 10}, {"download_count": 5}]},
            {"tag_name": "v2", "assets": []},
            {"tag_name": "v3"}
        ]"#;
        let releases: Vec<Release> = serde_json::from_str(json).unwrap();
        assert_eq!(sum_release_downloads(&releases), 15);
    }

    #[test]
    fn test_issue_titles_skip_pull_requests() {
        let json = r#"[
            {"title": "Crash on start"},
            {"title": "Add feature", "pull_request": {"url": "https://api.github.com/pulls/1"}}
        ]"#;
        let issues: Vec<Issue> = serde_json::from_str(json).unwrap();
        assert_eq!(issue_titles(issues), vec!["Crash on start".to_string()]);
    }
}
