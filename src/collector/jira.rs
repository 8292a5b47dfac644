use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Deserialize;
use teamboard_common::{
    Collector, CollectorType, Feature, FeatureStatus, KANBAN_SPRINT_ID, KANBAN_START_DATE,
    SPRINT_END_OF_TIME,
};
use tracing::{debug, info, warn};

use super::{CollectorTask, ensure_numeric_estimate};
use crate::config::JiraConfig;
use crate::errors::CollectorError;
use crate::store::{DbHandle, FeatureRepository};
use crate::util::{ISO_TIMESTAMP_FORMAT, sanitize_response, to_canonical_date};

pub const COLLECTOR_NAME: &str = "Jira";

const CATEGORY_TO_DO: &str = "To Do";
const CATEGORY_IN_PROGRESS: &str = "In Progress";
const CATEGORY_DONE: &str = "Done";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const JQL_DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Issue fields the story collector reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JiraIssue {
    pub id: String,
    pub key: String,
    pub summary: Option<String>,
    pub status: Option<String>,
    pub updated: Option<String>,
    pub project: JiraProject,
    /// Assignee user name.
    pub assignee: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct JiraProject {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub name: String,
}

/// Read access to a Jira server.
#[async_trait]
pub trait JiraClient: Send + Sync {
    fn page_size(&self) -> usize;

    /// One page of the project's issues starting at `start_at`, limited to
    /// issues updated at or after `updated_since` (canonical date) when set.
    async fn get_issues(
        &self,
        project: &str,
        updated_since: Option<&str>,
        start_at: usize,
    ) -> Result<Vec<JiraIssue>, CollectorError>;

    /// Status name to status category name, as configured on the server.
    async fn get_status_mapping(&self) -> Result<HashMap<String, String>, CollectorError>;
}

// ── REST client ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    issues: Vec<RawIssue>,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    id: String,
    key: String,
    fields: RawFields,
}

#[derive(Debug, Deserialize)]
struct RawFields {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    status: Option<Named>,
    #[serde(default)]
    updated: Option<String>,
    #[serde(default)]
    project: JiraProject,
    #[serde(default)]
    assignee: Option<Named>,
}

#[derive(Debug, Deserialize)]
struct Named {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStatus {
    name: String,
    #[serde(default)]
    status_category: Option<Named>,
}

impl From<RawIssue> for JiraIssue {
    fn from(raw: RawIssue) -> Self {
        Self {
            id: raw.id,
            key: raw.key,
            summary: raw.fields.summary,
            status: raw.fields.status.and_then(|s| s.name),
            updated: raw.fields.updated,
            project: raw.fields.project,
            assignee: raw.fields.assignee.and_then(|a| a.name),
        }
    }
}

/// `JiraClient` over Jira REST API v2 with basic auth.
pub struct RestJiraClient {
    http: reqwest::Client,
    base_url: String,
    username: Option<String>,
    token: Option<String>,
    page_size: usize,
}

impl RestJiraClient {
    pub fn new(config: &JiraConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build Jira HTTP client")?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            token: config.token(),
            page_size: config.page_size.max(1),
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .header("User-Agent", "teamboard");
        match &self.username {
            Some(user) => request.basic_auth(user, self.token.as_deref()),
            None => request,
        }
    }

    async fn search(
        &self,
        project: &str,
        updated_since: Option<&str>,
        start_at: usize,
    ) -> anyhow::Result<Vec<JiraIssue>> {
        let url = format!("{}/rest/api/2/search", self.base_url);
        let jql = search_jql(project, updated_since);
        let resp = self
            .get(&url)
            .query(&[
                ("jql", jql.as_str()),
                ("startAt", &start_at.to_string()),
                ("maxResults", &self.page_size.to_string()),
                ("fields", "summary,status,updated,project,assignee"),
            ])
            .send()
            .await
            .context("Failed to send search request to Jira")?
            .error_for_status()
            .context("Jira search API returned error status")?
            .json::<SearchResponse>()
            .await
            .context("Failed to parse search response from Jira")?;
        Ok(resp.issues.into_iter().map(JiraIssue::from).collect())
    }

    async fn statuses(&self) -> anyhow::Result<Vec<RawStatus>> {
        let url = format!("{}/rest/api/2/status", self.base_url);
        self.get(&url)
            .send()
            .await
            .context("Failed to send status request to Jira")?
            .error_for_status()
            .context("Jira status API returned error status")?
            .json::<Vec<RawStatus>>()
            .await
            .context("Failed to parse status response from Jira")
    }

    fn http_error(&self, path: &str, error: anyhow::Error) -> CollectorError {
        CollectorError::Http {
            source_system: "Jira",
            url: format!("{}{}", self.base_url, path),
            message: format!("{:#}", error),
        }
    }
}

#[async_trait]
impl JiraClient for RestJiraClient {
    fn page_size(&self) -> usize {
        self.page_size
    }

    async fn get_issues(
        &self,
        project: &str,
        updated_since: Option<&str>,
        start_at: usize,
    ) -> Result<Vec<JiraIssue>, CollectorError> {
        self.search(project, updated_since, start_at)
            .await
            .map_err(|e| self.http_error("/rest/api/2/search", e))
    }

    async fn get_status_mapping(&self) -> Result<HashMap<String, String>, CollectorError> {
        let statuses = self
            .statuses()
            .await
            .map_err(|e| self.http_error("/rest/api/2/status", e))?;
        Ok(statuses
            .into_iter()
            .filter_map(|s| {
                let category = s.status_category.and_then(|c| c.name)?;
                Some((s.name, category))
            })
            .collect())
    }
}

/// JQL for one project's issues, oldest update first.
///
/// `updated_since` is a canonical date; JQL only takes minutes, so it is
/// truncated and the boundary minute is fetched again. An unparseable date
/// falls back to a full sync.
pub fn search_jql(project: &str, updated_since: Option<&str>) -> String {
    let since = updated_since
        .and_then(|date| NaiveDateTime::parse_from_str(date, ISO_TIMESTAMP_FORMAT).ok())
        .map(|date| date.format(JQL_DATE_FORMAT).to_string());
    match since {
        Some(since) => format!(
            "project = \"{}\" AND updated >= \"{}\" ORDER BY updated ASC",
            project, since
        ),
        None => format!("project = \"{}\" ORDER BY updated ASC", project),
    }
}

// ── Status mapping ───────────────────────────────────────────────────

/// Jira status names grouped into the canonical backlog / in progress /
/// done vocabulary. Names are stored lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusMapping {
    todo: HashSet<String>,
    doing: HashSet<String>,
    done: HashSet<String>,
}

fn lowercase_set(statuses: &[String]) -> HashSet<String> {
    statuses.iter().map(|s| s.trim().to_lowercase()).collect()
}

impl StatusMapping {
    pub fn new(todo: &[String], doing: &[String], done: &[String]) -> Self {
        Self {
            todo: lowercase_set(todo),
            doing: lowercase_set(doing),
            done: lowercase_set(done),
        }
    }

    pub fn from_config(config: &JiraConfig) -> Self {
        Self::new(
            &config.todo_statuses,
            &config.doing_statuses,
            &config.done_statuses,
        )
    }

    /// A copy extended with the server's status to category mapping.
    /// Statuses in other categories are ignored.
    pub fn merged(&self, server: &HashMap<String, String>) -> Self {
        let mut merged = self.clone();
        for (status, category) in server {
            let status = status.trim().to_lowercase();
            match category.as_str() {
                CATEGORY_TO_DO => merged.todo.insert(status),
                CATEGORY_IN_PROGRESS => merged.doing.insert(status),
                CATEGORY_DONE => merged.done.insert(status),
                _ => false,
            };
        }
        merged
    }

    /// Canonical status of a Jira status name. Unknown and missing statuses
    /// are backlog.
    pub fn canonical(&self, status: Option<&str>) -> FeatureStatus {
        let Some(status) = status else {
            return FeatureStatus::Backlog;
        };
        let status = status.trim().to_lowercase();
        if self.todo.contains(&status) {
            FeatureStatus::Backlog
        } else if self.doing.contains(&status) {
            FeatureStatus::InProgress
        } else if self.done.contains(&status) {
            FeatureStatus::Done
        } else {
            FeatureStatus::Backlog
        }
    }
}

// ── Story collector ──────────────────────────────────────────────────

fn clean(value: &str) -> Option<String> {
    Some(sanitize_response(value))
}

/// Map a Jira issue onto a feature, keeping `existing`'s record id.
///
/// Every story gets a one-point estimate and the never-ending kanban sprint.
pub fn issue_to_feature(
    issue: &JiraIssue,
    existing: Option<Feature>,
    collector_id: &str,
    mapping: &StatusMapping,
) -> Feature {
    let status = mapping.canonical(issue.status.as_deref()).as_str();
    let owners = issue
        .assignee
        .as_deref()
        .map(sanitize_response)
        .filter(|name| !name.is_empty())
        .into_iter()
        .collect();

    Feature {
        id: existing.and_then(|f| f.id),
        collector_id: Some(collector_id.to_string()),
        feature_id: clean(&issue.id),
        number: clean(&issue.key),
        name: issue.summary.as_deref().and_then(clean),
        status: Some(status.to_string()),
        state: Some(status.to_string()),
        estimate: Some("1".to_string()),
        estimate_time: None,
        change_date: issue
            .updated
            .as_deref()
            .map(|d| to_canonical_date(&sanitize_response(d))),
        is_deleted: false,
        project_id: clean(&issue.project.key),
        project_name: clean(&issue.project.name),
        team_id: clean(&issue.project.id),
        team_name: clean(&issue.project.name),
        sprint_id: Some(KANBAN_SPRINT_ID.to_string()),
        sprint_name: Some(KANBAN_SPRINT_ID.to_string()),
        sprint_begin_date: Some(KANBAN_START_DATE.to_string()),
        sprint_end_date: Some(SPRINT_END_OF_TIME.to_string()),
        sprint_asset_state: Some("Active".to_string()),
        epic_id: None,
        epic_number: None,
        epic_name: None,
        owners,
    }
}

/// Pages a project's issues out of Jira and upserts them as features.
pub struct StoryCollector<'a, C: JiraClient + ?Sized> {
    client: &'a C,
    db: &'a DbHandle,
    collector_id: String,
    mapping: &'a StatusMapping,
    delta_start_date: String,
}

impl<'a, C: JiraClient + ?Sized> StoryCollector<'a, C> {
    pub fn new(
        client: &'a C,
        db: &'a DbHandle,
        collector_id: &str,
        mapping: &'a StatusMapping,
        delta_start_date: &str,
    ) -> Self {
        Self {
            client,
            db,
            collector_id: collector_id.to_string(),
            mapping,
            delta_start_date: delta_start_date.to_string(),
        }
    }

    /// Upsert the issues of `project` changed since its last synced story,
    /// or all of them on the first sync. Returns how many were processed.
    pub async fn update_story_information(&self, project: &str) -> Result<usize, CollectorError> {
        let page_size = self.client.page_size().max(1);
        let server_statuses = self.client.get_status_mapping().await?;
        let mapping = self.mapping.merged(&server_statuses);
        let since = self.project_change_date(project).await?;
        debug!(project, since = since.as_deref().unwrap_or("-"), "syncing Jira project");

        let mut count = 0;
        let mut start_at = 0;
        loop {
            debug!(project, start_at, "fetching Jira issues");
            let started = Instant::now();
            let issues = self
                .client
                .get_issues(project, since.as_deref(), start_at)
                .await?;
            debug!(
                project,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Jira issue query finished"
            );

            if !issues.is_empty() {
                self.save_issues(&issues, &mapping).await?;
                count += issues.len();
            }
            if issues.len() < page_size {
                break;
            }
            start_at += page_size;
        }
        Ok(count)
    }

    async fn save_issues(
        &self,
        issues: &[JiraIssue],
        mapping: &StatusMapping,
    ) -> Result<(), CollectorError> {
        let collector_id = self.collector_id.clone();
        let ids: Vec<String> = issues.iter().map(|i| sanitize_response(&i.id)).collect();
        let existing = self
            .db
            .call(move |db| {
                ids.iter()
                    .map(|id| db.find_by_feature_id(&collector_id, id))
                    .collect::<anyhow::Result<Vec<_>>>()
            })
            .await
            .map_err(CollectorError::Store)?;

        let features = issues
            .iter()
            .zip(existing)
            .map(|(issue, existing)| {
                let feature = issue_to_feature(issue, existing, &self.collector_id, mapping);
                ensure_numeric_estimate(&feature)?;
                Ok(feature)
            })
            .collect::<Result<Vec<_>, CollectorError>>()?;

        self.db
            .call(move |db| db.save_features(&features))
            .await
            .map_err(CollectorError::Store)?;
        Ok(())
    }

    /// Change date of this collector's most recently changed feature newer
    /// than the configured delta start date.
    pub async fn max_change_date(&self) -> Result<Option<String>, CollectorError> {
        let collector_id = self.collector_id.clone();
        let since = self.delta_start_date.clone();
        let latest = self
            .db
            .call(move |db| db.find_latest_changed_after(&collector_id, &since))
            .await
            .map_err(CollectorError::Store)?;
        Ok(latest.and_then(|f| f.change_date))
    }

    /// Latest change date stored for `project`, bounded like
    /// [`max_change_date`](Self::max_change_date).
    async fn project_change_date(&self, project: &str) -> Result<Option<String>, CollectorError> {
        let collector_id = self.collector_id.clone();
        let project = project.to_string();
        let since = self.delta_start_date.clone();
        let latest = self
            .db
            .call(move |db| db.find_latest_project_change_after(&collector_id, &project, &since))
            .await
            .map_err(CollectorError::Store)?;
        Ok(latest.and_then(|f| f.change_date))
    }
}

// ── Collector task ───────────────────────────────────────────────────

/// Collects kanban stories for every configured Jira project.
pub struct JiraCollectorTask<C: JiraClient> {
    client: C,
    db: DbHandle,
    mapping: StatusMapping,
    projects: Vec<String>,
    delta_start_date: String,
    poll_interval: Duration,
}

impl<C: JiraClient> JiraCollectorTask<C> {
    pub fn new(client: C, db: DbHandle, config: &JiraConfig) -> Self {
        Self {
            client,
            db,
            mapping: StatusMapping::from_config(config),
            projects: config.projects.clone(),
            delta_start_date: config.delta_start_date.clone(),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
        }
    }
}

impl JiraCollectorTask<RestJiraClient> {
    pub fn from_config(config: &JiraConfig, db: DbHandle) -> anyhow::Result<Arc<Self>> {
        Ok(Arc::new(Self::new(RestJiraClient::new(config)?, db, config)))
    }
}

#[async_trait]
impl<C: JiraClient> CollectorTask for JiraCollectorTask<C> {
    fn name(&self) -> &str {
        COLLECTOR_NAME
    }

    fn prototype(&self) -> Collector {
        Collector::new(COLLECTOR_NAME, CollectorType::Feature)
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn collect(&self, collector: &Collector) -> Result<(), CollectorError> {
        let stories = StoryCollector::new(
            &self.client,
            &self.db,
            &collector.id,
            &self.mapping,
            &self.delta_start_date,
        );
        if let Some(date) = stories.max_change_date().await? {
            debug!(max_change_date = %date, "latest stored Jira change");
        }
        if self.projects.is_empty() {
            warn!("no Jira projects configured");
        }
        for project in &self.projects {
            let count = stories.update_story_information(project).await?;
            info!(project = %project, stories = count, "Jira stories updated");
        }
        Ok(())
    }
}
