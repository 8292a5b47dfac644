use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use teamboard_common::{
    Collector, CollectorType, Commit, CommitType, GitLabRepo, now_millis,
};
use tracing::{debug, info, warn};

use super::CollectorTask;
use crate::config::GitLabConfig;
use crate::errors::CollectorError;
use crate::store::{
    CollectorRepository, CommitRepository, ComponentRepository, DashboardDb, DbHandle,
};

pub const COLLECTOR_NAME: &str = "GitLab";

/// History pulled on a repo's first collection when none is configured.
const DEFAULT_HISTORY_DAYS: i64 = 14;

/// Overlap with the previous run so commits pushed mid-run are not missed.
const SINCE_OVERLAP_MILLIS: i64 = 10 * 60 * 1000;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Source of commits for a tracked branch.
#[async_trait]
pub trait GitLabClient: Send + Sync {
    /// Commits on the repo's branch since its last collection, or within the
    /// first-run history window when `first_run` is set.
    async fn get_commits(
        &self,
        repo: &GitLabRepo,
        first_run: bool,
    ) -> Result<Vec<Commit>, CollectorError>;
}

/// A commit as returned by `/repository/commits`.
#[derive(Debug, Deserialize)]
struct GitLabCommit {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    author_name: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    parent_ids: Vec<String>,
}

/// `GitLabClient` over the GitLab REST API.
pub struct DefaultGitLabClient {
    http: reqwest::Client,
    auth_token: String,
    first_run_history_days: i64,
    not_built_markers: Vec<String>,
}

impl DefaultGitLabClient {
    pub fn new(config: &GitLabConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build GitLab HTTP client")?;
        Ok(Self {
            http,
            auth_token: config.auth_token(),
            first_run_history_days: config.first_run_history_days,
            not_built_markers: config.not_built_commits.clone(),
        })
    }

    async fn fetch_page(
        &self,
        url: &str,
        branch: &str,
        since: &str,
        page: u32,
    ) -> anyhow::Result<(Vec<GitLabCommit>, bool)> {
        let mut request = self
            .http
            .get(url)
            .header("User-Agent", "teamboard")
            .query(&[
                ("ref_name", branch),
                ("since", since),
                ("page", &page.to_string()),
            ]);
        if !self.auth_token.is_empty() {
            request = request.header("PRIVATE-TOKEN", &self.auth_token);
        }
        let resp = request
            .send()
            .await
            .context("Failed to send commits request to GitLab")?
            .error_for_status()
            .context("GitLab commits API returned error status")?;
        let last_page = is_last_page(
            resp.headers()
                .get(reqwest::header::LINK)
                .and_then(|v| v.to_str().ok()),
        );
        let commits = resp
            .json::<Vec<GitLabCommit>>()
            .await
            .context("Failed to parse commits response from GitLab")?;
        Ok((commits, last_page))
    }
}

#[async_trait]
impl GitLabClient for DefaultGitLabClient {
    async fn get_commits(
        &self,
        repo: &GitLabRepo,
        first_run: bool,
    ) -> Result<Vec<Commit>, CollectorError> {
        let url = api_url(repo.repo_url()).ok_or_else(|| CollectorError::Http {
            source_system: "GitLab",
            url: repo.repo_url().to_string(),
            message: "not a valid repository URL".into(),
        })?;
        let since = since_date(
            repo.item.last_updated,
            first_run,
            self.first_run_history_days,
            Utc::now(),
        )
        .to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut commits = Vec::new();
        let mut page = 1;
        loop {
            let (batch, last_page) = match self.fetch_page(&url, repo.branch(), &since, page).await
            {
                Ok(result) => result,
                Err(error) => {
                    warn!(url = %url, page, error = %format!("{:#}", error), "GitLab page request failed");
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }
            commits.extend(
                batch
                    .into_iter()
                    .map(|c| into_commit(c, repo, &self.not_built_markers)),
            );
            if last_page {
                break;
            }
            page += 1;
        }
        debug!(url = %url, commits = commits.len(), "fetched GitLab commits");
        Ok(commits)
    }
}

/// Commits API URL for a repository URL such as
/// `https://gitlab.example.com/group/app.git`.
///
/// The project path is URL-encoded into a single segment and a trailing
/// `.git` is dropped. `None` when the URL has no scheme, host or path.
pub fn api_url(repo_url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(repo_url.trim()).ok()?;
    let host = parsed.host_str()?;
    let authority = match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    let path = parsed.path().trim_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    if path.is_empty() {
        return None;
    }
    Some(format!(
        "{}://{}/api/v3/projects/{}/repository/commits",
        parsed.scheme(),
        authority,
        path.replace('/', "%2F")
    ))
}

/// True unless the `Link` header advertises a `rel="next"` page.
pub fn is_last_page(link: Option<&str>) -> bool {
    match link {
        Some(link) => !link
            .split(',')
            .any(|part| part.contains("rel=\"next\"")),
        None => true,
    }
}

pub fn commit_type(parent_count: usize, message: &str, not_built_markers: &[String]) -> CommitType {
    if parent_count > 1 {
        CommitType::Merge
    } else if not_built_markers
        .iter()
        .any(|marker| !marker.is_empty() && message.contains(marker.as_str()))
    {
        CommitType::NotBuilt
    } else {
        CommitType::New
    }
}

/// Lower bound for the commits query.
pub fn since_date(
    last_updated: i64,
    first_run: bool,
    history_days: i64,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let history_days = if history_days <= 0 {
        DEFAULT_HISTORY_DAYS
    } else {
        history_days
    };
    let first_run_since = now - chrono::Duration::days(history_days);
    if first_run {
        return first_run_since;
    }
    DateTime::from_timestamp_millis(last_updated - SINCE_OVERLAP_MILLIS).unwrap_or(first_run_since)
}

fn into_commit(raw: GitLabCommit, repo: &GitLabRepo, not_built_markers: &[String]) -> Commit {
    let log = raw.title.or(raw.message);
    let committed = raw
        .created_at
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp_millis())
        .unwrap_or(0);
    Commit {
        id: None,
        collector_item_id: None,
        timestamp: now_millis(),
        scm_url: repo.repo_url().to_string(),
        scm_branch: repo.branch().to_string(),
        commit_type: commit_type(
            raw.parent_ids.len(),
            log.as_deref().unwrap_or_default(),
            not_built_markers,
        ),
        scm_revision_number: raw.id,
        scm_parent_revision_numbers: raw.parent_ids,
        scm_author: raw.author_name,
        scm_commit_log: log,
        scm_commit_timestamp: committed,
        number_of_changes: 1,
    }
}

// ── Collector task ───────────────────────────────────────────────────

/// Collects commits for every GitLab repo wired to a dashboard component.
pub struct GitLabCollectorTask<C: GitLabClient> {
    client: C,
    db: DbHandle,
    poll_interval: Duration,
}

impl<C: GitLabClient> GitLabCollectorTask<C> {
    pub fn new(client: C, db: DbHandle, poll_interval: Duration) -> Self {
        Self {
            client,
            db,
            poll_interval,
        }
    }
}

impl GitLabCollectorTask<DefaultGitLabClient> {
    pub fn from_config(config: &GitLabConfig, db: DbHandle) -> anyhow::Result<Arc<Self>> {
        Ok(Arc::new(Self::new(
            DefaultGitLabClient::new(config)?,
            db,
            Duration::from_secs(config.poll_interval_secs),
        )))
    }
}

/// Enable exactly the repos some component links under SCM and disable the
/// rest. Returns the enabled repos as stored before this run.
fn clean(db: &DashboardDb, collector_id: &str) -> anyhow::Result<Vec<GitLabRepo>> {
    let referenced: HashSet<String> = db
        .list_components()?
        .iter()
        .flat_map(|component| component.items_of(CollectorType::Scm))
        .filter(|item| item.collector_id == collector_id)
        .map(|item| item.id.clone())
        .collect();

    let mut enabled = Vec::new();
    for mut item in db.find_items_by_collector(collector_id)? {
        let wanted = referenced.contains(&item.id);
        if item.enabled != wanted {
            item.enabled = wanted;
            db.save_collector_item(&item)?;
        }
        if wanted {
            enabled.push(GitLabRepo::from(item));
        }
    }
    Ok(enabled)
}

fn save_new_commits(db: &DashboardDb, item_id: &str, commits: Vec<Commit>) -> anyhow::Result<usize> {
    let mut added = 0;
    for mut commit in commits {
        if db.find_commit(item_id, &commit.scm_revision_number)?.is_some() {
            continue;
        }
        commit.collector_item_id = Some(item_id.to_string());
        db.save_commit(&commit)?;
        added += 1;
    }
    Ok(added)
}

#[async_trait]
impl<C: GitLabClient> CollectorTask for GitLabCollectorTask<C> {
    fn name(&self) -> &str {
        COLLECTOR_NAME
    }

    fn prototype(&self) -> Collector {
        Collector::new(COLLECTOR_NAME, CollectorType::Scm)
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn collect(&self, collector: &Collector) -> Result<(), CollectorError> {
        let collector_id = collector.id.clone();
        let repos = self
            .db
            .call(move |db| clean(db, &collector_id))
            .await
            .map_err(CollectorError::Store)?;
        info!(repos = repos.len(), "GitLab repos enabled");

        let mut new_commits = 0;
        for repo in repos {
            let first_run = repo.item.last_updated == 0;
            let mut stamped = repo.item.clone();
            stamped.last_updated = now_millis();
            self.db
                .call(move |db| db.save_collector_item(&stamped))
                .await
                .map_err(CollectorError::Store)?;

            let commits = self.client.get_commits(&repo, first_run).await?;
            let item_id = repo.id().to_string();
            new_commits += self
                .db
                .call(move |db| save_new_commits(db, &item_id, commits))
                .await
                .map_err(CollectorError::Store)?;
        }
        info!(new_commits, "GitLab commits saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use teamboard_common::{CollectorItem, Component};

    // ── helpers ──────────────────────────────────────────────────────

    #[test]
    fn test_api_url_encodes_path_and_strips_git() {
        assert_eq!(
            api_url("https://gitlab.example.com/group/sub/app.git").as_deref(),
            Some("https://gitlab.example.com/api/v3/projects/group%2Fsub%2Fapp/repository/commits")
        );
        assert_eq!(
            api_url("http://gitlab.local:8080/team/app").as_deref(),
            Some("http://gitlab.local:8080/api/v3/projects/team%2Fapp/repository/commits")
        );
        assert!(api_url("https://gitlab.example.com/").is_none());
        assert!(api_url("not a url").is_none());
    }

    #[test]
    fn test_is_last_page() {
        assert!(is_last_page(None));
        assert!(is_last_page(Some(
            "<https://gitlab/api?page=1>; rel=\"first\", <https://gitlab/api?page=3>; rel=\"last\""
        )));
        assert!(!is_last_page(Some(
            "<https://gitlab/api?page=2>; rel=\"next\", <https://gitlab/api?page=3>; rel=\"last\""
        )));
    }

    #[test]
    fn test_commit_type_classification() {
        let markers = vec!["[ci skip]".to_string()];
        assert_eq!(commit_type(2, "Merge branch 'x'", &markers), CommitType::Merge);
        assert_eq!(commit_type(1, "docs [ci skip]", &markers), CommitType::NotBuilt);
        assert_eq!(commit_type(1, "fix login", &markers), CommitType::New);
        assert_eq!(commit_type(0, "initial", &[]), CommitType::New);
        assert_eq!(commit_type(1, "anything", &[String::new()]), CommitType::New);
    }

    #[test]
    fn test_since_date_first_run_and_incremental() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        assert_eq!(
            since_date(0, true, 0, now),
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
        );
        assert_eq!(
            since_date(0, true, 3, now),
            Utc.with_ymd_and_hms(2024, 1, 12, 12, 0, 0).unwrap()
        );
        let last = Utc.with_ymd_and_hms(2024, 1, 15, 11, 0, 0).unwrap();
        assert_eq!(
            since_date(last.timestamp_millis(), false, 14, now),
            Utc.with_ymd_and_hms(2024, 1, 15, 10, 50, 0).unwrap()
        );
    }

    #[test]
    fn test_into_commit_maps_fields() {
        let raw: GitLabCommit = serde_json::from_value(serde_json::json!({
            "id": "abc123",
            "title": "Merge branch 'feature'",
            "message": "Merge branch 'feature'\n\nlong body",
            "author_name": "Sam",
            "created_at": "2024-01-02T03:04:05.000+00:00",
            "parent_ids": ["p1", "p2"]
        }))
        .unwrap();
        let repo = GitLabRepo::new("c1", "https://gitlab.example.com/team/app.git", "main");
        let commit = into_commit(raw, &repo, &[]);
        assert_eq!(commit.scm_revision_number, "abc123");
        assert_eq!(commit.scm_commit_log.as_deref(), Some("Merge branch 'feature'"));
        assert_eq!(commit.scm_author.as_deref(), Some("Sam"));
        assert_eq!(
            commit.scm_commit_timestamp,
            Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap().timestamp_millis()
        );
        assert_eq!(commit.scm_parent_revision_numbers, vec!["p1", "p2"]);
        assert_eq!(commit.commit_type, CommitType::Merge);
        assert_eq!(commit.scm_branch, "main");
        assert_eq!(commit.number_of_changes, 1);
    }

    // ── collector task ───────────────────────────────────────────────

    #[derive(Default)]
    struct MockGitLabClient {
        calls: Mutex<Vec<(String, bool)>>,
    }

    #[async_trait]
    impl GitLabClient for MockGitLabClient {
        async fn get_commits(
            &self,
            repo: &GitLabRepo,
            first_run: bool,
        ) -> Result<Vec<Commit>, CollectorError> {
            self.calls
                .lock()
                .unwrap()
                .push((repo.repo_url().to_string(), first_run));
            Ok(["r1", "r2"]
                .iter()
                .map(|rev| Commit {
                    id: None,
                    collector_item_id: None,
                    timestamp: 1,
                    scm_url: repo.repo_url().to_string(),
                    scm_branch: repo.branch().to_string(),
                    scm_revision_number: rev.to_string(),
                    scm_parent_revision_numbers: Vec::new(),
                    scm_author: None,
                    scm_commit_log: Some("msg".into()),
                    scm_commit_timestamp: 1,
                    number_of_changes: 1,
                    commit_type: CommitType::New,
                })
                .collect())
        }
    }

    struct Fixture {
        db: DbHandle,
        collector: Collector,
        wired: CollectorItem,
        orphan: CollectorItem,
    }

    fn fixture() -> Fixture {
        let db = DbHandle::new(DashboardDb::new_in_memory().unwrap());
        let collector = Collector::new(COLLECTOR_NAME, CollectorType::Scm);
        let wired = GitLabRepo::new(&collector.id, "https://gitlab.example.com/team/app.git", "main").item;
        let mut orphan =
            GitLabRepo::new(&collector.id, "https://gitlab.example.com/team/old.git", "main").item;
        orphan.enabled = true;
        let mut component = Component::new("widget");
        component.add_collector_item(CollectorType::Scm, wired.clone());
        {
            let guard = db.lock_sync().unwrap();
            guard.save_collector(&collector).unwrap();
            guard.save_collector_item(&wired).unwrap();
            guard.save_collector_item(&orphan).unwrap();
            guard.save_component(&component).unwrap();
        }
        Fixture {
            db,
            collector,
            wired,
            orphan,
        }
    }

    #[tokio::test]
    async fn test_collect_enables_wired_repos_and_disables_orphans() {
        let f = fixture();
        let task = GitLabCollectorTask::new(MockGitLabClient::default(), f.db.clone(), Duration::from_secs(60));
        task.collect(&f.collector).await.unwrap();

        let guard = f.db.lock_sync().unwrap();
        let wired = guard.find_collector_item(&f.wired.id).unwrap().unwrap();
        let orphan = guard.find_collector_item(&f.orphan.id).unwrap().unwrap();
        assert!(wired.enabled);
        assert!(wired.last_updated > 0);
        assert!(!orphan.enabled);
        assert!(guard.find_commits_by_item(&f.orphan.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_collect_twice_stores_no_duplicates() {
        let f = fixture();
        let task = GitLabCollectorTask::new(MockGitLabClient::default(), f.db.clone(), Duration::from_secs(60));
        task.collect(&f.collector).await.unwrap();
        task.collect(&f.collector).await.unwrap();

        let commits = f
            .db
            .lock_sync()
            .unwrap()
            .find_commits_by_item(&f.wired.id)
            .unwrap();
        assert_eq!(commits.len(), 2);
        assert!(commits
            .iter()
            .all(|c| c.collector_item_id.as_deref() == Some(f.wired.id.as_str())));

        let calls = task.client.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].1, "first collection should be a first run");
        assert!(!calls[1].1, "second collection should be incremental");
    }
}
