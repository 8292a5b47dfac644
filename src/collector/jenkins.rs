use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use teamboard_common::{
    Build, Collector, CollectorType, JenkinsJob, TestResult, now_millis,
};
use tracing::{debug, info, warn};

use super::behave::{BehaveJsonTransformer, Transformer};
use super::CollectorTask;
use crate::config::JenkinsConfig;
use crate::errors::CollectorError;
use crate::store::{CollectorRepository, DashboardDb, DbHandle, TestResultRepository};

pub const COLLECTOR_NAME: &str = "JenkinsBehaveTest";

/// Collector option holding the configured Jenkins server URLs.
pub const BUILD_SERVERS_OPTION: &str = "build_servers";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// A job as listed by a Jenkins instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceJob {
    pub name: String,
    pub url: String,
}

/// Read access to Jenkins servers.
#[async_trait]
pub trait JenkinsClient: Send + Sync {
    async fn get_instance_jobs(&self, instance: &str) -> Result<Vec<InstanceJob>, CollectorError>;

    /// Whether the job's last successful build archived a behave report.
    async fn build_has_behave_results(
        &self,
        job_url: &str,
        instance: &str,
    ) -> Result<bool, CollectorError>;

    async fn get_last_successful_build(
        &self,
        job_url: &str,
        instance: &str,
    ) -> Result<Option<Build>, CollectorError>;

    /// Test result parsed from the last successful build's behave report.
    async fn get_behave_test_result(
        &self,
        job_url: &str,
        instance: &str,
    ) -> Result<Option<TestResult>, CollectorError>;
}

// ── REST client ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct JobsResponse {
    #[serde(default)]
    jobs: Vec<RawJob>,
}

#[derive(Debug, Deserialize)]
struct RawJob {
    name: String,
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResponse {
    #[serde(default)]
    last_successful_build: Option<RawBuild>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBuild {
    number: i64,
    url: String,
    #[serde(default)]
    timestamp: i64,
    #[serde(default)]
    artifacts: Vec<RawArtifact>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArtifact {
    relative_path: String,
}

/// `JenkinsClient` over the Jenkins JSON API.
pub struct RestJenkinsClient {
    http: reqwest::Client,
    username: Option<String>,
    token: Option<String>,
    artifact_pattern: Regex,
}

impl RestJenkinsClient {
    pub fn new(config: &JenkinsConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build Jenkins HTTP client")?;
        let artifact_pattern = Regex::new(&config.behave_json_regex)
            .with_context(|| format!("Invalid behave report pattern '{}'", config.behave_json_regex))?;
        Ok(Self {
            http,
            username: config.username.clone(),
            token: config.token(),
            artifact_pattern,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> anyhow::Result<T> {
        let mut request = self.http.get(url).header("User-Agent", "teamboard");
        if let Some(user) = &self.username {
            request = request.basic_auth(user, self.token.as_deref());
        }
        request
            .send()
            .await
            .with_context(|| format!("Failed to send request to Jenkins at {}", url))?
            .error_for_status()
            .context("Jenkins API returned error status")?
            .json::<T>()
            .await
            .context("Failed to parse Jenkins response")
    }

    async fn get_text(&self, url: &str) -> anyhow::Result<String> {
        let mut request = self.http.get(url).header("User-Agent", "teamboard");
        if let Some(user) = &self.username {
            request = request.basic_auth(user, self.token.as_deref());
        }
        request
            .send()
            .await
            .with_context(|| format!("Failed to send request to Jenkins at {}", url))?
            .error_for_status()
            .context("Jenkins artifact request returned error status")?
            .text()
            .await
            .context("Failed to read Jenkins artifact")
    }

    async fn last_successful_build(&self, job_url: &str, instance: &str) -> anyhow::Result<Option<RawBuild>> {
        let url = format!(
            "{}api/json?tree=lastSuccessfulBuild[number,url,timestamp,artifacts[relativePath]]",
            with_trailing_slash(&rebase_url(job_url, instance))
        );
        let job: JobResponse = self.get_json(&url).await?;
        Ok(job.last_successful_build)
    }

    fn behave_artifact<'b>(&self, build: &'b RawBuild) -> Option<&'b RawArtifact> {
        build
            .artifacts
            .iter()
            .find(|a| self.artifact_pattern.is_match(&a.relative_path))
    }
}

fn http_error(url: &str, error: anyhow::Error) -> CollectorError {
    CollectorError::Http {
        source_system: "Jenkins",
        url: url.to_string(),
        message: format!("{:#}", error),
    }
}

#[async_trait]
impl JenkinsClient for RestJenkinsClient {
    async fn get_instance_jobs(&self, instance: &str) -> Result<Vec<InstanceJob>, CollectorError> {
        let url = format!("{}api/json?tree=jobs[name,url]", with_trailing_slash(instance));
        let resp: JobsResponse = self.get_json(&url).await.map_err(|e| http_error(&url, e))?;
        Ok(resp
            .jobs
            .into_iter()
            .map(|j| InstanceJob {
                name: j.name,
                url: j.url,
            })
            .collect())
    }

    async fn build_has_behave_results(
        &self,
        job_url: &str,
        instance: &str,
    ) -> Result<bool, CollectorError> {
        let build = self
            .last_successful_build(job_url, instance)
            .await
            .map_err(|e| http_error(job_url, e))?;
        Ok(build.is_some_and(|b| self.behave_artifact(&b).is_some()))
    }

    async fn get_last_successful_build(
        &self,
        job_url: &str,
        instance: &str,
    ) -> Result<Option<Build>, CollectorError> {
        let build = self
            .last_successful_build(job_url, instance)
            .await
            .map_err(|e| http_error(job_url, e))?;
        Ok(build.map(|b| Build {
            number: b.number.to_string(),
            url: b.url,
            timestamp: b.timestamp,
        }))
    }

    async fn get_behave_test_result(
        &self,
        job_url: &str,
        instance: &str,
    ) -> Result<Option<TestResult>, CollectorError> {
        let Some(build) = self
            .last_successful_build(job_url, instance)
            .await
            .map_err(|e| http_error(job_url, e))?
        else {
            return Ok(None);
        };
        let Some(artifact) = self.behave_artifact(&build) else {
            return Ok(None);
        };
        let report_url = format!(
            "{}artifact/{}",
            with_trailing_slash(&rebase_url(&build.url, instance)),
            artifact.relative_path
        );
        let report = self
            .get_text(&report_url)
            .await
            .map_err(|e| http_error(&report_url, e))?;
        let test_suites = BehaveJsonTransformer
            .transform(report.as_str())
            .map_err(|e| http_error(&report_url, e))?;

        Ok(Some(TestResult {
            id: None,
            collector_item_id: None,
            execution_id: build.number.to_string(),
            timestamp: build.timestamp,
            url: Some(build.url),
            test_suites,
        }))
    }
}

fn with_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}

/// Point `url` at `instance`'s scheme, host and port, keeping its path.
///
/// Jenkins behind a proxy reports job URLs with its internal host name.
/// Returns `url` unchanged when either side does not parse.
pub fn rebase_url(url: &str, instance: &str) -> String {
    let (Ok(mut target), Ok(base)) = (reqwest::Url::parse(url), reqwest::Url::parse(instance))
    else {
        return url.to_string();
    };
    if target.set_scheme(base.scheme()).is_err()
        || target.set_host(base.host_str()).is_err()
        || target.set_port(base.port()).is_err()
    {
        return url.to_string();
    }
    target.to_string()
}

// ── Collector task ───────────────────────────────────────────────────

/// Collects behave test results from the jobs of the configured servers.
pub struct JenkinsBehaveCollectorTask<C: JenkinsClient> {
    client: C,
    db: DbHandle,
    servers: Vec<String>,
    behave_json_regex: String,
    poll_interval: Duration,
}

impl<C: JenkinsClient> JenkinsBehaveCollectorTask<C> {
    pub fn new(client: C, db: DbHandle, config: &JenkinsConfig) -> Self {
        Self {
            client,
            db,
            servers: config.servers.clone(),
            behave_json_regex: config.behave_json_regex.clone(),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
        }
    }

    async fn store<T, F>(&self, f: F) -> Result<T, CollectorError>
    where
        F: FnOnce(&DashboardDb) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.db.call(f).await.map_err(CollectorError::Store)
    }

    /// Register jobs not seen before that publish behave reports. New jobs
    /// start disabled until someone wires them to a component.
    async fn add_new_jobs(
        &self,
        collector_id: &str,
        instance: &str,
        jobs: &[InstanceJob],
    ) -> Result<usize, CollectorError> {
        let cid = collector_id.to_string();
        let inst = instance.to_string();
        let known: HashSet<String> = self
            .store(move |db| {
                Ok(db
                    .find_items_by_collector(&cid)?
                    .into_iter()
                    .map(JenkinsJob::from)
                    .filter(|j| j.instance_url() == inst)
                    .map(|j| j.job_name().to_string())
                    .collect())
            })
            .await?;

        let mut added = Vec::new();
        for job in jobs.iter().filter(|j| !known.contains(&j.name)) {
            if !self.client.build_has_behave_results(&job.url, instance).await? {
                continue;
            }
            let mut new_job = JenkinsJob::new(collector_id, instance, &job.name, &job.url);
            new_job.item.enabled = false;
            new_job.item.description = Some(job.name.clone());
            added.push(new_job);
        }

        let count = added.len();
        if count > 0 {
            self.store(move |db| {
                for job in &added {
                    db.save_collector_item(&job.item)?;
                }
                Ok(())
            })
            .await?;
        }
        Ok(count)
    }

    async fn collect_results(&self, jobs: Vec<JenkinsJob>, instance: &str) -> Result<usize, CollectorError> {
        let mut saved = 0;
        for job in jobs {
            let Some(build) = self
                .client
                .get_last_successful_build(job.job_url(), instance)
                .await?
            else {
                debug!(job = job.job_name(), "no successful build yet");
                continue;
            };

            let item_id = job.id().to_string();
            let number = build.number.clone();
            let seen = self
                .store(move |db| Ok(db.find_test_result(&item_id, &number)?.is_some()))
                .await?;
            if seen {
                continue;
            }

            let Some(mut result) = self
                .client
                .get_behave_test_result(job.job_url(), instance)
                .await?
            else {
                continue;
            };
            result.collector_item_id = Some(job.id().to_string());
            result.timestamp = now_millis();
            self.store(move |db| db.save_test_result(&result)).await?;
            saved += 1;
        }
        Ok(saved)
    }
}

impl JenkinsBehaveCollectorTask<RestJenkinsClient> {
    pub fn from_config(config: &JenkinsConfig, db: DbHandle) -> anyhow::Result<Arc<Self>> {
        Ok(Arc::new(Self::new(RestJenkinsClient::new(config)?, db, config)))
    }
}

fn configured_servers(collector: &Collector) -> Vec<String> {
    collector
        .options
        .get(BUILD_SERVERS_OPTION)
        .and_then(|v| v.as_array())
        .map(|servers| {
            servers
                .iter()
                .filter_map(|s| s.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

/// Delete jobs whose instance is no longer a configured server.
fn clean(db: &DashboardDb, collector_id: &str, servers: &[String]) -> anyhow::Result<usize> {
    let mut removed = 0;
    for item in db.find_items_by_collector(collector_id)? {
        let job = JenkinsJob::from(item);
        if !servers.iter().any(|s| s == job.instance_url()) {
            db.delete_collector_item(job.id())?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[async_trait]
impl<C: JenkinsClient> CollectorTask for JenkinsBehaveCollectorTask<C> {
    fn name(&self) -> &str {
        COLLECTOR_NAME
    }

    fn prototype(&self) -> Collector {
        let mut collector = Collector::new(COLLECTOR_NAME, CollectorType::Test);
        collector
            .options
            .insert(BUILD_SERVERS_OPTION.to_string(), serde_json::json!(self.servers));
        collector
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn collect(&self, collector: &Collector) -> Result<(), CollectorError> {
        let servers = configured_servers(collector);
        let cid = collector.id.clone();
        let kept = servers.clone();
        let removed = self.store(move |db| clean(db, &cid, &kept)).await?;
        if removed > 0 {
            info!(removed, "deleted Jenkins jobs of unconfigured servers");
        }

        for instance in &servers {
            let jobs = match self.client.get_instance_jobs(instance).await {
                Ok(jobs) => jobs,
                Err(error) => {
                    warn!(instance = %instance, error = %error, "failed to list Jenkins jobs");
                    continue;
                }
            };
            let added = self.add_new_jobs(&collector.id, instance, &jobs).await?;

            let cid = collector.id.clone();
            let inst = instance.clone();
            let enabled: Vec<JenkinsJob> = self
                .store(move |db| {
                    Ok(db
                        .find_items_by_collector(&cid)?
                        .into_iter()
                        .filter(|item| item.enabled)
                        .map(JenkinsJob::from)
                        .filter(|j| j.instance_url() == inst)
                        .collect())
                })
                .await?;
            if enabled.is_empty() {
                warn!(
                    instance = %instance,
                    pattern = %self.behave_json_regex,
                    "no enabled jobs with behave reports matching the pattern"
                );
            }

            let saved = self.collect_results(enabled, instance).await?;
            info!(instance = %instance, jobs = jobs.len(), new_jobs = added, new_results = saved, "Jenkins server collected");
        }
        Ok(())
    }
}
