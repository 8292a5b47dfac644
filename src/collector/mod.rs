//! Scheduled ingestion from the source systems.
//!
//! | Module    | Contents                                                   |
//! |-----------|------------------------------------------------------------|
//! | `gitlab`  | SCM commits from GitLab                                    |
//! | `jira`    | Kanban stories from Jira                                   |
//! | `jenkins` | Jenkins jobs and their behave test reports                 |
//! | `behave`  | `Transformer` from behave JSON to test suites              |
//!
//! Every source implements [`CollectorTask`]. [`run_once`] performs one
//! collection and [`spawn_collector`] repeats it on the task's interval.
//! Loops for different sources run independently of each other.

pub mod behave;
pub mod gitlab;
pub mod jenkins;
pub mod jira;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use teamboard_common::{Collector, Feature, is_blank, now_millis};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::TeamboardToml;
use crate::errors::CollectorError;
use crate::store::{CollectorRepository, DbHandle};

pub use behave::{BehaveJsonTransformer, Transformer};
pub use gitlab::{DefaultGitLabClient, GitLabClient, GitLabCollectorTask};
pub use jenkins::{JenkinsBehaveCollectorTask, JenkinsClient, RestJenkinsClient};
pub use jira::{JiraClient, JiraCollectorTask, RestJiraClient, StatusMapping, StoryCollector};

/// One source system's polling job.
#[async_trait]
pub trait CollectorTask: Send + Sync {
    /// Unique collector name, used to find its stored record.
    fn name(&self) -> &str;

    /// Record registered the first time the task runs. Its options are
    /// copied onto the stored record on every run.
    fn prototype(&self) -> Collector;

    fn poll_interval(&self) -> Duration;

    /// Pull new data for `collector` into the store.
    async fn collect(&self, collector: &Collector) -> Result<(), CollectorError>;
}

/// Result of a single [`run_once`].
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The stored collector is disabled; nothing was collected.
    Disabled,
    /// Collection succeeded and the stored record was stamped.
    Completed(Collector),
}

/// Run one collection for `task`.
///
/// Registers the collector on first use. On success stamps `last_executed`
/// and marks it online. A failed collection leaves `last_executed` alone.
pub async fn run_once<T>(task: &T, db: &DbHandle) -> Result<RunOutcome, CollectorError>
where
    T: CollectorTask + ?Sized,
{
    let name = task.name().to_string();
    let prototype = task.prototype();
    let collector = db
        .call(move |db| match db.find_collector_by_name(&name)? {
            Some(mut existing) => {
                existing.options = prototype.options;
                db.save_collector(&existing)?;
                Ok(existing)
            }
            None => {
                db.save_collector(&prototype)?;
                Ok(prototype)
            }
        })
        .await
        .map_err(CollectorError::Store)?;

    if !collector.enabled {
        info!(collector = %collector.name, "collector is disabled, skipping run");
        return Ok(RunOutcome::Disabled);
    }

    let started = Instant::now();
    info!(collector = %collector.name, "collection started");
    task.collect(&collector).await?;

    let mut collector = collector;
    collector.last_executed = now_millis();
    collector.online = true;
    let stamped = collector.clone();
    db.call(move |db| db.save_collector(&stamped))
        .await
        .map_err(CollectorError::Store)?;

    info!(
        collector = %collector.name,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "collection finished"
    );
    Ok(RunOutcome::Completed(collector))
}

/// Run `task` every poll interval until `shutdown` flips to `true` or its
/// sender is dropped. The first run starts immediately.
pub fn spawn_collector(
    task: Arc<dyn CollectorTask>,
    db: DbHandle,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = task.poll_interval().max(Duration::from_secs(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        debug!(collector = task.name(), period_secs = period.as_secs(), "collector loop started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    if let Err(error) = run_once(task.as_ref(), &db).await {
                        warn!(collector = task.name(), error = %error, "collection run failed");
                    }
                }
            }
        }
        info!(collector = task.name(), "collector stopped");
    })
}

/// Tasks for every source enabled in `config`, in a fixed order.
pub fn tasks_from_config(
    config: &TeamboardToml,
    db: &DbHandle,
) -> anyhow::Result<Vec<Arc<dyn CollectorTask>>> {
    let mut tasks: Vec<Arc<dyn CollectorTask>> = Vec::new();
    if config.jira.enabled {
        tasks.push(JiraCollectorTask::from_config(&config.jira, db.clone())?);
    }
    if config.gitlab.enabled {
        tasks.push(GitLabCollectorTask::from_config(&config.gitlab, db.clone())?);
    }
    if config.jenkins.enabled {
        tasks.push(JenkinsBehaveCollectorTask::from_config(&config.jenkins, db.clone())?);
    }
    Ok(tasks)
}

/// Reject a feature whose story-point estimate is not an integer before it
/// reaches the store.
pub fn ensure_numeric_estimate(feature: &Feature) -> Result<(), CollectorError> {
    match feature.estimate.as_deref() {
        Some(value) if !is_blank(value) && value.trim().parse::<i64>().is_err() => {
            Err(CollectorError::MalformedEstimate {
                feature: feature
                    .number
                    .clone()
                    .or_else(|| feature.feature_id.clone())
                    .unwrap_or_default(),
                value: value.to_string(),
            })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DashboardDb;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use teamboard_common::CollectorType;

    struct CountingTask {
        runs: AtomicUsize,
        fail: bool,
    }

    impl CountingTask {
        fn new(fail: bool) -> Self {
            Self {
                runs: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl CollectorTask for CountingTask {
        fn name(&self) -> &str {
            "Counting"
        }

        fn prototype(&self) -> Collector {
            let mut collector = Collector::new("Counting", CollectorType::Feature);
            collector.options.insert("servers".into(), serde_json::json!(["a"]));
            collector
        }

        fn poll_interval(&self) -> Duration {
            Duration::from_secs(60)
        }

        async fn collect(&self, _collector: &Collector) -> Result<(), CollectorError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CollectorError::Http {
                    source_system: "Test",
                    url: "http://localhost".into(),
                    message: "down".into(),
                });
            }
            Ok(())
        }
    }

    fn handle() -> DbHandle {
        DbHandle::new(DashboardDb::new_in_memory().unwrap())
    }

    #[tokio::test]
    async fn test_run_once_registers_and_stamps_collector() {
        let db = handle();
        let task = CountingTask::new(false);

        let outcome = run_once(&task, &db).await.unwrap();
        let RunOutcome::Completed(collector) = outcome else {
            panic!("Expected a completed run");
        };
        assert!(collector.last_executed > 0);
        assert!(collector.online);

        let stored = db
            .call(|db| db.find_collector_by_name("Counting"))
            .await
            .unwrap()
            .expect("collector should be registered");
        assert_eq!(stored.id, collector.id);
        assert_eq!(stored.last_executed, collector.last_executed);

        // A second run reuses the registered record.
        run_once(&task, &db).await.unwrap();
        let all = db.call(|db| db.list_collectors()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(task.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_once_skips_disabled_collector() {
        let db = handle();
        let task = CountingTask::new(false);
        let mut disabled = task.prototype();
        disabled.enabled = false;
        db.call(move |db| db.save_collector(&disabled)).await.unwrap();

        let outcome = run_once(&task, &db).await.unwrap();
        assert_eq!(outcome, RunOutcome::Disabled);
        assert_eq!(task.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_run_leaves_last_executed_untouched() {
        let db = handle();
        let task = CountingTask::new(true);
        let err = run_once(&task, &db).await.unwrap_err();
        assert!(matches!(err, CollectorError::Http { .. }));

        let stored = db
            .call(|db| db.find_collector_by_name("Counting"))
            .await
            .unwrap()
            .expect("collector should still be registered");
        assert_eq!(stored.last_executed, 0);
    }

    #[tokio::test]
    async fn test_spawned_loop_stops_on_shutdown() {
        let db = handle();
        let task = Arc::new(CountingTask::new(false));
        let (tx, rx) = watch::channel(false);
        let join = spawn_collector(task.clone(), db, rx);

        // The first tick fires immediately.
        for _ in 0..50 {
            if task.runs.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(task.runs.load(Ordering::SeqCst), 1);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), join)
            .await
            .expect("collector loop should stop")
            .unwrap();
    }

    #[test]
    fn test_tasks_follow_enabled_flags() {
        let db = handle();
        let mut config = TeamboardToml::default();
        config.gitlab.enabled = false;
        let names: Vec<String> = tasks_from_config(&config, &db)
            .unwrap()
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(names, vec![jira::COLLECTOR_NAME, jenkins::COLLECTOR_NAME]);
    }

    #[test]
    fn test_ensure_numeric_estimate() {
        let mut feature = Feature {
            number: Some("PROJ-1".into()),
            ..Feature::default()
        };
        assert!(ensure_numeric_estimate(&feature).is_ok());
        feature.estimate = Some(" 8 ".into());
        assert!(ensure_numeric_estimate(&feature).is_ok());
        feature.estimate = Some("".into());
        assert!(ensure_numeric_estimate(&feature).is_ok());
        feature.estimate = Some("2.5".into());
        match ensure_numeric_estimate(&feature) {
            Err(CollectorError::MalformedEstimate { feature, value }) => {
                assert_eq!(feature, "PROJ-1");
                assert_eq!(value, "2.5");
            }
            other => panic!("Expected MalformedEstimate, got {:?}", other),
        }
    }
}
