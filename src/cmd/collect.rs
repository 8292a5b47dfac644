//! `teamboard collect`: one concurrent collection pass over the enabled
//! sources.

use anyhow::{Result, bail};
use futures::future::join_all;
use tracing::error;

use teamboard::collector::{RunOutcome, gitlab, jenkins, jira, run_once, tasks_from_config};
use teamboard::config::TeamboardToml;

use super::db::open_db;

/// Collector name for a `--source` value.
fn collector_name(source: &str) -> Result<&'static str> {
    match source.to_ascii_lowercase().as_str() {
        "jira" => Ok(jira::COLLECTOR_NAME),
        "gitlab" => Ok(gitlab::COLLECTOR_NAME),
        "jenkins" => Ok(jenkins::COLLECTOR_NAME),
        other => bail!("Unknown source '{}'. Expected jira, gitlab or jenkins", other),
    }
}

pub async fn cmd_collect(config: &TeamboardToml, source: Option<&str>) -> Result<()> {
    let only = source.map(collector_name).transpose()?;
    let db = open_db(config)?;
    let tasks: Vec<_> = tasks_from_config(config, &db)?
        .into_iter()
        .filter(|task| only.is_none_or(|name| task.name() == name))
        .collect();

    if tasks.is_empty() {
        println!("No enabled collectors to run.");
        return Ok(());
    }

    let outcomes = join_all(tasks.iter().map(|task| run_once(task.as_ref(), &db))).await;

    let mut failures = 0;
    for (task, outcome) in tasks.iter().zip(outcomes) {
        match outcome {
            Ok(RunOutcome::Completed(collector)) => {
                println!("{}: collected (last_executed = {})", task.name(), collector.last_executed);
            }
            Ok(RunOutcome::Disabled) => println!("{}: disabled, skipped", task.name()),
            Err(e) => {
                error!(collector = task.name(), error = %e, "collection failed");
                println!("{}: failed: {}", task.name(), e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} collectors failed", failures, tasks.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_name_is_case_insensitive() {
        assert_eq!(collector_name("Jira").unwrap(), jira::COLLECTOR_NAME);
        assert_eq!(collector_name("gitlab").unwrap(), gitlab::COLLECTOR_NAME);
        assert_eq!(collector_name("JENKINS").unwrap(), jenkins::COLLECTOR_NAME);
        assert!(collector_name("bamboo").is_err());
    }
}
