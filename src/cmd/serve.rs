//! `teamboard serve`: the query API with the collectors polling alongside.

use anyhow::Result;
use tracing::info;

use teamboard::collector::tasks_from_config;
use teamboard::config::TeamboardToml;
use teamboard::web::start_server;

use super::db::open_db;

pub async fn cmd_serve(config: &TeamboardToml, with_collectors: bool) -> Result<()> {
    for warning in config.validate() {
        tracing::warn!(%warning, "configuration warning");
    }
    let buckets = config.status_buckets()?;
    let db = open_db(config)?;

    let collectors = if with_collectors {
        tasks_from_config(config, &db)?
    } else {
        Vec::new()
    };
    info!(
        collectors = collectors.len(),
        db = %config.database.path.display(),
        "starting teamboard"
    );

    start_server(&config.server, db, buckets, collectors).await
}
