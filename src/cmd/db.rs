//! Database commands: `teamboard init-db`, plus the handle the other
//! commands open.

use anyhow::{Context, Result};

use teamboard::config::TeamboardToml;
use teamboard::store::{DashboardDb, DbHandle};

/// Open the configured database, creating it and its parent directory if
/// needed.
pub fn open_db(config: &TeamboardToml) -> Result<DbHandle> {
    let path = &config.database.path;
    let db = DashboardDb::new(path)
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    Ok(DbHandle::new(db))
}

pub fn cmd_init_db(config: &TeamboardToml) -> Result<()> {
    open_db(config)?;
    println!("Database ready at {}", config.database.path.display());
    Ok(())
}
