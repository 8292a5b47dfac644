use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use serde_json::{Map, Value};
use teamboard_common::{
    Collector, CollectorItem, CollectorType, Commit, CommitType, Component, Feature, TestResult,
    TestSuite,
};
use tracing::debug;

use super::query::{FULL_COLUMNS, Projection, SprintFilter};
use super::repository::{
    CollectorRepository, CommitRepository, ComponentRepository, FeatureRepository,
    TestResultRepository,
};

/// Async-safe handle to the dashboard database.
///
/// Wraps `DashboardDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O
/// never ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<DashboardDb>>,
}

impl DbHandle {
    pub fn new(db: DashboardDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&DashboardDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. Only for startup and
    /// tests, never from a hot async path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, DashboardDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

pub struct DashboardDb {
    conn: Connection,
}

impl DashboardDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS collectors (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE,
                    collector_type TEXT NOT NULL,
                    enabled INTEGER NOT NULL DEFAULT 1,
                    online INTEGER NOT NULL DEFAULT 1,
                    last_executed INTEGER NOT NULL DEFAULT 0,
                    options TEXT NOT NULL DEFAULT '{}'
                );

                CREATE TABLE IF NOT EXISTS collector_items (
                    id TEXT PRIMARY KEY,
                    collector_id TEXT NOT NULL REFERENCES collectors(id) ON DELETE CASCADE,
                    description TEXT,
                    nice_name TEXT,
                    enabled INTEGER NOT NULL DEFAULT 1,
                    pushed INTEGER NOT NULL DEFAULT 0,
                    last_updated INTEGER NOT NULL DEFAULT 0,
                    options TEXT NOT NULL DEFAULT '{}'
                );

                CREATE TABLE IF NOT EXISTS components (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    owner TEXT
                );

                -- No foreign key on collector_item_id: a component may keep
                -- pointing at an item that has since been deleted.
                CREATE TABLE IF NOT EXISTS component_items (
                    component_id TEXT NOT NULL REFERENCES components(id) ON DELETE CASCADE,
                    collector_type TEXT NOT NULL,
                    position INTEGER NOT NULL,
                    collector_item_id TEXT NOT NULL,
                    PRIMARY KEY (component_id, collector_type, position)
                );

                CREATE TABLE IF NOT EXISTS features (
                    id TEXT PRIMARY KEY,
                    collector_id TEXT,
                    feature_id TEXT,
                    number TEXT,
                    name TEXT,
                    status TEXT,
                    state TEXT,
                    estimate TEXT,
                    estimate_time INTEGER,
                    change_date TEXT,
                    is_deleted INTEGER NOT NULL DEFAULT 0,
                    project_id TEXT,
                    project_name TEXT,
                    team_id TEXT,
                    team_name TEXT,
                    sprint_id TEXT,
                    sprint_name TEXT,
                    sprint_begin_date TEXT,
                    sprint_end_date TEXT,
                    sprint_asset_state TEXT,
                    epic_id TEXT,
                    epic_number TEXT,
                    epic_name TEXT,
                    owners TEXT NOT NULL DEFAULT '[]',
                    UNIQUE (collector_id, feature_id)
                );

                CREATE TABLE IF NOT EXISTS commits (
                    id TEXT PRIMARY KEY,
                    collector_item_id TEXT NOT NULL,
                    timestamp INTEGER NOT NULL,
                    scm_url TEXT NOT NULL,
                    scm_branch TEXT NOT NULL,
                    scm_revision_number TEXT NOT NULL,
                    scm_parent_revision_numbers TEXT NOT NULL DEFAULT '[]',
                    scm_author TEXT,
                    scm_commit_log TEXT,
                    scm_commit_timestamp INTEGER NOT NULL,
                    number_of_changes INTEGER NOT NULL DEFAULT 0,
                    commit_type TEXT NOT NULL,
                    UNIQUE (collector_item_id, scm_revision_number)
                );

                CREATE TABLE IF NOT EXISTS test_results (
                    id TEXT PRIMARY KEY,
                    collector_item_id TEXT NOT NULL,
                    execution_id TEXT NOT NULL,
                    timestamp INTEGER NOT NULL,
                    url TEXT,
                    test_suites TEXT NOT NULL DEFAULT '[]',
                    UNIQUE (collector_item_id, execution_id)
                );

                CREATE INDEX IF NOT EXISTS idx_collector_items_collector ON collector_items(collector_id);
                CREATE INDEX IF NOT EXISTS idx_features_team ON features(team_id, sprint_id);
                CREATE INDEX IF NOT EXISTS idx_features_number ON features(number);
                CREATE INDEX IF NOT EXISTS idx_features_change ON features(collector_id, change_date);
                ",
            )
            .context("Failed to create tables")?;
        debug!("dashboard schema is up to date");
        Ok(())
    }
}

// ── Collectors ────────────────────────────────────────────────────────

const COLLECTOR_COLUMNS: &str =
    "id, name, collector_type, enabled, online, last_executed, options";

/// Intermediate row struct for collectors.
struct CollectorRow {
    id: String,
    name: String,
    collector_type: String,
    enabled: bool,
    online: bool,
    last_executed: i64,
    options: String,
}

impl CollectorRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            collector_type: row.get(2)?,
            enabled: row.get(3)?,
            online: row.get(4)?,
            last_executed: row.get(5)?,
            options: row.get(6)?,
        })
    }

    fn into_collector(self) -> Result<Collector> {
        let collector_type = CollectorType::from_str(&self.collector_type)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse collector type")?;
        Ok(Collector {
            id: self.id,
            name: self.name,
            collector_type,
            enabled: self.enabled,
            online: self.online,
            last_executed: self.last_executed,
            options: parse_options(&self.options)?,
        })
    }
}

const ITEM_COLUMNS: &str =
    "id, collector_id, description, nice_name, enabled, pushed, last_updated, options";

/// Intermediate row struct for collector_items.
struct ItemRow {
    id: String,
    collector_id: String,
    description: Option<String>,
    nice_name: Option<String>,
    enabled: bool,
    pushed: bool,
    last_updated: i64,
    options: String,
}

impl ItemRow {
    /// Read the item columns starting at `offset`.
    fn from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(offset)?,
            collector_id: row.get(offset + 1)?,
            description: row.get(offset + 2)?,
            nice_name: row.get(offset + 3)?,
            enabled: row.get(offset + 4)?,
            pushed: row.get(offset + 5)?,
            last_updated: row.get(offset + 6)?,
            options: row.get(offset + 7)?,
        })
    }

    fn into_item(self) -> Result<CollectorItem> {
        Ok(CollectorItem {
            id: self.id,
            collector_id: self.collector_id,
            description: self.description,
            nice_name: self.nice_name,
            enabled: self.enabled,
            pushed: self.pushed,
            last_updated: self.last_updated,
            options: parse_options(&self.options)?,
        })
    }
}

fn parse_options(json: &str) -> Result<Map<String, Value>> {
    serde_json::from_str(json).context("Failed to parse options JSON")
}

impl CollectorRepository for DashboardDb {
    fn find_collector(&self, id: &str) -> Result<Option<Collector>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {COLLECTOR_COLUMNS} FROM collectors WHERE id = ?1"),
                params![id],
                CollectorRow::from_row,
            )
            .optional()
            .context("Failed to query collector")?;
        row.map(CollectorRow::into_collector).transpose()
    }

    fn find_collector_by_name(&self, name: &str) -> Result<Option<Collector>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {COLLECTOR_COLUMNS} FROM collectors WHERE name = ?1"),
                params![name],
                CollectorRow::from_row,
            )
            .optional()
            .context("Failed to query collector by name")?;
        row.map(CollectorRow::into_collector).transpose()
    }

    fn list_collectors(&self) -> Result<Vec<Collector>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {COLLECTOR_COLUMNS} FROM collectors ORDER BY name"))
            .context("Failed to prepare list_collectors")?;
        let rows = stmt
            .query_map([], CollectorRow::from_row)
            .context("Failed to query collectors")?;
        let mut collectors = Vec::new();
        for row in rows {
            collectors.push(row.context("Failed to read collector row")?.into_collector()?);
        }
        Ok(collectors)
    }

    fn save_collector(&self, collector: &Collector) -> Result<()> {
        let options = serde_json::to_string(&collector.options)?;
        self.conn
            .execute(
                "INSERT INTO collectors (id, name, collector_type, enabled, online, last_executed, options)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    collector_type = excluded.collector_type,
                    enabled = excluded.enabled,
                    online = excluded.online,
                    last_executed = excluded.last_executed,
                    options = excluded.options",
                params![
                    collector.id,
                    collector.name,
                    collector.collector_type.as_str(),
                    collector.enabled,
                    collector.online,
                    collector.last_executed,
                    options,
                ],
            )
            .context("Failed to upsert collector")?;
        Ok(())
    }

    fn find_collector_item(&self, id: &str) -> Result<Option<CollectorItem>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM collector_items WHERE id = ?1"),
                params![id],
                |row| ItemRow::from_row(row, 0),
            )
            .optional()
            .context("Failed to query collector item")?;
        row.map(ItemRow::into_item).transpose()
    }

    fn find_items_by_collector(&self, collector_id: &str) -> Result<Vec<CollectorItem>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {ITEM_COLUMNS} FROM collector_items WHERE collector_id = ?1 ORDER BY rowid"
            ))
            .context("Failed to prepare find_items_by_collector")?;
        let rows = stmt
            .query_map(params![collector_id], |row| ItemRow::from_row(row, 0))
            .context("Failed to query collector items")?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row.context("Failed to read collector item row")?.into_item()?);
        }
        Ok(items)
    }

    fn save_collector_item(&self, item: &CollectorItem) -> Result<()> {
        let options = serde_json::to_string(&item.options)?;
        self.conn
            .execute(
                "INSERT INTO collector_items (id, collector_id, description, nice_name, enabled, pushed, last_updated, options)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                    collector_id = excluded.collector_id,
                    description = excluded.description,
                    nice_name = excluded.nice_name,
                    enabled = excluded.enabled,
                    pushed = excluded.pushed,
                    last_updated = excluded.last_updated,
                    options = excluded.options",
                params![
                    item.id,
                    item.collector_id,
                    item.description,
                    item.nice_name,
                    item.enabled,
                    item.pushed,
                    item.last_updated,
                    options,
                ],
            )
            .context("Failed to upsert collector item")?;
        Ok(())
    }

    fn delete_collector_item(&self, id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM collector_items WHERE id = ?1", params![id])
            .context("Failed to delete collector item")?;
        Ok(())
    }
}

// ── Components ────────────────────────────────────────────────────────

impl DashboardDb {
    fn load_component_items(&self, component: &mut Component) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT ci.collector_type,
                        i.id, i.collector_id, i.description, i.nice_name,
                        i.enabled, i.pushed, i.last_updated, i.options
                 FROM component_items ci
                 LEFT JOIN collector_items i ON i.id = ci.collector_item_id
                 WHERE ci.component_id = ?1
                 ORDER BY ci.collector_type, ci.position",
            )
            .context("Failed to prepare component items query")?;
        let rows = stmt
            .query_map(params![component.id], |row| {
                let collector_type: String = row.get(0)?;
                let item_id: Option<String> = row.get(1)?;
                let item = match item_id {
                    Some(_) => Some(ItemRow::from_row(row, 1)?),
                    None => None,
                };
                Ok((collector_type, item))
            })
            .context("Failed to query component items")?;
        for row in rows {
            let (collector_type, item) = row.context("Failed to read component item row")?;
            let collector_type = CollectorType::from_str(&collector_type)
                .map_err(|e| anyhow::anyhow!(e))
                .context("Failed to parse component collector type")?;
            let item = item.map(ItemRow::into_item).transpose()?;
            component
                .collector_items
                .entry(collector_type)
                .or_default()
                .push(item);
        }
        Ok(())
    }
}

impl ComponentRepository for DashboardDb {
    fn find_component(&self, id: &str) -> Result<Option<Component>> {
        let component = self
            .conn
            .query_row(
                "SELECT id, name, owner FROM components WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Component {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        owner: row.get(2)?,
                        collector_items: Default::default(),
                    })
                },
            )
            .optional()
            .context("Failed to query component")?;
        match component {
            Some(mut component) => {
                self.load_component_items(&mut component)?;
                Ok(Some(component))
            }
            None => Ok(None),
        }
    }

    fn list_components(&self) -> Result<Vec<Component>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, owner FROM components ORDER BY rowid")
            .context("Failed to prepare list_components")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Component {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    owner: row.get(2)?,
                    collector_items: Default::default(),
                })
            })
            .context("Failed to query components")?;
        let mut components = Vec::new();
        for row in rows {
            let mut component = row.context("Failed to read component row")?;
            self.load_component_items(&mut component)?;
            components.push(component);
        }
        Ok(components)
    }

    /// Replace the component and its item links. Dangling (`None`) entries
    /// have no id to link and are dropped.
    fn save_component(&self, component: &Component) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin component transaction")?;
        tx.execute(
            "INSERT INTO components (id, name, owner) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, owner = excluded.owner",
            params![component.id, component.name, component.owner],
        )
        .context("Failed to upsert component")?;
        tx.execute(
            "DELETE FROM component_items WHERE component_id = ?1",
            params![component.id],
        )
        .context("Failed to clear component items")?;
        for (collector_type, items) in &component.collector_items {
            for (position, item) in items.iter().flatten().enumerate() {
                tx.execute(
                    "INSERT INTO component_items (component_id, collector_type, position, collector_item_id)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![component.id, collector_type.as_str(), position as i64, item.id],
                )
                .context("Failed to insert component item")?;
            }
        }
        tx.commit().context("Failed to commit component")?;
        Ok(())
    }
}

// ── Features ──────────────────────────────────────────────────────────

/// Intermediate row struct for features. Columns outside the requested
/// projection stay `None`.
#[derive(Default)]
struct FeatureRow {
    id: Option<String>,
    collector_id: Option<String>,
    feature_id: Option<String>,
    number: Option<String>,
    name: Option<String>,
    status: Option<String>,
    state: Option<String>,
    estimate: Option<String>,
    estimate_time: Option<i64>,
    change_date: Option<String>,
    is_deleted: Option<bool>,
    project_id: Option<String>,
    project_name: Option<String>,
    team_id: Option<String>,
    team_name: Option<String>,
    sprint_id: Option<String>,
    sprint_name: Option<String>,
    sprint_begin_date: Option<String>,
    sprint_end_date: Option<String>,
    sprint_asset_state: Option<String>,
    epic_id: Option<String>,
    epic_number: Option<String>,
    epic_name: Option<String>,
    owners: Option<String>,
}

impl FeatureRow {
    fn from_row(row: &Row<'_>, columns: &[&str]) -> rusqlite::Result<Self> {
        let mut r = FeatureRow::default();
        for &column in columns {
            match column {
                "id" => r.id = row.get(column)?,
                "collector_id" => r.collector_id = row.get(column)?,
                "feature_id" => r.feature_id = row.get(column)?,
                "number" => r.number = row.get(column)?,
                "name" => r.name = row.get(column)?,
                "status" => r.status = row.get(column)?,
                "state" => r.state = row.get(column)?,
                "estimate" => r.estimate = row.get(column)?,
                "estimate_time" => r.estimate_time = row.get(column)?,
                "change_date" => r.change_date = row.get(column)?,
                "is_deleted" => r.is_deleted = row.get(column)?,
                "project_id" => r.project_id = row.get(column)?,
                "project_name" => r.project_name = row.get(column)?,
                "team_id" => r.team_id = row.get(column)?,
                "team_name" => r.team_name = row.get(column)?,
                "sprint_id" => r.sprint_id = row.get(column)?,
                "sprint_name" => r.sprint_name = row.get(column)?,
                "sprint_begin_date" => r.sprint_begin_date = row.get(column)?,
                "sprint_end_date" => r.sprint_end_date = row.get(column)?,
                "sprint_asset_state" => r.sprint_asset_state = row.get(column)?,
                "epic_id" => r.epic_id = row.get(column)?,
                "epic_number" => r.epic_number = row.get(column)?,
                "epic_name" => r.epic_name = row.get(column)?,
                "owners" => r.owners = row.get(column)?,
                _ => {}
            }
        }
        Ok(r)
    }

    fn into_feature(self) -> Result<Feature> {
        let owners = match self.owners {
            Some(json) => {
                serde_json::from_str(&json).context("Failed to parse feature owners JSON")?
            }
            None => Vec::new(),
        };
        Ok(Feature {
            id: self.id,
            collector_id: self.collector_id,
            feature_id: self.feature_id,
            number: self.number,
            name: self.name,
            status: self.status,
            state: self.state,
            estimate: self.estimate,
            estimate_time: self.estimate_time,
            change_date: self.change_date,
            is_deleted: self.is_deleted.unwrap_or(false),
            project_id: self.project_id,
            project_name: self.project_name,
            team_id: self.team_id,
            team_name: self.team_name,
            sprint_id: self.sprint_id,
            sprint_name: self.sprint_name,
            sprint_begin_date: self.sprint_begin_date,
            sprint_end_date: self.sprint_end_date,
            sprint_asset_state: self.sprint_asset_state,
            epic_id: self.epic_id,
            epic_number: self.epic_number,
            epic_name: self.epic_name,
            owners,
        })
    }
}

impl DashboardDb {
    fn query_features<P: rusqlite::Params>(
        &self,
        columns: &[&str],
        where_clause: &str,
        order_by: &str,
        params: P,
    ) -> Result<Vec<Feature>> {
        let sql = format!(
            "SELECT {} FROM features WHERE {} ORDER BY {}",
            columns.join(", "),
            where_clause,
            order_by
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare feature query")?;
        let rows = stmt
            .query_map(params, |row| FeatureRow::from_row(row, columns))
            .context("Failed to query features")?;
        let mut features = Vec::new();
        for row in rows {
            features.push(row.context("Failed to read feature row")?.into_feature()?);
        }
        Ok(features)
    }
}

impl FeatureRepository for DashboardDb {
    fn find_by_sprint_filter(
        &self,
        team_id: &str,
        filter: &SprintFilter,
        projection: Projection,
    ) -> Result<Vec<Feature>> {
        let where_clause = format!(
            "is_deleted = 0 AND team_id = ?1 AND {}",
            filter.sql_predicate()
        );
        self.query_features(
            projection.columns(),
            &where_clause,
            "rowid",
            params_from_iter(filter.bind_values(team_id)),
        )
    }

    fn get_story_by_number(&self, number: &str) -> Result<Vec<Feature>> {
        self.query_features(FULL_COLUMNS, "number = ?1", "rowid", params![number])
    }

    fn find_by_feature_id(&self, collector_id: &str, feature_id: &str) -> Result<Option<Feature>> {
        let mut features = self.query_features(
            FULL_COLUMNS,
            "collector_id = ?1 AND feature_id = ?2",
            "rowid",
            params![collector_id, feature_id],
        )?;
        Ok(features.pop())
    }

    fn find_latest_changed_after(&self, collector_id: &str, date: &str) -> Result<Option<Feature>> {
        let mut features = self.query_features(
            FULL_COLUMNS,
            "collector_id = ?1 AND change_date > ?2",
            "change_date DESC LIMIT 1",
            params![collector_id, date],
        )?;
        Ok(features.pop())
    }

    fn find_latest_project_change_after(
        &self,
        collector_id: &str,
        project_id: &str,
        date: &str,
    ) -> Result<Option<Feature>> {
        let mut features = self.query_features(
            FULL_COLUMNS,
            "collector_id = ?1 AND project_id = ?2 AND change_date > ?3",
            "change_date DESC LIMIT 1",
            params![collector_id, project_id, date],
        )?;
        Ok(features.pop())
    }

    fn save_features(&self, features: &[Feature]) -> Result<usize> {
        let placeholders: Vec<String> = (1..=FULL_COLUMNS.len()).map(|i| format!("?{i}")).collect();
        let updates: Vec<String> = FULL_COLUMNS
            .iter()
            .filter(|c| !matches!(**c, "id" | "collector_id" | "feature_id"))
            .map(|c| format!("{c} = excluded.{c}"))
            .collect();
        let sql = format!(
            "INSERT INTO features ({}) VALUES ({})
             ON CONFLICT(collector_id, feature_id) DO UPDATE SET {}",
            FULL_COLUMNS.join(", "),
            placeholders.join(", "),
            updates.join(", ")
        );

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin feature transaction")?;
        {
            let mut stmt = tx.prepare(&sql).context("Failed to prepare feature upsert")?;
            for feature in features {
                let id = feature
                    .id
                    .clone()
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                let owners = serde_json::to_string(&feature.owners)?;
                stmt.execute(params![
                    id,
                    feature.collector_id,
                    feature.feature_id,
                    feature.number,
                    feature.name,
                    feature.status,
                    feature.state,
                    feature.estimate,
                    feature.estimate_time,
                    feature.change_date,
                    feature.is_deleted,
                    feature.project_id,
                    feature.project_name,
                    feature.team_id,
                    feature.team_name,
                    feature.sprint_id,
                    feature.sprint_name,
                    feature.sprint_begin_date,
                    feature.sprint_end_date,
                    feature.sprint_asset_state,
                    feature.epic_id,
                    feature.epic_number,
                    feature.epic_name,
                    owners,
                ])
                .with_context(|| {
                    format!(
                        "Failed to upsert feature {}",
                        feature.number.as_deref().unwrap_or("<unnumbered>")
                    )
                })?;
            }
        }
        tx.commit().context("Failed to commit features")?;
        Ok(features.len())
    }
}

// ── Commits ───────────────────────────────────────────────────────────

const COMMIT_COLUMNS: &str = "id, collector_item_id, timestamp, scm_url, scm_branch, scm_revision_number, \
     scm_parent_revision_numbers, scm_author, scm_commit_log, scm_commit_timestamp, \
     number_of_changes, commit_type";

/// Intermediate row struct for commits.
struct CommitRow {
    id: String,
    collector_item_id: String,
    timestamp: i64,
    scm_url: String,
    scm_branch: String,
    scm_revision_number: String,
    parents: String,
    scm_author: Option<String>,
    scm_commit_log: Option<String>,
    scm_commit_timestamp: i64,
    number_of_changes: i64,
    commit_type: String,
}

impl CommitRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            collector_item_id: row.get(1)?,
            timestamp: row.get(2)?,
            scm_url: row.get(3)?,
            scm_branch: row.get(4)?,
            scm_revision_number: row.get(5)?,
            parents: row.get(6)?,
            scm_author: row.get(7)?,
            scm_commit_log: row.get(8)?,
            scm_commit_timestamp: row.get(9)?,
            number_of_changes: row.get(10)?,
            commit_type: row.get(11)?,
        })
    }

    fn into_commit(self) -> Result<Commit> {
        let commit_type = CommitType::from_str(&self.commit_type)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse commit type")?;
        Ok(Commit {
            id: Some(self.id),
            collector_item_id: Some(self.collector_item_id),
            timestamp: self.timestamp,
            scm_url: self.scm_url,
            scm_branch: self.scm_branch,
            scm_revision_number: self.scm_revision_number,
            scm_parent_revision_numbers: serde_json::from_str(&self.parents)
                .context("Failed to parse commit parents JSON")?,
            scm_author: self.scm_author,
            scm_commit_log: self.scm_commit_log,
            scm_commit_timestamp: self.scm_commit_timestamp,
            number_of_changes: self.number_of_changes,
            commit_type,
        })
    }
}

impl CommitRepository for DashboardDb {
    fn find_commit(&self, collector_item_id: &str, revision: &str) -> Result<Option<Commit>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {COMMIT_COLUMNS} FROM commits
                     WHERE collector_item_id = ?1 AND scm_revision_number = ?2"
                ),
                params![collector_item_id, revision],
                CommitRow::from_row,
            )
            .optional()
            .context("Failed to query commit")?;
        row.map(CommitRow::into_commit).transpose()
    }

    fn find_commits_by_item(&self, collector_item_id: &str) -> Result<Vec<Commit>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {COMMIT_COLUMNS} FROM commits WHERE collector_item_id = ?1
                 ORDER BY scm_commit_timestamp DESC"
            ))
            .context("Failed to prepare find_commits_by_item")?;
        let rows = stmt
            .query_map(params![collector_item_id], CommitRow::from_row)
            .context("Failed to query commits")?;
        let mut commits = Vec::new();
        for row in rows {
            commits.push(row.context("Failed to read commit row")?.into_commit()?);
        }
        Ok(commits)
    }

    fn save_commit(&self, commit: &Commit) -> Result<Commit> {
        let item_id = commit
            .collector_item_id
            .as_deref()
            .context("Commit has no collector item id")?;
        let id = commit
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let parents = serde_json::to_string(&commit.scm_parent_revision_numbers)?;
        self.conn
            .execute(
                &format!(
                    "INSERT INTO commits ({COMMIT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                     ON CONFLICT(collector_item_id, scm_revision_number) DO NOTHING"
                ),
                params![
                    id,
                    item_id,
                    commit.timestamp,
                    commit.scm_url,
                    commit.scm_branch,
                    commit.scm_revision_number,
                    parents,
                    commit.scm_author,
                    commit.scm_commit_log,
                    commit.scm_commit_timestamp,
                    commit.number_of_changes,
                    commit.commit_type.as_str(),
                ],
            )
            .context("Failed to insert commit")?;
        self.find_commit(item_id, &commit.scm_revision_number)?
            .context("Commit not found after insert")
    }
}

// ── Test results ──────────────────────────────────────────────────────

const TEST_RESULT_COLUMNS: &str =
    "id, collector_item_id, execution_id, timestamp, url, test_suites";

/// Intermediate row struct for test_results.
struct TestResultRow {
    id: String,
    collector_item_id: String,
    execution_id: String,
    timestamp: i64,
    url: Option<String>,
    test_suites: String,
}

impl TestResultRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            collector_item_id: row.get(1)?,
            execution_id: row.get(2)?,
            timestamp: row.get(3)?,
            url: row.get(4)?,
            test_suites: row.get(5)?,
        })
    }

    fn into_test_result(self) -> Result<TestResult> {
        let test_suites: Vec<TestSuite> = serde_json::from_str(&self.test_suites)
            .context("Failed to parse test suites JSON")?;
        Ok(TestResult {
            id: Some(self.id),
            collector_item_id: Some(self.collector_item_id),
            execution_id: self.execution_id,
            timestamp: self.timestamp,
            url: self.url,
            test_suites,
        })
    }
}

impl TestResultRepository for DashboardDb {
    fn find_test_result(
        &self,
        collector_item_id: &str,
        execution_id: &str,
    ) -> Result<Option<TestResult>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {TEST_RESULT_COLUMNS} FROM test_results
                     WHERE collector_item_id = ?1 AND execution_id = ?2"
                ),
                params![collector_item_id, execution_id],
                TestResultRow::from_row,
            )
            .optional()
            .context("Failed to query test result")?;
        row.map(TestResultRow::into_test_result).transpose()
    }

    fn find_test_results_by_item(&self, collector_item_id: &str) -> Result<Vec<TestResult>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {TEST_RESULT_COLUMNS} FROM test_results WHERE collector_item_id = ?1
                 ORDER BY timestamp DESC"
            ))
            .context("Failed to prepare find_test_results_by_item")?;
        let rows = stmt
            .query_map(params![collector_item_id], TestResultRow::from_row)
            .context("Failed to query test results")?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row.context("Failed to read test result row")?.into_test_result()?);
        }
        Ok(results)
    }

    fn save_test_result(&self, result: &TestResult) -> Result<TestResult> {
        let item_id = result
            .collector_item_id
            .as_deref()
            .context("Test result has no collector item id")?;
        let id = result
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let suites = serde_json::to_string(&result.test_suites)?;
        self.conn
            .execute(
                &format!(
                    "INSERT INTO test_results ({TEST_RESULT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(collector_item_id, execution_id) DO NOTHING"
                ),
                params![id, item_id, result.execution_id, result.timestamp, result.url, suites],
            )
            .context("Failed to insert test result")?;
        self.find_test_result(item_id, &result.execution_id)?
            .context("Test result not found after insert")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
