//! Query parameters for the feature store.

use teamboard_common::SPRINT_END_OF_TIME;

/// Which sprint a feature must be in to be returned.
///
/// Every filter also excludes deleted features and matches on team id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SprintFilter {
    /// No sprint assigned.
    NullSprint,
    /// A sprint without an end date, or one ending at or after the
    /// end-of-time sentinel.
    UnendingSprint,
    /// A sprint whose window contains `now` and that ends before the
    /// sentinel. `now` uses the stored date format.
    ActiveEndingSprint { now: String },
}

const HAS_SPRINT: &str = "(sprint_id IS NOT NULL AND sprint_id <> '')";

impl SprintFilter {
    /// SQL predicate over the `features` table. `?1` is the team id, `?2`
    /// the end-of-time sentinel and `?3` the current time.
    pub(crate) fn sql_predicate(&self) -> String {
        match self {
            Self::NullSprint => "(sprint_id IS NULL OR sprint_id = '')".to_string(),
            Self::UnendingSprint => format!(
                "{HAS_SPRINT} AND (sprint_end_date IS NULL OR sprint_end_date = '' OR sprint_end_date >= ?2)"
            ),
            Self::ActiveEndingSprint { .. } => format!(
                "{HAS_SPRINT} AND sprint_begin_date <= ?3 AND sprint_end_date >= ?3 AND sprint_end_date < ?2"
            ),
        }
    }

    /// Positional values for [`Self::sql_predicate`], team id first.
    pub(crate) fn bind_values(&self, team_id: &str) -> Vec<String> {
        match self {
            Self::NullSprint => vec![team_id.to_string()],
            Self::UnendingSprint => vec![team_id.to_string(), SPRINT_END_OF_TIME.to_string()],
            Self::ActiveEndingSprint { now } => vec![
                team_id.to_string(),
                SPRINT_END_OF_TIME.to_string(),
                now.clone(),
            ],
        }
    }
}

/// Field set loaded for each feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// Just what the estimate and epic aggregations read.
    Minimal,
    /// Every display field.
    Full,
}

pub(crate) const FULL_COLUMNS: &[&str] = &[
    "id",
    "collector_id",
    "feature_id",
    "number",
    "name",
    "status",
    "state",
    "estimate",
    "estimate_time",
    "change_date",
    "is_deleted",
    "project_id",
    "project_name",
    "team_id",
    "team_name",
    "sprint_id",
    "sprint_name",
    "sprint_begin_date",
    "sprint_end_date",
    "sprint_asset_state",
    "epic_id",
    "epic_number",
    "epic_name",
    "owners",
];

pub(crate) const MINIMAL_COLUMNS: &[&str] = &[
    "id",
    "feature_id",
    "number",
    "status",
    "state",
    "estimate",
    "estimate_time",
    "sprint_id",
    "sprint_end_date",
    "epic_id",
    "epic_number",
    "epic_name",
];

impl Projection {
    pub(crate) fn columns(&self) -> &'static [&'static str] {
        match self {
            Self::Minimal => MINIMAL_COLUMNS,
            Self::Full => FULL_COLUMNS,
        }
    }
}
