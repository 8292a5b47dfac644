use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Sprint end date that marks a sprint as never ending (kanban marker).
pub const SPRINT_END_OF_TIME: &str = "9999-12-31T23:59:59.999";

/// Sprint id and name assigned to every kanban story.
pub const KANBAN_SPRINT_ID: &str = "KANBAN";

/// Begin date of the generic kanban sprint.
pub const KANBAN_START_DATE: &str = "1900-01-01T00:00:00.000";

/// Reduced status vocabulary that source-specific statuses map into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureStatus {
    Backlog,
    InProgress,
    Done,
}

impl FeatureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backlog => "Backlog",
            Self::InProgress => "In Progress",
            Self::Done => "Done",
        }
    }
}

impl std::fmt::Display for FeatureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "backlog" => Ok(Self::Backlog),
            "in progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            _ => Err(format!("Invalid feature status: {}", s)),
        }
    }
}

/// A backlog item as stored by the feature collectors.
///
/// Most fields are optional: the minimal projection only fills the ones the
/// estimate queries need, and the placeholder record returned for an
/// unlinked team has none set at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Store-assigned record id.
    pub id: Option<String>,
    pub collector_id: Option<String>,
    /// Id of the item in the source system.
    pub feature_id: Option<String>,
    /// Human-facing key, e.g. `PROJ-42`.
    pub number: Option<String>,
    pub name: Option<String>,
    pub status: Option<String>,
    pub state: Option<String>,
    /// Story points, kept as the numeric string the source reported.
    pub estimate: Option<String>,
    /// Time estimate in minutes.
    pub estimate_time: Option<i64>,
    pub change_date: Option<String>,
    pub is_deleted: bool,
    pub project_id: Option<String>,
    pub project_name: Option<String>,
    pub team_id: Option<String>,
    pub team_name: Option<String>,
    pub sprint_id: Option<String>,
    pub sprint_name: Option<String>,
    pub sprint_begin_date: Option<String>,
    pub sprint_end_date: Option<String>,
    pub sprint_asset_state: Option<String>,
    pub epic_id: Option<String>,
    pub epic_number: Option<String>,
    pub epic_name: Option<String>,
    #[serde(default)]
    pub owners: Vec<String>,
}

impl Feature {
    /// Empty record carrying only an estimate in the requested unit (story
    /// points, or whole hours). Used by the single-value estimate responses.
    pub fn with_estimate(estimate: i64) -> Self {
        Self {
            estimate: Some(estimate.to_string()),
            ..Self::default()
        }
    }

    /// Epic id when one is set and non-blank.
    pub fn epic_key(&self) -> Option<&str> {
        self.epic_id.as_deref().filter(|id| !is_blank(id))
    }
}

/// True for `""` and whitespace-only strings.
pub fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}
