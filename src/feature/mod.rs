//! Sprint classification and estimate aggregation.
//!
//! | Module     | Contents                                                 |
//! |------------|----------------------------------------------------------|
//! | `classify` | `current_sprint_features`, the one agile-type branch     |
//! | `estimate` | `StatusBuckets`, `SprintEstimate` and the epic roll-up   |
//! | `service`  | `FeatureService`, the read-only query façade             |

pub mod classify;
pub mod estimate;
pub mod service;

pub use classify::current_sprint_features;
pub use estimate::{
    SprintEstimate, StatusBucket, StatusBuckets, aggregate_sprint_estimate, epic_rollup,
    feature_estimate,
};
pub use service::{DataResponse, FeatureService};

/// Which sprint shape a team works in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgileType {
    Scrum,
    Kanban,
    /// Nothing or something unrecognized was requested. Classified like
    /// scrum.
    Legacy,
}

impl AgileType {
    /// `scrum` and `kanban` match case-insensitively; anything else,
    /// including no value, is legacy.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("scrum") => Self::Scrum,
            Some(v) if v.eq_ignore_ascii_case("kanban") => Self::Kanban,
            _ => Self::Legacy,
        }
    }
}

/// Unit the estimate aggregations report in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimateMetric {
    /// Sums `estimate_time` minutes and reports whole hours.
    Hours,
    /// Sums the story-point `estimate`.
    StoryPoints,
}

impl EstimateMetric {
    /// `hours` matches case-insensitively; anything else is story points.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("hours") => Self::Hours,
            _ => Self::StoryPoints,
        }
    }

    /// Convert an accumulated total into the reported unit.
    pub(crate) fn finish(self, accumulated: i64) -> i64 {
        match self {
            Self::Hours => accumulated / 60,
            Self::StoryPoints => accumulated,
        }
    }
}
