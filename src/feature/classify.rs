use anyhow::Result;
use teamboard_common::Feature;

use super::AgileType;
use crate::store::{FeatureRepository, Projection, SprintFilter};

/// Features in the team's current sprint.
///
/// Kanban is the concatenation of the null-sprint and unending-sprint
/// queries. The predicates are disjoint so nothing is deduplicated, but the
/// two reads are separate statements: a feature moving sprints between them
/// can show up in neither or in both.
///
/// Scrum and legacy return sprints whose window contains `now` and that end
/// before the end-of-time sentinel. `now` is taken by the caller once per
/// request.
pub fn current_sprint_features<S>(
    store: &S,
    team_id: &str,
    agile_type: AgileType,
    projection: Projection,
    now: &str,
) -> Result<Vec<Feature>>
where
    S: FeatureRepository + ?Sized,
{
    match agile_type {
        AgileType::Kanban => {
            let mut features =
                store.find_by_sprint_filter(team_id, &SprintFilter::NullSprint, projection)?;
            features.extend(store.find_by_sprint_filter(
                team_id,
                &SprintFilter::UnendingSprint,
                projection,
            )?);
            Ok(features)
        }
        AgileType::Scrum | AgileType::Legacy => store.find_by_sprint_filter(
            team_id,
            &SprintFilter::ActiveEndingSprint {
                now: now.to_string(),
            },
            projection,
        ),
    }
}
