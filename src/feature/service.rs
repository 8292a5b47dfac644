use chrono::{DateTime, Utc};
use serde::Serialize;
use teamboard_common::{CollectorItem, Feature};
use tracing::warn;

use super::estimate::{SprintEstimate, StatusBuckets, aggregate_sprint_estimate, epic_rollup};
use super::{AgileType, EstimateMetric, current_sprint_features};
use crate::errors::FeatureError;
use crate::store::{CollectorRepository, ComponentRepository, FeatureRepository, Projection};
use crate::util::iso_timestamp;

/// A query result and the epoch millis of the last successful run of the
/// collector that produced it (0 when unknown).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataResponse<T> {
    pub result: T,
    pub last_updated: i64,
}

impl<T> DataResponse<T> {
    pub fn new(result: T, last_updated: i64) -> Self {
        Self {
            result,
            last_updated,
        }
    }
}

impl DataResponse<Vec<Feature>> {
    /// Single empty feature with no freshness, returned when a component
    /// has no team linked.
    pub fn empty_legacy() -> Self {
        Self::new(vec![Feature::default()], 0)
    }
}

/// Read-only feature queries for one request.
///
/// Every operation resolves the component's scope-owner collector item
/// first; without one it returns the empty legacy response instead of
/// querying. "Now" is fixed when the service is built.
pub struct FeatureService<'a, S: ?Sized> {
    store: &'a S,
    buckets: &'a StatusBuckets,
    now: String,
}

impl<'a, S> FeatureService<'a, S>
where
    S: FeatureRepository + ComponentRepository + CollectorRepository + ?Sized,
{
    pub fn new(store: &'a S, buckets: &'a StatusBuckets) -> Self {
        Self {
            store,
            buckets,
            now: iso_timestamp(Utc::now()),
        }
    }

    /// Evaluate sprint windows against `now` instead of the current time.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = iso_timestamp(now);
        self
    }

    /// Stories with the given number, whatever their team or sprint.
    pub fn get_story(
        &self,
        component_id: &str,
        story_number: &str,
    ) -> Result<DataResponse<Vec<Feature>>, FeatureError> {
        let Some(item) = self.scope_owner(component_id)? else {
            return Ok(DataResponse::empty_legacy());
        };
        let story = self
            .store
            .get_story_by_number(story_number)
            .map_err(FeatureError::Store)?;
        Ok(DataResponse::new(story, self.last_updated(&item)?))
    }

    /// Every story in the team's current sprint.
    pub fn get_relevant_stories(
        &self,
        component_id: &str,
        team_id: &str,
        agile_type: Option<&str>,
    ) -> Result<DataResponse<Vec<Feature>>, FeatureError> {
        self.current_features(component_id, team_id, agile_type, Projection::Full)
    }

    /// The team's current sprint, with the sprint fields of each story.
    pub fn get_current_sprint_detail(
        &self,
        component_id: &str,
        team_id: &str,
        agile_type: Option<&str>,
    ) -> Result<DataResponse<Vec<Feature>>, FeatureError> {
        self.current_features(component_id, team_id, agile_type, Projection::Full)
    }

    /// Estimate totals per epic of the current sprint.
    pub fn get_feature_epic_estimates(
        &self,
        component_id: &str,
        team_id: &str,
        agile_type: Option<&str>,
        estimate_metric_type: Option<&str>,
    ) -> Result<DataResponse<Vec<Feature>>, FeatureError> {
        let Some(item) = self.scope_owner(component_id)? else {
            return Ok(DataResponse::empty_legacy());
        };
        let features = self.classify(team_id, agile_type, Projection::Minimal)?;
        let rollup = epic_rollup(&features, EstimateMetric::parse(estimate_metric_type))?;
        Ok(DataResponse::new(rollup, self.last_updated(&item)?))
    }

    pub fn get_aggregated_sprint_estimates(
        &self,
        component_id: &str,
        team_id: &str,
        agile_type: Option<&str>,
        estimate_metric_type: Option<&str>,
    ) -> Result<DataResponse<SprintEstimate>, FeatureError> {
        let Some(item) = self.scope_owner(component_id)? else {
            return Ok(DataResponse::new(SprintEstimate::default(), 0));
        };
        let estimate = self.sprint_estimate(team_id, agile_type, estimate_metric_type)?;
        Ok(DataResponse::new(estimate, self.last_updated(&item)?))
    }

    #[deprecated(note = "use get_aggregated_sprint_estimates")]
    pub fn get_total_estimate(
        &self,
        component_id: &str,
        team_id: &str,
        agile_type: Option<&str>,
        estimate_metric_type: Option<&str>,
    ) -> Result<DataResponse<Vec<Feature>>, FeatureError> {
        self.single_estimate(component_id, team_id, agile_type, estimate_metric_type, |e| {
            e.total_estimate
        })
    }

    #[deprecated(note = "use get_aggregated_sprint_estimates")]
    pub fn get_in_progress_estimate(
        &self,
        component_id: &str,
        team_id: &str,
        agile_type: Option<&str>,
        estimate_metric_type: Option<&str>,
    ) -> Result<DataResponse<Vec<Feature>>, FeatureError> {
        self.single_estimate(component_id, team_id, agile_type, estimate_metric_type, |e| {
            e.in_progress_estimate
        })
    }

    #[deprecated(note = "use get_aggregated_sprint_estimates")]
    pub fn get_done_estimate(
        &self,
        component_id: &str,
        team_id: &str,
        agile_type: Option<&str>,
        estimate_metric_type: Option<&str>,
    ) -> Result<DataResponse<Vec<Feature>>, FeatureError> {
        self.single_estimate(component_id, team_id, agile_type, estimate_metric_type, |e| {
            e.complete_estimate
        })
    }

    fn current_features(
        &self,
        component_id: &str,
        team_id: &str,
        agile_type: Option<&str>,
        projection: Projection,
    ) -> Result<DataResponse<Vec<Feature>>, FeatureError> {
        let Some(item) = self.scope_owner(component_id)? else {
            return Ok(DataResponse::empty_legacy());
        };
        let features = self.classify(team_id, agile_type, projection)?;
        Ok(DataResponse::new(features, self.last_updated(&item)?))
    }

    fn single_estimate(
        &self,
        component_id: &str,
        team_id: &str,
        agile_type: Option<&str>,
        estimate_metric_type: Option<&str>,
        pick: impl FnOnce(&SprintEstimate) -> i64,
    ) -> Result<DataResponse<Vec<Feature>>, FeatureError> {
        let Some(item) = self.scope_owner(component_id)? else {
            return Ok(DataResponse::empty_legacy());
        };
        let estimate = self.sprint_estimate(team_id, agile_type, estimate_metric_type)?;
        Ok(DataResponse::new(
            vec![Feature::with_estimate(pick(&estimate))],
            self.last_updated(&item)?,
        ))
    }

    fn sprint_estimate(
        &self,
        team_id: &str,
        agile_type: Option<&str>,
        estimate_metric_type: Option<&str>,
    ) -> Result<SprintEstimate, FeatureError> {
        let features = self.classify(team_id, agile_type, Projection::Minimal)?;
        aggregate_sprint_estimate(
            &features,
            EstimateMetric::parse(estimate_metric_type),
            self.buckets,
        )
    }

    fn classify(
        &self,
        team_id: &str,
        agile_type: Option<&str>,
        projection: Projection,
    ) -> Result<Vec<Feature>, FeatureError> {
        current_sprint_features(
            self.store,
            team_id,
            AgileType::parse(agile_type),
            projection,
            &self.now,
        )
        .map_err(FeatureError::Store)
    }

    /// First scope-owner item of the component, if it resolves.
    fn scope_owner(&self, component_id: &str) -> Result<Option<CollectorItem>, FeatureError> {
        let component = self
            .store
            .find_component(component_id)
            .map_err(FeatureError::Store)?;
        Ok(component.and_then(|c| c.scope_owner().cloned()))
    }

    fn last_updated(&self, item: &CollectorItem) -> Result<i64, FeatureError> {
        let collector = self
            .store
            .find_collector(&item.collector_id)
            .map_err(FeatureError::Store)?;
        match collector {
            Some(collector) => Ok(collector.last_executed),
            None => {
                warn!(
                    collector_id = %item.collector_id,
                    collector_item_id = %item.id,
                    "scope owner references a missing collector, reporting no freshness"
                );
                Ok(0)
            }
        }
    }
}

#[cfg(test)]
#[allow(deprecated)]
mod tests {
    use super::*;
    use crate::store::DashboardDb;
    use chrono::TimeZone;
    use teamboard_common::{Collector, CollectorType, Component};

    const TEAM: &str = "T";

    struct Fixture {
        db: DashboardDb,
        buckets: StatusBuckets,
        component_id: String,
    }

    impl Fixture {
        fn service(&self) -> FeatureService<'_, DashboardDb> {
            FeatureService::new(&self.db, &self.buckets)
                .at(Utc.with_ymd_and_hms(2024, 1, 7, 0, 0, 0).unwrap())
        }
    }

    /// Team T with feature A in a scrum sprint and feature B on the kanban board.
    fn fixture() -> Fixture {
        let db = DashboardDb::new_in_memory().unwrap();
        let mut collector = Collector::new("Jira", CollectorType::ScopeOwner);
        collector.last_executed = 1_700_000_000_000;
        db.save_collector(&collector).unwrap();
        let item = CollectorItem::new(&collector.id);
        db.save_collector_item(&item).unwrap();
        let mut component = Component::new("team board");
        component.add_collector_item(CollectorType::ScopeOwner, item);
        db.save_component(&component).unwrap();

        let a = Feature {
            collector_id: Some(collector.id.clone()),
            feature_id: Some("A".into()),
            number: Some("A".into()),
            team_id: Some(TEAM.into()),
            status: Some("In Progress".into()),
            estimate: Some("5".into()),
            estimate_time: Some(125),
            sprint_id: Some("S1".into()),
            sprint_begin_date: Some("2024-01-01T00:00:00.000".into()),
            sprint_end_date: Some("2024-01-14T00:00:00.000".into()),
            epic_id: Some("E1".into()),
            epic_number: Some("EPIC-1".into()),
            epic_name: Some("Checkout".into()),
            ..Feature::default()
        };
        let b = Feature {
            collector_id: Some(collector.id.clone()),
            feature_id: Some("B".into()),
            number: Some("B".into()),
            team_id: Some(TEAM.into()),
            status: Some("Done".into()),
            estimate: Some("3".into()),
            ..Feature::default()
        };
        db.save_features(&[a, b]).unwrap();

        Fixture {
            db,
            buckets: StatusBuckets::default(),
            component_id: component.id,
        }
    }

    fn numbers(response: &DataResponse<Vec<Feature>>) -> Vec<&str> {
        response
            .result
            .iter()
            .filter_map(|f| f.number.as_deref())
            .collect()
    }

    #[test]
    fn scrum_scenario_aggregates_the_active_sprint() {
        let fx = fixture();
        let service = fx.service();
        let stories = service
            .get_relevant_stories(&fx.component_id, TEAM, Some("scrum"))
            .unwrap();
        assert_eq!(numbers(&stories), vec!["A"]);
        assert_eq!(stories.last_updated, 1_700_000_000_000);

        let estimate = service
            .get_aggregated_sprint_estimates(&fx.component_id, TEAM, Some("scrum"), None)
            .unwrap()
            .result;
        assert_eq!(
            estimate,
            SprintEstimate {
                total_estimate: 5,
                open_estimate: 0,
                in_progress_estimate: 5,
                complete_estimate: 0,
            }
        );
    }

    #[test]
    fn kanban_scenario_aggregates_the_board() {
        let fx = fixture();
        let service = fx.service();
        let stories = service
            .get_current_sprint_detail(&fx.component_id, TEAM, Some("KANBAN"))
            .unwrap();
        assert_eq!(numbers(&stories), vec!["B"]);

        let estimate = service
            .get_aggregated_sprint_estimates(&fx.component_id, TEAM, Some("kanban"), None)
            .unwrap()
            .result;
        assert_eq!(
            estimate,
            SprintEstimate {
                total_estimate: 3,
                open_estimate: 0,
                in_progress_estimate: 0,
                complete_estimate: 3,
            }
        );
    }

    #[test]
    fn legacy_agile_type_behaves_like_scrum() {
        let fx = fixture();
        let stories = fx
            .service()
            .get_relevant_stories(&fx.component_id, TEAM, None)
            .unwrap();
        assert_eq!(numbers(&stories), vec!["A"]);
    }

    #[test]
    fn hours_metric_reports_whole_hours() {
        let fx = fixture();
        let estimate = fx
            .service()
            .get_aggregated_sprint_estimates(&fx.component_id, TEAM, Some("scrum"), Some("Hours"))
            .unwrap()
            .result;
        assert_eq!(estimate.total_estimate, 2);
        assert_eq!(estimate.in_progress_estimate, 2);
    }

    #[test]
    fn get_story_for_unknown_component_is_empty_legacy() {
        let fx = fixture();
        let response = fx.service().get_story("no-such-component", "A").unwrap();
        assert_eq!(response, DataResponse::empty_legacy());
        assert_eq!(response.result.len(), 1);
        assert_eq!(response.last_updated, 0);
    }

    #[test]
    fn get_story_ignores_team_and_sprint() {
        let fx = fixture();
        let response = fx.service().get_story(&fx.component_id, "B").unwrap();
        assert_eq!(numbers(&response), vec!["B"]);
        assert_eq!(response.last_updated, 1_700_000_000_000);
    }

    #[test]
    fn component_without_scope_owner_degrades_every_operation() {
        let fx = fixture();
        let bare = Component::new("bare");
        fx.db.save_component(&bare).unwrap();
        let service = fx.service();

        let empty = DataResponse::empty_legacy();
        assert_eq!(service.get_relevant_stories(&bare.id, TEAM, None).unwrap(), empty);
        assert_eq!(service.get_current_sprint_detail(&bare.id, TEAM, None).unwrap(), empty);
        assert_eq!(
            service
                .get_feature_epic_estimates(&bare.id, TEAM, None, None)
                .unwrap(),
            empty
        );
        assert_eq!(service.get_total_estimate(&bare.id, TEAM, None, None).unwrap(), empty);
        assert_eq!(
            service
                .get_aggregated_sprint_estimates(&bare.id, TEAM, None, None)
                .unwrap(),
            DataResponse::new(SprintEstimate::default(), 0)
        );
    }

    #[test]
    fn missing_collector_reports_zero_freshness() {
        let fx = fixture();
        // The store's foreign key keeps such items out, so build one directly.
        let dangling = CollectorItem::new("missing");
        assert_eq!(fx.service().last_updated(&dangling).unwrap(), 0);
    }

    #[test]
    fn epic_estimates_roll_up_current_sprint() {
        let fx = fixture();
        let response = fx
            .service()
            .get_feature_epic_estimates(&fx.component_id, TEAM, Some("scrum"), None)
            .unwrap();
        assert_eq!(response.result.len(), 1);
        let epic = &response.result[0];
        assert_eq!(epic.epic_id.as_deref(), Some("E1"));
        assert_eq!(epic.epic_name.as_deref(), Some("Checkout"));
        assert_eq!(epic.estimate.as_deref(), Some("5"));
    }

    #[test]
    fn deprecated_single_values_pack_into_placeholder() {
        let fx = fixture();
        let service = fx.service();
        let total = service
            .get_total_estimate(&fx.component_id, TEAM, Some("kanban"), None)
            .unwrap();
        assert_eq!(total.result, vec![Feature::with_estimate(3)]);
        let wip = service
            .get_in_progress_estimate(&fx.component_id, TEAM, Some("scrum"), None)
            .unwrap();
        assert_eq!(wip.result[0].estimate.as_deref(), Some("5"));
        let done = service
            .get_done_estimate(&fx.component_id, TEAM, Some("scrum"), None)
            .unwrap();
        assert_eq!(done.result[0].estimate.as_deref(), Some("0"));
        assert_eq!(done.last_updated, 1_700_000_000_000);
    }

    #[test]
    fn deprecated_single_values_carry_whole_hours() {
        let fx = fixture();
        let wip = fx
            .service()
            .get_in_progress_estimate(&fx.component_id, TEAM, Some("scrum"), Some("hours"))
            .unwrap();
        assert_eq!(wip.result, vec![Feature::with_estimate(2)]);
    }

    #[test]
    fn malformed_estimate_surfaces_as_error() {
        let fx = fixture();
        let bad = Feature {
            collector_id: Some("x".into()),
            feature_id: Some("BAD".into()),
            number: Some("BAD".into()),
            team_id: Some(TEAM.into()),
            estimate: Some("lots".into()),
            ..Feature::default()
        };
        fx.db.save_features(&[bad]).unwrap();
        let err = fx
            .service()
            .get_aggregated_sprint_estimates(&fx.component_id, TEAM, Some("kanban"), None)
            .unwrap_err();
        assert!(matches!(err, FeatureError::MalformedEstimate { .. }));
    }
}
