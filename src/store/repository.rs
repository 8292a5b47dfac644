//! Persistence seams used by the feature engine and the collectors.
//!
//! `DashboardDb` implements every trait here. The engine and the services
//! are generic over the traits they need so tests can run them against an
//! in-memory database or a hand-written fake.

use anyhow::Result;
use teamboard_common::{Collector, CollectorItem, Commit, Component, Feature, TestResult};

use super::query::{Projection, SprintFilter};

pub trait FeatureRepository {
    /// Non-deleted features of `team_id` matching `filter`, with only the
    /// columns of `projection` populated.
    fn find_by_sprint_filter(
        &self,
        team_id: &str,
        filter: &SprintFilter,
        projection: Projection,
    ) -> Result<Vec<Feature>>;

    /// Every feature whose number matches, regardless of team or sprint.
    fn get_story_by_number(&self, number: &str) -> Result<Vec<Feature>>;

    /// Feature stored by `collector_id` under the source system id.
    fn find_by_feature_id(&self, collector_id: &str, feature_id: &str) -> Result<Option<Feature>>;

    /// The collector's most recently changed feature with a change date
    /// after `date`.
    fn find_latest_changed_after(&self, collector_id: &str, date: &str) -> Result<Option<Feature>>;

    /// Like [`find_latest_changed_after`](Self::find_latest_changed_after),
    /// restricted to features of one source project.
    fn find_latest_project_change_after(
        &self,
        collector_id: &str,
        project_id: &str,
        date: &str,
    ) -> Result<Option<Feature>>;

    /// Upsert by `(collector_id, feature_id)`. Returns the number saved.
    fn save_features(&self, features: &[Feature]) -> Result<usize>;
}

pub trait ComponentRepository {
    fn find_component(&self, id: &str) -> Result<Option<Component>>;
    fn list_components(&self) -> Result<Vec<Component>>;
    fn save_component(&self, component: &Component) -> Result<()>;
}

pub trait CollectorRepository {
    fn find_collector(&self, id: &str) -> Result<Option<Collector>>;
    fn find_collector_by_name(&self, name: &str) -> Result<Option<Collector>>;
    fn list_collectors(&self) -> Result<Vec<Collector>>;
    fn save_collector(&self, collector: &Collector) -> Result<()>;

    fn find_collector_item(&self, id: &str) -> Result<Option<CollectorItem>>;
    fn find_items_by_collector(&self, collector_id: &str) -> Result<Vec<CollectorItem>>;
    fn save_collector_item(&self, item: &CollectorItem) -> Result<()>;
    fn delete_collector_item(&self, id: &str) -> Result<()>;
}

pub trait CommitRepository {
    fn find_commit(&self, collector_item_id: &str, revision: &str) -> Result<Option<Commit>>;
    fn find_commits_by_item(&self, collector_item_id: &str) -> Result<Vec<Commit>>;
    /// Insert a commit, assigning an id when it has none.
    fn save_commit(&self, commit: &Commit) -> Result<Commit>;
}

pub trait TestResultRepository {
    fn find_test_result(
        &self,
        collector_item_id: &str,
        execution_id: &str,
    ) -> Result<Option<TestResult>>;
    fn find_test_results_by_item(&self, collector_item_id: &str) -> Result<Vec<TestResult>>;
    /// Insert a test result, assigning an id when it has none.
    fn save_test_result(&self, result: &TestResult) -> Result<TestResult>;
}
