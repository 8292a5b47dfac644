//! Shared domain records for teamboard.
//!
//! These are the documents the collectors write and the query services read.
//! They carry no persistence or transport logic of their own.

pub mod collector;
pub mod feature;
pub mod scm;
pub mod test_result;

pub use collector::{Collector, CollectorItem, CollectorType, Component};
pub use feature::{
    Feature, FeatureStatus, KANBAN_SPRINT_ID, KANBAN_START_DATE, SPRINT_END_OF_TIME,
    is_blank,
};
pub use scm::{Commit, CommitType, GitLabRepo};
pub use test_result::{
    Build, JenkinsJob, TestCase, TestCaseStatus, TestResult, TestSuite, TestSuiteType,
};

/// Current wall-clock time as epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
