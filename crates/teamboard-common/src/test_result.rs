use serde::{Deserialize, Serialize};

use crate::collector::CollectorItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestSuiteType {
    Unit,
    Functional,
    Integration,
    Performance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestCaseStatus {
    Success,
    Failure,
    Skipped,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub description: String,
    /// Milliseconds.
    pub duration: i64,
    pub status: TestCaseStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSuite {
    pub suite_type: TestSuiteType,
    pub description: String,
    pub start_time: i64,
    pub end_time: i64,
    /// Milliseconds, the sum of the case durations.
    pub duration: i64,
    pub failed_test_case_count: i32,
    pub success_test_case_count: i32,
    pub skipped_test_case_count: i32,
    pub total_test_case_count: i32,
    pub test_cases: Vec<TestCase>,
}

/// Test suites published by one build of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub id: Option<String>,
    pub collector_item_id: Option<String>,
    /// Build number the results came from.
    pub execution_id: String,
    /// Epoch millis when the result was collected.
    pub timestamp: i64,
    pub url: Option<String>,
    pub test_suites: Vec<TestSuite>,
}

impl TestResult {
    pub fn total_count(&self) -> i32 {
        self.test_suites.iter().map(|s| s.total_test_case_count).sum()
    }

    pub fn failure_count(&self) -> i32 {
        self.test_suites.iter().map(|s| s.failed_test_case_count).sum()
    }
}

/// Summary of a single CI build.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Build {
    pub number: String,
    pub url: String,
    pub timestamp: i64,
}

/// A Jenkins job tracked by the test collector.
///
/// Typed view over a [`CollectorItem`] whose options hold `instance_url`,
/// `job_name` and `job_url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JenkinsJob {
    pub item: CollectorItem,
}

impl JenkinsJob {
    pub const INSTANCE_URL: &'static str = "instance_url";
    pub const JOB_NAME: &'static str = "job_name";
    pub const JOB_URL: &'static str = "job_url";

    pub fn new(collector_id: &str, instance_url: &str, job_name: &str, job_url: &str) -> Self {
        let mut item = CollectorItem::new(collector_id);
        item.set_option(Self::INSTANCE_URL, instance_url);
        item.set_option(Self::JOB_NAME, job_name);
        item.set_option(Self::JOB_URL, job_url);
        Self { item }
    }

    pub fn id(&self) -> &str {
        &self.item.id
    }

    pub fn instance_url(&self) -> &str {
        self.item.option_str(Self::INSTANCE_URL).unwrap_or_default()
    }

    pub fn job_name(&self) -> &str {
        self.item.option_str(Self::JOB_NAME).unwrap_or_default()
    }

    pub fn job_url(&self) -> &str {
        self.item.option_str(Self::JOB_URL).unwrap_or_default()
    }
}

impl From<CollectorItem> for JenkinsJob {
    fn from(item: CollectorItem) -> Self {
        Self { item }
    }
}
