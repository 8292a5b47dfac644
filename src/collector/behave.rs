use anyhow::Context;
use serde::Deserialize;
use teamboard_common::{TestCase, TestCaseStatus, TestSuite, TestSuiteType};

/// Converts one representation into another.
pub trait Transformer<S, O> {
    fn transform(&self, source: S) -> O;
}

#[derive(Debug, Deserialize)]
struct BehaveFeature {
    #[serde(default)]
    keyword: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    elements: Vec<BehaveElement>,
}

#[derive(Debug, Deserialize)]
struct BehaveElement {
    #[serde(default)]
    keyword: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "type", default)]
    element_type: Option<String>,
    #[serde(default)]
    steps: Vec<BehaveStep>,
}

#[derive(Debug, Deserialize)]
struct BehaveStep {
    #[serde(default)]
    result: Option<BehaveStepResult>,
}

#[derive(Debug, Deserialize)]
struct BehaveStepResult {
    #[serde(default)]
    status: String,
    /// Seconds.
    #[serde(default)]
    duration: f64,
}

/// Turns a behave JSON report into one functional test suite per feature.
#[derive(Debug, Clone, Copy, Default)]
pub struct BehaveJsonTransformer;

impl<'a> Transformer<&'a str, anyhow::Result<Vec<TestSuite>>> for BehaveJsonTransformer {
    fn transform(&self, source: &'a str) -> anyhow::Result<Vec<TestSuite>> {
        let features: Vec<BehaveFeature> =
            serde_json::from_str(source).context("Failed to parse behave JSON report")?;
        Ok(features.iter().map(feature_suite).collect())
    }
}

fn feature_suite(feature: &BehaveFeature) -> TestSuite {
    let test_cases: Vec<TestCase> = feature
        .elements
        .iter()
        .filter(|e| e.element_type.as_deref().is_none_or(|t| t == "scenario"))
        .map(scenario_case)
        .collect();

    let count = |status: TestCaseStatus| {
        test_cases.iter().filter(|c| c.status == status).count() as i32
    };
    TestSuite {
        suite_type: TestSuiteType::Functional,
        description: format!("{}:{}", feature.keyword, feature.name),
        start_time: 0,
        end_time: 0,
        duration: test_cases.iter().map(|c| c.duration).sum(),
        failed_test_case_count: count(TestCaseStatus::Failure),
        success_test_case_count: count(TestCaseStatus::Success),
        skipped_test_case_count: count(TestCaseStatus::Skipped),
        total_test_case_count: test_cases.len() as i32,
        test_cases,
    }
}

fn scenario_case(element: &BehaveElement) -> TestCase {
    let seconds: f64 = element
        .steps
        .iter()
        .filter_map(|s| s.result.as_ref())
        .map(|r| r.duration)
        .sum();
    TestCase {
        id: element.name.clone(),
        description: format!("{}:{}", element.keyword, element.name),
        duration: (seconds * 1000.0).round() as i64,
        status: scenario_status(&element.steps),
    }
}

fn scenario_status(steps: &[BehaveStep]) -> TestCaseStatus {
    let statuses: Vec<&str> = steps
        .iter()
        .map(|s| s.result.as_ref().map_or("", |r| r.status.as_str()))
        .collect();
    if statuses.iter().any(|s| *s == "failed") {
        TestCaseStatus::Failure
    } else if statuses.iter().any(|s| *s == "skipped" || *s == "undefined") {
        TestCaseStatus::Skipped
    } else if !statuses.is_empty() && statuses.iter().all(|s| *s == "passed") {
        TestCaseStatus::Success
    } else {
        TestCaseStatus::Unknown
    }
}
