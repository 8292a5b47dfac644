use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use teamboard_common::{Feature, is_blank};

use super::EstimateMetric;
use crate::errors::{ConfigError, FeatureError};

/// Which estimate column a feature's status contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusBucket {
    InProgress,
    Done,
    /// Counted in the total only.
    Other,
}

/// In-progress and done status vocabularies, lowercased.
///
/// Built once from configuration and shared read-only. The two sets are
/// disjoint, so `open = total - in_progress - done` never subtracts a
/// feature twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusBuckets {
    in_progress: BTreeSet<String>,
    done: BTreeSet<String>,
}

impl StatusBuckets {
    pub fn new<S: AsRef<str>>(in_progress: &[S], done: &[S]) -> Result<Self, ConfigError> {
        let normalize = |statuses: &[S]| -> BTreeSet<String> {
            statuses
                .iter()
                .map(|s| s.as_ref().trim().to_lowercase())
                .collect()
        };
        let in_progress = normalize(in_progress);
        let done = normalize(done);
        if let Some(status) = in_progress.intersection(&done).next() {
            return Err(ConfigError::OverlappingStatusBuckets {
                status: status.clone(),
            });
        }
        Ok(Self { in_progress, done })
    }

    pub fn bucket(&self, status: Option<&str>) -> StatusBucket {
        let Some(status) = status else {
            return StatusBucket::Other;
        };
        let status = status.trim().to_lowercase();
        if self.in_progress.contains(&status) {
            StatusBucket::InProgress
        } else if self.done.contains(&status) {
            StatusBucket::Done
        } else {
            StatusBucket::Other
        }
    }
}

impl Default for StatusBuckets {
    fn default() -> Self {
        Self {
            in_progress: ["in progress", "waiting", "impeded"]
                .into_iter()
                .map(String::from)
                .collect(),
            done: ["done", "accepted"].into_iter().map(String::from).collect(),
        }
    }
}

/// Estimate totals for the current sprint, in the requested unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SprintEstimate {
    pub total_estimate: i64,
    pub open_estimate: i64,
    pub in_progress_estimate: i64,
    pub complete_estimate: i64,
}

/// A feature's estimate in the accumulation unit: minutes for hours,
/// points otherwise.
pub fn feature_estimate(feature: &Feature, metric: EstimateMetric) -> Result<i64, FeatureError> {
    match metric {
        EstimateMetric::Hours => Ok(feature.estimate_time.unwrap_or(0)),
        EstimateMetric::StoryPoints => match feature.estimate.as_deref() {
            None => Ok(0),
            Some(value) if is_blank(value) => Ok(0),
            Some(value) => {
                value
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| FeatureError::MalformedEstimate {
                        feature: feature_label(feature),
                        value: value.to_string(),
                    })
            }
        },
    }
}

fn feature_label(feature: &Feature) -> String {
    feature
        .number
        .clone()
        .or_else(|| feature.feature_id.clone())
        .or_else(|| feature.id.clone())
        .unwrap_or_else(|| "<unknown>".to_string())
}

fn add_estimate(sum: i64, estimate: i64, feature: &Feature) -> Result<i64, FeatureError> {
    sum.checked_add(estimate)
        .ok_or_else(|| FeatureError::EstimateOverflow {
            feature: feature_label(feature),
        })
}

/// Bucket and sum `features` in one pass.
pub fn aggregate_sprint_estimate(
    features: &[Feature],
    metric: EstimateMetric,
    buckets: &StatusBuckets,
) -> Result<SprintEstimate, FeatureError> {
    let mut total = 0;
    let mut in_progress = 0;
    let mut done = 0;
    for feature in features {
        let estimate = feature_estimate(feature, metric)?;
        total = add_estimate(total, estimate, feature)?;
        match buckets.bucket(feature.status.as_deref()) {
            StatusBucket::InProgress => in_progress = add_estimate(in_progress, estimate, feature)?,
            StatusBucket::Done => done = add_estimate(done, estimate, feature)?,
            StatusBucket::Other => {}
        }
    }
    let open = total
        .checked_sub(in_progress)
        .and_then(|rest| rest.checked_sub(done))
        .ok_or_else(|| FeatureError::EstimateOverflow {
            feature: "<sprint open estimate>".to_string(),
        })?;

    Ok(SprintEstimate {
        total_estimate: metric.finish(total),
        open_estimate: metric.finish(open),
        in_progress_estimate: metric.finish(in_progress),
        complete_estimate: metric.finish(done),
    })
}

/// Sum estimates per epic.
///
/// Each entry is a feature carrying only the epic id, number and name (from
/// the first feature seen for that epic) and the summed estimate. Features
/// without an epic are skipped. Entries come back in first-seen order.
pub fn epic_rollup(features: &[Feature], metric: EstimateMetric) -> Result<Vec<Feature>, FeatureError> {
    let mut order: Vec<Feature> = Vec::new();
    let mut totals: Vec<i64> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for feature in features {
        let Some(epic_id) = feature.epic_key() else {
            continue;
        };
        let estimate = feature_estimate(feature, metric)?;
        let slot = *index.entry(epic_id.to_string()).or_insert_with(|| {
            order.push(Feature {
                epic_id: Some(epic_id.to_string()),
                epic_number: feature.epic_number.clone(),
                epic_name: feature.epic_name.clone(),
                ..Feature::default()
            });
            totals.push(0);
            order.len() - 1
        });
        totals[slot] = add_estimate(totals[slot], estimate, feature)?;
    }

    Ok(order
        .into_iter()
        .zip(totals)
        .map(|(mut entry, total)| {
            entry.estimate = Some(metric.finish(total).to_string());
            entry
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn story(status: Option<&str>, points: Option<&str>) -> Feature {
        Feature {
            number: Some("PROJ-1".into()),
            status: status.map(String::from),
            estimate: points.map(String::from),
            ..Feature::default()
        }
    }

    fn timed(status: &str, minutes: i64) -> Feature {
        Feature {
            status: Some(status.into()),
            estimate_time: Some(minutes),
            ..Feature::default()
        }
    }

    fn epic(id: &str, number: &str, points: &str) -> Feature {
        Feature {
            epic_id: Some(id.into()),
            epic_number: Some(number.into()),
            epic_name: Some(format!("{} name", number)),
            estimate: Some(points.into()),
            ..Feature::default()
        }
    }

    #[test]
    fn buckets_reject_overlap() {
        let err = StatusBuckets::new(&["In Progress", "Done"], &["done"]).unwrap_err();
        match err {
            ConfigError::OverlappingStatusBuckets { status } => assert_eq!(status, "done"),
            other => panic!("Expected OverlappingStatusBuckets, got {:?}", other),
        }
    }

    #[test]
    fn buckets_match_case_insensitively() {
        let buckets = StatusBuckets::default();
        assert_eq!(buckets.bucket(Some("IN PROGRESS")), StatusBucket::InProgress);
        assert_eq!(buckets.bucket(Some("Impeded")), StatusBucket::InProgress);
        assert_eq!(buckets.bucket(Some("Accepted")), StatusBucket::Done);
        assert_eq!(buckets.bucket(Some("Backlog")), StatusBucket::Other);
        assert_eq!(buckets.bucket(None), StatusBucket::Other);
    }

    #[test]
    fn default_buckets_equal_configured_defaults() {
        let configured = StatusBuckets::new(
            &["in progress", "waiting", "impeded"],
            &["done", "accepted"],
        )
        .unwrap();
        assert_eq!(configured, StatusBuckets::default());
    }

    #[test]
    fn open_is_total_minus_named_buckets() {
        let features = vec![
            story(Some("In Progress"), Some("5")),
            story(Some("Waiting"), Some("1")),
            story(Some("Done"), Some("3")),
            story(Some("Backlog"), Some("8")),
            story(None, Some("2")),
            story(Some("Accepted"), Some("")),
            story(Some("Done"), None),
        ];
        let estimate =
            aggregate_sprint_estimate(&features, EstimateMetric::StoryPoints, &StatusBuckets::default())
                .unwrap();
        assert_eq!(estimate.total_estimate, 19);
        assert_eq!(estimate.in_progress_estimate, 6);
        assert_eq!(estimate.complete_estimate, 3);
        assert_eq!(
            estimate.open_estimate,
            estimate.total_estimate - estimate.in_progress_estimate - estimate.complete_estimate
        );
        assert_eq!(estimate.open_estimate, 10);
    }

    #[test]
    fn malformed_points_are_an_error_not_zero() {
        let features = vec![story(Some("Done"), Some("3")), story(Some("Done"), Some("five"))];
        let err =
            aggregate_sprint_estimate(&features, EstimateMetric::StoryPoints, &StatusBuckets::default())
                .unwrap_err();
        match err {
            FeatureError::MalformedEstimate { feature, value } => {
                assert_eq!(feature, "PROJ-1");
                assert_eq!(value, "five");
            }
            other => panic!("Expected MalformedEstimate, got {:?}", other),
        }
    }

    #[test]
    fn hours_are_summed_in_minutes_then_divided_once() {
        // 3 x 50 minutes = 150 minutes = 2 hours; per-feature rounding would give 0.
        let features = vec![timed("Done", 50), timed("Done", 50), timed("Done", 50)];
        let estimate =
            aggregate_sprint_estimate(&features, EstimateMetric::Hours, &StatusBuckets::default())
                .unwrap();
        assert_eq!(estimate.total_estimate, 2);
        assert_eq!(estimate.complete_estimate, 2);
        assert_eq!(estimate.open_estimate, 0);
    }

    #[test]
    fn hours_ignore_point_estimates_and_missing_times() {
        let mut feature = story(Some("In Progress"), Some("not-a-number"));
        feature.estimate_time = Some(125);
        let features = vec![feature, story(Some("In Progress"), None)];
        let estimate =
            aggregate_sprint_estimate(&features, EstimateMetric::Hours, &StatusBuckets::default())
                .unwrap();
        assert_eq!(estimate.total_estimate, 2);
        assert_eq!(estimate.in_progress_estimate, 2);
    }

    #[test]
    fn hours_total_is_order_independent() {
        let mut features = vec![timed("Done", 59), timed("Waiting", 1), timed("Backlog", 61)];
        let forward =
            aggregate_sprint_estimate(&features, EstimateMetric::Hours, &StatusBuckets::default())
                .unwrap();
        features.reverse();
        let backward =
            aggregate_sprint_estimate(&features, EstimateMetric::Hours, &StatusBuckets::default())
                .unwrap();
        assert_eq!(forward, backward);
        assert_eq!(forward.total_estimate, 2);
    }

    #[test]
    fn epics_sum_per_id_and_keep_first_seen_names() {
        let mut later = epic("E1", "EPIC-1-renamed", "3");
        later.epic_name = Some("other".into());
        let features = vec![
            epic("E1", "EPIC-1", "5"),
            epic("E2", "EPIC-2", "2"),
            later,
            epic("  ", "BLANK", "13"),
            story(Some("Done"), Some("21")),
        ];
        let rollup = epic_rollup(&features, EstimateMetric::StoryPoints).unwrap();
        assert_eq!(rollup.len(), 2);

        let e1 = rollup
            .iter()
            .find(|f| f.epic_id.as_deref() == Some("E1"))
            .unwrap();
        assert_eq!(e1.epic_number.as_deref(), Some("EPIC-1"));
        assert_eq!(e1.epic_name.as_deref(), Some("EPIC-1 name"));
        assert_eq!(e1.estimate.as_deref(), Some("8"));
        assert!(e1.id.is_none());
        assert!(rollup.iter().all(|f| f.epic_number.as_deref() != Some("BLANK")));
    }

    #[test]
    fn sprint_total_past_i64_is_an_error() {
        let mut last = story(Some("Done"), Some("1"));
        last.number = Some("PROJ-2".into());
        let features = vec![story(Some("Done"), Some("9223372036854775807")), last];
        let err =
            aggregate_sprint_estimate(&features, EstimateMetric::StoryPoints, &StatusBuckets::default())
                .unwrap_err();
        match err {
            FeatureError::EstimateOverflow { feature } => assert_eq!(feature, "PROJ-2"),
            other => panic!("Expected EstimateOverflow, got {:?}", other),
        }
    }

    #[test]
    fn sprint_minutes_past_i64_is_an_error() {
        let features = vec![timed("Backlog", i64::MAX), timed("Waiting", i64::MAX)];
        let err = aggregate_sprint_estimate(&features, EstimateMetric::Hours, &StatusBuckets::default())
            .unwrap_err();
        assert!(matches!(err, FeatureError::EstimateOverflow { .. }));
    }

    #[test]
    fn open_estimate_past_i64_is_an_error() {
        // Every running sum fits, but total - in_progress = MAX + 1.
        let features = vec![
            story(Some("In Progress"), Some("-1")),
            story(Some("Backlog"), Some("9223372036854775807")),
            story(Some("Done"), Some("1")),
        ];
        let err =
            aggregate_sprint_estimate(&features, EstimateMetric::StoryPoints, &StatusBuckets::default())
                .unwrap_err();
        assert!(matches!(err, FeatureError::EstimateOverflow { .. }));
    }

    #[test]
    fn epic_total_past_i64_is_an_error() {
        let mut second = epic("E1", "EPIC-1", "1");
        second.number = Some("PROJ-9".into());
        let features = vec![epic("E1", "EPIC-1", "9223372036854775807"), second];
        let err = epic_rollup(&features, EstimateMetric::StoryPoints).unwrap_err();
        match err {
            FeatureError::EstimateOverflow { feature } => assert_eq!(feature, "PROJ-9"),
            other => panic!("Expected EstimateOverflow, got {:?}", other),
        }
    }

    #[test]
    fn epic_totals_overflow_independently() {
        let features = vec![
            epic("E1", "EPIC-1", "9223372036854775807"),
            epic("E2", "EPIC-2", "9223372036854775807"),
        ];
        let rollup = epic_rollup(&features, EstimateMetric::StoryPoints).unwrap();
        assert_eq!(rollup.len(), 2);
        assert_eq!(rollup[1].estimate.as_deref(), Some("9223372036854775807"));
    }

    #[test]
    fn epic_hours_divide_after_summing() {
        let mut a = epic("E1", "EPIC-1", "0");
        a.estimate_time = Some(40);
        let mut b = epic("E1", "EPIC-1", "0");
        b.estimate_time = Some(40);
        let rollup = epic_rollup(&[a, b], EstimateMetric::Hours).unwrap();
        assert_eq!(rollup[0].estimate.as_deref(), Some("1"));
    }
}
