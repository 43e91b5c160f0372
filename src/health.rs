//! Dashboard health: the worst metric's position between the unhealthy and
//! healthy targets.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::model::Coverage;
use crate::target::{CoverageMetric, CoverageTarget};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// 0 (at or below the unhealthy target) to 100 (at or above healthy).
    pub score: i32,
    pub metric: CoverageMetric,
    pub description: String,
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}% - {}", self.score, self.description)
    }
}

/// Health of `coverage`, or `None` when either target is missing or has no
/// threshold set. No health is a valid result, not an error.
pub fn build_health<C: Coverage + ?Sized>(
    healthy: Option<&CoverageTarget>,
    unhealthy: Option<&CoverageTarget>,
    coverage: &C,
) -> Option<HealthReport> {
    let healthy = healthy.filter(|t| !t.is_empty())?;
    let unhealthy = unhealthy.filter(|t| !t.is_empty())?;
    let scores = healthy.range_scores(unhealthy, coverage);
    let (metric, score) = select_worst(&scores)?;
    let ratio = coverage.coverage(metric);
    Some(HealthReport {
        score,
        metric,
        description: format!(
            "Clover Coverage: {} {}% ({})",
            metric,
            ratio.percentage(),
            ratio
        ),
    })
}

/// Lowest score; ties go to the metric that comes first in
/// [`CoverageMetric::ALL`].
pub fn select_worst(scores: &BTreeMap<CoverageMetric, i32>) -> Option<(CoverageMetric, i32)> {
    // BTreeMap iterates in metric order, and min_by_key keeps the first of
    // equal keys.
    scores
        .iter()
        .min_by_key(|(_, score)| **score)
        .map(|(metric, score)| (*metric, *score))
}
