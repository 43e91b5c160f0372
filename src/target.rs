//! Coverage thresholds: which metrics fail a build, and where a report sits
//! between an unhealthy and a healthy target.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ClovrError;
use crate::model::Coverage;

/// The four metric kinds a target can constrain, in their fixed evaluation
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverageMetric {
    Method,
    Conditional,
    Statement,
    Element,
}

impl CoverageMetric {
    pub const ALL: [CoverageMetric; 4] = [
        CoverageMetric::Method,
        CoverageMetric::Conditional,
        CoverageMetric::Statement,
        CoverageMetric::Element,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CoverageMetric::Method => "method",
            CoverageMetric::Conditional => "conditional",
            CoverageMetric::Statement => "statement",
            CoverageMetric::Element => "element",
        }
    }
}

impl fmt::Display for CoverageMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CoverageMetric::Method => "Methods",
            CoverageMetric::Conditional => "Conditionals",
            CoverageMetric::Statement => "Statements",
            CoverageMetric::Element => "Elements",
        })
    }
}

/// Percentage thresholds for one tier (healthy, unhealthy or failing).
///
/// `None` means the metric is not enforced at this tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageTarget {
    #[serde(alias = "methodCoverage")]
    pub method: Option<i32>,
    #[serde(alias = "conditionalCoverage")]
    pub conditional: Option<i32>,
    #[serde(alias = "statementCoverage")]
    pub statement: Option<i32>,
    #[serde(alias = "elementCoverage")]
    pub element: Option<i32>,
}

impl CoverageTarget {
    /// Target over method, conditional and statement coverage; element
    /// coverage stays unenforced.
    #[must_use]
    pub fn new(method: Option<i32>, conditional: Option<i32>, statement: Option<i32>) -> Self {
        Self {
            method,
            conditional,
            statement,
            element: None,
        }
    }

    /// Substituted for an empty healthy target.
    #[must_use]
    pub fn default_healthy() -> Self {
        Self::new(Some(70), Some(80), Some(80))
    }

    #[must_use]
    pub fn threshold(&self, metric: CoverageMetric) -> Option<i32> {
        match metric {
            CoverageMetric::Method => self.method,
            CoverageMetric::Conditional => self.conditional,
            CoverageMetric::Statement => self.statement,
            CoverageMetric::Element => self.element,
        }
    }

    pub fn set_threshold(&mut self, metric: CoverageMetric, value: Option<i32>) {
        let slot = match metric {
            CoverageMetric::Method => &mut self.method,
            CoverageMetric::Conditional => &mut self.conditional,
            CoverageMetric::Statement => &mut self.statement,
            CoverageMetric::Element => &mut self.element,
        };
        *slot = value;
    }

    /// True when no metric can ever fail: every threshold is unset or
    /// negative.
    #[must_use]
    pub fn is_always_met(&self) -> bool {
        CoverageMetric::ALL
            .iter()
            .all(|m| self.threshold(*m).map_or(true, |t| t < 0))
    }

    /// True when no threshold is set at all. Callers substitute a default
    /// for empty targets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        CoverageMetric::ALL
            .iter()
            .all(|m| self.threshold(*m).is_none())
    }

    /// Metrics whose (truncated) percentage is below this target's
    /// threshold.
    pub fn failing_metrics<C: Coverage + ?Sized>(&self, coverage: &C) -> BTreeSet<CoverageMetric> {
        CoverageMetric::ALL
            .into_iter()
            .filter(|metric| {
                self.threshold(*metric)
                    .is_some_and(|t| coverage.coverage(*metric).percentage() < t)
            })
            .collect()
    }

    /// Position of each metric between `min` (score 0) and this target
    /// (score 100).
    ///
    /// A metric appears in the result only when at least one of the two
    /// targets sets a threshold for it.
    pub fn range_scores<C: Coverage + ?Sized>(
        &self,
        min: &CoverageTarget,
        coverage: &C,
    ) -> BTreeMap<CoverageMetric, i32> {
        CoverageMetric::ALL
            .into_iter()
            .filter(|metric| self.threshold(*metric).is_some() || min.threshold(*metric).is_some())
            .map(|metric| {
                let score = range_score(
                    self.threshold(metric),
                    min.threshold(metric),
                    coverage.coverage(metric).percentage(),
                );
                (metric, score)
            })
            .collect()
    }
}

/// Normalise `value` into `0..=100` between `min` and `max`.
///
/// An unset or negative `min` is 0, an unset `max` or one above 100 is 100,
/// and an inverted interval is narrowed to `[max - 1, max]`.
fn range_score(max: Option<i32>, min: Option<i32>, value: i32) -> i32 {
    let max = max.filter(|m| *m <= 100).unwrap_or(100);
    let mut min = min.filter(|m| *m >= 0).unwrap_or(0);
    if min > max {
        min = max - 1;
    }
    // A zero-width interval divides to +/-inf or NaN; the saturating cast
    // maps those to i32::MAX, i32::MIN and 0 before clamping.
    let score = (100.0_f32 * (value as f32 - min as f32) / (max as f32 - min as f32)) as i32;
    score.clamp(0, 100)
}

/// Parses `method=70,conditional=80,statement=80[,element=N]`. Keys may be
/// abbreviated to their first letter.
impl FromStr for CoverageTarget {
    type Err = ClovrError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut target = CoverageTarget::default();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                ClovrError::Parse(format!("Expected metric=percent, got '{part}'"))
            })?;
            let metric = match key.trim().to_lowercase().as_str() {
                "m" | "method" => CoverageMetric::Method,
                "c" | "conditional" => CoverageMetric::Conditional,
                "s" | "statement" => CoverageMetric::Statement,
                "e" | "element" => CoverageMetric::Element,
                other => {
                    return Err(ClovrError::Parse(format!(
                        "Unknown metric '{other}'. Supported: method, conditional, statement, element"
                    )))
                }
            };
            let value: i32 = value.trim().parse().map_err(|_| {
                ClovrError::Parse(format!("Invalid percentage '{value}' for {metric}"))
            })?;
            target.set_threshold(metric, Some(value));
        }
        Ok(target)
    }
}
