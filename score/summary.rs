//! Confidence-interval summaries of the bootstrap distribution and the leaderboard
//! metrics document.

use crate::metrics::MetricTriple;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lower percentile of the reported 95% interval.
pub const LOWER_PERCENTILE: f64 = 2.5;
/// Upper percentile of the reported 95% interval.
pub const UPPER_PERCENTILE: f64 = 97.5;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SummaryError {
    #[error("Cannot summarize a bootstrap distribution with no samples.")]
    NoSamples,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub median: f64,
    pub lower: f64,
    pub upper: f64,
}

impl ConfidenceInterval {
    /// Median and 95% percentile band of `samples`.
    pub fn from_samples(samples: &[f64]) -> Result<Self, SummaryError> {
        if samples.is_empty() {
            return Err(SummaryError::NoSamples);
        }
        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);
        Ok(Self {
            median: percentile(&sorted, 50.0),
            lower: percentile(&sorted, LOWER_PERCENTILE),
            upper: percentile(&sorted, UPPER_PERCENTILE),
        })
    }
}

/// Linear-interpolation percentile of an ascending slice, with `q` in [0, 100].
///
/// The rank is `q / 100 * (n - 1)`; values between two ranks are interpolated.
/// Returns NaN for an empty slice.
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let rank = (q.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let frac = rank - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

/// Full-dataset metrics plus the bootstrap median and 95% band of each metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub full_dataset: MetricTriple,
    pub auroc: ConfidenceInterval,
    pub auprc: ConfidenceInterval,
    pub ppv_at_recall90: ConfidenceInterval,
    pub iterations: usize,
}

/// Summarizes the bootstrap triples. The result depends only on the multiset of
/// triples, not on their order.
pub fn summarize(
    full_dataset: MetricTriple,
    samples: &[MetricTriple],
) -> Result<EvaluationResult, SummaryError> {
    let column = |pick: fn(&MetricTriple) -> f64| samples.iter().map(pick).collect::<Vec<f64>>();

    Ok(EvaluationResult {
        full_dataset,
        auroc: ConfidenceInterval::from_samples(&column(|t| t.auroc))?,
        auprc: ConfidenceInterval::from_samples(&column(|t| t.auprc))?,
        ppv_at_recall90: ConfidenceInterval::from_samples(&column(|t| t.ppv_at_recall90))?,
        iterations: samples.len(),
    })
}

/// The leaderboard document. Key names are a stable external contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsDocument {
    #[serde(rename = "Score")]
    pub score: f64,

    #[serde(rename = "PPV@90RECALL")]
    pub ppv_at_recall90: f64,
    #[serde(rename = "PPV@90RECALL 95% CI Lower Bound")]
    pub ppv_at_recall90_lower: f64,
    #[serde(rename = "PPV@90RECALL 95% CI Upper Bound")]
    pub ppv_at_recall90_upper: f64,

    #[serde(rename = "AUROC")]
    pub auroc: f64,
    #[serde(rename = "AUROC 95% CI Lower Bound")]
    pub auroc_lower: f64,
    #[serde(rename = "AUROC 95% CI Upper Bound")]
    pub auroc_upper: f64,

    #[serde(rename = "AUPRC")]
    pub auprc: f64,
    #[serde(rename = "AUPRC 95% CI Lower Bound")]
    pub auprc_lower: f64,
    #[serde(rename = "AUPRC 95% CI Upper Bound")]
    pub auprc_upper: f64,

    #[serde(rename = "AUROC Full Dataset")]
    pub auroc_full: f64,
    #[serde(rename = "AUPRC Full Dataset")]
    pub auprc_full: f64,
    #[serde(rename = "PPV@90RECALL Full Dataset")]
    pub ppv_at_recall90_full: f64,
}

impl From<&EvaluationResult> for MetricsDocument {
    fn from(result: &EvaluationResult) -> Self {
        Self {
            score: result.ppv_at_recall90.median,
            ppv_at_recall90: result.ppv_at_recall90.median,
            ppv_at_recall90_lower: result.ppv_at_recall90.lower,
            ppv_at_recall90_upper: result.ppv_at_recall90.upper,
            auroc: result.auroc.median,
            auroc_lower: result.auroc.lower,
            auroc_upper: result.auroc.upper,
            auprc: result.auprc.median,
            auprc_lower: result.auprc.lower,
            auprc_upper: result.auprc.upper,
            auroc_full: result.full_dataset.auroc,
            auprc_full: result.full_dataset.auprc,
            ppv_at_recall90_full: result.full_dataset.ppv_at_recall90,
        }
    }
}

/// Serialized body of the empty report: `{}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyReport {}

/// What gets written to `metrics.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricsReport {
    Scored(MetricsDocument),
    Empty(EmptyReport),
}

impl MetricsReport {
    pub fn from_outcome(outcome: Option<&EvaluationResult>) -> Self {
        match outcome {
            Some(result) => Self::Scored(MetricsDocument::from(result)),
            None => Self::Empty(EmptyReport::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn triple(auroc: f64, auprc: f64, ppv: f64) -> MetricTriple {
        MetricTriple {
            auroc,
            auprc,
            ppv_at_recall90: ppv,
        }
    }

    #[test]
    fn percentile_interpolates_linearly_between_ranks() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_abs_diff_eq!(percentile(&sorted, 50.0), 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(percentile(&sorted, 2.5), 1.075, epsilon = 1e-12);
        assert_abs_diff_eq!(percentile(&sorted, 97.5), 3.925, epsilon = 1e-12);
        assert_eq!(percentile(&sorted, 0.0), 1.0);
        assert_eq!(percentile(&sorted, 100.0), 4.0);
        assert_eq!(percentile(&[0.3], 97.5), 0.3);
        assert!(percentile(&[], 50.0).is_nan());
    }

    #[test]
    fn interval_bounds_bracket_the_median() {
        let samples: Vec<f64> = (0..101).map(|i| ((i * 53) % 101) as f64 / 100.0).collect();
        let ci = ConfidenceInterval::from_samples(&samples).unwrap();
        assert!(ci.lower <= ci.median && ci.median <= ci.upper);
        assert_abs_diff_eq!(ci.median, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(ci.lower, 0.025, epsilon = 1e-12);
        assert_abs_diff_eq!(ci.upper, 0.975, epsilon = 1e-12);

        let single = ConfidenceInterval::from_samples(&[0.42]).unwrap();
        assert_eq!((single.lower, single.median, single.upper), (0.42, 0.42, 0.42));
    }

    #[test]
    fn summary_is_independent_of_sample_order() {
        let full = triple(0.9, 0.8, 0.7);
        let samples = vec![
            triple(0.8, 0.5, 0.3),
            triple(0.95, 0.7, 0.6),
            triple(0.85, 0.65, 0.4),
        ];
        let mut shuffled = samples.clone();
        shuffled.rotate_left(1);

        let a = summarize(full, &samples).unwrap();
        let b = summarize(full, &shuffled).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.iterations, 3);
        assert_eq!(a.auroc.median, 0.85);
        assert_eq!(a.full_dataset, full);
    }

    #[test]
    fn summarize_rejects_empty_distribution() {
        assert_eq!(
            summarize(triple(0.5, 0.5, 0.5), &[]),
            Err(SummaryError::NoSamples)
        );
    }

    #[test]
    fn document_uses_leaderboard_key_names() {
        let result = summarize(
            triple(0.91, 0.81, 0.71),
            &[triple(0.9, 0.8, 0.7), triple(0.92, 0.82, 0.72)],
        )
        .unwrap();
        let json = serde_json::to_value(MetricsReport::from_outcome(Some(&result))).unwrap();
        let object = json.as_object().unwrap();

        let expected_keys = [
            "Score",
            "PPV@90RECALL",
            "PPV@90RECALL 95% CI Lower Bound",
            "PPV@90RECALL 95% CI Upper Bound",
            "AUROC",
            "AUROC 95% CI Lower Bound",
            "AUROC 95% CI Upper Bound",
            "AUPRC",
            "AUPRC 95% CI Lower Bound",
            "AUPRC 95% CI Upper Bound",
            "AUROC Full Dataset",
            "AUPRC Full Dataset",
            "PPV@90RECALL Full Dataset",
        ];
        assert_eq!(object.len(), expected_keys.len());
        for key in expected_keys {
            assert!(object.contains_key(key), "missing key {key}");
        }
        assert_eq!(object["Score"], object["PPV@90RECALL"]);
        assert_abs_diff_eq!(object["AUROC Full Dataset"].as_f64().unwrap(), 0.91);
    }

    #[test]
    fn empty_outcome_serializes_to_empty_object() {
        let json = serde_json::to_string(&MetricsReport::from_outcome(None)).unwrap();
        assert_eq!(json, "{}");
    }
}
