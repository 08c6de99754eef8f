//! # Classification metrics
//!
//! Rank and area statistics over a binary label vector and a real-valued score
//! vector (higher score = more likely neoplastic):
//!
//! - AUROC via the Mann-Whitney U statistic with mid-ranks for tied scores.
//! - AUPRC as discrete average precision, `sum_k (R_k - R_{k-1}) * P_k` over
//!   decreasing score thresholds.
//! - PPV at a fixed recall, read off the precision-recall curve by piecewise
//!   linear interpolation.
//!
//! All three are undefined when only one class is present; that case is reported as
//! [`MetricError::SingleClass`] so that callers can decide how to handle it.

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

/// The recall operating point used by the leaderboard.
pub const TARGET_RECALL: f64 = 0.9;

/// The output of one metric computation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricTriple {
    pub auroc: f64,
    pub auprc: f64,
    pub ppv_at_recall90: f64,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricError {
    #[error("Cannot compute metrics on an empty sample.")]
    Empty,
    #[error("Label array has {labels} entries but score array has {scores}.")]
    LengthMismatch { labels: usize, scores: usize },
    #[error("Only class {class} is present; AUROC and AUPRC are undefined.")]
    SingleClass { class: u8 },
    #[error("Score at position {index} is not finite.")]
    NonFiniteScore { index: usize },
}

/// Computes AUROC, AUPRC and PPV at [`TARGET_RECALL`] for one sample.
pub fn compute_metrics(
    labels: ArrayView1<u8>,
    scores: ArrayView1<f64>,
) -> Result<MetricTriple, MetricError> {
    validate(labels, scores)?;
    let curve = PrecisionRecallCurve::from_scores(labels, scores)?;
    Ok(MetricTriple {
        auroc: auroc_unchecked(labels, scores),
        auprc: curve.average_precision(),
        ppv_at_recall90: curve.precision_at_recall(TARGET_RECALL),
    })
}

/// Area under the ROC curve.
pub fn auroc(labels: ArrayView1<u8>, scores: ArrayView1<f64>) -> Result<f64, MetricError> {
    validate(labels, scores)?;
    Ok(auroc_unchecked(labels, scores))
}

/// Area under the precision-recall curve (average precision).
pub fn average_precision(
    labels: ArrayView1<u8>,
    scores: ArrayView1<f64>,
) -> Result<f64, MetricError> {
    validate(labels, scores)?;
    Ok(PrecisionRecallCurve::from_scores(labels, scores)?.average_precision())
}

fn validate(labels: ArrayView1<u8>, scores: ArrayView1<f64>) -> Result<(), MetricError> {
    if labels.len() != scores.len() {
        return Err(MetricError::LengthMismatch {
            labels: labels.len(),
            scores: scores.len(),
        });
    }
    if labels.is_empty() {
        return Err(MetricError::Empty);
    }
    if let Some(index) = scores.iter().position(|s| !s.is_finite()) {
        return Err(MetricError::NonFiniteScore { index });
    }

    let n_pos = labels.iter().filter(|&&y| y == 1).count();
    if n_pos == 0 {
        return Err(MetricError::SingleClass { class: 0 });
    }
    if n_pos == labels.len() {
        return Err(MetricError::SingleClass { class: 1 });
    }
    Ok(())
}

/// Mann-Whitney implementation. Inputs must already be validated.
fn auroc_unchecked(y: ArrayView1<u8>, p: ArrayView1<f64>) -> f64 {
    let n = y.len();
    let n_pos = y.iter().filter(|&&t| t == 1).count() as f64;
    let n_neg = n as f64 - n_pos;

    // Sort indices by prediction score ascending
    let mut idx: Vec<usize> = (0..n).collect();
    idx.sort_by(|&i, &j| p[i].partial_cmp(&p[j]).unwrap_or(Ordering::Equal));

    // Tied scores share the average of the ranks they span
    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n && p[idx[j]] == p[idx[i]] {
            j += 1;
        }
        let avg_rank = (i + j - 1) as f64 / 2.0 + 1.0;
        for &k in &idx[i..j] {
            ranks[k] = avg_rank;
        }
        i = j;
    }

    let sum_ranks_pos: f64 = y
        .iter()
        .zip(ranks.iter())
        .filter(|(t, _)| **t == 1)
        .map(|(_, r)| *r)
        .sum();

    // AUC = U/(n_pos*n_neg) where U = sum_ranks_pos - n_pos*(n_pos+1)/2
    (sum_ranks_pos - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg)
}

/// Precision-recall curve ordered by non-decreasing recall.
///
/// The first point is the `(recall = 0, precision = 1)` anchor; each following point
/// corresponds to one distinct score threshold, visited from the highest score down.
#[derive(Debug, Clone, PartialEq)]
pub struct PrecisionRecallCurve {
    pub recall: Vec<f64>,
    pub precision: Vec<f64>,
}

impl PrecisionRecallCurve {
    /// Walks the distinct score thresholds in decreasing order, accumulating true
    /// and false positives.
    pub fn from_scores(
        labels: ArrayView1<u8>,
        scores: ArrayView1<f64>,
    ) -> Result<Self, MetricError> {
        validate(labels, scores)?;
        let total_pos = labels.iter().filter(|&&y| y == 1).count() as f64;

        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap_or(Ordering::Equal));

        let mut recall = Vec::with_capacity(order.len() + 1);
        let mut precision = Vec::with_capacity(order.len() + 1);
        recall.push(0.0);
        precision.push(1.0);

        let mut tp = 0usize;
        let mut fp = 0usize;
        let mut i = 0;
        while i < order.len() {
            let current = scores[order[i]];
            while i < order.len() && scores[order[i]] == current {
                if labels[order[i]] == 1 {
                    tp += 1;
                } else {
                    fp += 1;
                }
                i += 1;
            }
            recall.push(tp as f64 / total_pos);
            precision.push(tp as f64 / (tp + fp) as f64);
        }

        Ok(Self {
            recall,
            precision,
        })
    }

    /// Discrete average precision: precision weighted by each recall increment.
    pub fn average_precision(&self) -> f64 {
        self.recall
            .windows(2)
            .zip(self.precision.iter().skip(1))
            .map(|(r, &p)| (r[1] - r[0]) * p)
            .sum()
    }

    /// Precision interpolated at `target` recall. See [`interpolate`] for endpoint handling.
    pub fn precision_at_recall(&self, target: f64) -> f64 {
        interpolate(target, &self.recall, &self.precision)
    }
}

/// Piecewise-linear interpolation of `fp` over the non-decreasing abscissae `xp`.
///
/// - A query equal to a repeated abscissa takes the ordinate of the last point
///   with that abscissa.
/// - A query below `xp[0]` clamps to the ordinate of the last point sharing `xp[0]`.
/// - A query above the last abscissa clamps to the last ordinate.
///
/// Returns NaN when `xp` is empty.
pub fn interpolate(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    debug_assert_eq!(xp.len(), fp.len());
    let n = xp.len().min(fp.len());
    if n == 0 {
        return f64::NAN;
    }

    // Number of points with abscissa <= x
    let upper = xp[..n].partition_point(|&v| v <= x);
    if upper == 0 {
        let first_group_end = xp[..n].partition_point(|&v| v <= xp[0]);
        return fp[first_group_end - 1];
    }
    let j = upper - 1;
    if xp[j] == x || j + 1 == n {
        return fp[j];
    }

    let slope = (fp[j + 1] - fp[j]) / (xp[j + 1] - xp[j]);
    fp[j] + slope * (x - xp[j])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn perfect_separation_scores_one() {
        let labels = array![0u8, 0, 1, 1];
        let scores = array![0.1, 0.4, 0.6, 0.9];
        let triple = compute_metrics(labels.view(), scores.view()).unwrap();

        assert_abs_diff_eq!(triple.auroc, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(triple.auprc, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(triple.ppv_at_recall90, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn matches_reference_values_for_overlapping_scores() {
        // Classic four-sample example: AUROC 0.75, AP 0.8333.
        let labels = array![0u8, 0, 1, 1];
        let scores = array![0.1, 0.4, 0.35, 0.8];
        let triple = compute_metrics(labels.view(), scores.view()).unwrap();

        assert_abs_diff_eq!(triple.auroc, 0.75, epsilon = 1e-12);
        assert_abs_diff_eq!(triple.auprc, 0.5 + 0.5 * (2.0 / 3.0), epsilon = 1e-12);
        // Between (recall 0.5, precision 0.5) and (recall 1.0, precision 2/3).
        let expected = 0.5 + (2.0 / 3.0 - 0.5) * (0.4 / 0.5);
        assert_abs_diff_eq!(triple.ppv_at_recall90, expected, epsilon = 1e-12);
    }

    #[test]
    fn ties_split_rank_credit_evenly() {
        let labels = array![0u8, 1, 0, 1];
        let scores = array![0.5, 0.5, 0.5, 0.5];
        assert_abs_diff_eq!(
            auroc(labels.view(), scores.view()).unwrap(),
            0.5,
            epsilon = 1e-12
        );

        let labels = array![0u8, 1, 1];
        let scores = array![0.3, 0.3, 0.9];
        // One positive beats the negative, one ties: (1 + 0.5) / 2.
        assert_abs_diff_eq!(
            auroc(labels.view(), scores.view()).unwrap(),
            0.75,
            epsilon = 1e-12
        );
    }

    #[test]
    fn inverted_scores_give_zero_auroc() {
        let labels = array![1u8, 1, 0, 0];
        let scores = array![0.1, 0.2, 0.8, 0.9];
        assert_abs_diff_eq!(
            auroc(labels.view(), scores.view()).unwrap(),
            0.0,
            epsilon = 1e-12
        );
        let ap = average_precision(labels.view(), scores.view()).unwrap();
        assert!((0.0..=1.0).contains(&ap));
    }

    #[test]
    fn single_class_input_is_reported_not_panicked() {
        let zeros = array![0u8, 0, 0];
        let ones = array![1u8, 1, 1];
        let scores = array![0.2, 0.5, 0.7];

        assert_eq!(
            compute_metrics(zeros.view(), scores.view()),
            Err(MetricError::SingleClass { class: 0 })
        );
        assert_eq!(
            compute_metrics(ones.view(), scores.view()),
            Err(MetricError::SingleClass { class: 1 })
        );
    }

    #[test]
    fn malformed_input_is_rejected() {
        let labels = array![0u8, 1];
        let short = array![0.2];
        assert_eq!(
            compute_metrics(labels.view(), short.view()),
            Err(MetricError::LengthMismatch {
                labels: 2,
                scores: 1
            })
        );

        let empty_labels = ndarray::Array1::<u8>::zeros(0);
        let empty_scores = ndarray::Array1::<f64>::zeros(0);
        assert_eq!(
            compute_metrics(empty_labels.view(), empty_scores.view()),
            Err(MetricError::Empty)
        );

        let nan = array![0.2, f64::NAN];
        assert_eq!(
            compute_metrics(labels.view(), nan.view()),
            Err(MetricError::NonFiniteScore { index: 1 })
        );
    }

    #[test]
    fn curve_starts_at_anchor_and_ends_at_full_recall() {
        let labels = array![0u8, 1, 0, 1, 1];
        let scores = array![0.2, 0.8, 0.8, 0.4, 0.1];
        let curve = PrecisionRecallCurve::from_scores(labels.view(), scores.view()).unwrap();

        assert_eq!(curve.recall[0], 0.0);
        assert_eq!(curve.precision[0], 1.0);
        // One point per distinct threshold: 0.8, 0.4, 0.2, 0.1
        assert_eq!(curve.recall.len(), 5);
        for (got, want) in curve.precision[1..].iter().zip([0.5, 2.0 / 3.0, 0.5, 0.6]) {
            assert_abs_diff_eq!(*got, want, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(*curve.recall.last().unwrap(), 1.0, epsilon = 1e-12);
        assert!(curve.recall.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn interpolation_clamps_below_range_to_last_tied_point() {
        // Both points share recall 1.0; a query below it resolves to the later point.
        let recall = [1.0, 1.0];
        let precision = [0.5, 1.0];
        assert_eq!(interpolate(0.9, &recall, &precision), 1.0);
    }

    #[test]
    fn interpolation_handles_exact_hits_and_upper_clamp() {
        let xp = [0.0, 0.5, 0.5, 1.0];
        let fp = [1.0, 0.8, 0.6, 0.4];

        assert_eq!(interpolate(0.5, &xp, &fp), 0.6);
        assert_abs_diff_eq!(interpolate(0.75, &xp, &fp), 0.5, epsilon = 1e-12);
        assert_eq!(interpolate(1.0, &xp, &fp), 0.4);
        assert_eq!(interpolate(1.5, &xp, &fp), 0.4);
        assert_abs_diff_eq!(interpolate(0.25, &xp, &fp), 0.9, epsilon = 1e-12);
        assert!(interpolate(0.5, &[], &[]).is_nan());
    }

    #[test]
    fn metrics_stay_in_unit_interval_for_mixed_input() {
        let labels = array![0u8, 1, 0, 0, 1, 0, 1, 0, 0, 0];
        let scores = array![0.9, 0.1, 0.4, 0.3, 0.35, 0.8, 0.2, 0.6, 0.6, 0.05];
        let triple = compute_metrics(labels.view(), scores.view()).unwrap();

        for value in [triple.auroc, triple.auprc, triple.ppv_at_recall90] {
            assert!((0.0..=1.0).contains(&value), "metric {value} outside [0, 1]");
        }
    }
}
