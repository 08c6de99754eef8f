// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is ONLY for types that are SHARED BETWEEN FILES, not types that only are used in one file.

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Histological class assigned to a single endoscopy frame by the reference standard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TissueClass {
    /// Non-dysplastic Barrett's esophagus.
    Ndbe,
    /// Neoplastic tissue (the positive class).
    Neo,
}

impl TissueClass {
    /// The binary ground-truth encoding used by every metric: neoplasia is 1.
    #[inline]
    pub fn as_label(self) -> u8 {
        match self {
            Self::Ndbe => 0,
            Self::Neo => 1,
        }
    }
}

impl fmt::Display for TissueClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ndbe => f.write_str("ndbe"),
            Self::Neo => f.write_str("neo"),
        }
    }
}

/// One sub-image of a submitted stack, matched against its ground truth.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub image_id: String,
    pub patient_id: String,
    pub ground_truth: TissueClass,
    pub predicted_score: f64,
}

#[derive(Error, Debug, PartialEq)]
pub enum RecordError {
    #[error("Column '{field}' has {found} entries, but {expected} were expected.")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Predicted score for record {index} ('{image_id}') is not finite.")]
    NonFiniteScore { index: usize, image_id: String },
    #[error("Ground-truth label {value} at record {index} is not binary (expected 0 or 1).")]
    InvalidLabel { index: usize, value: u8 },
}

/// The flattened, immutable record collection for one evaluation run.
///
/// Stored column-wise so that bootstrap iterations can gather labels and scores
/// with a single `select` per column. Index `i` refers to the same image in every column.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    image_ids: Vec<String>,
    patient_ids: Vec<String>,
    labels: Array1<u8>,
    scores: Array1<f64>,
}

impl RecordSet {
    /// Builds the columns from owned records, validating every score.
    pub fn from_records(records: Vec<ImageRecord>) -> Result<Self, RecordError> {
        let n = records.len();
        let mut image_ids = Vec::with_capacity(n);
        let mut patient_ids = Vec::with_capacity(n);
        let mut labels = Vec::with_capacity(n);
        let mut scores = Vec::with_capacity(n);

        for (index, record) in records.into_iter().enumerate() {
            if !record.predicted_score.is_finite() {
                return Err(RecordError::NonFiniteScore {
                    index,
                    image_id: record.image_id,
                });
            }
            labels.push(record.ground_truth.as_label());
            scores.push(record.predicted_score);
            image_ids.push(record.image_id);
            patient_ids.push(record.patient_id);
        }

        Ok(Self {
            image_ids,
            patient_ids,
            labels: Array1::from_vec(labels),
            scores: Array1::from_vec(scores),
        })
    }

    /// Builds the columns from parallel arrays. Image ids are synthesized from
    /// the record position when none are supplied.
    pub fn from_columns(
        labels: Vec<u8>,
        scores: Vec<f64>,
        patient_ids: Vec<String>,
        image_ids: Option<Vec<String>>,
    ) -> Result<Self, RecordError> {
        let n = labels.len();
        check_len("scores", n, scores.len())?;
        check_len("patient_ids", n, patient_ids.len())?;
        let image_ids = match image_ids {
            Some(ids) => {
                check_len("image_ids", n, ids.len())?;
                ids
            }
            None => (0..n).map(|i| format!("image_{i}")).collect(),
        };

        if let Some((index, &value)) = labels.iter().enumerate().find(|(_, v)| **v > 1) {
            return Err(RecordError::InvalidLabel { index, value });
        }
        if let Some(index) = scores.iter().position(|s| !s.is_finite()) {
            return Err(RecordError::NonFiniteScore {
                index,
                image_id: image_ids[index].clone(),
            });
        }

        Ok(Self {
            image_ids,
            patient_ids,
            labels: Array1::from_vec(labels),
            scores: Array1::from_vec(scores),
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> ArrayView1<'_, u8> {
        self.labels.view()
    }

    pub fn scores(&self) -> ArrayView1<'_, f64> {
        self.scores.view()
    }

    pub fn patient_ids(&self) -> &[String] {
        &self.patient_ids
    }

    /// Image ids whose score falls outside the probability range [0, 1].
    pub fn out_of_range_images(&self) -> Vec<&str> {
        self.scores
            .iter()
            .zip(&self.image_ids)
            .filter(|(s, _)| !(0.0..=1.0).contains(*s))
            .map(|(_, id)| id.as_str())
            .collect()
    }
}

fn check_len(field: &'static str, expected: usize, found: usize) -> Result<(), RecordError> {
    if expected != found {
        return Err(RecordError::LengthMismatch {
            field,
            expected,
            found,
        });
    }
    Ok(())
}
