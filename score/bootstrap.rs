//! # Patient-level stratified bootstrap
//!
//! Each iteration draws `sample_size` positive patients and
//! `sample_size * imbalance_ratio` negative patients with replacement, expands every
//! drawn patient back into all of their image records (a patient drawn twice
//! contributes their images twice), and scores the expanded sample.
//!
//! Iteration `i` draws from its own ChaCha8 stream (`set_stream(i)`) derived from a
//! single seed, so the result depends only on the seed and never on how rayon
//! schedules the iterations.

use crate::metrics::{MetricError, MetricTriple, compute_metrics};
use crate::patients::{PatientLabel, PatientLabelIndex};
use crate::progress::BootstrapObserver;
use crate::types::RecordSet;
use ndarray::Axis;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapParams {
    pub n_iterations: usize,
    /// Positive patients drawn per iteration.
    pub sample_size: usize,
    /// Negative patients drawn per positive patient.
    pub imbalance_ratio: usize,
    pub seed: u64,
    /// Draws allowed per iteration before a single-class sample becomes fatal.
    pub max_resample_attempts: usize,
}

impl Default for BootstrapParams {
    fn default() -> Self {
        Self {
            n_iterations: 1000,
            sample_size: 10,
            imbalance_ratio: 100,
            seed: 0,
            max_resample_attempts: 32,
        }
    }
}

impl BootstrapParams {
    #[inline]
    pub fn negatives_per_iteration(&self) -> usize {
        self.sample_size.saturating_mul(self.imbalance_ratio)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatientClass {
    Neoplastic,
    NonDysplastic,
}

impl fmt::Display for PatientClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Neoplastic => f.write_str("neoplastic"),
            Self::NonDysplastic => f.write_str("non-dysplastic"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BootstrapError {
    #[error("The {class} patient pool is empty; stratified resampling cannot proceed.")]
    EmptyPool { class: PatientClass },
    #[error("At least one bootstrap iteration is required.")]
    ZeroIterations,
    #[error(
        "Bootstrap iteration {iteration} drew a single-class sample on all {attempts} attempts."
    )]
    DegenerateSample { iteration: usize, attempts: usize },
    #[error("Metric computation failed: {0}")]
    Metric(#[from] MetricError),
}

/// One iteration's draw: patient slots into a [`PatientLabelIndex`], duplicates kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapSample {
    pub positives: Vec<usize>,
    pub negatives: Vec<usize>,
}

impl BootstrapSample {
    /// Concatenates the record indices of every drawn patient, positives first.
    pub fn expand(&self, index: &PatientLabelIndex) -> Vec<usize> {
        let total: usize = self
            .positives
            .iter()
            .chain(&self.negatives)
            .map(|&slot| index.entry(slot).indices.len())
            .sum();

        let mut indices = Vec::with_capacity(total);
        for &slot in self.positives.iter().chain(&self.negatives) {
            indices.extend_from_slice(&index.entry(slot).indices);
        }
        indices
    }
}

/// The random stream for one iteration.
pub fn iteration_rng(seed: u64, iteration: usize) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(iteration as u64);
    rng
}

pub struct StratifiedBootstrap<'a> {
    records: &'a RecordSet,
    index: &'a PatientLabelIndex,
    positives: Vec<usize>,
    negatives: Vec<usize>,
    params: BootstrapParams,
}

impl<'a> StratifiedBootstrap<'a> {
    /// Fails fast when either patient pool is empty or no iterations are requested.
    pub fn new(
        records: &'a RecordSet,
        index: &'a PatientLabelIndex,
        params: BootstrapParams,
    ) -> Result<Self, BootstrapError> {
        if params.n_iterations == 0 {
            return Err(BootstrapError::ZeroIterations);
        }

        let positives = index.pool(PatientLabel::Positive);
        let negatives = index.pool(PatientLabel::Negative);
        if positives.is_empty() {
            return Err(BootstrapError::EmptyPool {
                class: PatientClass::Neoplastic,
            });
        }
        if negatives.is_empty() {
            return Err(BootstrapError::EmptyPool {
                class: PatientClass::NonDysplastic,
            });
        }

        Ok(Self {
            records,
            index,
            positives,
            negatives,
            params,
        })
    }

    /// Number of (positive, negative) patients available to draw from.
    pub fn pool_sizes(&self) -> (usize, usize) {
        (self.positives.len(), self.negatives.len())
    }

    /// Draws one stratified sample of patient slots with replacement.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> BootstrapSample {
        let positives = (0..self.params.sample_size)
            .map(|_| self.positives[rng.gen_range(0..self.positives.len())])
            .collect();
        let negatives = (0..self.params.negatives_per_iteration())
            .map(|_| self.negatives[rng.gen_range(0..self.negatives.len())])
            .collect();
        BootstrapSample {
            positives,
            negatives,
        }
    }

    /// Scores the records selected by one expanded sample.
    pub fn score_sample(&self, sample: &BootstrapSample) -> Result<MetricTriple, MetricError> {
        let indices = sample.expand(self.index);
        let labels = self.records.labels().select(Axis(0), &indices);
        let scores = self.records.scores().select(Axis(0), &indices);
        compute_metrics(labels.view(), scores.view())
    }

    /// Runs a single iteration, redrawing from the same stream while the draw is
    /// single-class.
    pub fn run_iteration(&self, iteration: usize) -> Result<MetricTriple, BootstrapError> {
        let mut rng = iteration_rng(self.params.seed, iteration);
        let attempts = self.params.max_resample_attempts.max(1);

        for attempt in 1..=attempts {
            let sample = self.draw(&mut rng);
            match self.score_sample(&sample) {
                Ok(triple) => return Ok(triple),
                Err(MetricError::SingleClass { class }) => {
                    log::warn!(
                        "Bootstrap iteration {iteration} drew only class {class} (attempt {attempt}/{attempts}); resampling"
                    );
                }
                Err(other) => return Err(other.into()),
            }
        }

        Err(BootstrapError::DegenerateSample {
            iteration,
            attempts,
        })
    }

    /// Runs every iteration in parallel. Any failed iteration aborts the whole run.
    /// The returned triples are in iteration order.
    pub fn run(
        &self,
        observer: &dyn BootstrapObserver,
    ) -> Result<Vec<MetricTriple>, BootstrapError> {
        observer.on_start(self.params.n_iterations);
        let result = (0..self.params.n_iterations)
            .into_par_iter()
            .map(|iteration| {
                let triple = self.run_iteration(iteration)?;
                observer.on_iteration_complete();
                Ok(triple)
            })
            .collect::<Result<Vec<_>, BootstrapError>>();
        observer.on_finish();
        result
    }
}
