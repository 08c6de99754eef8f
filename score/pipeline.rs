// ========================================================================================
//
//                               The evaluation pipeline
//
// ========================================================================================
//
// Data flow for one submission:
//
//   predictions.json --> per-job likelihoods + ground truth --> RecordSet
//   RecordSet --> PatientLabelIndex --> StratifiedBootstrap (N metric triples)
//   RecordSet --> full-dataset metric triple
//   both --> EvaluationResult --> metrics.json
//
// A run is all-or-nothing: any failed job or any fatal bootstrap iteration aborts the
// run before anything is written. Every output file is first staged as a temporary file
// next to its target, and nothing is renamed into place until all of them are complete.

use crate::bootstrap::{BootstrapError, BootstrapParams, StratifiedBootstrap};
use crate::config::{ConfigError, EvaluationConfig};
use crate::jobs::{self, JobError, JobRecords};
use crate::metrics::{MetricError, MetricTriple, compute_metrics};
use crate::patients::PatientLabelIndex;
use crate::progress::{BootstrapObserver, TerminalProgress};
use crate::summary::{EvaluationResult, MetricsReport, SummaryError, summarize};
use crate::types::{RecordError, RecordSet};
use natord::compare;
use serde::Serialize;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::NamedTempFile;
use thiserror::Error;
use walkdir::WalkDir;

/// File name of the leaderboard document inside the output directory.
pub const METRICS_FILE: &str = "metrics.json";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Job processing error: {0}")]
    Job(#[from] JobError),
    #[error("{failed} of {total} algorithm jobs failed; refusing to write partial metrics")]
    JobsFailed { failed: usize, total: usize },
    #[error("Invalid prediction records: {0}")]
    Records(#[from] RecordError),
    #[error("Full-dataset metrics failed: {0}")]
    Metric(#[from] MetricError),
    #[error("Bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),
    #[error("Summary failed: {0}")]
    Summary(#[from] SummaryError),
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to serialize metrics: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to write bootstrap samples: {0}")]
    Csv(#[from] csv::Error),
    #[error("Failed to configure the worker thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// A scored evaluation: the summary plus the bootstrap distribution behind it.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub result: EvaluationResult,
    pub samples: Vec<MetricTriple>,
}

/// What a completed run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub metrics_path: PathBuf,
    pub seed: u64,
    pub jobs: usize,
    pub records: usize,
    pub evaluation: Option<Evaluation>,
}

/// Scores a flattened record set.
///
/// Returns `Ok(None)` when there are no records at all: nothing is computable, and
/// the caller reports an empty document instead of failing.
pub fn evaluate_records(
    records: &RecordSet,
    params: BootstrapParams,
    observer: &dyn BootstrapObserver,
) -> Result<Option<Evaluation>, PipelineError> {
    if records.is_empty() {
        log::warn!("No prediction records were collected; writing an empty metrics document");
        return Ok(None);
    }

    let out_of_range = records.out_of_range_images();
    if !out_of_range.is_empty() {
        log::warn!("{} predicted scores fall outside [0, 1]", out_of_range.len());
        log::debug!("Out-of-range images: {}", out_of_range.join(", "));
    }

    let index = PatientLabelIndex::build(records);
    let sampler = StratifiedBootstrap::new(records, &index, params)?;
    let (neoplastic, ndbe) = sampler.pool_sizes();
    log::info!(
        "Aggregated {} images into {} patients ({neoplastic} neoplastic, {ndbe} NDBE)",
        records.len(),
        index.len()
    );

    let full_dataset = compute_metrics(records.labels(), records.scores())?;
    log::info!(
        "Full dataset: AUROC {:.4}, AUPRC {:.4}, PPV@90 {:.4}",
        full_dataset.auroc,
        full_dataset.auprc,
        full_dataset.ppv_at_recall90
    );

    log::info!(
        "Running {} bootstrap iterations ({} neoplastic + {} NDBE patients each, seed {})",
        params.n_iterations,
        params.sample_size,
        params.negatives_per_iteration(),
        params.seed
    );
    let start = Instant::now();
    let samples = sampler.run(observer)?;
    log::info!("Bootstrap finished in {:.2?}", start.elapsed());

    let result = summarize(full_dataset, &samples)?;
    Ok(Some(Evaluation { result, samples }))
}

/// Configures the global rayon pool. Must run before any parallel work.
pub fn configure_thread_pool(threads: Option<usize>) -> Result<(), PipelineError> {
    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(n) = threads {
        builder = builder.num_threads(n);
    }
    builder.build_global()?;
    Ok(())
}

/// Logs every file below the input directory.
pub fn log_input_tree(root: &Path) {
    if !log::log_enabled!(log::Level::Debug) {
        return;
    }
    log::debug!("Input files under {}:", root.display());
    for entry in WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let indent = "    ".repeat(entry.depth() - 1);
        let marker = if entry.file_type().is_dir() { "/" } else { "" };
        log::debug!("{indent}{}{marker}", entry.file_name().to_string_lossy());
    }
}

/// Runs a complete evaluation as described by `config` and writes `metrics.json`.
pub fn run_evaluation(
    config: &EvaluationConfig,
    observer: &dyn BootstrapObserver,
) -> Result<RunSummary, PipelineError> {
    config.validate()?;
    let paths = &config.paths;
    log_input_tree(&paths.input_dir);

    let manifest = jobs::read_predictions(&paths.input_dir)?;
    log::info!("Found {} algorithm jobs", manifest.len());

    let job_records = if manifest.is_empty() {
        Vec::new()
    } else {
        let ground_truth = jobs::load_ground_truth(&paths.ground_truth)?;
        collect_successful_jobs(jobs::process_jobs(
            &manifest,
            &paths.input_dir,
            &ground_truth,
        ))?
    };

    let records = flatten_jobs(job_records)?;
    let seed = config.bootstrap.resolve_seed();
    let params = config.bootstrap.params(seed);
    let evaluation = evaluate_records(&records, params, observer)?;

    let staged_samples = match (&paths.bootstrap_samples, &evaluation) {
        (Some(path), Some(evaluation)) => {
            Some(stage_bootstrap_samples(path, &evaluation.samples)?)
        }
        _ => None,
    };
    let report = MetricsReport::from_outcome(evaluation.as_ref().map(|e| &e.result));
    let metrics_path = paths.output_dir.join(METRICS_FILE);
    let staged_metrics = stage_metrics(&metrics_path, &report)?;

    staged_metrics.commit()?;
    if let Some(staged) = staged_samples {
        let samples_path = staged.target.clone();
        if let Err(err) = staged.commit() {
            // Keep the two outputs consistent: no document without its samples.
            let _ = fs::remove_file(&metrics_path);
            return Err(err);
        }
        log::info!("Wrote bootstrap samples to {}", samples_path.display());
    }
    if let Some(evaluation) = &evaluation {
        log::info!(
            "Score (median PPV@90): {:.4} [{:.4}, {:.4}]",
            evaluation.result.ppv_at_recall90.median,
            evaluation.result.ppv_at_recall90.lower,
            evaluation.result.ppv_at_recall90.upper
        );
    }
    log::info!("Wrote metrics to {}", metrics_path.display());

    Ok(RunSummary {
        metrics_path,
        seed,
        jobs: manifest.len(),
        records: records.len(),
        evaluation,
    })
}

/// Convenience entry point that reports bootstrap progress on the terminal.
pub fn run_with_progress(config: &EvaluationConfig) -> Result<RunSummary, PipelineError> {
    run_evaluation(config, &TerminalProgress::new("bootstrap iterations"))
}

fn collect_successful_jobs(
    outcomes: Vec<Result<JobRecords, jobs::JobFailure>>,
) -> Result<Vec<JobRecords>, PipelineError> {
    let total = outcomes.len();
    let mut succeeded = Vec::with_capacity(total);
    let mut failed = 0usize;

    for outcome in outcomes {
        match outcome {
            Ok(records) => succeeded.push(records),
            Err(failure) => {
                failed += 1;
                log::error!("Job {} failed: {}", failure.pk, failure.error);
            }
        }
    }

    if failed > 0 {
        return Err(PipelineError::JobsFailed { failed, total });
    }
    Ok(succeeded)
}

/// Concatenates job outputs in natural order of their input image names, so the
/// record order does not depend on the order jobs were listed in.
fn flatten_jobs(mut job_records: Vec<JobRecords>) -> Result<RecordSet, PipelineError> {
    job_records.sort_by(|a, b| {
        compare(&a.image_name, &b.image_name).then_with(|| compare(&a.pk, &b.pk))
    });

    let total = job_records.iter().map(|job| job.records.len()).sum();
    let mut all = Vec::with_capacity(total);
    for job in job_records {
        all.extend(job.records);
    }
    Ok(RecordSet::from_records(all)?)
}

#[derive(Serialize)]
struct BootstrapRow {
    iteration: usize,
    auroc: f64,
    auprc: f64,
    ppv_at_recall90: f64,
}

/// A fully written output waiting in its target directory. Dropping it without
/// committing deletes the temporary file.
struct StagedFile {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedFile {
    fn create(target: &Path) -> Result<Self, PipelineError> {
        let dir = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|source| io_error(target, source))?;
        let temp = NamedTempFile::new_in(dir).map_err(|source| io_error(target, source))?;
        Ok(Self {
            temp,
            target: target.to_path_buf(),
        })
    }

    /// Syncs the temporary file and renames it over the target.
    fn commit(self) -> Result<(), PipelineError> {
        let Self { temp, target } = self;
        temp.as_file().sync_all().map_err(|source| io_error(&target, source))?;
        temp.persist(&target).map_err(|e| io_error(&target, e.error))?;
        Ok(())
    }
}

fn io_error(path: &Path, source: std::io::Error) -> PipelineError {
    PipelineError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Stages one tab-separated row per bootstrap iteration.
fn stage_bootstrap_samples(
    path: &Path,
    samples: &[MetricTriple],
) -> Result<StagedFile, PipelineError> {
    let staged = StagedFile::create(path)?;
    {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(staged.temp.as_file());
        for (iteration, triple) in samples.iter().enumerate() {
            writer.serialize(BootstrapRow {
                iteration,
                auroc: triple.auroc,
                auprc: triple.auprc,
                ppv_at_recall90: triple.ppv_at_recall90,
            })?;
        }
        writer.flush().map_err(|source| io_error(path, source))?;
    }
    Ok(staged)
}

/// Stages the metrics document with four-space indentation.
fn stage_metrics(path: &Path, report: &MetricsReport) -> Result<StagedFile, PipelineError> {
    let staged = StagedFile::create(path)?;
    {
        let mut writer = BufWriter::new(staged.temp.as_file());
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut writer, formatter);
        report.serialize(&mut serializer)?;
        writer.write_all(b"\n").map_err(|source| io_error(path, source))?;
        writer.flush().map_err(|source| io_error(path, source))?;
    }
    Ok(staged)
}
