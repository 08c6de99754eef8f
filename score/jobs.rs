//! # Algorithm job loading
//!
//! Reads the platform's `predictions.json`, locates each job's likelihood output,
//! and matches every predicted likelihood against the ground-truth metadata of the
//! job's input image stack. Jobs are independent and processed concurrently; one
//! job's failure never stops the others from being processed.

use crate::types::{ImageRecord, TissueClass};
use ahash::AHashMap;
use itertools::Itertools;
use rayon::prelude::*;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Slug of the input socket carrying the stacked endoscopy images.
pub const INPUT_IMAGE_SOCKET: &str = "stacked-barretts-esophagus-endoscopy-images";
/// Slug of the output socket carrying one neoplasia likelihood per stacked image.
pub const LIKELIHOOD_SOCKET: &str = "stacked-neoplastic-lesion-likelihoods";
/// File name of the job manifest inside the input directory.
pub const PREDICTIONS_FILE: &str = "predictions.json";

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse JSON in '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Job {pk}: no handler for interface with input sockets [{}]", .key.join(", "))]
    UnknownInterface { pk: String, key: Vec<String> },
    #[error("Job {pk}: value with interface '{slug}' not found")]
    SocketNotFound { pk: String, slug: String },
    #[error("Job {pk}: socket '{slug}' carries no image name")]
    ImageNameMissing { pk: String, slug: String },
    #[error("Job {pk}: image name '{image_name}' not found in the ground-truth metadata")]
    GroundTruthMissing { pk: String, image_name: String },
    #[error(
        "Job {pk}: '{image_name}' has {predictions} predicted likelihoods but {ground_truth} ground-truth entries"
    )]
    PredictionCountMismatch {
        pk: String,
        image_name: String,
        predictions: usize,
        ground_truth: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Interface {
    pub slug: String,
    pub relative_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageRef {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SocketValue {
    pub interface: Interface,
    #[serde(default)]
    pub image: Option<ImageRef>,
}

/// One algorithm job from `predictions.json`. Fields not listed here are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AlgorithmJob {
    pub pk: String,
    pub inputs: Vec<SocketValue>,
    pub outputs: Vec<SocketValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GroundTruthEntry {
    pub class: TissueClass,
    pub patient_id: String,
    pub filename: String,
}

/// Ground-truth metadata: input image name to its ordered sub-image entries.
pub type GroundTruth = AHashMap<String, Vec<GroundTruthEntry>>;

/// Records recovered from one successful job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecords {
    pub pk: String,
    pub image_name: String,
    pub records: Vec<ImageRecord>,
}

/// A job that could not be matched.
#[derive(Debug)]
pub struct JobFailure {
    pub pk: String,
    pub error: JobError,
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, JobError> {
    let file = File::open(path).map_err(|source| JobError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| JobError::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub fn read_predictions(input_dir: &Path) -> Result<Vec<AlgorithmJob>, JobError> {
    load_json(&input_dir.join(PREDICTIONS_FILE))
}

pub fn load_ground_truth(path: &Path) -> Result<GroundTruth, JobError> {
    load_json(path)
}

/// The sorted slugs of the job's input sockets.
pub fn interface_key(job: &AlgorithmJob) -> Vec<String> {
    job.inputs
        .iter()
        .map(|value| value.interface.slug.clone())
        .sorted()
        .collect()
}

fn find_socket<'a>(
    pk: &str,
    values: &'a [SocketValue],
    slug: &str,
) -> Result<&'a SocketValue, JobError> {
    values
        .iter()
        .find(|value| value.interface.slug == slug)
        .ok_or_else(|| JobError::SocketNotFound {
            pk: pk.to_string(),
            slug: slug.to_string(),
        })
}

/// The user-provided name of the image bound to `slug`.
pub fn image_name<'a>(
    pk: &str,
    values: &'a [SocketValue],
    slug: &str,
) -> Result<&'a str, JobError> {
    find_socket(pk, values, slug)?
        .image
        .as_ref()
        .map(|image| image.name.as_str())
        .ok_or_else(|| JobError::ImageNameMissing {
            pk: pk.to_string(),
            slug: slug.to_string(),
        })
}

/// Where a job's output file lives inside the evaluation input directory.
pub fn output_location(
    input_dir: &Path,
    job: &AlgorithmJob,
    slug: &str,
) -> Result<PathBuf, JobError> {
    let socket = find_socket(&job.pk, &job.outputs, slug)?;
    Ok(input_dir
        .join(&job.pk)
        .join("output")
        .join(&socket.interface.relative_path))
}

/// Pairs each likelihood with the ground-truth entry at the same position.
pub fn match_ground_truth(
    pk: &str,
    image_name: &str,
    likelihoods: &[f64],
    ground_truth: &GroundTruth,
) -> Result<Vec<ImageRecord>, JobError> {
    let entries = ground_truth
        .get(image_name)
        .ok_or_else(|| JobError::GroundTruthMissing {
            pk: pk.to_string(),
            image_name: image_name.to_string(),
        })?;

    if entries.len() != likelihoods.len() {
        return Err(JobError::PredictionCountMismatch {
            pk: pk.to_string(),
            image_name: image_name.to_string(),
            predictions: likelihoods.len(),
            ground_truth: entries.len(),
        });
    }

    Ok(entries
        .iter()
        .zip(likelihoods)
        .map(|(entry, &score)| ImageRecord {
            image_id: entry.filename.clone(),
            patient_id: entry.patient_id.clone(),
            ground_truth: entry.class,
            predicted_score: score,
        })
        .collect())
}

fn process_stacked_images(
    job: &AlgorithmJob,
    input_dir: &Path,
    ground_truth: &GroundTruth,
) -> Result<JobRecords, JobError> {
    let location = output_location(input_dir, job, LIKELIHOOD_SOCKET)?;
    let likelihoods: Vec<f64> = load_json(&location)?;
    let name = image_name(&job.pk, &job.inputs, INPUT_IMAGE_SOCKET)?;
    let records = match_ground_truth(&job.pk, name, &likelihoods, ground_truth)?;

    log::debug!(
        "Job {}: matched {} likelihoods from {} against '{}'",
        job.pk,
        records.len(),
        location.display(),
        name
    );

    Ok(JobRecords {
        pk: job.pk.clone(),
        image_name: name.to_string(),
        records,
    })
}

/// Dispatches a job to the handler for its interface.
pub fn process_job(
    job: &AlgorithmJob,
    input_dir: &Path,
    ground_truth: &GroundTruth,
) -> Result<JobRecords, JobError> {
    let key = interface_key(job);
    if key.len() == 1 && key[0] == INPUT_IMAGE_SOCKET {
        return process_stacked_images(job, input_dir, ground_truth);
    }
    Err(JobError::UnknownInterface {
        pk: job.pk.clone(),
        key,
    })
}

/// Processes every job concurrently and reports each outcome, in input order.
pub fn process_jobs(
    jobs: &[AlgorithmJob],
    input_dir: &Path,
    ground_truth: &GroundTruth,
) -> Vec<Result<JobRecords, JobFailure>> {
    jobs.par_iter()
        .map(|job| {
            process_job(job, input_dir, ground_truth).map_err(|error| JobFailure {
                pk: job.pk.clone(),
                error,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn job_json(pk: &str, image: &str) -> serde_json::Value {
        json!({
            "pk": pk,
            "inputs": [{
                "file": null,
                "image": { "name": image },
                "value": null,
                "interface": {
                    "slug": INPUT_IMAGE_SOCKET,
                    "kind": "Image",
                    "relative_path": "images/stacked-barretts-esophagus-endoscopy"
                }
            }],
            "outputs": [{
                "file": null,
                "image": null,
                "interface": {
                    "slug": LIKELIHOOD_SOCKET,
                    "kind": "Anything",
                    "relative_path": "stacked-neoplastic-lesion-likelihoods.json"
                }
            }],
            "status": "Succeeded"
        })
    }

    fn ground_truth() -> GroundTruth {
        serde_json::from_value(json!({
            "stack_a.tiff": [
                { "class": "ndbe", "patient_id": "P1", "filename": "a0.png" },
                { "class": "neo", "patient_id": "P1", "filename": "a1.png" }
            ],
            "stack_b.tiff": [
                { "class": "ndbe", "patient_id": "P2", "filename": "b0.png" }
            ]
        }))
        .unwrap()
    }

    fn write_likelihoods(dir: &Path, pk: &str, values: &[f64]) {
        let out = dir.join(pk).join("output");
        fs::create_dir_all(&out).unwrap();
        fs::write(
            out.join("stacked-neoplastic-lesion-likelihoods.json"),
            serde_json::to_string(values).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn job_manifest_parses_platform_fields() {
        let job: AlgorithmJob = serde_json::from_value(job_json("job-1", "stack_a.tiff")).unwrap();
        assert_eq!(job.pk, "job-1");
        assert_eq!(interface_key(&job), vec![INPUT_IMAGE_SOCKET.to_string()]);
        assert_eq!(
            image_name(&job.pk, &job.inputs, INPUT_IMAGE_SOCKET).unwrap(),
            "stack_a.tiff"
        );
        assert_eq!(
            output_location(Path::new("/input"), &job, LIKELIHOOD_SOCKET).unwrap(),
            PathBuf::from("/input/job-1/output/stacked-neoplastic-lesion-likelihoods.json")
        );
    }

    #[test]
    fn likelihoods_are_matched_by_position() {
        let dir = TempDir::new().unwrap();
        write_likelihoods(dir.path(), "job-1", &[0.2, 0.8]);
        let job: AlgorithmJob = serde_json::from_value(job_json("job-1", "stack_a.tiff")).unwrap();

        let result = process_job(&job, dir.path(), &ground_truth()).unwrap();
        assert_eq!(result.image_name, "stack_a.tiff");
        assert_eq!(
            result.records,
            vec![
                ImageRecord {
                    image_id: "a0.png".into(),
                    patient_id: "P1".into(),
                    ground_truth: TissueClass::Ndbe,
                    predicted_score: 0.2,
                },
                ImageRecord {
                    image_id: "a1.png".into(),
                    patient_id: "P1".into(),
                    ground_truth: TissueClass::Neo,
                    predicted_score: 0.8,
                },
            ]
        );
    }

    #[test]
    fn unknown_image_name_is_fatal_for_the_job() {
        let err = match_ground_truth("job-9", "missing.tiff", &[0.5], &ground_truth()).unwrap_err();
        assert!(matches!(
            err,
            JobError::GroundTruthMissing { ref image_name, .. } if image_name == "missing.tiff"
        ));
    }

    #[test]
    fn count_mismatch_is_reported() {
        let err = match_ground_truth("job-1", "stack_a.tiff", &[0.5], &ground_truth()).unwrap_err();
        assert!(matches!(
            err,
            JobError::PredictionCountMismatch {
                predictions: 1,
                ground_truth: 2,
                ..
            }
        ));
    }

    #[test]
    fn unsupported_interface_is_rejected() {
        let mut job: AlgorithmJob =
            serde_json::from_value(job_json("job-1", "stack_a.tiff")).unwrap();
        job.inputs[0].interface.slug = "some-other-socket".to_string();
        let err = process_job(&job, Path::new("/input"), &ground_truth()).unwrap_err();
        assert!(matches!(err, JobError::UnknownInterface { .. }));
    }

    #[test]
    fn missing_output_socket_is_reported() {
        let mut job: AlgorithmJob =
            serde_json::from_value(job_json("job-1", "stack_a.tiff")).unwrap();
        job.outputs.clear();
        let err = process_job(&job, Path::new("/input"), &ground_truth()).unwrap_err();
        assert!(matches!(
            err,
            JobError::SocketNotFound { ref slug, .. } if slug == LIKELIHOOD_SOCKET
        ));
    }

    #[test]
    fn fan_out_keeps_successful_jobs_when_one_fails() {
        let dir = TempDir::new().unwrap();
        write_likelihoods(dir.path(), "job-a", &[0.1, 0.9]);
        write_likelihoods(dir.path(), "job-b", &[0.3]);
        let jobs: Vec<AlgorithmJob> = vec![
            serde_json::from_value(job_json("job-a", "stack_a.tiff")).unwrap(),
            serde_json::from_value(job_json("job-b", "stack_b.tiff")).unwrap(),
            serde_json::from_value(job_json("job-c", "stack_c.tiff")).unwrap(),
        ];

        let outcomes = process_jobs(&jobs, dir.path(), &ground_truth());
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_ok());
        assert!(outcomes[1].is_ok());
        let failure = outcomes[2].as_ref().unwrap_err();
        assert_eq!(failure.pk, "job-c");
        assert!(matches!(failure.error, JobError::Io { .. }));
    }

    #[test]
    fn predictions_file_is_read_from_input_dir() {
        let dir = TempDir::new().unwrap();
        let manifest = json!([job_json("job-a", "stack_a.tiff")]);
        fs::write(dir.path().join(PREDICTIONS_FILE), manifest.to_string()).unwrap();

        let jobs = read_predictions(dir.path()).unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(matches!(
            read_predictions(&dir.path().join("nowhere")),
            Err(JobError::Io { .. })
        ));
    }
}
