//! Patient-level aggregation of per-image records.
//!
//! A patient is positive if any of their images is neoplastic. The index is built
//! once per evaluation run and then shared read-only by every bootstrap iteration.

use crate::types::RecordSet;
use ahash::AHashMap;

/// Binary patient label, derived as the logical OR of the patient's image labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatientLabel {
    Negative,
    Positive,
}

/// All records owned by one patient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientEntry {
    pub id: String,
    /// Record indices in first-seen order.
    pub indices: Vec<usize>,
    pub label: PatientLabel,
}

#[derive(Debug, Clone, Default)]
pub struct PatientLabelIndex {
    patients: Vec<PatientEntry>,
    lookup: AHashMap<String, usize>,
}

impl PatientLabelIndex {
    /// Groups records by patient id in a single pass over the collection.
    pub fn build(records: &RecordSet) -> Self {
        let mut patients: Vec<PatientEntry> = Vec::new();
        let mut lookup: AHashMap<String, usize> = AHashMap::new();
        let labels = records.labels();

        for (idx, pid) in records.patient_ids().iter().enumerate() {
            let slot = match lookup.get(pid) {
                Some(&slot) => slot,
                None => {
                    lookup.insert(pid.clone(), patients.len());
                    patients.push(PatientEntry {
                        id: pid.clone(),
                        indices: Vec::new(),
                        label: PatientLabel::Negative,
                    });
                    patients.len() - 1
                }
            };

            let entry = &mut patients[slot];
            entry.indices.push(idx);
            if labels[idx] == 1 {
                entry.label = PatientLabel::Positive;
            }
        }

        Self { patients, lookup }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.patients.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.patients.is_empty()
    }

    /// Patients in the order their first record appeared.
    pub fn patients(&self) -> &[PatientEntry] {
        &self.patients
    }

    #[inline]
    pub fn entry(&self, slot: usize) -> &PatientEntry {
        &self.patients[slot]
    }

    pub fn indices(&self, patient_id: &str) -> Option<&[usize]> {
        self.lookup
            .get(patient_id)
            .map(|&slot| self.patients[slot].indices.as_slice())
    }

    pub fn label(&self, patient_id: &str) -> Option<PatientLabel> {
        self.lookup
            .get(patient_id)
            .map(|&slot| self.patients[slot].label)
    }

    /// Slots of every patient with the given label, in first-seen order.
    pub fn pool(&self, label: PatientLabel) -> Vec<usize> {
        self.patients
            .iter()
            .enumerate()
            .filter(|(_, p)| p.label == label)
            .map(|(slot, _)| slot)
            .collect()
    }
}
