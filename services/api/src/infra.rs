use admissions::error::AppError;
use admissions::workflows::admissions::{
    select_fee_structure, Application, ApplicationId, ApplicationPatch, ApplicationRepository,
    FeeHead, FeeStructure, FeeStructureCatalog, RepositoryError, StudentType,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryApplicationRepository {
    records: Arc<Mutex<HashMap<ApplicationId, Application>>>,
}

#[async_trait]
impl ApplicationRepository for InMemoryApplicationRepository {
    async fn insert(&self, application: Application) -> Result<Application, RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        if guard.contains_key(&application.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(application.id.clone(), application.clone());
        Ok(application)
    }

    async fn fetch(&self, id: &ApplicationId) -> Result<Option<Application>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    async fn active(&self) -> Result<Vec<Application>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        let mut active: Vec<Application> = guard
            .values()
            .filter(|application| !application.is_draft())
            .cloned()
            .collect();
        active.sort_by(|left, right| right.submitted_at.cmp(&left.submitted_at));
        Ok(active)
    }

    async fn update(
        &self,
        id: &ApplicationId,
        expected_version: u64,
        patch: ApplicationPatch,
    ) -> Result<Application, RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        let record = guard.get_mut(id).ok_or(RepositoryError::NotFound)?;
        if record.version != expected_version {
            return Err(RepositoryError::VersionMismatch {
                expected: expected_version,
                found: record.version,
            });
        }
        patch.apply_to(record);
        Ok(record.clone())
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryFeeStructures {
    structures: Arc<Vec<FeeStructure>>,
}

impl InMemoryFeeStructures {
    pub(crate) fn new(structures: Vec<FeeStructure>) -> Self {
        Self {
            structures: Arc::new(structures),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.structures.len()
    }
}

#[async_trait]
impl FeeStructureCatalog for InMemoryFeeStructures {
    async fn active_structure(
        &self,
        school_id: &str,
        year_group: &str,
    ) -> Result<Option<FeeStructure>, RepositoryError> {
        Ok(select_fee_structure(self.structures.iter(), school_id, year_group).cloned())
    }
}

#[derive(Debug, Deserialize)]
struct FeeStructureFile {
    fee_structures: Vec<FeeStructure>,
}

/// Read fee structures from a JSON file shaped as `{ "fee_structures": [...] }`, or fall
/// back to the built-in sample set.
pub(crate) fn load_fee_structures(
    path: Option<&Path>,
    now: DateTime<Utc>,
) -> Result<InMemoryFeeStructures, AppError> {
    let structures = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            let file: FeeStructureFile = serde_json::from_str(&raw)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
            file.fee_structures
        }
        None => sample_fee_structures(now),
    };
    Ok(InMemoryFeeStructures::new(structures))
}

fn head(name: &str, category: &str, amount: u64, mandatory: bool) -> FeeHead {
    FeeHead {
        name: name.to_string(),
        category: category.to_string(),
        amount,
        mandatory,
    }
}

pub(crate) fn sample_fee_structures(now: DateTime<Utc>) -> Vec<FeeStructure> {
    vec![
        FeeStructure {
            id: "fs-northfield-primary".to_string(),
            school_id: "northfield".to_string(),
            academic_year: "2025-26".to_string(),
            applicable_year_groups: ["Year 1", "Year 2", "Year 3", "Year 4"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            student_type: StudentType::All,
            active: true,
            created_at: now,
            fee_heads: vec![
                head("Admission Fee", "admission", 500, true),
                head("Tuition Fee", "tuition", 8_400, true),
                head("Transport Fee", "transport", 1_200, false),
                head("Mess Fee", "boarding", 1_800, false),
            ],
        },
        FeeStructure {
            id: "fs-northfield-senior".to_string(),
            school_id: "northfield".to_string(),
            academic_year: "2025-26".to_string(),
            applicable_year_groups: ["Year 7", "Year 8", "Year 9"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            student_type: StudentType::New,
            active: true,
            created_at: now,
            fee_heads: vec![
                head("Admission Fee", "admission", 750, true),
                head("Tuition Fee", "tuition", 10_000, true),
                head("Transport Fee", "transport", 1_500, false),
                head("Mess Fee", "boarding", 2_000, false),
            ],
        },
    ]
}
