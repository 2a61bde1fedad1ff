use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::response::Response;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value;

use crate::workflows::admissions::batch::BatchSettings;
use crate::workflows::admissions::clock::FixedClock;
use crate::workflows::admissions::domain::{
    select_fee_structure, AdmissionStage, Application, ApplicationId, ApplicationSubmission,
    AuxiliaryData, FeeHead, FeeStructure, StudentType,
};
use crate::workflows::admissions::fees::{FeeAssignmentEngine, FeePolicy};
use crate::workflows::admissions::repository::{
    ApplicationPatch, ApplicationRepository, FeeStructureCatalog, RepositoryError,
};
use crate::workflows::admissions::{AdmissionsService, WorkflowConfig};

pub(super) const SCHOOL: &str = "riverside";
pub(super) const YEAR_GROUP: &str = "Year 7";

pub(super) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn today() -> NaiveDate {
    now().date_naive()
}

pub(super) fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock(now()))
}

pub(super) fn head(name: &str, category: &str, amount: u64) -> FeeHead {
    FeeHead {
        name: name.to_string(),
        category: category.to_string(),
        amount,
        mandatory: true,
    }
}

/// Annual heads of 10000 + 1500 plus a 2000 mess head.
pub(super) fn fee_structure() -> FeeStructure {
    FeeStructure {
        id: "fs-2025-y7".to_string(),
        school_id: SCHOOL.to_string(),
        academic_year: "2025-26".to_string(),
        applicable_year_groups: vec![YEAR_GROUP.to_string(), "Year 8".to_string()],
        student_type: StudentType::New,
        active: true,
        created_at: now(),
        fee_heads: vec![
            head("Tuition Fee", "tuition", 10_000),
            head("Transport Fee", "transport", 1_500),
            head("Mess Charges", "boarding", 2_000),
        ],
    }
}

pub(super) fn structure_with_admission_head() -> FeeStructure {
    let mut structure = fee_structure();
    structure.id = "fs-2025-y7-admission".to_string();
    structure
        .fee_heads
        .push(head("Admission Fee", "admission", 750));
    structure
}

pub(super) fn application(number: u32, stage: AdmissionStage) -> Application {
    Application {
        id: ApplicationId(format!("app-{number}")),
        application_number: format!("APP-2025-{number:05}"),
        student_name: format!("Student {number}"),
        year_group: Some(YEAR_GROUP.to_string()),
        stage,
        parent_email: format!("parent{number}@example.org"),
        school_id: Some(SCHOOL.to_string()),
        submitted_at: now(),
        installment_preference: None,
        version: 0,
        data: AuxiliaryData::default(),
    }
}

pub(super) fn submission() -> ApplicationSubmission {
    ApplicationSubmission {
        student_name: "Amara Okafor".to_string(),
        year_group: YEAR_GROUP.to_string(),
        parent_email: "okafor.family@example.org".to_string(),
        school_id: SCHOOL.to_string(),
        installment_preference: None,
        save_as_draft: false,
    }
}

pub(super) fn workflow_config() -> WorkflowConfig {
    WorkflowConfig {
        batch: BatchSettings::unpaced(4),
        ..WorkflowConfig::default()
    }
}

pub(super) fn engine(structures: Vec<FeeStructure>) -> FeeAssignmentEngine<MemoryFeeStructures> {
    FeeAssignmentEngine::new(
        Arc::new(MemoryFeeStructures::new(structures)),
        FeePolicy::default(),
        clock(),
    )
}

pub(super) type MemoryService = AdmissionsService<MemoryRepository, MemoryFeeStructures>;

pub(super) fn build_service(
    structures: Vec<FeeStructure>,
) -> (MemoryService, Arc<MemoryRepository>) {
    let repository = Arc::new(MemoryRepository::default());
    let service = AdmissionsService::with_clock(
        repository.clone(),
        Arc::new(MemoryFeeStructures::new(structures)),
        workflow_config(),
        clock(),
    );
    (service, repository)
}

/// Service over a repository pre-seeded with `applications`.
pub(super) fn seeded_service(
    structures: Vec<FeeStructure>,
    applications: &[Application],
) -> (MemoryService, Arc<MemoryRepository>) {
    let (service, repository) = build_service(structures);
    for application in applications {
        repository.seed(application.clone());
    }
    (service, repository)
}

#[derive(Default, Clone)]
pub(super) struct MemoryRepository {
    pub(super) records: Arc<Mutex<HashMap<ApplicationId, Application>>>,
    failing_updates: Arc<Mutex<HashSet<ApplicationId>>>,
}

impl MemoryRepository {
    pub(super) fn seed(&self, application: Application) {
        self.records
            .lock()
            .expect("repository mutex poisoned")
            .insert(application.id.clone(), application);
    }

    pub(super) fn stored(&self, id: &ApplicationId) -> Application {
        self.records
            .lock()
            .expect("repository mutex poisoned")
            .get(id)
            .cloned()
            .expect("application stored")
    }

    /// Make every later `update` for `id` fail as if the store were offline.
    pub(super) fn fail_updates_for(&self, id: &ApplicationId) {
        self.failing_updates
            .lock()
            .expect("failure mutex poisoned")
            .insert(id.clone());
    }

    /// Simulate another writer bumping the stored version.
    pub(super) fn bump_version(&self, id: &ApplicationId) {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        if let Some(record) = guard.get_mut(id) {
            record.version += 1;
        }
    }
}

#[async_trait]
impl ApplicationRepository for MemoryRepository {
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
        active.sort_by(|left, right| {
            right
                .submitted_at
                .cmp(&left.submitted_at)
                .then_with(|| left.id.cmp(&right.id))
        });
        Ok(active)
    }

    async fn update(
        &self,
        id: &ApplicationId,
        expected_version: u64,
        patch: ApplicationPatch,
    ) -> Result<Application, RepositoryError> {
        if self
            .failing_updates
            .lock()
            .expect("failure mutex poisoned")
            .contains(id)
        {
            return Err(RepositoryError::Unavailable("write timed out".to_string()));
        }

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

pub(super) struct UnavailableRepository;

#[async_trait]
impl ApplicationRepository for UnavailableRepository {
    async fn insert(&self, _application: Application) -> Result<Application, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    async fn fetch(&self, _id: &ApplicationId) -> Result<Option<Application>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    async fn active(&self) -> Result<Vec<Application>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    async fn update(
        &self,
        _id: &ApplicationId,
        _expected_version: u64,
        _patch: ApplicationPatch,
    ) -> Result<Application, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }
}

pub(super) struct MemoryFeeStructures {
    structures: Vec<FeeStructure>,
}

impl MemoryFeeStructures {
    pub(super) fn new(structures: Vec<FeeStructure>) -> Self {
        Self { structures }
    }
}

#[async_trait]
impl FeeStructureCatalog for MemoryFeeStructures {
    async fn active_structure(
        &self,
        school_id: &str,
        year_group: &str,
    ) -> Result<Option<FeeStructure>, RepositoryError> {
        Ok(select_fee_structure(&self.structures, school_id, year_group).cloned())
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
