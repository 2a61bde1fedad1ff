use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use admissions::workflows::admissions::{
    select_fee_structure, AdmissionStage, AdmissionsService, Application, ApplicationId,
    ApplicationPatch, ApplicationRepository, ApplicationSubmission, BatchSettings,
    FeeAssignmentResult, FeeHead, FeeStructure, FeeStructureCatalog, FixedClock,
    InstallmentChoice, RepositoryError, StudentType, WorkflowConfig,
};
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};

#[derive(Default)]
struct InMemoryApplications {
    records: Mutex<HashMap<ApplicationId, Application>>,
}

#[async_trait]
impl ApplicationRepository for InMemoryApplications {
    async fn insert(&self, application: Application) -> Result<Application, RepositoryError> {
        let mut guard = self.records.lock().expect("mutex poisoned");
        if guard.contains_key(&application.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(application.id.clone(), application.clone());
        Ok(application)
    }

    async fn fetch(&self, id: &ApplicationId) -> Result<Option<Application>, RepositoryError> {
        Ok(self.records.lock().expect("mutex poisoned").get(id).cloned())
    }

    async fn active(&self) -> Result<Vec<Application>, RepositoryError> {
        let guard = self.records.lock().expect("mutex poisoned");
        let mut active: Vec<_> = guard
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
        let mut guard = self.records.lock().expect("mutex poisoned");
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

struct StaticFeeStructures(Vec<FeeStructure>);

#[async_trait]
impl FeeStructureCatalog for StaticFeeStructures {
    async fn active_structure(
        &self,
        school_id: &str,
        year_group: &str,
    ) -> Result<Option<FeeStructure>, RepositoryError> {
        Ok(select_fee_structure(&self.0, school_id, year_group).cloned())
    }
}

fn fee_head(name: &str, category: &str, amount: u64) -> FeeHead {
    FeeHead {
        name: name.to_string(),
        category: category.to_string(),
        amount,
        mandatory: true,
    }
}

fn build_service() -> (
    AdmissionsService<InMemoryApplications, StaticFeeStructures>,
    Arc<InMemoryApplications>,
) {
    let created_at = Utc
        .with_ymd_and_hms(2025, 1, 6, 8, 0, 0)
        .single()
        .expect("valid timestamp");
    let structures = StaticFeeStructures(vec![FeeStructure {
        id: "fs-hillcrest-y3".to_string(),
        school_id: "hillcrest".to_string(),
        academic_year: "2025-26".to_string(),
        applicable_year_groups: vec!["Year 3".to_string()],
        student_type: StudentType::All,
        active: true,
        created_at,
        fee_heads: vec![
            fee_head("Admission Fee", "admission", 400),
            fee_head("Tuition Fee", "tuition", 9_600),
            fee_head("Transport Fee", "transport", 1_500),
            fee_head("Mess Fee", "boarding", 2_000),
        ],
    }]);

    let repository = Arc::new(InMemoryApplications::default());
    let clock = Arc::new(FixedClock(created_at + Duration::days(30)));
    let config = WorkflowConfig {
        batch: BatchSettings::unpaced(2),
        ..WorkflowConfig::default()
    };
    let service =
        AdmissionsService::with_clock(repository.clone(), Arc::new(structures), config, clock);
    (service, repository)
}

fn submission(name: &str) -> ApplicationSubmission {
    ApplicationSubmission {
        student_name: name.to_string(),
        year_group: "Year 3".to_string(),
        parent_email: "family@example.org".to_string(),
        school_id: "hillcrest".to_string(),
        installment_preference: Some(InstallmentChoice::Split),
        save_as_draft: false,
    }
}

#[tokio::test]
async fn application_moves_from_submission_to_enrolment() {
    let (service, repository) = build_service();
    let application = service
        .submit(submission("Noah Brennan"))
        .await
        .expect("submitted");

    let mut stages = vec![application.stage];
    for _ in 0..6 {
        let outcome = service
            .advance_one(&application.id, None)
            .await
            .expect("advance succeeds");
        assert!(outcome.assignment.is_none(), "stage moves never bill");
        let stage = outcome.application.stage;
        stages.push(stage);

        let payment = match stage {
            AdmissionStage::AssessmentScheduled => Some("application_fee"),
            AdmissionStage::OfferAccepted => Some("deposit"),
            AdmissionStage::Enrolled => Some("confirmed"),
            _ => None,
        };
        if let Some(key) = payment {
            let result = service
                .assign_fees_for_stage(&application.id, key, None)
                .await
                .expect("fees assigned");
            assert!(matches!(result, FeeAssignmentResult::Assigned { .. }), "{key}");
        }
    }

    assert_eq!(
        stages,
        AdmissionStage::ordered()[1..].to_vec(),
        "every stage is visited exactly once"
    );

    let stored = repository
        .fetch(&application.id)
        .await
        .expect("fetch succeeds")
        .expect("application stored");
    assert_eq!(stored.version, 9);

    let invoices = stored.data.invoices();
    let categories: Vec<&str> = invoices
        .iter()
        .map(|invoice| invoice.category.as_str())
        .collect();
    assert_eq!(
        categories,
        vec!["admission", "deposit", "annual_fee", "annual_fee", "annual_fee"]
    );

    // Annual total excludes the mess head: 400 + 9600 + 1500.
    let annual: Vec<u64> = invoices[2..].iter().map(|invoice| invoice.amount).collect();
    assert_eq!(annual, vec![4_600, 3_450, 3_450]);
    assert_eq!(invoices[1].amount, 1_725);

    let plan = stored.data.installment_plan().expect("plan recorded");
    assert_eq!(plan.scheduled_total(), 11_500);

    assert!(service.advance_one(&application.id, None).await.is_err());
}

#[tokio::test]
async fn batch_progression_only_moves_auto_stages() {
    let (service, repository) = build_service();
    let first = service.submit(submission("Ivy Chen")).await.expect("submitted");
    let second = service
        .submit(submission("Omar Haddad"))
        .await
        .expect("submitted");
    service
        .advance_one(&second.id, None)
        .await
        .expect("second moves to review");

    let report = service.process_pending().await.expect("batch runs");

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 0);

    let first = repository
        .fetch(&first.id)
        .await
        .expect("fetch")
        .expect("stored");
    let second = repository
        .fetch(&second.id)
        .await
        .expect("fetch")
        .expect("stored");
    assert_eq!(first.stage, AdmissionStage::UnderReview);
    assert_eq!(second.stage, AdmissionStage::UnderReview);
}
