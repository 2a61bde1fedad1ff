use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Datelike;
use serde::Serialize;
use tracing::{info, warn};

use super::batch::{run_bounded, BatchReport, BatchSettings, ItemOutcome, ItemResult, SkipReason};
use super::catalog::{StageCatalog, StageDefinition, TransitionError};
use super::clock::{Clock, SystemClock};
use super::config::WorkflowConfig;
use super::domain::{
    AdmissionStage, Application, ApplicationId, ApplicationSubmission, AuxiliaryData,
    FeeInvoice, InstallmentChoice, InstallmentPlan,
};
use super::fees::{FeeAssignment, FeeAssignmentEngine, FeeAssignmentError, FeeAssignmentResult};
use super::intake::{sanitize_submission, IntakeViolation};
use super::repository::{
    ApplicationPatch, ApplicationRepository, FeeStructureCatalog, RepositoryError,
};

static APPLICATION_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_application_identity(year: i32) -> (ApplicationId, String) {
    let id = APPLICATION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    (
        ApplicationId(format!("adm-{id:06}")),
        format!("APP-{year}-{id:05}"),
    )
}

/// Service composing the stage catalog, fee engine, and application repository.
pub struct AdmissionsService<R, F> {
    catalog: Arc<StageCatalog>,
    engine: Arc<FeeAssignmentEngine<F>>,
    repository: Arc<R>,
    batch: BatchSettings,
    default_installments: InstallmentChoice,
    clock: Arc<dyn Clock>,
}

impl<R, F> AdmissionsService<R, F>
where
    R: ApplicationRepository + 'static,
    F: FeeStructureCatalog + 'static,
{
    pub fn new(repository: Arc<R>, structures: Arc<F>, config: WorkflowConfig) -> Self {
        Self::with_clock(repository, structures, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        repository: Arc<R>,
        structures: Arc<F>,
        config: WorkflowConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let WorkflowConfig {
            fees,
            batch,
            default_installments,
        } = config;
        let engine = FeeAssignmentEngine::new(structures, fees, clock.clone());

        Self {
            catalog: Arc::new(StageCatalog::standard()),
            engine: Arc::new(engine),
            repository,
            batch,
            default_installments,
            clock,
        }
    }

    /// Swap the stage table, e.g. for schools that run a different pipeline.
    pub fn with_catalog(mut self, catalog: StageCatalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    pub fn catalog(&self) -> &StageCatalog {
        &self.catalog
    }

    /// Validate an intake form and store it as a new application.
    pub async fn submit(
        &self,
        submission: ApplicationSubmission,
    ) -> Result<Application, AdmissionsError> {
        let submission = sanitize_submission(submission)?;
        let now = self.clock.now();
        let (id, application_number) = next_application_identity(now.year());
        let stage = if submission.save_as_draft {
            AdmissionStage::Draft
        } else {
            self.catalog.initial()
        };

        let application = Application {
            id,
            application_number,
            student_name: submission.student_name,
            year_group: Some(submission.year_group),
            stage,
            parent_email: submission.parent_email,
            school_id: Some(submission.school_id),
            submitted_at: now,
            installment_preference: submission.installment_preference,
            version: 0,
            data: AuxiliaryData::default(),
        };

        let stored = self.repository.insert(application).await?;
        info!(
            application = %stored.application_number,
            stage = %stored.stage,
            "application received"
        );
        Ok(stored)
    }

    pub async fn get(&self, id: &ApplicationId) -> Result<Application, AdmissionsError> {
        let application = self
            .repository
            .fetch(id)
            .await?
            .ok_or(RepositoryError::NotFound)?;
        Ok(application)
    }

    /// Move one application to its successor stage, assigning any fee owed for that stage key.
    pub async fn advance_one(
        &self,
        id: &ApplicationId,
        choice: Option<InstallmentChoice>,
    ) -> Result<AdvanceOutcome, AdmissionsError> {
        let application = self.get(id).await?;
        let next = self.catalog.advance(application.stage)?;
        self.advance_to(application, next, choice).await
    }

    /// Like [`Self::advance_one`], but only succeeds when `target` is the legal successor.
    pub async fn transition_to(
        &self,
        id: &ApplicationId,
        target: AdmissionStage,
        choice: Option<InstallmentChoice>,
    ) -> Result<AdvanceOutcome, AdmissionsError> {
        let application = self.get(id).await?;
        let next = self.catalog.validate_transition(application.stage, target)?;
        self.advance_to(application, next, choice).await
    }

    /// Assign the fees for `stage_key` without moving the application.
    pub async fn assign_fees_for_stage(
        &self,
        id: &ApplicationId,
        stage_key: &str,
        choice: Option<InstallmentChoice>,
    ) -> Result<FeeAssignmentResult, AdmissionsError> {
        let application = self.get(id).await?;
        let choice = self.installments_for(&application, choice);
        self.engine
            .assign_fees_for_stage(self.repository.as_ref(), &application, stage_key, choice)
            .await
            .map_err(|err| match err {
                FeeAssignmentError::Repository(source) => persistence_error(&application, source),
                other => AdmissionsError::Fee(other),
            })
    }

    /// Advance every auto-progress application by one stage.
    ///
    /// Drafts, unknown stages, terminal stages and manual stages are skipped. A failing item
    /// is recorded and never stops the rest of the batch.
    pub async fn process_all_stages(&self, applications: Vec<Application>) -> BatchReport {
        let outcomes = run_bounded(applications, &self.batch, |application| {
            self.progress_item(application)
        })
        .await;

        let report = BatchReport::from_outcomes(outcomes);
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            "batch progression finished"
        );
        report
    }

    /// Fetch every non-draft application and run [`Self::process_all_stages`] over them.
    pub async fn process_pending(&self) -> Result<BatchReport, AdmissionsError> {
        let applications = self.repository.active().await?;
        Ok(self.process_all_stages(applications).await)
    }

    pub fn status_view(&self, application: &Application) -> ApplicationStatusView {
        let definition = self.catalog.lookup(application.stage);
        ApplicationStatusView {
            application_id: application.id.clone(),
            application_number: application.application_number.clone(),
            student_name: application.student_name.clone(),
            stage: application.stage,
            stage_title: match definition {
                Some(definition) => definition.title,
                None if application.is_draft() => "Draft",
                None => "Unlisted",
            },
            auto_progress: definition.map(StageDefinition::auto_progress).unwrap_or(false),
            version: application.version,
            invoices: application.data.invoices(),
            installment_plan: application.data.installment_plan(),
        }
    }

    async fn progress_item(&self, application: Application) -> ItemOutcome {
        let application_number = application.application_number.clone();
        let result = match self.eligibility(&application) {
            Err(reason) => ItemResult::Skipped(reason),
            Ok(next) => {
                let from = application.stage;
                let to = next.stage;
                match self.advance_to(application, next, None).await {
                    Ok(_) => ItemResult::Advanced { from, to },
                    Err(err) => {
                        warn!(
                            application = %application_number,
                            error = %err,
                            "batch progression failed"
                        );
                        ItemResult::Failed(err.to_string())
                    }
                }
            }
        };

        ItemOutcome {
            application_number,
            result,
        }
    }

    fn eligibility(&self, application: &Application) -> Result<&StageDefinition, SkipReason> {
        let current = application.stage;
        if current == AdmissionStage::Draft {
            return Err(SkipReason::Draft);
        }
        let definition = self
            .catalog
            .lookup(current)
            .ok_or(SkipReason::UnknownStage(current))?;
        if definition.is_terminal() {
            return Err(SkipReason::Terminal(current));
        }
        if !definition.auto_progress() {
            return Err(SkipReason::ManualStage(current));
        }
        self.catalog
            .successor_of(current)
            .ok_or(SkipReason::Terminal(current))
    }

    async fn advance_to(
        &self,
        application: Application,
        next: &StageDefinition,
        choice: Option<InstallmentChoice>,
    ) -> Result<AdvanceOutcome, AdmissionsError> {
        let choice = self.installments_for(&application, choice);
        let assignment = self
            .engine
            .plan_fees(&application, next.stage.key(), choice)
            .await
            .map_err(|err| match err {
                FeeAssignmentError::Repository(source) => AdmissionsError::Repository(source),
                other => AdmissionsError::Fee(other),
            })?;

        let data = match &assignment {
            Some(assignment) => {
                let mut data = application.data.clone();
                assignment.apply_to(&mut data).map_err(FeeAssignmentError::from)?;
                Some(data)
            }
            None => None,
        };

        let patch = ApplicationPatch {
            stage: Some(next.stage),
            data,
        };
        let updated = self
            .repository
            .update(&application.id, application.version, patch)
            .await
            .map_err(|err| persistence_error(&application, err))?;

        info!(
            application = %updated.application_number,
            from = %application.stage,
            to = %updated.stage,
            fee_total = assignment.as_ref().map(|fees| fees.total).unwrap_or(0),
            "application advanced"
        );

        Ok(AdvanceOutcome {
            previous_stage: application.stage,
            application: updated,
            assignment,
        })
    }

    fn installments_for(
        &self,
        application: &Application,
        choice: Option<InstallmentChoice>,
    ) -> InstallmentChoice {
        choice
            .or(application.installment_preference)
            .unwrap_or(self.default_installments)
    }
}

fn persistence_error(application: &Application, err: RepositoryError) -> AdmissionsError {
    match err {
        RepositoryError::VersionMismatch { expected, found } => {
            AdmissionsError::ConcurrentModification {
                id: application.id.clone(),
                expected,
                found,
            }
        }
        other => AdmissionsError::Repository(other),
    }
}

/// Result of a single-application advance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdvanceOutcome {
    pub previous_stage: AdmissionStage,
    pub application: Application,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignment: Option<FeeAssignment>,
}

/// Public status of an application, including its billing records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationStatusView {
    pub application_id: ApplicationId,
    pub application_number: String,
    pub student_name: String,
    pub stage: AdmissionStage,
    pub stage_title: &'static str,
    pub auto_progress: bool,
    pub version: u64,
    pub invoices: Vec<FeeInvoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installment_plan: Option<InstallmentPlan>,
}

/// Error raised by the admissions service.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionsError {
    #[error(transparent)]
    Intake(#[from] IntakeViolation),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Fee(#[from] FeeAssignmentError),
    #[error(
        "application {id} was modified concurrently (expected version {expected}, found {found})"
    )]
    ConcurrentModification {
        id: ApplicationId,
        expected: u64,
        found: u64,
    },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
