mod installments;
mod policy;

pub use installments::build_plan;
pub use policy::{share_of, FeePolicy, FeePolicyError, InstallmentShare, WHOLE_BPS};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info};

use super::clock::Clock;
use super::domain::{
    Application, AuxiliaryData, FeeBreakdown, FeeHead, FeeInvoice, FeeRecordError, FeeStage,
    FeeStructure, InstallmentChoice, InstallmentPlan, InvoiceStatus,
};
use super::repository::{
    ApplicationPatch, ApplicationRepository, FeeStructureCatalog, RepositoryError,
};

static INVOICE_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_invoice_id() -> String {
    let id = INVOICE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("inv-{id:06}")
}

fn invoice_number(application_number: &str, now: DateTime<Utc>, installment: Option<u8>) -> String {
    let suffix = now.timestamp_millis().rem_euclid(1_000_000);
    match installment {
        Some(sequence) => format!("INV-{application_number}-{suffix:06}-{sequence}"),
        None => format!("INV-{application_number}-{suffix:06}"),
    }
}

/// Fees computed for one stage, ready to be written into an application's data blob.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeeAssignment {
    pub fee_stage: FeeStage,
    pub invoices: Vec<FeeInvoice>,
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<InstallmentPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<FeeBreakdown>,
}

impl FeeAssignment {
    pub fn invoice_ids(&self) -> Vec<String> {
        self.invoices.iter().map(|invoice| invoice.id.clone()).collect()
    }

    pub fn apply_to(&self, data: &mut AuxiliaryData) -> Result<(), FeeRecordError> {
        data.append_invoices(&self.invoices)?;
        if let (Some(plan), Some(breakdown)) = (&self.plan, &self.breakdown) {
            data.record_plan(plan, breakdown)?;
        }
        Ok(())
    }
}

/// Result of [`FeeAssignmentEngine::assign_fees_for_stage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FeeAssignmentResult {
    NotRequired,
    Assigned { invoice_ids: Vec<String>, total: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum FeeAssignmentError {
    #[error("no active fee structure found for school {school_id} and year group {year_group}")]
    NoFeeStructure {
        school_id: String,
        year_group: String,
    },
    #[error("fee structure {fee_structure_id} has no application/admission fee head")]
    NoApplicationFeeHead { fee_structure_id: String },
    #[error("fee structure {fee_structure_id} has no billable fee heads")]
    NoBillableFeeHeads { fee_structure_id: String },
    #[error(transparent)]
    Records(#[from] FeeRecordError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Decides which fees a stage owes and turns them into invoices.
pub struct FeeAssignmentEngine<F> {
    structures: Arc<F>,
    policy: FeePolicy,
    clock: Arc<dyn Clock>,
}

impl<F> FeeAssignmentEngine<F>
where
    F: FeeStructureCatalog + 'static,
{
    pub fn new(structures: Arc<F>, policy: FeePolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            structures,
            policy,
            clock,
        }
    }

    /// Compute the fees owed when `application` enters `stage_key`.
    ///
    /// Returns `Ok(None)` for keys that carry no payment.
    pub async fn plan_fees(
        &self,
        application: &Application,
        stage_key: &str,
        choice: InstallmentChoice,
    ) -> Result<Option<FeeAssignment>, FeeAssignmentError> {
        let Some(fee_stage) = FeeStage::from_key(stage_key) else {
            debug!(stage = stage_key, "stage carries no fee");
            return Ok(None);
        };

        let structure = self.structure_for(application).await?.ok_or_else(|| {
            FeeAssignmentError::NoFeeStructure {
                school_id: display_or_unset(application.school_id.as_deref()),
                year_group: display_or_unset(application.year_group.as_deref()),
            }
        })?;

        let now = self.clock.now();
        let today = now.date_naive();
        let assignment = match fee_stage {
            FeeStage::ApplicationFee => self.application_fee(application, &structure, now, today)?,
            FeeStage::Deposit => self.deposit(application, &structure, now, today)?,
            FeeStage::Confirmed | FeeStage::AdmissionDecision => {
                self.annual_fee(application, &structure, fee_stage, choice, now, today)?
            }
        };

        Ok(Some(assignment))
    }

    /// Plan the stage's fees and append them to the stored application.
    ///
    /// The write is conditional on `application.version`; a concurrent update surfaces as
    /// [`RepositoryError::VersionMismatch`].
    pub async fn assign_fees_for_stage<R>(
        &self,
        repository: &R,
        application: &Application,
        stage_key: &str,
        choice: InstallmentChoice,
    ) -> Result<FeeAssignmentResult, FeeAssignmentError>
    where
        R: ApplicationRepository + ?Sized,
    {
        let Some(assignment) = self.plan_fees(application, stage_key, choice).await? else {
            return Ok(FeeAssignmentResult::NotRequired);
        };

        let mut data = application.data.clone();
        assignment.apply_to(&mut data)?;
        repository
            .update(
                &application.id,
                application.version,
                ApplicationPatch {
                    stage: None,
                    data: Some(data),
                },
            )
            .await?;

        info!(
            application = %application.application_number,
            stage = stage_key,
            total = assignment.total,
            invoices = assignment.invoices.len(),
            "fees assigned"
        );

        Ok(FeeAssignmentResult::Assigned {
            invoice_ids: assignment.invoice_ids(),
            total: assignment.total,
        })
    }

    async fn structure_for(
        &self,
        application: &Application,
    ) -> Result<Option<FeeStructure>, RepositoryError> {
        let school_id = application.school_id.as_deref().map(str::trim);
        let year_group = application.year_group.as_deref().map(str::trim);
        match (school_id, year_group) {
            (Some(school_id), Some(year_group))
                if !school_id.is_empty() && !year_group.is_empty() =>
            {
                self.structures
                    .active_structure(school_id, year_group)
                    .await
            }
            _ => Ok(None),
        }
    }

    fn application_fee(
        &self,
        application: &Application,
        structure: &FeeStructure,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<FeeAssignment, FeeAssignmentError> {
        let head = structure
            .fee_heads
            .iter()
            .find(|head| head.is_admission())
            .ok_or_else(|| FeeAssignmentError::NoApplicationFeeHead {
                fee_structure_id: structure.id.clone(),
            })?;

        let invoice = FeeInvoice {
            id: next_invoice_id(),
            invoice_number: invoice_number(&application.application_number, now, None),
            category: head.category.clone(),
            description: format!("{} for {}", head.name, application.student_name),
            amount: head.amount,
            due_date: today + Duration::days(self.policy.application_fee_due_days),
            status: InvoiceStatus::Pending,
            fee_structure_id: Some(structure.id.clone()),
            fee_head: Some(head.name.clone()),
            installment: None,
            notes: None,
        };

        Ok(FeeAssignment {
            fee_stage: FeeStage::ApplicationFee,
            total: invoice.amount,
            invoices: vec![invoice],
            plan: None,
            breakdown: None,
        })
    }

    fn deposit(
        &self,
        application: &Application,
        structure: &FeeStructure,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<FeeAssignment, FeeAssignmentError> {
        let (annual_heads, _) = split_mess(structure)?;
        let annual_total = sum_heads(&annual_heads);
        let amount = share_of(annual_total, self.policy.deposit_rate_bps);

        let invoice = FeeInvoice {
            id: next_invoice_id(),
            invoice_number: invoice_number(&application.application_number, now, None),
            category: "deposit".to_string(),
            description: format!("Admission deposit for {}", application.student_name),
            amount,
            due_date: today + Duration::days(self.policy.deposit_due_days),
            status: InvoiceStatus::Pending,
            fee_structure_id: Some(structure.id.clone()),
            fee_head: None,
            installment: None,
            notes: Some(format!(
                "{} bps of annual fee {annual_total} (mess excluded)",
                self.policy.deposit_rate_bps
            )),
        };

        Ok(FeeAssignment {
            fee_stage: FeeStage::Deposit,
            total: amount,
            invoices: vec![invoice],
            plan: None,
            breakdown: None,
        })
    }

    fn annual_fee(
        &self,
        application: &Application,
        structure: &FeeStructure,
        fee_stage: FeeStage,
        choice: InstallmentChoice,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<FeeAssignment, FeeAssignmentError> {
        let (annual_heads, mess_heads) = split_mess(structure)?;
        let annual_total = sum_heads(&annual_heads);
        let plan = build_plan(annual_total, choice, &self.policy, today);
        let installment_count = plan.installments.len();

        let invoices = plan
            .installments
            .iter()
            .map(|installment| FeeInvoice {
                id: next_invoice_id(),
                invoice_number: invoice_number(
                    &application.application_number,
                    now,
                    (installment_count > 1).then_some(installment.sequence),
                ),
                category: "annual_fee".to_string(),
                description: format!("{} - {}", installment.label, application.student_name),
                amount: installment.amount,
                due_date: installment.due_date,
                status: InvoiceStatus::Pending,
                fee_structure_id: Some(structure.id.clone()),
                fee_head: None,
                installment: Some(installment.sequence),
                notes: Some(format!(
                    "{} plan over annual fee {annual_total}",
                    choice.label()
                )),
            })
            .collect();

        let breakdown = FeeBreakdown {
            fee_structure_id: structure.id.clone(),
            annual_heads,
            mess_heads,
            annual_total,
        };

        Ok(FeeAssignment {
            fee_stage,
            total: annual_total,
            invoices,
            plan: Some(plan),
            breakdown: Some(breakdown),
        })
    }
}

/// Separate the annual (non-mess) heads from the mess heads.
fn split_mess(
    structure: &FeeStructure,
) -> Result<(Vec<FeeHead>, Vec<FeeHead>), FeeAssignmentError> {
    let (mess, annual): (Vec<FeeHead>, Vec<FeeHead>) = structure
        .fee_heads
        .iter()
        .cloned()
        .partition(FeeHead::is_mess);

    if annual.is_empty() {
        return Err(FeeAssignmentError::NoBillableFeeHeads {
            fee_structure_id: structure.id.clone(),
        });
    }

    Ok((annual, mess))
}

fn sum_heads(heads: &[FeeHead]) -> u64 {
    heads
        .iter()
        .fold(0u64, |total, head| total.saturating_add(head.amount))
}

fn display_or_unset(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => "<unset>".to_string(),
    }
}

