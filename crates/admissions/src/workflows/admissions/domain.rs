use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier wrapper for admission applications.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplicationId(pub String);

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position of an application in the admissions pipeline.
///
/// `Draft` is a sentinel for unsubmitted forms and is never part of the stage catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionStage {
    Draft,
    Submitted,
    UnderReview,
    AssessmentScheduled,
    Approved,
    OfferSent,
    OfferAccepted,
    Enrolled,
}

impl AdmissionStage {
    pub const fn ordered() -> [Self; 8] {
        [
            Self::Draft,
            Self::Submitted,
            Self::UnderReview,
            Self::AssessmentScheduled,
            Self::Approved,
            Self::OfferSent,
            Self::OfferAccepted,
            Self::Enrolled,
        ]
    }

    pub const fn key(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::UnderReview => "under_review",
            Self::AssessmentScheduled => "assessment_scheduled",
            Self::Approved => "approved",
            Self::OfferSent => "offer_sent",
            Self::OfferAccepted => "offer_accepted",
            Self::Enrolled => "enrolled",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim();
        Self::ordered()
            .into_iter()
            .find(|stage| stage.key().eq_ignore_ascii_case(key))
    }
}

impl fmt::Display for AdmissionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Payment-bearing stage keys understood by the fee engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeStage {
    ApplicationFee,
    Deposit,
    Confirmed,
    AdmissionDecision,
}

impl FeeStage {
    pub const fn key(self) -> &'static str {
        match self {
            Self::ApplicationFee => "application_fee",
            Self::Deposit => "deposit",
            Self::Confirmed => "confirmed",
            Self::AdmissionDecision => "admission_decision",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim() {
            "application_fee" => Some(Self::ApplicationFee),
            "deposit" => Some(Self::Deposit),
            "confirmed" => Some(Self::Confirmed),
            "admission_decision" => Some(Self::AdmissionDecision),
            _ => None,
        }
    }
}

/// Installment layout selected by the family (or defaulted by configuration).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallmentChoice {
    Full,
    Split,
}

impl InstallmentChoice {
    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_ascii_lowercase().as_str() {
            "full" => Some(Self::Full),
            "split" | "40-30-30" | "installments" => Some(Self::Split),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Split => "split",
        }
    }
}

/// One admission case as stored by the backing repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub application_number: String,
    pub student_name: String,
    pub year_group: Option<String>,
    pub stage: AdmissionStage,
    pub parent_email: String,
    pub school_id: Option<String>,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub installment_preference: Option<InstallmentChoice>,
    /// Optimistic concurrency token; bumped by every successful update.
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub data: AuxiliaryData,
}

impl Application {
    pub fn is_draft(&self) -> bool {
        self.stage == AdmissionStage::Draft
    }
}

/// Named, priced component of a school's fee structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeHead {
    pub name: String,
    pub category: String,
    pub amount: u64,
    #[serde(default)]
    pub mandatory: bool,
}

impl FeeHead {
    pub fn is_mess(&self) -> bool {
        self.name.to_ascii_lowercase().contains("mess")
    }

    pub fn is_admission(&self) -> bool {
        self.category.eq_ignore_ascii_case("admission")
            || self.name.to_ascii_lowercase().contains("admission")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudentType {
    New,
    Existing,
    All,
}

/// Fee heads applicable to a school and set of year groups for one academic year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeStructure {
    pub id: String,
    pub school_id: String,
    pub academic_year: String,
    pub applicable_year_groups: Vec<String>,
    pub student_type: StudentType,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub fee_heads: Vec<FeeHead>,
}

impl FeeStructure {
    pub fn applies_to(&self, school_id: &str, year_group: &str) -> bool {
        self.active
            && self.school_id == school_id
            && matches!(self.student_type, StudentType::New | StudentType::All)
            && self
                .applicable_year_groups
                .iter()
                .any(|group| group == year_group)
    }
}

/// Pick the structure the engine bills against: newest matching active structure wins.
pub fn select_fee_structure<'a, I>(
    structures: I,
    school_id: &str,
    year_group: &str,
) -> Option<&'a FeeStructure>
where
    I: IntoIterator<Item = &'a FeeStructure>,
{
    structures
        .into_iter()
        .filter(|structure| structure.applies_to(school_id, year_group))
        .fold(None, |best: Option<&FeeStructure>, candidate| match best {
            Some(current) if current.created_at >= candidate.created_at => Some(current),
            _ => Some(candidate),
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Cancelled,
}

/// Invoice appended to an application's auxiliary data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeInvoice {
    pub id: String,
    pub invoice_number: String,
    pub category: String,
    pub description: String,
    pub amount: u64,
    pub due_date: NaiveDate,
    pub status: InvoiceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_structure_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_head: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installment: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Single dated share of an installment plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installment {
    pub sequence: u8,
    pub label: String,
    pub percentage_bps: u32,
    pub amount: u64,
    pub due_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentPlan {
    pub choice: InstallmentChoice,
    pub total: u64,
    pub installments: Vec<Installment>,
}

impl InstallmentPlan {
    pub fn scheduled_total(&self) -> u64 {
        self.installments.iter().map(|item| item.amount).sum()
    }
}

/// Fee-head breakdown stored next to an installment plan for later reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub fee_structure_id: String,
    pub annual_heads: Vec<FeeHead>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mess_heads: Vec<FeeHead>,
    pub annual_total: u64,
}

/// Failure to write fee records into an application's data blob.
#[derive(Debug, thiserror::Error)]
pub enum FeeRecordError {
    #[error("failed to encode fee records: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("existing fee_invoices entry is not a list, refusing to overwrite it")]
    InvoicesNotList,
}

pub(crate) const INVOICES_KEY: &str = "fee_invoices";
pub(crate) const INSTALLMENT_PLAN_KEY: &str = "installment_plan";
pub(crate) const FEE_BREAKDOWN_KEY: &str = "fee_breakdown";

/// Open-ended per-application data blob with typed access to the fee records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuxiliaryData(pub BTreeMap<String, Value>);

impl AuxiliaryData {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// Invoices recorded so far; entries that fail to decode are ignored.
    pub fn invoices(&self) -> Vec<FeeInvoice> {
        match self.0.get(INVOICES_KEY) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn installment_plan(&self) -> Option<InstallmentPlan> {
        self.0
            .get(INSTALLMENT_PLAN_KEY)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn fee_breakdown(&self) -> Option<FeeBreakdown> {
        self.0
            .get(FEE_BREAKDOWN_KEY)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Append to the invoice list; an existing non-list entry is left untouched.
    pub(crate) fn append_invoices(
        &mut self,
        invoices: &[FeeInvoice],
    ) -> Result<(), FeeRecordError> {
        let mut encoded = Vec::with_capacity(invoices.len());
        for invoice in invoices {
            encoded.push(serde_json::to_value(invoice)?);
        }

        let entry = self
            .0
            .entry(INVOICES_KEY.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        match entry {
            Value::Array(items) => {
                items.extend(encoded);
                Ok(())
            }
            _ => Err(FeeRecordError::InvoicesNotList),
        }
    }

    pub(crate) fn record_plan(
        &mut self,
        plan: &InstallmentPlan,
        breakdown: &FeeBreakdown,
    ) -> Result<(), FeeRecordError> {
        self.0
            .insert(INSTALLMENT_PLAN_KEY.to_string(), serde_json::to_value(plan)?);
        self.0.insert(
            FEE_BREAKDOWN_KEY.to_string(),
            serde_json::to_value(breakdown)?,
        );
        Ok(())
    }
}

/// Intake form captured before an application enters the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSubmission {
    pub student_name: String,
    pub year_group: String,
    pub parent_email: String,
    pub school_id: String,
    #[serde(default)]
    pub installment_preference: Option<InstallmentChoice>,
    /// Save the form without entering the pipeline.
    #[serde(default)]
    pub save_as_draft: bool,
}
