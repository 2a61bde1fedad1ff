//! Admissions stage progression and fee assignment.
//!
//! Applications move through a validated, linear stage table. Every advance hands the
//! successor's key to the fee engine, which only bills the payment keys (`application_fee`,
//! `deposit`, `confirmed`, `admission_decision`); those are assigned explicitly through
//! [`AdmissionsService::assign_fees_for_stage`]. Invoices (and, for the annual fee, an
//! installment plan) are appended to the application's auxiliary data. Every write is
//! conditional on the application version so overlapping updates of the same record fail
//! instead of double-billing.

pub mod batch;
pub mod catalog;
pub mod clock;
mod config;
pub mod domain;
pub mod fees;
mod intake;
pub mod repository;
pub mod router;
pub mod service;

#[cfg(test)]
mod tests;

pub use batch::{BatchItemError, BatchReport, BatchSettings, BatchSummaryView, SkipReason};
pub use catalog::{CatalogError, Progression, StageCatalog, StageDefinition, TransitionError};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::WorkflowConfig;
pub use domain::{
    select_fee_structure, AdmissionStage, Application, ApplicationId, ApplicationSubmission,
    AuxiliaryData, FeeBreakdown, FeeHead, FeeInvoice, FeeRecordError, FeeStage, FeeStructure,
    Installment,
    InstallmentChoice, InstallmentPlan, InvoiceStatus, StudentType,
};
pub use fees::{
    FeeAssignment, FeeAssignmentEngine, FeeAssignmentError, FeeAssignmentResult, FeePolicy,
    FeePolicyError, InstallmentShare,
};
pub use intake::IntakeViolation;
pub use repository::{
    ApplicationPatch, ApplicationRepository, FeeStructureCatalog, RepositoryError,
};
pub use router::admissions_router;
pub use service::{AdmissionsError, AdmissionsService, AdvanceOutcome, ApplicationStatusView};
