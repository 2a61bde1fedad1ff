use crate::infra::{load_fee_structures, InMemoryApplicationRepository, InMemoryFeeStructures};
use admissions::error::AppError;
use admissions::workflows::admissions::{
    AdmissionStage, AdmissionsService, Application, ApplicationSubmission, BatchSettings,
    FeeAssignmentResult, InstallmentChoice, WorkflowConfig,
};
use chrono::Utc;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const DEMO_FAMILIES: [(&str, &str); 4] = [
    ("Amara Okafor", "Year 7"),
    ("Leo Fernandes", "Year 2"),
    ("Sofia Marin", "Year 8"),
    ("Kai Tanaka", "Year 12"),
];

type DemoService = AdmissionsService<InMemoryApplicationRepository, InMemoryFeeStructures>;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Installment plan billed on enrolment (full | split)
    #[arg(long, default_value = "split", value_parser = parse_choice)]
    pub(crate) installments: InstallmentChoice,
    /// Pause between batch dispatches in milliseconds (0 disables pacing)
    #[arg(long, default_value_t = 0)]
    pub(crate) interval_ms: u64,
    /// Maximum number of applications advanced concurrently
    #[arg(long, default_value_t = 4)]
    pub(crate) max_in_flight: usize,
    /// JSON file with `{ "fee_structures": [...] }` (defaults to the sample set)
    #[arg(long)]
    pub(crate) fee_structures: Option<PathBuf>,
}

fn parse_choice(raw: &str) -> Result<InstallmentChoice, String> {
    InstallmentChoice::from_key(raw).ok_or_else(|| format!("unknown installment plan '{raw}'"))
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        installments,
        interval_ms,
        max_in_flight,
        fee_structures,
    } = args;

    let structures = load_fee_structures(fee_structures.as_deref(), Utc::now())?;
    let config = WorkflowConfig {
        batch: BatchSettings {
            max_in_flight: max_in_flight.max(1),
            dispatch_interval: Duration::from_millis(interval_ms),
        },
        ..WorkflowConfig::default()
    };
    let service = AdmissionsService::new(
        Arc::new(InMemoryApplicationRepository::default()),
        Arc::new(structures),
        config,
    );

    println!("Admissions pipeline demo");
    println!("Stages:");
    for definition in service.catalog().ordered() {
        println!("  - {} ({:?})", definition.title, definition.progression);
    }

    let mut applications = Vec::with_capacity(DEMO_FAMILIES.len());
    for (student, year_group) in DEMO_FAMILIES {
        let submission = ApplicationSubmission {
            student_name: student.to_string(),
            year_group: year_group.to_string(),
            parent_email: format!(
                "{}@families.example.org",
                student.to_ascii_lowercase().replace(' ', ".")
            ),
            school_id: "northfield".to_string(),
            installment_preference: Some(installments),
            save_as_draft: false,
        };
        let application = service.submit(submission).await?;
        println!(
            "- Received {} for {} ({})",
            application.application_number, application.student_name, year_group
        );
        applications.push(application);
    }

    println!("\nBatch run 1 (auto stages only)");
    print_batch(&service).await?;

    if let Some(first) = applications.first() {
        println!("\nStaff walk-through for {}", first.application_number);
        walk_to_enrolment(&service, first).await;
    }

    println!("\nBatch run 2");
    print_batch(&service).await?;

    println!("\nFinal status");
    for application in &applications {
        let current = service.get(&application.id).await?;
        let view = service.status_view(&current);
        let billed: u64 = view.invoices.iter().map(|invoice| invoice.amount).sum();
        println!(
            "- {} {}: {} | {} invoice(s) totalling {}",
            view.application_number,
            view.student_name,
            view.stage_title,
            view.invoices.len(),
            billed
        );
    }

    Ok(())
}

async fn print_batch(service: &DemoService) -> Result<(), AppError> {
    let report = service.process_pending().await?;
    for line in report.summary_lines() {
        println!("  {line}");
    }
    Ok(())
}

/// Payment key staff assign once an application reaches `stage`.
fn payment_on_entry(stage: AdmissionStage) -> Option<&'static str> {
    match stage {
        AdmissionStage::AssessmentScheduled => Some("application_fee"),
        AdmissionStage::OfferAccepted => Some("deposit"),
        AdmissionStage::Enrolled => Some("confirmed"),
        _ => None,
    }
}

async fn walk_to_enrolment(service: &DemoService, application: &Application) {
    loop {
        let outcome = match service.advance_one(&application.id, None).await {
            Ok(outcome) => outcome,
            Err(err) => {
                println!("  stopped: {err}");
                break;
            }
        };
        println!("  {} -> {}", outcome.previous_stage, outcome.application.stage);

        let Some(key) = payment_on_entry(outcome.application.stage) else {
            continue;
        };
        match service.assign_fees_for_stage(&application.id, key, None).await {
            Ok(FeeAssignmentResult::Assigned { invoice_ids, total }) => {
                println!(
                    "    {key}: billed {total} across {} invoice(s)",
                    invoice_ids.len()
                );
            }
            Ok(FeeAssignmentResult::NotRequired) => {}
            Err(err) => {
                println!("    {key}: {err}");
                break;
            }
        }
    }

    if let Ok(current) = service.get(&application.id).await {
        if let Some(plan) = current.data.installment_plan() {
            for installment in &plan.installments {
                println!(
                    "    {} : {} due {}",
                    installment.label, installment.amount, installment.due_date
                );
            }
        }
    }
}
