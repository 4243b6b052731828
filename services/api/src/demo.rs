use crate::infra::{build_origination_service, seeded_roster, InMemoryOrigination};
use clap::Args;
use loan_orchestrator::config::AppConfig;
use loan_orchestrator::error::AppError;
use loan_orchestrator::workflows::origination::{
    AssignmentOutcome, CustomerTier, InMemoryTrackingStore, LoanApplication, WorkflowReport,
};

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Run a single application for this amount instead of the bundled samples.
    #[arg(long)]
    pub(crate) amount: Option<u64>,
    /// Monthly income for the custom application.
    #[arg(long, default_value_t = 150_000)]
    pub(crate) monthly_income: u64,
    /// Existing monthly instalments for the custom application.
    #[arg(long, default_value_t = 0)]
    pub(crate) existing_emi: u64,
    /// Mark the custom applicant as self-employed.
    #[arg(long)]
    pub(crate) self_employed: bool,
    /// Walk assigned workflows through manual review to completion.
    #[arg(long)]
    pub(crate) complete_manual: bool,
    /// Print each workflow report as JSON.
    #[arg(long)]
    pub(crate) json: bool,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let (service, store) = build_origination_service(&config.pipeline)?;

    let applications = match args.amount {
        Some(amount) => vec![LoanApplication {
            applicant_name: "Custom Applicant".to_string(),
            loan_amount: amount,
            loan_purpose: "personal".to_string(),
            employment_type: if args.self_employed {
                "self_employed".to_string()
            } else {
                "salaried".to_string()
            },
            monthly_income: args.monthly_income,
            existing_emi: args.existing_emi,
            customer_tier: None,
        }],
        None => sample_applications(),
    };

    println!("Loan origination demo");
    for application in applications {
        let label = format!(
            "{} requesting {}",
            application.applicant_name, application.loan_amount
        );
        let report = service.process(application).await?;
        render_report(&label, &report, args.json);

        let assigned = report
            .assignment
            .as_ref()
            .and_then(AssignmentOutcome::assignment)
            .is_some();
        if args.complete_manual && assigned {
            complete_manual(&service, &report).await?;
        }
    }

    render_workload(&store).await;
    Ok(())
}

fn sample_applications() -> Vec<LoanApplication> {
    vec![
        LoanApplication {
            applicant_name: "Kavya Rao".to_string(),
            loan_amount: 350_000,
            loan_purpose: "vehicle".to_string(),
            employment_type: "salaried".to_string(),
            monthly_income: 120_000,
            existing_emi: 8_000,
            customer_tier: Some(CustomerTier::Standard),
        },
        LoanApplication {
            applicant_name: "Tomás Ibarra".to_string(),
            loan_amount: 1_200_000,
            loan_purpose: "business_expansion".to_string(),
            employment_type: "self_employed".to_string(),
            monthly_income: 260_000,
            existing_emi: 30_000,
            customer_tier: Some(CustomerTier::Premium),
        },
        LoanApplication {
            applicant_name: "Noor Haddad".to_string(),
            loan_amount: 900_000,
            loan_purpose: "home_purchase".to_string(),
            employment_type: "salaried".to_string(),
            monthly_income: 14_000,
            existing_emi: 0,
            customer_tier: None,
        },
    ]
}

fn render_report(label: &str, report: &WorkflowReport, json: bool) {
    println!("\n- {} [{}]", report.workflow_id, label);
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(json) => println!("{json}"),
            Err(err) => println!("  Report unavailable: {err}"),
        }
        return;
    }

    for outcome in &report.automated.outcomes {
        let status = if outcome.success { "completed" } else { "failed" };
        match &outcome.failure {
            Some(failure) => println!(
                "  {:<24} {:<9} attempts={} ({})",
                outcome.stage,
                status,
                outcome.attempts,
                failure.summary()
            ),
            None => println!(
                "  {:<24} {:<9} attempts={}",
                outcome.stage, status, outcome.attempts
            ),
        }
    }

    println!(
        "  Phase: {} / status: {}",
        report.phase.label(),
        report.status.label()
    );
    if let Some(reason) = &report.reason {
        println!("  Reason: {reason}");
    }

    match &report.assignment {
        Some(AssignmentOutcome::Assigned(assignment)) => println!(
            "  Assigned to {} (score {:.1}, role {}, priority {:?}, requirements [{}])",
            assignment.employee_id,
            assignment.score,
            assignment.criteria.required_role.label(),
            assignment.criteria.priority,
            assignment
                .criteria
                .special_requirements
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Some(AssignmentOutcome::Uncommitted { warning, .. }) => {
            println!("  Assignment needs reconciliation: {warning}")
        }
        Some(AssignmentOutcome::Failed(failure)) => println!(
            "  Assignment failed: {} ({})",
            failure.reason.code(),
            failure.detail
        ),
        None => {}
    }
}

async fn complete_manual(
    service: &InMemoryOrigination,
    report: &WorkflowReport,
) -> Result<(), AppError> {
    let started = service.start_manual_review(&report.workflow_id).await?;
    let completed = service.complete_manual_review(&report.workflow_id).await?;
    println!(
        "  Manual review by {}: started {} -> completed {}",
        completed.employee_id,
        started
            .started_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_default(),
        completed
            .completed_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_default()
    );
    Ok(())
}

async fn render_workload(store: &InMemoryTrackingStore) {
    println!("\nCase-worker workload");
    for employee in seeded_roster() {
        let open = store.open_assignments(&employee.id).await;
        println!(
            "  {:<8} {:<14} {:<20} {}/{}",
            employee.id.0,
            employee.name,
            employee.role.label(),
            open,
            employee.max_concurrent_assignments
        );
    }
}
