use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use loan_orchestrator::config::PipelineConfig;
use loan_orchestrator::error::AppError;
use loan_orchestrator::workflows::origination::{
    Employee, EmployeeId, EmployeeRole, EmployeeStatus, InMemoryTrackingStore,
    OriginationService,
};

use crate::stages::rule_registry;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) type InMemoryOrigination = OriginationService<InMemoryTrackingStore>;

fn employee(id: &str, name: &str, role: EmployeeRole, tags: &[&str], capacity: u32) -> Employee {
    Employee {
        id: EmployeeId(id.to_string()),
        name: name.to_string(),
        role,
        status: EmployeeStatus::Active,
        specializations: tags.iter().map(|tag| tag.to_string()).collect(),
        max_concurrent_assignments: capacity,
    }
}

/// Case-worker roster the in-memory store starts with.
pub(crate) fn seeded_roster() -> Vec<Employee> {
    vec![
        employee("emp-101", "Priya Nair", EmployeeRole::LoanOfficer, &[], 6),
        employee(
            "emp-102",
            "Daniel Okafor",
            EmployeeRole::LoanOfficer,
            &["compliance_review"],
            6,
        ),
        employee(
            "emp-201",
            "Lena Fischer",
            EmployeeRole::SeniorLoanOfficer,
            &["high_risk", "compliance_review"],
            4,
        ),
        employee(
            "emp-202",
            "Marcus Hale",
            EmployeeRole::SeniorLoanOfficer,
            &["high_value", "senior_approval"],
            4,
        ),
        employee(
            "emp-301",
            "Aiko Tanaka",
            EmployeeRole::Manager,
            &["high_value", "high_risk", "senior_approval", "compliance_review"],
            2,
        ),
    ]
}

pub(crate) fn build_origination_service(
    pipeline: &PipelineConfig,
) -> Result<(Arc<InMemoryOrigination>, Arc<InMemoryTrackingStore>), AppError> {
    let store = Arc::new(InMemoryTrackingStore::with_employees(seeded_roster()));
    let service = OriginationService::new(
        rule_registry(),
        store.clone(),
        pipeline.orchestrator_config(),
    )?;
    Ok((Arc::new(service), store))
}
