use std::cmp::Ordering;

use serde::Serialize;

use super::super::config::ScoringWeights;
use super::super::domain::EmployeeId;
use super::{AssignmentCriteria, Candidate};

/// Transparent breakdown of one candidate's score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateScore {
    pub employee_id: EmployeeId,
    pub workload: f64,
    pub role_suitability: f64,
    pub specialization: f64,
    pub experience: f64,
    pub total: f64,
    pub open_assignments: u32,
}

pub fn score_candidate(
    candidate: &Candidate,
    criteria: &AssignmentCriteria,
    weights: &ScoringWeights,
) -> CandidateScore {
    let capacity = candidate.employee.max_concurrent_assignments;
    let headroom = if capacity == 0 {
        0.0
    } else {
        f64::from(capacity.saturating_sub(candidate.open_assignments)) / f64::from(capacity)
    };
    let workload = headroom * weights.workload;

    let role_points = match candidate.employee.role.cmp(&criteria.required_role) {
        Ordering::Equal => weights.role_exact,
        Ordering::Greater => weights.role_above,
        Ordering::Less => 0.0,
    };
    let role_suitability = role_points * weights.role_weight;

    let required = criteria.special_requirements.len();
    let match_pct = if required == 0 {
        100.0
    } else {
        let matched = criteria
            .special_requirements
            .iter()
            .filter(|tag| candidate.employee.specializations.contains(*tag))
            .count();
        matched as f64 / required as f64 * 100.0
    };
    let specialization = match_pct * weights.specialization_weight;

    let experience = weights.experience_baseline;

    CandidateScore {
        employee_id: candidate.employee.id.clone(),
        workload,
        role_suitability,
        specialization,
        experience,
        total: workload + role_suitability + specialization + experience,
        open_assignments: candidate.open_assignments,
    }
}

/// Scores ordered best-first: highest total, then lowest open workload, then input order.
pub fn rank(
    candidates: &[Candidate],
    criteria: &AssignmentCriteria,
    weights: &ScoringWeights,
) -> Vec<CandidateScore> {
    let mut scores: Vec<CandidateScore> = candidates
        .iter()
        .map(|candidate| score_candidate(candidate, criteria, weights))
        .collect();

    scores.sort_by(|a, b| {
        comparable(b.total)
            .cmp(&comparable(a.total))
            .then_with(|| a.open_assignments.cmp(&b.open_assignments))
    });

    scores
}

// Micro-point resolution keeps float noise from breaking ties.
fn comparable(score: f64) -> i64 {
    (score * 1_000_000.0).round() as i64
}
