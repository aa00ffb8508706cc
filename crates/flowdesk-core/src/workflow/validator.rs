//! Structural validation of workflow configs.
//!
//! `validate` is a pure function: the same config always yields the same
//! issues in the same order. Hard errors block activation; warnings do not.

use std::collections::HashSet;

use flowdesk_types::validation::{ValidationCode, ValidationIssue, ValidationResult};
use flowdesk_types::workflow::WorkflowConfig;

/// Check a config for structural soundness.
///
/// Checks, in order:
/// 1. workflow name present
/// 2. at least one status
/// 3. unique status ids (duplicate names only warn)
/// 4. explicit initial status resolves
/// 5. unique transition ids
/// 6. every transition endpoint resolves
/// 7. statuses with no incoming and no outgoing edges (other than the
///    initial status) warn as isolated
pub fn validate(config: &WorkflowConfig) -> ValidationResult {
    let mut issues = Vec::new();

    if config.name.trim().is_empty() {
        issues.push(ValidationIssue::new(
            ValidationCode::EmptyWorkflowName,
            "workflow name is empty",
        ));
    }

    if config.statuses.is_empty() {
        issues.push(ValidationIssue::new(
            ValidationCode::NoStatuses,
            "workflow defines no statuses",
        ));
    }

    let mut status_ids = HashSet::new();
    let mut status_names = HashSet::new();
    for status in &config.statuses {
        if !status_ids.insert(status.id.as_str()) {
            issues.push(
                ValidationIssue::new(
                    ValidationCode::DuplicateStatusId,
                    format!("status id '{}' is defined more than once", status.id),
                )
                .with_subject(&status.id),
            );
        }
        if !status_names.insert(status.name.as_str()) {
            issues.push(
                ValidationIssue::new(
                    ValidationCode::DuplicateStatusName,
                    format!("status name '{}' is used by more than one status", status.name),
                )
                .with_subject(&status.id),
            );
        }
    }

    if let Some(initial) = &config.initial_status_id {
        if !status_ids.contains(initial.as_str()) {
            issues.push(
                ValidationIssue::new(
                    ValidationCode::UnknownInitialStatus,
                    format!("initial status '{initial}' does not exist"),
                )
                .with_subject(initial),
            );
        }
    }

    let mut transition_ids = HashSet::new();
    let mut touched: HashSet<&str> = HashSet::new();
    for transition in &config.transitions {
        if !transition_ids.insert(transition.id.as_str()) {
            issues.push(
                ValidationIssue::new(
                    ValidationCode::DuplicateTransitionId,
                    format!("transition id '{}' is defined more than once", transition.id),
                )
                .with_subject(&transition.id),
            );
        }

        let from_ok = status_ids.contains(transition.from_status_id.as_str());
        let to_ok = status_ids.contains(transition.to_status_id.as_str());
        if !from_ok {
            issues.push(
                ValidationIssue::new(
                    ValidationCode::DanglingFromStatus,
                    format!(
                        "transition '{}' starts at unknown status '{}'",
                        transition.id, transition.from_status_id
                    ),
                )
                .with_subject(&transition.id),
            );
        }
        if !to_ok {
            issues.push(
                ValidationIssue::new(
                    ValidationCode::DanglingToStatus,
                    format!(
                        "transition '{}' targets unknown status '{}'",
                        transition.id, transition.to_status_id
                    ),
                )
                .with_subject(&transition.id),
            );
        }
        if from_ok && to_ok {
            touched.insert(transition.from_status_id.as_str());
            touched.insert(transition.to_status_id.as_str());
        }
    }

    let initial_id = config.initial_status().map(|s| s.id.as_str());
    let mut reported = HashSet::new();
    for status in &config.statuses {
        if Some(status.id.as_str()) == initial_id || touched.contains(status.id.as_str()) {
            continue;
        }
        if reported.insert(status.id.as_str()) {
            issues.push(
                ValidationIssue::new(
                    ValidationCode::IsolatedStatus,
                    format!(
                        "status '{}' has no incoming or outgoing transitions",
                        status.name
                    ),
                )
                .with_subject(&status.id),
            );
        }
    }

    ValidationResult::from_issues(issues)
}
