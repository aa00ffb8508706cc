//! Structural validation results for workflow configs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Hard errors block activation; warnings are surfaced but allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// Distinct code per structural check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    NoStatuses,
    DuplicateStatusId,
    DanglingFromStatus,
    DanglingToStatus,
    DuplicateTransitionId,
    UnknownInitialStatus,
    EmptyWorkflowName,
    IsolatedStatus,
    DuplicateStatusName,
}

impl ValidationCode {
    pub fn severity(&self) -> Severity {
        match self {
            ValidationCode::IsolatedStatus | ValidationCode::DuplicateStatusName => {
                Severity::Warning
            }
            _ => Severity::Error,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationCode::NoStatuses => "NO_STATUSES",
            ValidationCode::DuplicateStatusId => "DUPLICATE_STATUS_ID",
            ValidationCode::DanglingFromStatus => "DANGLING_FROM_STATUS",
            ValidationCode::DanglingToStatus => "DANGLING_TO_STATUS",
            ValidationCode::DuplicateTransitionId => "DUPLICATE_TRANSITION_ID",
            ValidationCode::UnknownInitialStatus => "UNKNOWN_INITIAL_STATUS",
            ValidationCode::EmptyWorkflowName => "EMPTY_WORKFLOW_NAME",
            ValidationCode::IsolatedStatus => "ISOLATED_STATUS",
            ValidationCode::DuplicateStatusName => "DUPLICATE_STATUS_NAME",
        }
    }
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finding from the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: ValidationCode,
    pub severity: Severity,
    pub message: String,
    /// Id of the status or transition the issue is about.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl ValidationIssue {
    pub fn new(code: ValidationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: code.severity(),
            message: message.into(),
            subject: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// True when `errors` is empty.
    pub ok: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Splits issues by severity.
    pub fn from_issues(issues: impl IntoIterator<Item = ValidationIssue>) -> Self {
        let (errors, warnings): (Vec<_>, Vec<_>) = issues
            .into_iter()
            .partition(|i| i.severity == Severity::Error);
        Self {
            ok: errors.is_empty(),
            errors,
            warnings,
        }
    }

    pub fn has_code(&self, code: ValidationCode) -> bool {
        self.errors
            .iter()
            .chain(self.warnings.iter())
            .any(|i| i.code == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_issues_partitions_by_severity() {
        let result = ValidationResult::from_issues(vec![
            ValidationIssue::new(ValidationCode::IsolatedStatus, "status 'Parked' is isolated")
                .with_subject("status-5"),
            ValidationIssue::new(ValidationCode::DanglingToStatus, "missing target"),
        ]);
        assert!(!result.ok);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.has_code(ValidationCode::IsolatedStatus));
        assert!(!result.has_code(ValidationCode::NoStatuses));
    }

    #[test]
    fn test_warnings_only_is_ok() {
        let result = ValidationResult::from_issues(vec![ValidationIssue::new(
            ValidationCode::DuplicateStatusName,
            "dup",
        )]);
        assert!(result.ok);
    }

    #[test]
    fn test_code_serializes_screaming() {
        let json = serde_json::to_string(&ValidationCode::DuplicateTransitionId).unwrap();
        assert_eq!(json, "\"DUPLICATE_TRANSITION_ID\"");
        assert_eq!(
            ValidationCode::DuplicateTransitionId.to_string(),
            "DUPLICATE_TRANSITION_ID"
        );
    }
}
