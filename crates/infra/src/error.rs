//! Workflow-level error taxonomy.

use thiserror::Error;

use gatepass_core::DomainError;
use gatepass_invitations::VisitWindow;

use crate::collaborators::QrError;
use crate::gateway::StoreError;

/// Discriminant of [`WorkflowError`], for callers that branch on the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowErrorKind {
    NotFound,
    InvalidState,
    ValidationFailed,
    CapacityExceeded,
    GenerationExhausted,
    DependencyFailure,
}

/// Failure of a workflow operation.
///
/// Everything except `DependencyFailure` is raised before any durable
/// mutation. `DependencyFailure` means the unit of work (if one was open) has
/// been rolled back.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("capacity exceeded: {message}")]
    CapacityExceeded {
        message: String,
        /// Up to three suggested windows.
        alternatives: Vec<VisitWindow>,
    },

    #[error("could not generate a unique invitation number after {attempts} attempts")]
    GenerationExhausted { attempts: u32 },

    #[error("dependency failure: {0}")]
    DependencyFailure(String),
}

impl WorkflowError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn dependency(msg: impl Into<String>) -> Self {
        Self::DependencyFailure(msg.into())
    }

    pub fn kind(&self) -> WorkflowErrorKind {
        match self {
            WorkflowError::NotFound { .. } => WorkflowErrorKind::NotFound,
            WorkflowError::InvalidState(_) => WorkflowErrorKind::InvalidState,
            WorkflowError::ValidationFailed(_) => WorkflowErrorKind::ValidationFailed,
            WorkflowError::CapacityExceeded { .. } => WorkflowErrorKind::CapacityExceeded,
            WorkflowError::GenerationExhausted { .. } => WorkflowErrorKind::GenerationExhausted,
            WorkflowError::DependencyFailure(_) => WorkflowErrorKind::DependencyFailure,
        }
    }
}

impl From<DomainError> for WorkflowError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => WorkflowError::ValidationFailed(msg),
            DomainError::InvalidId(msg) => WorkflowError::ValidationFailed(msg),
            DomainError::InvalidState(msg) => WorkflowError::InvalidState(msg),
            // Only reachable through a store or collaborator handing back
            // inconsistent data.
            DomainError::InvariantViolation(msg) => WorkflowError::DependencyFailure(msg),
        }
    }
}

impl From<StoreError> for WorkflowError {
    fn from(value: StoreError) -> Self {
        WorkflowError::DependencyFailure(value.to_string())
    }
}

impl From<QrError> for WorkflowError {
    fn from(value: QrError) -> Self {
        WorkflowError::DependencyFailure(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_workflow_kinds() {
        assert_eq!(
            WorkflowError::from(DomainError::validation("x")).kind(),
            WorkflowErrorKind::ValidationFailed
        );
        assert_eq!(
            WorkflowError::from(DomainError::invalid_state("x")).kind(),
            WorkflowErrorKind::InvalidState
        );
        assert_eq!(
            WorkflowError::from(StoreError::UniqueViolation("number".into())).kind(),
            WorkflowErrorKind::DependencyFailure
        );
    }

    #[test]
    fn not_found_names_the_entity() {
        let err = WorkflowError::not_found("visitor", 42);
        assert_eq!(err.to_string(), "visitor not found: 42");
    }
}
