use thiserror::Error;

use crate::services::entry_workflow::TransitionError;
use crate::services::mark_rows::RowEditError;
use crate::services::marks_store::StoreError;

#[derive(Debug, Error)]
pub(crate) enum MarksError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Row(#[from] RowEditError),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("These marks are locked and cannot be edited")]
    Locked,
    #[error("Marks were changed by someone else after they were loaded; reload and try again")]
    Conflict,
    #[error("A save is already in progress")]
    SaveInProgress,
    #[error("The selection changed before the request finished")]
    Stale,
    #[error("Too many open marks sessions")]
    Capacity,
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for MarksError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict { .. } => Self::Conflict,
            StoreError::NotFound(id) => Self::NotFound(format!("Marks entry {id} not found")),
            StoreError::StatusChanged { actual, .. } => {
                Self::Transition(TransitionError::NotAllowed { action: "change", from: actual })
            }
            other => Self::Store(other),
        }
    }
}
