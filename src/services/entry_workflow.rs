use thiserror::Error;
use time::PrimitiveDateTime;

use crate::db::models::{EntryPatch, MarksEntry};
use crate::db::types::{EntryStatus, UserRole};

/// Caller identity as resolved by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Actor {
    pub(crate) user_id: Option<String>,
    pub(crate) role: UserRole,
}

impl Actor {
    pub(crate) fn new(user_id: impl Into<String>, role: UserRole) -> Self {
        Self { user_id: Some(user_id.into()), role }
    }

    pub(crate) fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    fn owns(&self, entry: &MarksEntry) -> bool {
        self.user_id.as_deref() == Some(entry.entered_by.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EntryAction {
    SaveDraft,
    Submit,
    Approve,
    Reject { reason: String },
}

impl EntryAction {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::SaveDraft => "save",
            Self::Submit => "submit",
            Self::Approve => "approve",
            Self::Reject { .. } => "reject",
        }
    }

    /// Statuses the stored entry may be in for this action to apply.
    pub(crate) fn allowed_from(&self) -> &'static [EntryStatus] {
        match self {
            Self::SaveDraft | Self::Submit => &[EntryStatus::Draft, EntryStatus::Rejected],
            Self::Approve | Self::Reject { .. } => &[EntryStatus::Submitted],
        }
    }

    fn target(&self) -> EntryStatus {
        match self {
            Self::SaveDraft => EntryStatus::Draft,
            Self::Submit => EntryStatus::Submitted,
            Self::Approve => EntryStatus::Approved,
            Self::Reject { .. } => EntryStatus::Rejected,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum TransitionError {
    #[error("Cannot {action} marks that are {from}")]
    NotAllowed { action: &'static str, from: EntryStatus },
    #[error("Only administrators can {0} marks")]
    AdminRequired(&'static str),
    #[error("An identified user is required to {0} marks")]
    MissingActor(&'static str),
    #[error("A rejection reason is required")]
    MissingReason,
    #[error("Only the teacher who entered these marks or an administrator can change them")]
    NotOwner,
}

/// Whether `actor` may change rows of `entry`. A missing entry has not been saved yet.
pub(crate) fn can_edit(entry: Option<&MarksEntry>, actor: &Actor) -> bool {
    let Some(entry) = entry else {
        return true;
    };
    matches!(entry.status, EntryStatus::Draft | EntryStatus::Rejected)
        && (actor.is_admin() || actor.owns(entry))
}

/// Validates `action` against the current status and returns the columns it changes.
/// Rows are left to the caller.
pub(crate) fn transition(
    current: Option<&MarksEntry>,
    action: &EntryAction,
    actor: &Actor,
    now: PrimitiveDateTime,
) -> Result<EntryPatch, TransitionError> {
    let name = action.as_str();
    if actor.user_id.is_none() {
        return Err(TransitionError::MissingActor(name));
    }

    let from = current.map(|entry| entry.status).unwrap_or(EntryStatus::Draft);
    let mut patch = EntryPatch {
        rows: None,
        allowed_from: action.allowed_from().to_vec(),
        status: action.target(),
        entry_date: None,
        entered_by_role: None,
        is_locked: false,
        approved_by: None,
        approval_date: None,
        rejection_reason: None,
        updated_at: now,
    };

    match action {
        EntryAction::SaveDraft | EntryAction::Submit => {
            if !action.allowed_from().contains(&from) {
                return Err(TransitionError::NotAllowed { action: name, from });
            }
            if !can_edit(current, actor) {
                return Err(TransitionError::NotOwner);
            }
            patch.is_locked = matches!(action, EntryAction::Submit);
            patch.entry_date = Some(now);
            // An admin saving someone else's entry leaves the owner's role in place.
            if current.map_or(true, |entry| actor.owns(entry)) {
                patch.entered_by_role = Some(actor.role);
            }
        }
        EntryAction::Approve => {
            if !actor.is_admin() {
                return Err(TransitionError::AdminRequired(name));
            }
            if current.is_none() || !action.allowed_from().contains(&from) {
                return Err(TransitionError::NotAllowed { action: name, from });
            }
            patch.is_locked = true;
            patch.approved_by = actor.user_id.clone();
            patch.approval_date = Some(now);
        }
        EntryAction::Reject { reason } => {
            if !actor.is_admin() {
                return Err(TransitionError::AdminRequired(name));
            }
            if current.is_none() || !action.allowed_from().contains(&from) {
                return Err(TransitionError::NotAllowed { action: name, from });
            }
            let reason = reason.trim();
            if reason.is_empty() {
                return Err(TransitionError::MissingReason);
            }
            patch.rejection_reason = Some(reason.to_string());
        }
    }

    Ok(patch)
}
