use std::time::{Duration, Instant};

use serde::Serialize;

use crate::db::models::{EntryKey, ExamSubject, MarkRow, MarksEntry};
use crate::db::types::AssessmentType;
use crate::services::entry_workflow::{can_edit, Actor, TransitionError};
use crate::services::errors::MarksError;
use crate::services::grading::GradeTable;
use crate::services::import_reconcile::{self, ImportPreview};
use crate::services::mark_rows::{self, MarkField};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GuardState {
    Idle,
    Editing,
    /// `edited` records local changes made while the write was in flight.
    Saving { edited: bool },
    Settling { until: Instant, edited: bool },
}

impl GuardState {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Editing => "editing",
            Self::Saving { .. } => "saving",
            Self::Settling { .. } => "settling",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum RemoteOutcome {
    IgnoredOtherKey,
    Suppressed,
    ReferenceOnly,
    Applied,
}

impl RemoteOutcome {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::IgnoredOtherKey => "ignored_other_key",
            Self::Suppressed => "suppressed",
            Self::ReferenceOnly => "reference_only",
            Self::Applied => "applied",
        }
    }
}

/// Result of an async load, tagged with the generation it was started for.
#[derive(Debug, Clone)]
pub(crate) struct LoadedEntry {
    pub(crate) generation: u64,
    pub(crate) entry: Option<MarksEntry>,
    /// Roster rows, used only when no entry exists yet.
    pub(crate) roster: Vec<MarkRow>,
    pub(crate) table: GradeTable,
    pub(crate) subject: ExamSubject,
}

/// Everything a save needs, captured when it starts.
#[derive(Debug, Clone)]
pub(crate) struct SaveTicket {
    pub(crate) generation: u64,
    pub(crate) key: EntryKey,
    pub(crate) subject: ExamSubject,
    /// Revision the working rows were loaded from.
    pub(crate) base_revision: Option<i64>,
    pub(crate) rows: Vec<MarkRow>,
}

/// Working copy of one marks entry. Local edits move it to `Editing`, after
/// which remote snapshots only refresh the read-only reference; a successful
/// save holds them off for the grace window.
#[derive(Debug)]
pub(crate) struct EditSession {
    grace: Duration,
    key: Option<EntryKey>,
    generation: u64,
    loaded: bool,
    state: GuardState,
    rows: Vec<MarkRow>,
    reference: Option<MarksEntry>,
    base_revision: Option<i64>,
    table: GradeTable,
    subject: Option<ExamSubject>,
    pending_import: Option<ImportPreview>,
    /// A snapshot was suppressed or lost, so the rows may trail the store.
    missed_snapshot: bool,
}

impl EditSession {
    pub(crate) fn new(grace: Duration) -> Self {
        Self {
            grace,
            key: None,
            generation: 0,
            loaded: false,
            state: GuardState::Idle,
            rows: Vec::new(),
            reference: None,
            base_revision: None,
            table: GradeTable::default(),
            subject: None,
            pending_import: None,
            missed_snapshot: false,
        }
    }

    pub(crate) fn key(&self) -> Option<&EntryKey> {
        self.key.as_ref()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub(crate) fn rows(&self) -> &[MarkRow] {
        &self.rows
    }

    /// Last stored version of the entry, if one exists.
    pub(crate) fn reference(&self) -> Option<&MarksEntry> {
        self.reference.as_ref()
    }

    pub(crate) fn table(&self) -> &GradeTable {
        &self.table
    }

    pub(crate) fn subject(&self) -> Option<&ExamSubject> {
        self.subject.as_ref()
    }

    pub(crate) fn assessment(&self) -> AssessmentType {
        self.subject.as_ref().map(|subject| subject.assessment_type).unwrap_or_default()
    }

    pub(crate) fn subject_name(&self) -> &str {
        self.subject.as_ref().map(|subject| subject.subject_name.as_str()).unwrap_or_default()
    }

    pub(crate) fn pending_import(&self) -> Option<&ImportPreview> {
        self.pending_import.as_ref()
    }

    pub(crate) fn state(&mut self, now: Instant) -> GuardState {
        self.settle(now);
        self.state
    }

    pub(crate) fn is_editing(&self) -> bool {
        match self.state {
            GuardState::Idle => false,
            GuardState::Editing => true,
            GuardState::Saving { edited } | GuardState::Settling { edited, .. } => edited,
        }
    }

    /// Switches to `key`. Pending loads and imports for the previous key become stale.
    pub(crate) fn select(&mut self, key: EntryKey) -> u64 {
        self.generation += 1;
        self.key = Some(key);
        self.loaded = false;
        self.state = GuardState::Idle;
        self.rows.clear();
        self.reference = None;
        self.base_revision = None;
        self.table = GradeTable::default();
        self.subject = None;
        self.pending_import = None;
        self.missed_snapshot = false;
        self.generation
    }

    pub(crate) fn finish_load(&mut self, loaded: LoadedEntry) -> Result<(), MarksError> {
        if loaded.generation != self.generation || self.key.is_none() {
            return Err(MarksError::Stale);
        }

        self.table = loaded.table;
        self.subject = Some(loaded.subject);
        match loaded.entry {
            Some(entry) => self.replace_from(entry),
            None => {
                self.rows = loaded.roster;
                self.reference = None;
                self.base_revision = None;
            }
        }
        self.loaded = true;
        self.state = GuardState::Idle;
        self.missed_snapshot = false;
        Ok(())
    }

    pub(crate) fn edit_mark(
        &mut self,
        actor: &Actor,
        student_id: &str,
        field: MarkField,
        value: Option<f64>,
    ) -> Result<&MarkRow, MarksError> {
        self.ensure_editable(actor)?;
        if self.assessment() == AssessmentType::Grade {
            return Err(MarksError::Validation("This subject is graded without marks".into()));
        }
        let index = self.row_index(student_id)?;
        mark_rows::apply_mark_edit(&mut self.rows[index], field, value, &self.table)?;
        self.mark_dirty();
        Ok(&self.rows[index])
    }

    pub(crate) fn toggle_absent(
        &mut self,
        actor: &Actor,
        student_id: &str,
    ) -> Result<&MarkRow, MarksError> {
        self.ensure_editable(actor)?;
        let index = self.row_index(student_id)?;
        let assessment = self.assessment();
        mark_rows::toggle_absent(&mut self.rows[index], &self.table, assessment)?;
        self.mark_dirty();
        Ok(&self.rows[index])
    }

    pub(crate) fn toggle_na(
        &mut self,
        actor: &Actor,
        student_id: &str,
    ) -> Result<&MarkRow, MarksError> {
        self.ensure_editable(actor)?;
        let index = self.row_index(student_id)?;
        let assessment = self.assessment();
        mark_rows::toggle_na(&mut self.rows[index], &self.table, assessment)?;
        self.mark_dirty();
        Ok(&self.rows[index])
    }

    pub(crate) fn set_grade(
        &mut self,
        actor: &Actor,
        student_id: &str,
        grade: Option<&str>,
    ) -> Result<&MarkRow, MarksError> {
        self.ensure_editable(actor)?;
        if self.assessment() != AssessmentType::Grade {
            return Err(MarksError::Validation("This subject's grades come from marks".into()));
        }
        let index = self.row_index(student_id)?;
        mark_rows::set_grade(&mut self.rows[index], grade)?;
        self.mark_dirty();
        Ok(&self.rows[index])
    }

    pub(crate) fn set_remarks(
        &mut self,
        actor: &Actor,
        student_id: &str,
        remarks: Option<String>,
    ) -> Result<&MarkRow, MarksError> {
        self.ensure_editable(actor)?;
        let index = self.row_index(student_id)?;
        mark_rows::set_remarks(&mut self.rows[index], remarks);
        self.mark_dirty();
        Ok(&self.rows[index])
    }

    /// Holds a preview for review. Previews computed against an older selection are dropped.
    pub(crate) fn stage_import(
        &mut self,
        generation: u64,
        preview: ImportPreview,
    ) -> Result<&ImportPreview, MarksError> {
        if generation != self.generation {
            return Err(MarksError::Stale);
        }
        let staged = self.pending_import.insert(preview);
        Ok(&*staged)
    }

    pub(crate) fn confirm_import(&mut self, actor: &Actor) -> Result<usize, MarksError> {
        self.ensure_editable(actor)?;
        if self.assessment() == AssessmentType::Grade {
            return Err(MarksError::Validation("Graded subjects do not take imports".into()));
        }
        let preview = self
            .pending_import
            .take()
            .ok_or_else(|| MarksError::NotFound("No import is waiting for confirmation".into()))?;

        let applied = import_reconcile::confirm(&mut self.rows, &preview.matches, &self.table);
        if applied > 0 {
            self.mark_dirty();
        }
        Ok(applied)
    }

    pub(crate) fn discard_import(&mut self) -> bool {
        self.pending_import.take().is_some()
    }

    pub(crate) fn begin_save(&mut self, now: Instant) -> Result<SaveTicket, MarksError> {
        self.settle(now);
        let (Some(key), Some(subject)) = (self.key.clone(), self.subject.clone()) else {
            return Err(MarksError::Validation("Select exam, class and subject first".into()));
        };
        if !self.loaded {
            return Err(MarksError::Validation("Marks are still loading".into()));
        }
        if self.rows.is_empty() {
            return Err(MarksError::Validation("No students found for this class".into()));
        }
        if matches!(self.state, GuardState::Saving { .. }) {
            return Err(MarksError::SaveInProgress);
        }

        let edited = self.is_editing();
        self.state = GuardState::Saving { edited: false };
        tracing::debug!(generation = self.generation, edited, "Save started");

        Ok(SaveTicket {
            generation: self.generation,
            key,
            subject,
            base_revision: self.base_revision,
            rows: self.rows.clone(),
        })
    }

    /// Completes a save. `Ok` carries the stored entry; on `Err` local rows are kept.
    pub(crate) fn finish_save(
        &mut self,
        generation: u64,
        outcome: Result<MarksEntry, ()>,
        now: Instant,
    ) {
        if generation != self.generation {
            return;
        }
        let GuardState::Saving { edited } = self.state else {
            return;
        };

        match outcome {
            Ok(entry) => {
                self.base_revision = Some(entry.revision);
                self.reference = Some(entry);
                self.state = GuardState::Settling { until: now + self.grace, edited };
            }
            Err(()) => self.state = GuardState::Editing,
        }
    }

    pub(crate) fn on_remote_snapshot(&mut self, entry: &MarksEntry, now: Instant) -> RemoteOutcome {
        if !self.loaded || self.key.as_ref() != Some(&entry.key()) {
            return RemoteOutcome::IgnoredOtherKey;
        }

        self.settle(now);
        match self.state {
            GuardState::Saving { .. } | GuardState::Settling { .. } => {
                self.missed_snapshot = true;
                RemoteOutcome::Suppressed
            }
            GuardState::Editing => {
                self.reference = Some(entry.clone());
                RemoteOutcome::ReferenceOnly
            }
            GuardState::Idle => {
                self.replace_from(entry.clone());
                self.pending_import = None;
                RemoteOutcome::Applied
            }
        }
    }

    /// Records that the snapshot stream dropped messages for this session.
    pub(crate) fn mark_missed(&mut self) {
        if self.loaded {
            self.missed_snapshot = true;
        }
    }

    /// When the store should be re-read to catch up on missed snapshots.
    pub(crate) fn resync_due(&mut self, now: Instant) -> Option<Instant> {
        self.settle(now);
        if !self.missed_snapshot || !self.loaded {
            return None;
        }
        match self.state {
            // The save's own snapshot wakes the forwarder again.
            GuardState::Saving { .. } => None,
            GuardState::Settling { until, .. } => Some(until),
            GuardState::Idle | GuardState::Editing => Some(now),
        }
    }

    /// Applies a fresh read of `key` as if it had arrived as a snapshot.
    /// Returns `None` when the read was not used.
    pub(crate) fn resync(
        &mut self,
        key: &EntryKey,
        entry: Option<MarksEntry>,
        now: Instant,
    ) -> Option<RemoteOutcome> {
        self.settle(now);
        if self.key.as_ref() != Some(key)
            || matches!(self.state, GuardState::Saving { .. } | GuardState::Settling { .. })
        {
            return None;
        }
        self.missed_snapshot = false;
        entry.map(|entry| self.on_remote_snapshot(&entry, now))
    }

    fn replace_from(&mut self, entry: MarksEntry) {
        let assessment = self.assessment();
        let mut rows = entry.rows.0.clone();
        for row in &mut rows {
            mark_rows::regrade_for(row, &self.table, assessment);
        }
        self.rows = rows;
        self.base_revision = Some(entry.revision);
        self.reference = Some(entry);
    }

    fn mark_dirty(&mut self) {
        self.state = match self.state {
            GuardState::Idle | GuardState::Editing => GuardState::Editing,
            GuardState::Saving { .. } => GuardState::Saving { edited: true },
            GuardState::Settling { until, .. } => GuardState::Settling { until, edited: true },
        };
    }

    fn settle(&mut self, now: Instant) {
        if let GuardState::Settling { until, edited } = self.state {
            if now >= until {
                self.state = if edited { GuardState::Editing } else { GuardState::Idle };
            }
        }
    }

    fn ensure_editable(&self, actor: &Actor) -> Result<(), MarksError> {
        if self.key.is_none() || !self.loaded {
            return Err(MarksError::Validation("Select exam, class and subject first".into()));
        }
        if can_edit(self.reference.as_ref(), actor) {
            return Ok(());
        }
        match self.reference.as_ref().map(|entry| entry.is_locked) {
            Some(false) => Err(MarksError::Transition(TransitionError::NotOwner)),
            _ => Err(MarksError::Locked),
        }
    }

    fn row_index(&self, student_id: &str) -> Result<usize, MarksError> {
        self.rows
            .iter()
            .position(|row| row.student_id == student_id)
            .ok_or_else(|| MarksError::NotFound(format!("Student {student_id} is not in this entry")))
    }
}
