pub(crate) mod edit_session;
pub(crate) mod entry_workflow;
pub(crate) mod errors;
pub(crate) mod grading;
pub(crate) mod import_reconcile;
pub(crate) mod mark_rows;
pub(crate) mod marks_editor;
pub(crate) mod marks_store;
pub(crate) mod session_registry;
pub(crate) mod template_export;
