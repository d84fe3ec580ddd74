pub(crate) mod errors;
pub(crate) mod guards;
pub(crate) mod handlers;
pub(crate) mod marks_entries;
pub(crate) mod marks_sessions;
pub(crate) mod router;
