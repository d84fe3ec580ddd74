use std::sync::Arc;

use crate::core::config::Settings;
use crate::services::import_reconcile::ImportColumns;
use crate::services::marks_store::MarksStore;
use crate::services::session_registry::SessionRegistry;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    store: Arc<dyn MarksStore>,
    sessions: SessionRegistry,
    import_columns: ImportColumns,
}

impl AppState {
    pub(crate) fn new(settings: Settings, store: Arc<dyn MarksStore>) -> Self {
        let marks = settings.marks();
        let sessions = SessionRegistry::new(
            store.clone(),
            marks.save_grace(),
            marks.max_open_sessions,
            marks.session_idle_ttl(),
        );
        let import_columns = ImportColumns::from_settings(settings.import());
        Self { inner: Arc::new(InnerState { settings, store, sessions, import_columns }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn store(&self) -> &dyn MarksStore {
        self.inner.store.as_ref()
    }

    pub(crate) fn sessions(&self) -> &SessionRegistry {
        &self.inner.sessions
    }

    pub(crate) fn import_columns(&self) -> &ImportColumns {
        &self.inner.import_columns
    }
}
