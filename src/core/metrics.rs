use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) const ENTRIES_SAVED: &str = "marks_entries_saved_total";
pub(crate) const ENTRIES_REVIEWED: &str = "marks_entries_reviewed_total";
pub(crate) const IMPORT_ROWS: &str = "marks_import_rows_total";
pub(crate) const REMOTE_SNAPSHOTS: &str = "marks_remote_snapshots_total";

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);

    metrics::describe_counter!(ENTRIES_SAVED, "Marks entries persisted by teachers, by status");
    metrics::describe_counter!(ENTRIES_REVIEWED, "Approve/reject decisions on marks entries");
    metrics::describe_counter!(IMPORT_ROWS, "Sheet rows seen by the import preview, by outcome");
    metrics::describe_counter!(
        REMOTE_SNAPSHOTS,
        "Remote snapshots delivered to edit sessions, by guard outcome"
    );

    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}
