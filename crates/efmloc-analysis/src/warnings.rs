//! Per-run accumulation of data-quality warnings. Individual occurrences are
//! cheap counter bumps; the totals are logged once at the end of a run.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the data-quality issues the pipeline tolerates.
#[derive(Debug, Default)]
pub struct WarningCounter {
    short_flow_paths: AtomicU64,
    negative_measurements: AtomicU64,
    negative_ping_values: AtomicU64,
    dropped_combined_rows: AtomicU64,
    dropped_solver_rows: AtomicU64,
    skipped_method_runs: AtomicU64,
}

impl WarningCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A flow path shorter than two nodes; the flow is unusable.
    pub fn note_short_flow_path(&self) {
        self.short_flow_paths.fetch_add(1, Ordering::Relaxed);
    }

    /// A negative loss-rate measurement corrected to zero.
    pub fn note_negative_measurement(&self) {
        self.negative_measurements.fetch_add(1, Ordering::Relaxed);
    }

    /// A negative ping loss or delay passed through unchanged.
    pub fn note_negative_ping_value(&self) {
        self.negative_ping_values.fetch_add(1, Ordering::Relaxed);
    }

    /// A combined-flow row dropped (negative difference, inconsistent packet
    /// baseline, or non-nested coverage).
    pub fn note_dropped_combined_row(&self) {
        self.dropped_combined_rows.fetch_add(1, Ordering::Relaxed);
    }

    /// A solver row dropped (loss rate at or above 100%).
    pub fn note_dropped_solver_row(&self) {
        self.dropped_solver_rows.fetch_add(1, Ordering::Relaxed);
    }

    /// A method invocation skipped for lack of input.
    pub fn note_skipped_method(&self) {
        self.skipped_method_runs.fetch_add(1, Ordering::Relaxed);
    }

    /// Logs every non-zero counter. Called once per run.
    pub fn log_summary(&self) {
        let entries = [
            ("flow paths shorter than two nodes", &self.short_flow_paths),
            (
                "negative measurements corrected to zero",
                &self.negative_measurements,
            ),
            (
                "negative ping values passed through",
                &self.negative_ping_values,
            ),
            ("combined-flow rows dropped", &self.dropped_combined_rows),
            ("solver rows dropped", &self.dropped_solver_rows),
            ("method runs skipped for lack of input", &self.skipped_method_runs),
        ];
        for (what, counter) in entries {
            let count = counter.load(Ordering::Relaxed);
            if count > 0 {
                log::warn!("{count} {what}");
            }
        }
    }
}
