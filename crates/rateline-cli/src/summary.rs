//! End-of-run summary display

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Table};
use rateline_core::progress::human_count;
use rateline_mrf::SearchParams;

/// Search totals shown after the pool drains.
pub struct Summary {
    pub searched_files: usize,
    pub matched_files: usize,
    pub failed_files: usize,
    pub rates_found: usize,
    pub duration_seconds: f64,
}

impl Summary {
    pub fn params(&self, npis: Vec<u64>) -> SearchParams {
        SearchParams {
            npis,
            searched_files: self.searched_files,
            matched_files: self.matched_files,
            duration_seconds: self.duration_seconds,
        }
    }

    /// Rich table for interactive terminals.
    pub fn print(&self) {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![Cell::new("Search summary"), Cell::new("")]);
        table.add_row(vec![
            Cell::new("Files searched"),
            Cell::new(human_count(self.searched_files as u64)),
        ]);
        table.add_row(vec![
            Cell::new("Files matched"),
            Cell::new(human_count(self.matched_files as u64)),
        ]);
        if self.failed_files > 0 {
            table.add_row(vec![
                Cell::new("Files failed"),
                Cell::new(human_count(self.failed_files as u64)),
            ]);
        }
        table.add_row(vec![
            Cell::new("Rates found"),
            Cell::new(human_count(self.rates_found as u64)),
        ]);
        table.add_row(vec![
            Cell::new("Duration"),
            Cell::new(format!("{:.1}s", self.duration_seconds)),
        ]);
        eprintln!("{table}");
    }

    /// One-line form for logs.
    pub fn log(&self) {
        log::info!(
            "Search complete: {} files searched, {} matched, {} failed, {} rates found in {:.1}s",
            self.searched_files,
            self.matched_files,
            self.failed_files,
            self.rates_found,
            self.duration_seconds
        );
    }
}
