//! Database statistics and the text status report

use crate::index::IndexStats;
use crate::transaction::TransactionStats;
use serde::Serialize;

/// Per-collection statistics
#[derive(Debug, Clone, Serialize)]
pub struct CollectionStats {
    pub name: String,
    pub documents: usize,
    pub indexes: Vec<IndexStats>,
    /// Bumped on every committed change
    pub version: u64,
}

/// Snapshot of a database's state
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    pub name: String,
    pub collections: Vec<CollectionStats>,
    pub total_documents: usize,
    pub total_indexes: usize,
    pub transactions: TransactionStats,
    pub stored_functions: Vec<String>,
    /// Write-ahead log file, if the database is persistent
    pub wal_path: Option<String>,
    pub uptime_seconds: u64,
}

impl DatabaseStats {
    pub fn collection(&self, name: &str) -> Option<&CollectionStats> {
        self.collections.iter().find(|c| c.name == name)
    }

    /// Format as a boxed report for the terminal
    pub fn format_report(&self) -> String {
        let mut output = String::new();

        output.push_str("╔══════════════════════════════════════════════════════════════╗\n");
        output.push_str(&format!("║ {} ║\n", center(&format!("DATABASE {}", self.name.to_uppercase()), 60)));
        output.push_str("╚══════════════════════════════════════════════════════════════╝\n\n");

        output.push_str(&format!("⏱  Uptime: {}\n", format_duration(self.uptime_seconds)));
        match &self.wal_path {
            Some(path) => output.push_str(&format!("   Log:    {}\n\n", path)),
            None => output.push_str("   Log:    (in memory)\n\n"),
        }

        output.push_str("┌─ COLLECTIONS ───────────────────────────────────────────────┐\n");
        if self.collections.is_empty() {
            output.push_str(&format!("│ {} │\n", pad_right("(none)", 59)));
        }
        for collection in &self.collections {
            let line = format!(
                "{:<16} {:>8} docs  {:>3} indexes  {}",
                collection.name,
                collection.documents,
                collection.indexes.len(),
                format_bar(collection.documents, self.total_documents, 12)
            );
            output.push_str(&format!("│ {} │\n", pad_right(&line, 59)));
        }
        output.push_str(&format!(
            "│ {} │\n",
            pad_right(
                &format!("Total: {} documents, {} indexes", self.total_documents, self.total_indexes),
                59
            )
        ));
        output.push_str("└─────────────────────────────────────────────────────────────┘\n\n");

        output.push_str("┌─ TRANSACTIONS ──────────────────────────────────────────────┐\n");
        let t = &self.transactions;
        for (label, value) in [
            ("Active:", t.active as u64),
            ("Started:", t.started),
            ("Committed:", t.committed),
            ("Aborted:", t.aborted),
            ("Conflicts:", t.write_conflicts),
        ] {
            output.push_str(&format!("│ {} │\n", pad_right(&format!("{:<12} {:>10}", label, value), 59)));
        }
        output.push_str("└─────────────────────────────────────────────────────────────┘\n\n");

        output.push_str("┌─ STORED FUNCTIONS ──────────────────────────────────────────┐\n");
        if self.stored_functions.is_empty() {
            output.push_str(&format!("│ {} │\n", pad_right("(none)", 59)));
        }
        for name in &self.stored_functions {
            output.push_str(&format!("│ {} │\n", pad_right(name, 59)));
        }
        output.push_str("└─────────────────────────────────────────────────────────────┘\n");

        output
    }
}

fn format_duration(seconds: u64) -> String {
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, minutes, secs)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

fn format_bar(value: usize, max: usize, width: usize) -> String {
    let filled = if max > 0 { (value * width) / max } else { 0 };

    let mut bar = String::with_capacity(width + 2);
    bar.push('[');
    for i in 0..width {
        bar.push(if i < filled { '█' } else { '░' });
    }
    bar.push(']');
    bar
}

// Widths count chars, not bytes; names here carry accents
fn pad_right(s: &str, width: usize) -> String {
    let len = s.chars().count();
    if len >= width {
        s.chars().take(width).collect()
    } else {
        format!("{}{}", s, " ".repeat(width - len))
    }
}

fn center(s: &str, width: usize) -> String {
    let len = s.chars().count();
    if len >= width {
        return pad_right(s, width);
    }
    let left = (width - len) / 2;
    pad_right(&format!("{}{}", " ".repeat(left), s), width)
}
