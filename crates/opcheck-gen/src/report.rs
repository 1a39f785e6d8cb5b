//! Machine-readable run summary.

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MnemonicSummary {
    pub mnemonic: String,
    pub encodings: usize,
    pub groups: usize,
    pub entries: usize,
    pub impossible_cells: usize,
    pub illegal_encodings: usize,
    pub skipped: bool,
    pub failed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub mnemonics: Vec<MnemonicSummary>,
}

impl RunReport {
    pub fn push(&mut self, summary: MnemonicSummary) {
        self.mnemonics.push(summary);
    }

    pub fn total_entries(&self) -> usize {
        self.mnemonics.iter().map(|m| m.entries).sum()
    }

    pub fn total_groups(&self) -> usize {
        self.mnemonics.iter().map(|m| m.groups).sum()
    }

    pub fn print_summary(&self) {
        let skipped = self.mnemonics.iter().filter(|m| m.skipped).count();
        let failed = self.mnemonics.iter().filter(|m| m.failed).count();
        eprintln!(
            "opcheck: {} mnemonics ({} skipped, {} failed), {} groups, {} entries",
            self.mnemonics.len(),
            skipped,
            failed,
            self.total_groups(),
            self.total_entries()
        );
    }

    pub fn write_json(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        std::fs::write(path, contents)
    }
}
