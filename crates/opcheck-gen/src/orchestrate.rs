//! Batch orchestration: one mnemonic at a time, one worker per encoding.
//!
//! Workers pull encoding indices from an atomic cursor and append finished
//! groups to a single mutex-guarded list; deterministic output order is
//! re-established afterwards by a stable sort on `(operand_width, bytes)`.
//! No error crosses a worker: a failed encoding degrades coverage and is
//! logged, nothing more.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use opcheck_exec::ScopedContext;
use opcheck_isa::{decode, enumerate, mnemonic_name, DecodeMode, Mnemonic};

use crate::classify::classify;
use crate::matrix::build_matrix;
use crate::record::TestGroup;
use crate::report::{MnemonicSummary, RunReport};
use crate::search;
use crate::serialize;
use crate::GenError;

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub output_dir: PathBuf,
    pub threads: usize,
    /// Case-insensitive substring filter over mnemonic names.
    pub filter: Option<String>,
    pub report_path: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("testdata"),
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            filter: None,
            report_path: None,
        }
    }
}

impl RunConfig {
    /// Environment-driven configuration:
    /// `OPCHECK_OUTPUT_DIR`, `OPCHECK_THREADS`, `OPCHECK_FILTER`,
    /// `OPCHECK_REPORT_PATH`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(dir) = std::env::var_os("OPCHECK_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(threads) = std::env::var("OPCHECK_THREADS")
            .ok()
            .and_then(|v| parse_count(&v))
        {
            config.threads = threads;
        }
        config.filter = std::env::var("OPCHECK_FILTER")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        config.report_path = std::env::var_os("OPCHECK_REPORT_PATH").map(PathBuf::from);
        config
    }

    fn matches_filter(&self, mnemonic: Mnemonic) -> bool {
        match &self.filter {
            None => true,
            Some(filter) => mnemonic_name(mnemonic).contains(&filter.to_ascii_lowercase()),
        }
    }
}

/// Lenient count parsing: whitespace and `_` separators are tolerated so
/// the in-code default can be copied verbatim.
fn parse_count(input: &str) -> Option<usize> {
    let cleaned: String = input.trim().chars().filter(|c| *c != '_').collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<usize>().ok().filter(|n| *n > 0)
}

pub fn output_path_for(output_dir: &Path, mnemonic: Mnemonic) -> PathBuf {
    output_dir.join(format!("{}.txt", mnemonic_name(mnemonic).to_uppercase()))
}

struct EncodingResult {
    group: Option<TestGroup>,
    impossible_cells: usize,
    illegal: bool,
}

fn process_encoding(
    mode: DecodeMode,
    bytes: &[u8],
    slot: usize,
) -> Result<EncodingResult, GenError> {
    let summary = decode::summarize(mode, 0, bytes)?;
    let classified = classify(&summary);
    let matrix = build_matrix(&summary, &classified);

    let mut ctx = ScopedContext::new(mode, bytes, slot)?;
    let max_attempts = search::max_attempts_for(&summary);
    let outcome = search::run_search(&summary, &classified, &matrix, &mut ctx, max_attempts)?;

    let mut group = TestGroup {
        address: ctx.code_address(),
        bytes: bytes.to_vec(),
        operand_width: summary.operand_width,
        entries: outcome.entries,
        illegal: outcome.illegal,
    };
    group.finalize();

    let illegal = group.illegal;
    Ok(EncodingResult {
        group: group.is_publishable().then_some(group),
        impossible_cells: outcome.impossible_cells,
        illegal,
    })
}

/// Generate and serialize the vector file for one mnemonic.
pub fn generate_mnemonic(
    config: &RunConfig,
    mode: DecodeMode,
    mnemonic: Mnemonic,
) -> Result<MnemonicSummary, GenError> {
    let name = mnemonic_name(mnemonic);
    let path = output_path_for(&config.output_dir, mnemonic);

    // Release runs resume where they left off; debug runs always rebuild.
    if !cfg!(debug_assertions) && path.exists() {
        tracing::info!(mnemonic = %name, "output exists, skipping");
        return Ok(MnemonicSummary {
            mnemonic: name,
            skipped: true,
            ..Default::default()
        });
    }

    let encodings = enumerate::enumerate_mnemonic(mode, mnemonic);
    tracing::info!(mnemonic = %name, encodings = encodings.len(), "generating");

    let groups: Mutex<Vec<TestGroup>> = Mutex::new(Vec::new());
    let cursor = AtomicUsize::new(0);
    let progress = AtomicUsize::new(0);
    let impossible_cells = AtomicUsize::new(0);
    let illegal_encodings = AtomicUsize::new(0);

    let workers = config.threads.max(1).min(encodings.len().max(1));
    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let index = cursor.fetch_add(1, Ordering::Relaxed);
                let Some(bytes) = encodings.get(index) else {
                    break;
                };

                match process_encoding(mode, bytes, index) {
                    Ok(result) => {
                        impossible_cells.fetch_add(result.impossible_cells, Ordering::Relaxed);
                        if result.illegal {
                            illegal_encodings.fetch_add(1, Ordering::Relaxed);
                        }
                        if let Some(group) = result.group {
                            groups
                                .lock()
                                .unwrap_or_else(std::sync::PoisonError::into_inner)
                                .push(group);
                        }
                    }
                    Err(err) => {
                        tracing::warn!(bytes = %serialize::hex_encode(bytes), %err, "encoding abandoned");
                    }
                }

                let done = progress.fetch_add(1, Ordering::Relaxed) + 1;
                if done % 64 == 0 {
                    tracing::debug!(done, total = encodings.len(), "progress");
                }
            });
        }
    });

    let mut groups = groups
        .into_inner()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    groups.sort_by(|a, b| {
        a.operand_width
            .cmp(&b.operand_width)
            .then_with(|| a.bytes.cmp(&b.bytes))
    });

    let entries = groups.iter().map(|g| g.entries.len()).sum();
    if !groups.is_empty() {
        serialize::write_groups(&path, mode, &groups)?;
    }

    Ok(MnemonicSummary {
        mnemonic: name,
        encodings: encodings.len(),
        groups: groups.len(),
        entries,
        impossible_cells: impossible_cells.into_inner(),
        illegal_encodings: illegal_encodings.into_inner(),
        skipped: false,
        failed: false,
    })
}

/// Run the whole batch. Per-mnemonic failures are recorded and do not stop
/// the run.
pub fn run(config: &RunConfig, mode: DecodeMode, mnemonics: &[Mnemonic]) -> RunReport {
    let mut report = RunReport::default();
    for &mnemonic in mnemonics {
        if !config.matches_filter(mnemonic) {
            continue;
        }
        match generate_mnemonic(config, mode, mnemonic) {
            Ok(summary) => report.push(summary),
            Err(err) => {
                tracing::error!(mnemonic = %mnemonic_name(mnemonic), %err, "mnemonic failed");
                report.push(MnemonicSummary {
                    mnemonic: mnemonic_name(mnemonic),
                    failed: true,
                    ..Default::default()
                });
            }
        }
    }

    if let Some(path) = &config.report_path {
        if let Err(err) = report.write_json(path) {
            tracing::error!(%err, "failed to write run report");
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn count_parsing_is_lenient() {
        assert_eq!(parse_count("8"), Some(8));
        assert_eq!(parse_count(" 1_000 "), Some(1000));
        assert_eq!(parse_count(""), None);
        assert_eq!(parse_count("0"), None);
        assert_eq!(parse_count("x"), None);
    }

    #[test]
    fn output_paths_are_uppercase() {
        let path = output_path_for(Path::new("testdata"), Mnemonic::Xor);
        assert_eq!(path, PathBuf::from("testdata/XOR.txt"));
    }

    #[test]
    fn filter_matches_substrings_case_insensitively() {
        let config = RunConfig {
            filter: Some("XO".to_string()),
            ..Default::default()
        };
        assert!(config.matches_filter(Mnemonic::Xor));
        assert!(!config.matches_filter(Mnemonic::Add));

        let open = RunConfig::default();
        assert!(open.matches_filter(Mnemonic::Add));
    }
}
