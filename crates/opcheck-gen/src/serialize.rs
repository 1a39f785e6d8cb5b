//! Text serialization of observation records.
//!
//! One file per mnemonic. Each group contributes a header line followed by
//! one line per entry:
//!
//! ```text
//! instr:0x<addr>;#<bytes>;<disasm>;<entry-count>
//!  in:rax:#0807060504030201,flags:#d4000000|out:rax:#0000000000000000,flags:#46000000
//! ```
//!
//! Hex inside `#...` fields is lowercase and byte-wise; the flags fields are
//! the 4-byte little-endian rendering of the 32-bit flag words.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

use opcheck_isa::{decode, DecodeMode};

use crate::record::{TestEntry, TestGroup};

pub fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn format_entry(line: &mut String, entry: &TestEntry) {
    line.push_str(" in:");
    let mut num_in = 0usize;
    for (slot, data) in &entry.input_regs {
        let sep = if num_in > 0 { "," } else { "" };
        let _ = write!(line, "{sep}{}:#{}", slot.name(), hex_encode(data));
        num_in += 1;
    }
    if let Some(input_flags) = entry.input_flags {
        let sep = if num_in > 0 { "," } else { "" };
        let _ = write!(line, "{sep}flags:#{}", hex_encode(&input_flags.to_le_bytes()));
        num_in += 1;
    }

    let sep = if num_in > 0 { "|" } else { "" };
    let _ = write!(line, "{sep}out:");
    let mut num_out = 0usize;
    for (slot, data) in &entry.output_regs {
        let sep = if num_out > 0 { "," } else { "" };
        let _ = write!(line, "{sep}{}:#{}", slot.name(), hex_encode(data));
        num_out += 1;
    }
    if let Some(output_flags) = entry.output_flags {
        let sep = if num_out > 0 { "," } else { "" };
        let _ = write!(
            line,
            "{sep}flags:#{}",
            hex_encode(&output_flags.to_le_bytes())
        );
    }

    if let Some(exception) = entry.exception {
        let _ = write!(line, "|exception:{}", exception.as_str());
    }
    line.push('\n');
}

/// Render all groups of one mnemonic into the file contents.
pub fn format_groups(mode: DecodeMode, groups: &[TestGroup]) -> String {
    let mut out = String::new();
    for group in groups {
        let disasm = decode::summarize(mode, group.address, &group.bytes)
            .map(|summary| decode::disassemble(&summary.instruction))
            .unwrap_or_else(|_| "(undecodable)".to_string());
        let _ = writeln!(
            out,
            "instr:0x{:X};#{};{};{}",
            group.address,
            hex_encode(&group.bytes),
            disasm,
            group.entries.len()
        );
        for entry in &group.entries {
            format_entry(&mut out, entry);
        }
    }
    out
}

/// Write the per-mnemonic vector file.
pub fn write_groups(path: &Path, mode: DecodeMode, groups: &[TestGroup]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format_groups(mode, groups))
}
