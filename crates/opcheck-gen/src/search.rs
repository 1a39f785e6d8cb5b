//! Adaptive input search: find, for every coverage cell, an input
//! assignment whose single execution witnesses the cell.
//!
//! Per iteration the driver (1) stages the destination with the *opposite*
//! of the expected bit pattern so a witness can never come from stale
//! state, (2) poisons every read root with `0xCC`, splices the input
//! generators' current patterns into the read views and records the
//! resulting root buffers, (3) executes once and classifies the outcome.
//! Generators advance as a staggered odometer so the registers do not cycle
//! in lockstep.
//!
//! Every failure is local: an exhausted budget skips the cell, an illegal
//! encoding short-circuits the whole group.

use opcheck_exec::{ExecutionStatus, InputGenerator, ScopedContext, XorShift64};
use opcheck_isa::decode::InstrSummary;
use opcheck_isa::{flags, regs};

use crate::classify::Classified;
use crate::matrix::{CellTarget, CoverageCell};
use crate::record::{ExceptionKind, RegSlot, TestEntry};
use crate::GenError;

/// Attempt budget per cell before declaring it probably impossible.
pub const ABORT_THRESHOLD: usize = 100_000;

/// Budget for `summary`: immediate operands shrink the input space, so the
/// budget shrinks with it.
pub fn max_attempts_for(summary: &InstrSummary) -> usize {
    if summary.has_immediate_operand() {
        ABORT_THRESHOLD / 3
    } else {
        ABORT_THRESHOLD
    }
}

#[derive(Debug, Default)]
pub struct SearchOutcome {
    pub entries: Vec<TestEntry>,
    pub illegal: bool,
    /// Cells whose budget ran out without a witness.
    pub impossible_cells: usize,
}

fn make_generators(classified: &Classified, prng: &mut XorShift64) -> Vec<InputGenerator> {
    classified
        .regs_read
        .iter()
        .map(|&reg| InputGenerator::new(regs::width_bits(reg), prng.next_u64()))
        .collect()
}

/// Overwrite the cell's destination with the opposite byte pattern of the
/// target bit and stage the flags likewise, so only the instruction itself
/// can produce the expected observation.
fn stage_anti_witness(ctx: &mut ScopedContext, cell: &CoverageCell) -> Result<(), GenError> {
    if let CellTarget::Reg(reg) = cell.target {
        let root = regs::root_reg(reg);
        let offset = regs::byte_offset(reg);
        let len = regs::width_bytes(reg);
        let fill = if cell.expected_bit == 0 { 0xFF } else { 0x00 };

        let mut buf = [0u8; 8];
        buf[offset..offset + len].fill(fill);
        ctx.set_reg_bytes(root, &buf)?;
    }

    let staged = if cell.expected_bit == 0 { flags::STATUS } else { 0 };
    ctx.set_flags(staged);
    Ok(())
}

/// Poison, fill and record the instruction inputs for one iteration.
fn advance_inputs(
    ctx: &mut ScopedContext,
    prng: &mut XorShift64,
    generators: &mut [InputGenerator],
    classified: &Classified,
    entry: &mut TestEntry,
    iteration: usize,
) -> Result<(), GenError> {
    // 0xCC never occurs in the generator's early phases, so an instruction
    // depending on bytes we did not fill is visible in the recorded vectors.
    let mut roots: Vec<_> = classified
        .regs_read
        .iter()
        .map(|&reg| regs::root_reg(reg))
        .collect();
    roots.sort_by_key(|reg| *reg as u32);
    roots.dedup();
    for root in roots {
        ctx.set_reg_bytes(root, &[0xCC; 8])?;
    }

    for (index, &reg) in classified.regs_read.iter().enumerate() {
        let root = regs::root_reg(reg);
        let offset = regs::byte_offset(reg);
        let len = regs::width_bytes(reg);

        // Seed from the root's current buffer so views sharing a root
        // (al/ah collapsed to ax) keep each other's bytes.
        let mut buf = ctx.reg_bytes(root)?;
        buf[offset..offset + len].copy_from_slice(generators[index].current());
        ctx.set_reg_bytes(root, &buf)?;
        entry.input_regs.insert(RegSlot(root), buf.to_vec());
    }

    // Staggered odometer: once a generator wraps, every third iteration
    // stops the carry so the registers explore the cross-product instead of
    // cycling in lockstep.
    for generator in generators.iter_mut() {
        if generator.advance() && (iteration + 1) % 3 == 0 {
            break;
        }
    }

    if classified.flags_read != 0 {
        let mut drawn = 0u32;
        for bit in 0..32 {
            if classified.flags_read & (1 << bit) != 0 {
                drawn |= prng.next_bit() << bit;
            }
        }
        entry.input_flags = Some(drawn);
        // TF would single-step the sandbox itself; never apply it.
        ctx.set_flags(drawn & !flags::TF);
    }

    Ok(())
}

/// Check the cell's bit after a successful execution and, on a witness,
/// snapshot the instruction outputs into `entry`.
fn check_outputs(
    ctx: &ScopedContext,
    classified: &Classified,
    cell: &CoverageCell,
    entry: &mut TestEntry,
) -> Result<bool, GenError> {
    let observed = match cell.target {
        CellTarget::Reg(reg) => {
            let root = regs::root_reg(reg);
            let data = ctx.reg_bytes(root)?;
            let byte = data[regs::byte_offset(reg) + usize::from(cell.bit_pos / 8)];
            (byte >> (cell.bit_pos % 8)) & 1
        }
        CellTarget::Flags => ((ctx.flags() >> cell.bit_pos) & 1) as u8,
        CellTarget::None => return Ok(false),
    };

    if observed != cell.expected_bit {
        return Ok(false);
    }

    for &reg in &classified.regs_modified {
        let root = regs::root_reg(reg);
        entry
            .output_regs
            .insert(RegSlot(root), ctx.reg_bytes(root)?.to_vec());
    }
    if classified.flags_modified != 0 {
        // IF is the host kernel's business, not the instruction's.
        entry.output_flags = Some(ctx.flags() & !flags::IF);
    }
    Ok(true)
}

/// Run the per-cell search loop over the whole matrix.
pub fn run_search(
    summary: &InstrSummary,
    classified: &Classified,
    matrix: &[CoverageCell],
    ctx: &mut ScopedContext,
    max_attempts: usize,
) -> Result<SearchOutcome, GenError> {
    let mut prng = XorShift64::new(summary.mnemonic as u64);
    let mut outcome = SearchOutcome::default();

    'cells: for cell in matrix {
        let mut entry = TestEntry::default();
        // Fresh generators per cell so cell order does not alias the
        // search space.
        let mut generators = make_generators(classified, &mut prng);

        let mut witnessed = false;
        let mut iteration = 0usize;

        while !witnessed {
            stage_anti_witness(ctx, cell)?;
            advance_inputs(
                ctx,
                &mut prng,
                &mut generators,
                classified,
                &mut entry,
                iteration,
            )?;

            match ctx.execute()? {
                ExecutionStatus::Success => {
                    if cell.exception == ExceptionKind::None {
                        witnessed = check_outputs(ctx, classified, cell, &mut entry)?;
                    }
                }
                ExecutionStatus::DivideError => {
                    if cell.exception == ExceptionKind::DivideError {
                        entry.exception = Some(ExceptionKind::DivideError);
                        witnessed = true;
                    }
                }
                ExecutionStatus::IntegerOverflow => {
                    if cell.exception == ExceptionKind::IntegerOverflow {
                        entry.exception = Some(ExceptionKind::IntegerOverflow);
                        witnessed = true;
                    }
                }
                ExecutionStatus::IllegalInstruction => {
                    tracing::warn!(
                        mnemonic = ?summary.mnemonic,
                        "illegal instruction, dropping the group"
                    );
                    outcome.illegal = true;
                    break 'cells;
                }
                // An unexpected memory fault is an iteration failure.
                ExecutionStatus::MemoryFault => {}
            }

            iteration += 1;
            if iteration > max_attempts {
                tracing::warn!(
                    mnemonic = ?summary.mnemonic,
                    ?cell,
                    "cell probably impossible after {iteration} attempts"
                );
                outcome.impossible_cells += 1;
                break;
            }
        }

        if witnessed {
            outcome.entries.push(entry);
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opcheck_isa::{decode, DecodeMode};
    use pretty_assertions::assert_eq;

    #[test]
    fn immediate_operands_shrink_the_budget() {
        let imm = decode::summarize(DecodeMode::Bits64, 0, &[0xB8, 0x01, 0x00, 0x00, 0x00])
            .expect("decode");
        assert_eq!(max_attempts_for(&imm), ABORT_THRESHOLD / 3);

        let reg = decode::summarize(DecodeMode::Bits64, 0, &[0x31, 0xC0]).expect("decode");
        assert_eq!(max_attempts_for(&reg), ABORT_THRESHOLD);
    }
}
