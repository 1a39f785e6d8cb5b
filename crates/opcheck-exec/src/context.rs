//! Scoped execution context for one instruction.
//!
//! A [`ScopedContext`] owns an executable code page holding a small
//! trampoline around the instruction under test:
//!
//! ```text
//! entry:  mov rax, <state>          ; load the guest register bank
//!         mov rbx, [rax+0x08] ... mov r15, [rax+0x68]
//!         push qword [rax+0x70]
//!         popfq
//!         mov rax, [rax+0x00]
//! code:   <instruction bytes>
//! resume: pushfq                    ; store the guest register bank back
//!         push rax
//!         mov rax, <state>
//!         pop qword [rax+0x00]
//!         mov [rax+0x08], rbx ... mov [rax+0x68], r15
//!         pop qword [rax+0x70]
//!         ret
//! ```
//!
//! A faulting instruction is intercepted by the signal layer and resumes at
//! `resume`, so the context survives `#DE`/`#UD`/memory faults and reports
//! them as an [`ExecutionStatus`]. The register bank address is baked into
//! the trampoline as an immediate, so the bank is boxed and never moves.
//!
//! Code pages are mapped at fixed, slot-derived addresses so that the
//! recorded code address of an encoding does not depend on scheduling.

use iced_x86::{Code, Encoder, IcedError, Instruction, MemoryOperand, Register};
use thiserror::Error;

use opcheck_isa::{DecodeMode, MAX_INSTRUCTION_LEN};

#[cfg(all(target_arch = "x86_64", target_os = "linux"))]
use crate::signals;
use crate::status::ExecutionStatus;

const PAGE_LEN: usize = 4096;
const CODE_REGION_BASE: u64 = 0x5F00_0000_0000;
const CODE_SLOT_STRIDE: u64 = 0x1_0000;

/// Offsets into [`GuestState`], also baked into the trampoline.
const RFLAGS_OFFSET: i64 = 0x70;
const GPR_SLOTS: [(Register, i64); 14] = [
    (Register::RAX, 0x00),
    (Register::RBX, 0x08),
    (Register::RCX, 0x10),
    (Register::RDX, 0x18),
    (Register::RSI, 0x20),
    (Register::RDI, 0x28),
    (Register::R8, 0x30),
    (Register::R9, 0x38),
    (Register::R10, 0x40),
    (Register::R11, 0x48),
    (Register::R12, 0x50),
    (Register::R13, 0x58),
    (Register::R14, 0x60),
    (Register::R15, 0x68),
];

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("sandbox only supports 64-bit mode, got {0:?}")]
    UnsupportedMode(DecodeMode),

    #[error("instruction must be 1..={MAX_INSTRUCTION_LEN} bytes, got {0}")]
    CodeRejected(usize),

    #[error("failed to emit sandbox trampoline: {0}")]
    Emit(#[from] IcedError),

    #[error("mapping a code page at {address:#x} failed (errno {errno})")]
    MapFailed { address: u64, errno: i32 },

    #[error("{0:?} is not a sandboxed root register")]
    UnsupportedRegister(Register),

    #[error("{reg:?} takes {expected} bytes, got {got}")]
    RegisterWidth {
        reg: Register,
        expected: usize,
        got: usize,
    },

    #[error("native execution requires an x86_64 linux host")]
    UnsupportedHost,
}

/// The guest register bank. `#[repr(C)]` field order must match
/// [`GPR_SLOTS`] and [`RFLAGS_OFFSET`].
#[repr(C)]
#[derive(Clone, Debug, Default)]
struct GuestState {
    rax: u64,
    rbx: u64,
    rcx: u64,
    rdx: u64,
    rsi: u64,
    rdi: u64,
    r8: u64,
    r9: u64,
    r10: u64,
    r11: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
    rflags: u64,
}

impl GuestState {
    fn gpr(&self, reg: Register) -> Option<u64> {
        Some(match reg {
            Register::RAX => self.rax,
            Register::RBX => self.rbx,
            Register::RCX => self.rcx,
            Register::RDX => self.rdx,
            Register::RSI => self.rsi,
            Register::RDI => self.rdi,
            Register::R8 => self.r8,
            Register::R9 => self.r9,
            Register::R10 => self.r10,
            Register::R11 => self.r11,
            Register::R12 => self.r12,
            Register::R13 => self.r13,
            Register::R14 => self.r14,
            Register::R15 => self.r15,
            _ => return None,
        })
    }

    fn gpr_mut(&mut self, reg: Register) -> Option<&mut u64> {
        Some(match reg {
            Register::RAX => &mut self.rax,
            Register::RBX => &mut self.rbx,
            Register::RCX => &mut self.rcx,
            Register::RDX => &mut self.rdx,
            Register::RSI => &mut self.rsi,
            Register::RDI => &mut self.rdi,
            Register::R8 => &mut self.r8,
            Register::R9 => &mut self.r9,
            Register::R10 => &mut self.r10,
            Register::R11 => &mut self.r11,
            Register::R12 => &mut self.r12,
            Register::R13 => &mut self.r13,
            Register::R14 => &mut self.r14,
            Register::R15 => &mut self.r15,
            _ => return None,
        })
    }
}

struct Trampoline {
    code: Vec<u8>,
    guest_offset: usize,
}

fn state_slot(offset: i64) -> MemoryOperand {
    MemoryOperand::with_base_displ(Register::RAX, offset)
}

fn encode_sequence(instructions: &[Instruction]) -> Result<Vec<u8>, IcedError> {
    let mut encoder = Encoder::new(64);
    for instruction in instructions {
        encoder.encode(instruction, 0)?;
    }
    Ok(encoder.take_buffer())
}

fn emit_trampoline(state_addr: u64, guest_code: &[u8]) -> Result<Trampoline, IcedError> {
    let mut prologue = Vec::with_capacity(GPR_SLOTS.len() + 3);
    prologue.push(Instruction::with2(
        Code::Mov_r64_imm64,
        Register::RAX,
        state_addr,
    )?);
    for (reg, offset) in GPR_SLOTS.iter().skip(1) {
        prologue.push(Instruction::with2(
            Code::Mov_r64_rm64,
            *reg,
            state_slot(*offset),
        )?);
    }
    prologue.push(Instruction::with1(
        Code::Push_rm64,
        state_slot(RFLAGS_OFFSET),
    )?);
    prologue.push(Instruction::with(Code::Popfq));
    // RAX is loaded last: it doubles as the bank pointer until here.
    prologue.push(Instruction::with2(
        Code::Mov_r64_rm64,
        Register::RAX,
        state_slot(0),
    )?);

    let mut epilogue = vec![
        Instruction::with(Code::Pushfq),
        Instruction::with1(Code::Push_r64, Register::RAX)?,
        Instruction::with2(Code::Mov_r64_imm64, Register::RAX, state_addr)?,
        Instruction::with1(Code::Pop_rm64, state_slot(0))?,
    ];
    for (reg, offset) in GPR_SLOTS.iter().skip(1) {
        epilogue.push(Instruction::with2(
            Code::Mov_rm64_r64,
            state_slot(*offset),
            *reg,
        )?);
    }
    epilogue.push(Instruction::with1(
        Code::Pop_rm64,
        state_slot(RFLAGS_OFFSET),
    )?);
    epilogue.push(Instruction::with(Code::Retnq));

    let prologue = encode_sequence(&prologue)?;
    let epilogue = encode_sequence(&epilogue)?;

    let guest_offset = prologue.len();
    let mut code = prologue;
    code.extend_from_slice(guest_code);
    code.extend_from_slice(&epilogue);
    Ok(Trampoline { code, guest_offset })
}

#[cfg(unix)]
mod page {
    use super::ContextError;

    pub(super) struct CodePage {
        addr: *mut libc::c_void,
        len: usize,
    }

    impl CodePage {
        pub(super) fn map_at(address: u64, len: usize) -> Result<Self, ContextError> {
            let mut flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            #[cfg(target_os = "linux")]
            {
                // Fail instead of landing somewhere else: the recorded code
                // address must be the slot address.
                flags |= libc::MAP_FIXED_NOREPLACE;
            }
            let addr = unsafe {
                libc::mmap(
                    address as *mut libc::c_void,
                    len,
                    libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                    flags,
                    -1,
                    0,
                )
            };
            if addr == libc::MAP_FAILED {
                return Err(ContextError::MapFailed {
                    address,
                    errno: std::io::Error::last_os_error().raw_os_error().unwrap_or(0),
                });
            }
            Ok(Self { addr, len })
        }

        pub(super) fn address(&self) -> u64 {
            self.addr as u64
        }

        pub(super) fn write(&mut self, code: &[u8]) {
            assert!(code.len() <= self.len);
            unsafe {
                std::ptr::copy_nonoverlapping(code.as_ptr(), self.addr as *mut u8, code.len());
            }
        }
    }

    impl Drop for CodePage {
        fn drop(&mut self) {
            unsafe {
                libc::munmap(self.addr, self.len);
            }
        }
    }
}

#[cfg(not(unix))]
mod page {
    use super::ContextError;

    pub(super) struct CodePage;

    impl CodePage {
        pub(super) fn map_at(_address: u64, _len: usize) -> Result<Self, ContextError> {
            Err(ContextError::UnsupportedHost)
        }

        pub(super) fn address(&self) -> u64 {
            0
        }

        pub(super) fn write(&mut self, _code: &[u8]) {}
    }
}

use page::CodePage;

/// One loaded instruction plus a controlled register file, executable once
/// per [`ScopedContext::execute`] call.
pub struct ScopedContext {
    state: Box<GuestState>,
    page: CodePage,
    entry_address: u64,
    code_address: u64,
    resume_address: u64,
    last_status: ExecutionStatus,
}

impl ScopedContext {
    /// Map the code page for `slot` and load `code` into the trampoline.
    ///
    /// Slots partition the fixed code region; callers must not reuse a slot
    /// while another live context occupies it.
    pub fn new(mode: DecodeMode, code: &[u8], slot: usize) -> Result<Self, ContextError> {
        if mode != DecodeMode::Bits64 {
            return Err(ContextError::UnsupportedMode(mode));
        }
        if code.is_empty() || code.len() > MAX_INSTRUCTION_LEN {
            return Err(ContextError::CodeRejected(code.len()));
        }

        let state = Box::new(GuestState::default());
        let state_addr = &*state as *const GuestState as u64;
        let trampoline = emit_trampoline(state_addr, code)?;
        debug_assert!(trampoline.code.len() <= PAGE_LEN);

        let slot_address = CODE_REGION_BASE + slot as u64 * CODE_SLOT_STRIDE;
        let mut page = CodePage::map_at(slot_address, PAGE_LEN)?;
        page.write(&trampoline.code);

        let entry_address = page.address();
        let code_address = entry_address + trampoline.guest_offset as u64;
        let resume_address = code_address + code.len() as u64;

        Ok(Self {
            state,
            page,
            entry_address,
            code_address,
            resume_address,
            last_status: ExecutionStatus::Success,
        })
    }

    /// Address the instruction bytes are loaded at.
    pub fn code_address(&self) -> u64 {
        self.code_address
    }

    /// Write a full root register (8 bytes, little-endian).
    pub fn set_reg_bytes(&mut self, reg: Register, bytes: &[u8]) -> Result<(), ContextError> {
        let slot = self
            .state
            .gpr_mut(reg)
            .ok_or(ContextError::UnsupportedRegister(reg))?;
        if bytes.len() != 8 {
            return Err(ContextError::RegisterWidth {
                reg,
                expected: 8,
                got: bytes.len(),
            });
        }
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        *slot = u64::from_le_bytes(raw);
        Ok(())
    }

    /// Read a full root register (8 bytes, little-endian).
    pub fn reg_bytes(&self, reg: Register) -> Result<[u8; 8], ContextError> {
        self.state
            .gpr(reg)
            .map(u64::to_le_bytes)
            .ok_or(ContextError::UnsupportedRegister(reg))
    }

    pub fn set_reg_u64(&mut self, reg: Register, value: u64) -> Result<(), ContextError> {
        self.set_reg_bytes(reg, &value.to_le_bytes())
    }

    pub fn reg_u64(&self, reg: Register) -> Result<u64, ContextError> {
        self.reg_bytes(reg).map(u64::from_le_bytes)
    }

    pub fn set_flags(&mut self, flags: u32) {
        self.state.rflags = u64::from(flags);
    }

    pub fn flags(&self) -> u32 {
        self.state.rflags as u32
    }

    /// Run the loaded instruction once against the current register file.
    pub fn execute(&mut self) -> Result<ExecutionStatus, ContextError> {
        #[cfg(all(target_arch = "x86_64", target_os = "linux"))]
        {
            signals::install();
            signals::arm(self.resume_address);
            unsafe {
                run_trampoline(self.entry_address);
            }
            let status = match signals::disarm() {
                None => ExecutionStatus::Success,
                Some((signal, code)) => signals::classify(signal, code),
            };
            self.last_status = status;
            Ok(status)
        }

        #[cfg(not(all(target_arch = "x86_64", target_os = "linux")))]
        {
            let _ = &self.entry_address;
            Err(ContextError::UnsupportedHost)
        }
    }

    /// Status of the most recent [`execute`](Self::execute) call.
    pub fn execution_status(&self) -> ExecutionStatus {
        self.last_status
    }
}

/// Call into the trampoline. Every GPR except RSP/RBP is clobbered by the
/// guest; RBX and R15 are preserved manually because the entry pointer
/// travels in R15 and RBX is not available to inline asm on x86-64.
#[cfg(all(target_arch = "x86_64", target_os = "linux"))]
unsafe fn run_trampoline(entry: u64) {
    std::arch::asm!(
        "push rbx",
        "push r15",
        "call r15",
        "pop r15",
        "pop rbx",
        in("r15") entry,
        out("rax") _,
        out("rcx") _,
        out("rdx") _,
        out("rsi") _,
        out("rdi") _,
        out("r8") _,
        out("r9") _,
        out("r10") _,
        out("r11") _,
        out("r12") _,
        out("r13") _,
        out("r14") _,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn guest_state_layout_matches_trampoline_offsets() {
        for (reg, offset) in GPR_SLOTS {
            let field_offset = match reg {
                Register::RAX => std::mem::offset_of!(GuestState, rax),
                Register::RBX => std::mem::offset_of!(GuestState, rbx),
                Register::RCX => std::mem::offset_of!(GuestState, rcx),
                Register::RDX => std::mem::offset_of!(GuestState, rdx),
                Register::RSI => std::mem::offset_of!(GuestState, rsi),
                Register::RDI => std::mem::offset_of!(GuestState, rdi),
                Register::R8 => std::mem::offset_of!(GuestState, r8),
                Register::R9 => std::mem::offset_of!(GuestState, r9),
                Register::R10 => std::mem::offset_of!(GuestState, r10),
                Register::R11 => std::mem::offset_of!(GuestState, r11),
                Register::R12 => std::mem::offset_of!(GuestState, r12),
                Register::R13 => std::mem::offset_of!(GuestState, r13),
                Register::R14 => std::mem::offset_of!(GuestState, r14),
                Register::R15 => std::mem::offset_of!(GuestState, r15),
                _ => unreachable!(),
            };
            assert_eq!(field_offset as i64, offset, "offset of {reg:?}");
        }
        assert_eq!(
            std::mem::offset_of!(GuestState, rflags) as i64,
            RFLAGS_OFFSET
        );
    }

    #[test]
    fn trampoline_embeds_guest_code() {
        let guest = [0x48, 0x89, 0xD8]; // mov rax, rbx
        let trampoline = emit_trampoline(0x1234_5678_9ABC_DEF0, &guest).expect("emit");
        let window = &trampoline.code[trampoline.guest_offset..trampoline.guest_offset + 3];
        assert_eq!(window, &guest);
        assert_eq!(*trampoline.code.last().unwrap(), 0xC3, "must end in ret");
        assert!(trampoline.code.len() <= PAGE_LEN);
    }

    #[test]
    fn sub_registers_are_rejected() {
        let state = GuestState::default();
        assert_eq!(state.gpr(Register::EAX), None);
        assert_eq!(state.gpr(Register::AH), None);
        assert_eq!(state.gpr(Register::RSP), None);
        assert_eq!(state.gpr(Register::RAX), Some(0));
    }
}
