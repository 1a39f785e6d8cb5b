//! Fault interception for native guest execution.
//!
//! The sandbox runs guest instructions in-process. A faulting instruction
//! (`ud2`, `div` by zero, a stray memory access) raises a synchronous signal
//! on the executing thread; the handler records the signal, rewrites the
//! interrupted RIP to the armed recovery address and returns, so execution
//! resumes in the sandbox epilogue instead of crashing the process.
//!
//! This is the only module that refers to `libc::SIG*`; the rest of the
//! crate stays target-agnostic. On non-unix (or non-x86_64) targets nothing
//! here is used because the sandbox refuses to execute.

#![cfg_attr(not(all(target_arch = "x86_64", target_os = "linux")), allow(dead_code))]

use std::cell::Cell;

use crate::status::ExecutionStatus;

thread_local! {
    /// RIP to resume at when a guest instruction faults; 0 means "not in
    /// guest code" and makes the handler re-raise with the default action.
    static RECOVERY_RIP: Cell<u64> = const { Cell::new(0) };
    static FAULT_SIGNAL: Cell<i32> = const { Cell::new(0) };
    static FAULT_CODE: Cell<i32> = const { Cell::new(0) };
}

/// Arm fault recovery for the current thread before entering guest code.
pub(crate) fn arm(recovery_rip: u64) {
    FAULT_SIGNAL.with(|c| c.set(0));
    FAULT_CODE.with(|c| c.set(0));
    RECOVERY_RIP.with(|c| c.set(recovery_rip));
}

/// Disarm recovery and report the fault observed since [`arm`], if any.
pub(crate) fn disarm() -> Option<(i32, i32)> {
    RECOVERY_RIP.with(|c| c.set(0));
    let signal = FAULT_SIGNAL.with(|c| c.get());
    if signal == 0 {
        None
    } else {
        Some((signal, FAULT_CODE.with(|c| c.get())))
    }
}

#[cfg(all(target_arch = "x86_64", target_os = "linux"))]
pub(crate) use unix_impl::{classify, install, FPE_INTDIV, FPE_INTOVF};

#[cfg(all(target_arch = "x86_64", target_os = "linux"))]
mod unix_impl {
    use super::*;
    use std::sync::Once;

    static INSTALL: Once = Once::new();

    const GUEST_SIGNALS: [i32; 4] = [libc::SIGILL, libc::SIGFPE, libc::SIGSEGV, libc::SIGBUS];

    // Not exposed by the `libc` crate for this target; values are the fixed
    // glibc siginfo si_code constants for SIGFPE (bits/siginfo-consts.h).
    pub(crate) const FPE_INTDIV: libc::c_int = 1;
    pub(crate) const FPE_INTOVF: libc::c_int = 2;

    /// Install the process-wide fault handler (idempotent).
    pub(crate) fn install() {
        INSTALL.call_once(|| {
            unsafe {
                let mut action: libc::sigaction = std::mem::zeroed();
                action.sa_sigaction = on_guest_fault as usize;
                action.sa_flags = libc::SA_SIGINFO;
                libc::sigemptyset(&mut action.sa_mask);
                for signal in GUEST_SIGNALS {
                    libc::sigaction(signal, &action, std::ptr::null_mut());
                }
            }
            tracing::debug!("guest fault handlers installed");
        });
    }

    pub(crate) fn classify(signal: i32, code: i32) -> ExecutionStatus {
        match signal {
            libc::SIGILL => ExecutionStatus::IllegalInstruction,
            libc::SIGFPE => {
                if code == FPE_INTOVF {
                    ExecutionStatus::IntegerOverflow
                } else {
                    ExecutionStatus::DivideError
                }
            }
            _ => ExecutionStatus::MemoryFault,
        }
    }

    /// Signal handler. Runs on the faulting thread, so the thread-local
    /// recovery slot identifies the sandbox that armed it.
    unsafe extern "C" fn on_guest_fault(
        signal: libc::c_int,
        info: *mut libc::siginfo_t,
        context: *mut libc::c_void,
    ) {
        let recovery = RECOVERY_RIP.with(|c| c.get());
        if recovery == 0 {
            // Fault outside guest code: restore the default action and
            // return, the re-raised signal terminates the process normally.
            libc::signal(signal, libc::SIG_DFL);
            return;
        }

        FAULT_SIGNAL.with(|c| c.set(signal));
        if !info.is_null() {
            FAULT_CODE.with(|c| c.set((*info).si_code));
        }

        let ucontext = context as *mut libc::ucontext_t;
        (*ucontext).uc_mcontext.gregs[libc::REG_RIP as usize] = recovery as i64;
    }
}
