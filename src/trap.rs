//! Trap raising and recovery.
//!
//! Generated artifact code signals a runtime violation by calling the
//! operation table's trap entry, which lands in [`raise`]. Each bridge
//! call into the artifact runs under a thread-local recovery frame set
//! up with sigsetjmp, so a trap siglongjmps back to the entry point and
//! surfaces as a typed [`TrapCode`] instead of killing the process.
//! With no active frame on the raising thread, a process-wide override
//! (if installed) is invoked, else the default handler reports the code
//! and aborts.
//!
//! # Safety
//!
//! - siglongjmp skips Rust destructors between sigsetjmp and the trap.
//!   The only heap allocations on that path are small operation-table
//!   scratch values (resolver name strings, kind vectors). This leak is
//!   acceptable; a trapped context is non-resumable and released.
//! - The recovery frame is saved and restored around each entry, so
//!   re-entrant bridge calls (host function calling back into another
//!   context) unwind to the innermost entry point.

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::error;

/// Trap codes crossing the operation-table ABI as `u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapCode {
    OutOfBounds,
    IntOverflow,
    DivByZero,
    InvalidConversion,
    Unreachable,
    CallIndirect,
    CallStackExhausted,
    NoMemory,
    GasExhausted,
    Other(u32),
}

impl TrapCode {
    pub fn from_raw(raw: u32) -> TrapCode {
        match raw {
            1 => TrapCode::OutOfBounds,
            2 => TrapCode::IntOverflow,
            3 => TrapCode::DivByZero,
            4 => TrapCode::InvalidConversion,
            5 => TrapCode::Unreachable,
            6 => TrapCode::CallIndirect,
            7 => TrapCode::CallStackExhausted,
            8 => TrapCode::NoMemory,
            9 => TrapCode::GasExhausted,
            other => TrapCode::Other(other),
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            TrapCode::OutOfBounds => 1,
            TrapCode::IntOverflow => 2,
            TrapCode::DivByZero => 3,
            TrapCode::InvalidConversion => 4,
            TrapCode::Unreachable => 5,
            TrapCode::CallIndirect => 6,
            TrapCode::CallStackExhausted => 7,
            TrapCode::NoMemory => 8,
            TrapCode::GasExhausted => 9,
            TrapCode::Other(other) => other,
        }
    }
}

impl fmt::Display for TrapCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrapCode::OutOfBounds => write!(f, "out-of-bounds memory access"),
            TrapCode::IntOverflow => write!(f, "integer overflow"),
            TrapCode::DivByZero => write!(f, "integer divide by zero"),
            TrapCode::InvalidConversion => write!(f, "invalid conversion to integer"),
            TrapCode::Unreachable => write!(f, "unreachable executed"),
            TrapCode::CallIndirect => write!(f, "undefined element in call_indirect"),
            TrapCode::CallStackExhausted => write!(f, "call stack exhausted"),
            TrapCode::NoMemory => write!(f, "allocation failure"),
            TrapCode::GasExhausted => write!(f, "gas limit exceeded"),
            TrapCode::Other(code) => write!(f, "unknown trap code {code}"),
        }
    }
}

/// Process-wide trap handler signature. Must not return.
pub type TrapHandler = extern "C" fn(code: u32) -> !;

static HANDLER: AtomicUsize = AtomicUsize::new(0);

/// Install a process-wide trap handler, shared by every `Code` and
/// `ExecutionContext`. Active recovery frames take precedence; the
/// handler only sees traps raised outside any bridge entry point.
pub fn set_trap_handler(handler: TrapHandler) {
    HANDLER.store(handler as usize, Ordering::SeqCst);
}

/// Fixed-size buffer for sigjmp_buf. 256 bytes covers all platforms
/// (macOS aarch64 needs 192, x86_64 needs ~200).
const JMP_BUF_SIZE: usize = 256;

unsafe extern "C" {
    #[link_name = "__sigsetjmp"]
    fn sigsetjmp(buf: *mut u8, save_signals: libc::c_int) -> libc::c_int;
    fn siglongjmp(buf: *mut u8, val: libc::c_int) -> !;
}

/// Thread-local recovery point for trap unwinding.
struct RecoveryFrame {
    jmp_buf: [u8; JMP_BUF_SIZE],
    active: bool,
}

impl RecoveryFrame {
    const fn new() -> Self {
        Self {
            jmp_buf: [0u8; JMP_BUF_SIZE],
            active: false,
        }
    }
}

// UnsafeCell because raise() needs mutable access from inside artifact
// call frames without RefCell bookkeeping surviving a siglongjmp.
thread_local! {
    static FRAME: UnsafeCell<RecoveryFrame> = const { UnsafeCell::new(RecoveryFrame::new()) };
}

/// Enter artifact code with trap recovery.
///
/// Sets up a sigsetjmp recovery point and runs `f`. If artifact code
/// raises a trap during `f`, control returns here and the trap code is
/// reported as `Err`. The previous frame is restored either way, so
/// entries nest.
pub(crate) fn catch_traps<R>(f: impl FnOnce() -> R) -> Result<R, TrapCode> {
    let frame: *mut RecoveryFrame = FRAME.with(|cell| cell.get());
    unsafe {
        let saved_buf = (*frame).jmp_buf;
        let saved_active = (*frame).active;
        let ret = sigsetjmp((*frame).jmp_buf.as_mut_ptr(), 0);
        if ret == 0 {
            (*frame).active = true;
            let out = f();
            (*frame).jmp_buf = saved_buf;
            (*frame).active = saved_active;
            Ok(out)
        } else {
            (*frame).jmp_buf = saved_buf;
            (*frame).active = saved_active;
            Err(TrapCode::from_raw(ret as u32 - 1))
        }
    }
}

/// Raise a trap. Never returns to the caller: control transfers to the
/// innermost recovery frame, the installed process-wide handler, or the
/// default report-and-abort handler, in that order.
pub(crate) fn raise(code: TrapCode) -> ! {
    let frame: *mut RecoveryFrame = FRAME.with(|cell| cell.get());
    unsafe {
        if (*frame).active {
            (*frame).active = false;
            let val = code.to_raw().saturating_add(1).min(i32::MAX as u32);
            siglongjmp((*frame).jmp_buf.as_mut_ptr(), val as libc::c_int);
        }
    }
    let handler = HANDLER.load(Ordering::SeqCst);
    if handler != 0 {
        let handler: TrapHandler = unsafe { std::mem::transmute(handler) };
        handler(code.to_raw());
    }
    error!("unrecoverable trap: {code}");
    std::process::abort();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raised_trap_returns_to_the_entry_point() {
        let result = catch_traps(|| -> i64 { raise(TrapCode::DivByZero) });
        assert_eq!(result, Err(TrapCode::DivByZero));
    }

    #[test]
    fn untrapped_entries_pass_the_result_through() {
        assert_eq!(catch_traps(|| 7i64), Ok(7));
    }

    #[test]
    fn entries_nest() {
        let outer = catch_traps(|| {
            let inner = catch_traps(|| -> i64 { raise(TrapCode::GasExhausted) });
            assert_eq!(inner, Err(TrapCode::GasExhausted));
            42i64
        });
        assert_eq!(outer, Ok(42));
    }

    #[test]
    fn unknown_codes_round_trip() {
        assert_eq!(TrapCode::from_raw(77), TrapCode::Other(77));
        assert_eq!(TrapCode::Other(77).to_raw(), 77);
    }
}
