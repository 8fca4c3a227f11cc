//! Interrupt-to-flag plumbing
//!
//! The handler only sets an atomic flag — no I/O in signal context. The
//! run loop polls the flag between instructions and performs the usual
//! end-of-run reporting on the main thread.

use std::sync::atomic::{AtomicBool, Ordering};

static QUIT: AtomicBool = AtomicBool::new(false);

/// True once an interrupt has been delivered
pub fn requested() -> bool {
    QUIT.load(Ordering::SeqCst)
}

/// Installs SIGINT/SIGTERM handlers that raise the flag
#[cfg(unix)]
pub fn install() {
    use std::os::raw::c_int;
    const SIGINT: c_int = 2;
    const SIGTERM: c_int = 15;

    extern "C" fn handler(_sig: c_int) {
        QUIT.store(true, Ordering::SeqCst);
    }

    extern "C" {
        fn signal(sig: c_int, handler: extern "C" fn(c_int)) -> usize;
    }

    unsafe {
        // best-effort; ignore returns
        let _ = signal(SIGINT, handler);
        let _ = signal(SIGTERM, handler);
    }
}

/// No-op on platforms without POSIX signals
#[cfg(not(unix))]
pub fn install() {}
