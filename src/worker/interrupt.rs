//! Interrupt handling
//!
//! Interrupts are counted, not just flagged:
//!
//! ```text
//!   0 ──▶ Running     submit jobs
//!   1 ──▶ Draining    stop submitting, let running jobs finish
//!   2+ ─▶ Killing     kill running jobs, then finish draining
//! ```
//!
//! A status request (SIGUSR1 on unix) is separate and never changes state.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Where the interrupt sequence stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InterruptState {
    /// No interrupt received
    Running,
    /// First interrupt: graceful drain
    Draining,
    /// Second interrupt: kill outstanding jobs
    Killing,
}

/// Shared interrupt counter
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    count: Arc<AtomicUsize>,
}

impl Interrupt {
    /// Counter starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one interrupt and return the resulting state
    pub fn signal(&self) -> InterruptState {
        let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        Self::state_for(count)
    }

    /// Current state
    pub fn state(&self) -> InterruptState {
        Self::state_for(self.count.load(Ordering::SeqCst))
    }

    /// Interrupts received so far
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    fn state_for(count: usize) -> InterruptState {
        match count {
            0 => InterruptState::Running,
            1 => InterruptState::Draining,
            _ => InterruptState::Killing,
        }
    }
}

static STATUS_REQUESTED: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn on_status_signal(_signal: libc::c_int) {
    STATUS_REQUESTED.store(true, Ordering::SeqCst);
}

/// Install the SIGUSR1 handler; a no-op on other platforms
pub fn install_status_handler() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let handler = on_status_signal as extern "C" fn(libc::c_int);
        // SAFETY: the handler only stores to an atomic, which is
        // async-signal-safe.
        let previous = unsafe { libc::signal(libc::SIGUSR1, handler as libc::sighandler_t) };
        if previous == libc::SIG_ERR {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Consume a pending status request
pub fn take_status_request() -> bool {
    STATUS_REQUESTED.swap(false, Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_sequence() {
        let interrupt = Interrupt::new();
        let shared = interrupt.clone();
        assert_eq!(interrupt.state(), InterruptState::Running);
        assert_eq!(shared.signal(), InterruptState::Draining);
        assert_eq!(interrupt.state(), InterruptState::Draining);
        assert_eq!(shared.signal(), InterruptState::Killing);
        assert_eq!(shared.signal(), InterruptState::Killing);
        assert_eq!(interrupt.count(), 3);
    }

    // One test touches the process-wide flag, so runs cannot interleave
    #[cfg(unix)]
    #[test]
    fn test_status_request() {
        install_status_handler().unwrap();
        // SAFETY: raising a signal we just installed a handler for
        unsafe {
            libc::raise(libc::SIGUSR1);
        }
        assert!(take_status_request());
        assert!(!take_status_request());
    }
}
