//! Ctrl-C handling
//!
//! The first interrupt raises the cancellation flag shared with
//! [`SessionClient`](crate::session::SessionClient), which stops between
//! polls and retries with `SessionError::Cancelled`. A second interrupt
//! exits the process at once.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Exit code for interrupted commands (128 + SIGINT)
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

/// Action to take after receiving a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: stop at the next cancellation point
    RequestCancellation,
    /// Second signal: exit immediately
    ImmediateExit,
    /// Third+ signal: ignore
    Ignore,
}

/// Signal handler state
#[derive(Debug, Default)]
pub struct SignalState {
    cancel: Arc<AtomicBool>,
    signal_count: AtomicU8,
}

impl SignalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag raised by the first interrupt.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn signal_count(&self) -> u8 {
        self.signal_count.load(Ordering::SeqCst)
    }

    /// Record a signal and decide what to do about it.
    pub fn handle_signal(&self) -> SignalAction {
        match self.signal_count.fetch_add(1, Ordering::SeqCst) {
            0 => {
                self.cancel.store(true, Ordering::SeqCst);
                SignalAction::RequestCancellation
            }
            1 => SignalAction::ImmediateExit,
            _ => SignalAction::Ignore,
        }
    }
}

/// Installs the process-wide Ctrl-C handler
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    pub fn new() -> Self {
        Self {
            state: Arc::new(SignalState::new()),
        }
    }

    pub fn state(&self) -> Arc<SignalState> {
        Arc::clone(&self.state)
    }

    /// Install the handler. Must be called at most once per process.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let state = Arc::clone(&self.state);
        ctrlc::set_handler(move || match state.handle_signal() {
            SignalAction::RequestCancellation => {
                eprintln!("\nInterrupted, stopping (press Ctrl-C again to exit now)...");
            }
            SignalAction::ImmediateExit => {
                std::process::exit(EXIT_CODE_INTERRUPTED);
            }
            SignalAction::Ignore => {}
        })
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}
