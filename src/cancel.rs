// Cooperative cancellation with two levels. The engine checks for a
// graceful request between chunks; a forced request aborts retry loops and,
// when installed as the interrupt handler, ends the process.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CancelLevel {
    None,
    Graceful,
    Forced,
}

impl CancelLevel {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => CancelLevel::None,
            1 => CancelLevel::Graceful,
            _ => CancelLevel::Forced,
        }
    }
}

/// Shared cancellation flag. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    level: Arc<AtomicU8>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Escalates one level and returns the new level.
    pub fn request(&self) -> CancelLevel {
        let prev = self
            .level
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some((v + 1).min(2)))
            .unwrap_or(2);
        CancelLevel::from_u8((prev + 1).min(2))
    }

    pub fn force(&self) {
        self.level.store(2, Ordering::SeqCst);
    }

    pub fn level(&self) -> CancelLevel {
        CancelLevel::from_u8(self.level.load(Ordering::SeqCst))
    }

    pub fn is_requested(&self) -> bool {
        self.level() >= CancelLevel::Graceful
    }

    pub fn is_forced(&self) -> bool {
        self.level() == CancelLevel::Forced
    }
}

/// Exit status used when a second interrupt ends the process.
pub const FORCED_EXIT_CODE: i32 = 130;

/// Routes Ctrl-C into `token`: the first press asks the upload to stop at
/// the next chunk boundary, the second exits immediately.
pub fn install_interrupt_handler(
    token: CancellationToken,
    on_graceful: impl Fn() + Send + 'static,
) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || match token.request() {
        CancelLevel::Graceful => on_graceful(),
        _ => {
            warn!("second interrupt received, exiting without waiting for the current chunk");
            std::process::exit(FORCED_EXIT_CODE);
        }
    })
}
