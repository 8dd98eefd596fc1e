//! Process-lifetime flags
//!
//! State that must survive map reloads but not a process restart. Passed
//! explicitly as `Arc<ProcessContext>` so each test gets a fresh instance.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared reference to a ProcessContext
pub type SharedProcessContext = Arc<ProcessContext>;

#[derive(Debug, Default)]
pub struct ProcessContext {
    startup_randomized: AtomicBool,
}

impl ProcessContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared reference to this context
    pub fn shared(self) -> SharedProcessContext {
        Arc::new(self)
    }

    /// Claim the one-time startup map randomization. Returns `true` exactly
    /// once per process.
    pub fn claim_startup_randomization(&self) -> bool {
        !self.startup_randomized.swap(true, Ordering::SeqCst)
    }

    pub fn startup_randomized(&self) -> bool {
        self.startup_randomized.load(Ordering::SeqCst)
    }
}
