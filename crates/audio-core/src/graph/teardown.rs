//! Best-effort release of a replaced source

use crate::error::AudioResult;
use tracing::{debug, warn};

/// Runs every release step even when earlier ones fail.
///
/// Failures are logged and counted, never propagated.
pub(crate) struct Teardown {
    subject: String,
    attempted: usize,
    failed: usize,
}

impl Teardown {
    pub(crate) fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            attempted: 0,
            failed: 0,
        }
    }

    pub(crate) fn step(&mut self, name: &str, step: impl FnOnce() -> AudioResult<()>) {
        self.attempted += 1;
        if let Err(e) = step() {
            self.failed += 1;
            warn!("Teardown of {}: step '{}' failed: {}", self.subject, name, e);
        }
    }

    /// Number of failed steps
    pub(crate) fn finish(self) -> usize {
        debug!(
            "Released {} ({} of {} steps clean)",
            self.subject,
            self.attempted - self.failed,
            self.attempted
        );
        self.failed
    }
}
