//! Console implementation of the progress-reporting port.

use crate::application::ports::ProgressReporter;
use crate::output::OutputContext;

/// Reports lifecycle steps through the shared `OutputContext`.
///
/// Per-instance messages interleave across concurrent tasks; each service
/// prefixes its messages with the instance name, so interleaving stays
/// readable.
pub struct ConsoleReporter {
    ctx: OutputContext,
}

impl ConsoleReporter {
    #[must_use]
    pub fn new(ctx: OutputContext) -> Self {
        Self { ctx }
    }
}

impl ProgressReporter for ConsoleReporter {
    fn step(&self, message: &str) {
        self.ctx.info(message);
    }

    fn success(&self, message: &str) {
        self.ctx.success(message);
    }

    fn warn(&self, message: &str) {
        self.ctx.warn(message);
    }
}
