//! Periodic scheduling

use std::time::Duration;
use tokio::time::Instant;

/// A periodically recurring unit of work.
///
/// Anything with a period and a record of its last update can tell the
/// scheduler when it next needs attention. An item that has never been
/// updated is due immediately.
pub trait Scheduled {
    /// How often the item wants to run.
    fn period(&self) -> Duration;

    /// When the item last ran, if ever.
    fn last_update(&self) -> Option<Instant>;

    /// The next instant the item becomes due, or `None` if it has never
    /// run and is therefore due right away.
    fn next_due(&self) -> Option<Instant> {
        self.last_update().map(|at| at + self.period())
    }

    fn is_due(&self, now: Instant) -> bool {
        self.next_due().map_or(true, |at| at <= now)
    }
}
