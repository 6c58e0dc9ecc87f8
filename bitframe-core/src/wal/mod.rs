//! Operation log
//!
//! Every fragment and attribute store appends its mutations to a log file
//! before acknowledging them. On open the log is replayed on top of the last
//! snapshot; once it grows past a threshold the owner writes a new snapshot
//! and resets the log.

mod entry;
mod reader;
mod writer;

pub use entry::{LogEntry, LogEntryType};
pub use reader::{LogReader, Recovered};
pub use writer::LogWriter;

/// Log sync policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// Sync after every write (safest, slowest)
    Immediate,
    /// Sync after N writes
    EveryN(usize),
    /// Sync on interval (trades durability for performance)
    Interval { millis: u64 },
    /// Never sync (OS decides, fastest, least safe)
    None,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        SyncPolicy::Immediate
    }
}
