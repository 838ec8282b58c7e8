mod runner;
mod signal;

pub use runner::{CommandHandle, CommandRunner};
pub(crate) use runner::capture_merged;
pub use signal::{ExitSummary, KillSignal, KillSignalParseError};
