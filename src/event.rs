/// Reset sequence terminating every forwarded output line
pub const RESET: &str = "\x1b[0m";

/// One unit of output bound for the multiplexer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Slot of the command that produced the text
    pub slot: usize,
    /// Newline-terminated text, written after the slot prefix
    pub text: String,
}

impl Message {
    pub fn new(slot: usize, text: impl Into<String>) -> Self {
        Self {
            slot,
            text: text.into(),
        }
    }

    /// A line of command output, terminated with a newline and a reset
    pub fn line(slot: usize, line: &str) -> Self {
        Self::new(slot, format!("{line}\n{RESET}"))
    }
}
