//! The single writer between commands, health checks and the terminal.

mod multiplexer;

use tokio::sync::mpsc;

use crate::event::Message;

pub use multiplexer::Multiplexer;

/// Messages buffered before producers wait on the multiplexer
pub const CHANNEL_CAPACITY: usize = 100;

/// Bounded message channel feeding a [`Multiplexer`]
pub fn channel() -> (mpsc::Sender<Message>, mpsc::Receiver<Message>) {
    mpsc::channel(CHANNEL_CAPACITY)
}
