use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use crossterm::{
    cursor::MoveUp,
    queue,
    terminal::{Clear, ClearType},
};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::{DEFAULT_PRINT_INTERVAL, StatusConfig};
use crate::event::{Message, RESET};
use crate::health::HealthCheck;
use crate::prefix::PrefixRenderer;

/// Owns the output stream and serialises everything written to it
///
/// Command output arrives through the channel; health rows are pulled from
/// the checkers on every tick. In prefixed mode the panel is kept below the
/// latest output line by erasing exactly the rows drawn last time and
/// redrawing. In raw mode (no renderer) messages pass through unprefixed and
/// health rows are appended on each tick without erasing.
pub struct Multiplexer<W> {
    out: W,
    receiver: mpsc::Receiver<Message>,
    prefix: Option<PrefixRenderer>,
    checks: Vec<Arc<HealthCheck>>,
    panel_prefix: String,
    print_interval: Duration,
    /// Rows currently on screen below the last output line
    drawn_rows: usize,
    last_rows: Vec<String>,
}

impl<W: Write> Multiplexer<W> {
    /// `prefix` is `None` for raw passthrough
    pub fn new(out: W, receiver: mpsc::Receiver<Message>, prefix: Option<PrefixRenderer>) -> Self {
        Self {
            out,
            receiver,
            prefix,
            checks: Vec::new(),
            panel_prefix: String::new(),
            print_interval: DEFAULT_PRINT_INTERVAL,
            drawn_rows: 0,
            last_rows: Vec::new(),
        }
    }

    /// Attach health checkers drawn with the panel settings of `status`
    pub fn with_health(mut self, checks: Vec<Arc<HealthCheck>>, status: &StatusConfig) -> Self {
        self.checks = checks;
        self.panel_prefix = status.row_prefix();
        self.print_interval = status.print_interval;
        self
    }

    pub fn is_raw(&self) -> bool {
        self.prefix.is_none()
    }

    /// Write until every sender is dropped, then flush and hand back the stream
    ///
    /// The panel stops updating once `token` is cancelled.
    pub async fn run(mut self, token: CancellationToken) -> io::Result<W> {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.print_interval, self.print_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let ticking = !self.checks.is_empty() && !token.is_cancelled();
            tokio::select! {
                message = self.receiver.recv() => match message {
                    Some(message) => self.write_message(&message, ticking)?,
                    None => break,
                },
                _ = ticker.tick(), if ticking => self.tick()?,
            }
        }

        self.out.flush()?;
        Ok(self.out)
    }

    fn tick(&mut self) -> io::Result<()> {
        let rows = self.poll_rows();

        if self.is_raw() {
            self.draw_panel(&rows)?;
            self.drawn_rows = 0;
            return self.out.flush();
        }

        if rows == self.last_rows && self.drawn_rows == rows.len() {
            return Ok(());
        }
        self.erase_panel()?;
        self.draw_panel(&rows)?;
        self.last_rows = rows;
        self.out.flush()
    }

    fn write_message(&mut self, message: &Message, panel: bool) -> io::Result<()> {
        let prefix = match &mut self.prefix {
            Some(prefix) => prefix.render(message.slot, true),
            None => String::new(),
        };

        // Keep the panel below the message, or drop it once it stops updating
        self.erase_panel()?;
        self.out.write_all(prefix.as_bytes())?;
        self.out.write_all(message.text.as_bytes())?;

        if panel && !self.is_raw() {
            let rows = self.poll_rows();
            self.draw_panel(&rows)?;
            self.last_rows = rows;
        }
        self.out.flush()
    }

    fn poll_rows(&self) -> Vec<String> {
        self.checks
            .iter()
            .flat_map(|check| check.poll().rows)
            .collect()
    }

    /// Move up over the rows drawn last time and clear to the end of screen
    fn erase_panel(&mut self) -> io::Result<()> {
        if self.drawn_rows == 0 {
            return Ok(());
        }
        let rows = u16::try_from(self.drawn_rows).unwrap_or(u16::MAX);
        queue!(self.out, MoveUp(rows), Clear(ClearType::FromCursorDown))?;
        self.drawn_rows = 0;
        Ok(())
    }

    fn draw_panel(&mut self, rows: &[String]) -> io::Result<()> {
        for row in rows {
            writeln!(self.out, "{}{row}{RESET}", self.panel_prefix)?;
        }
        self.drawn_rows = rows.len();
        Ok(())
    }
}
