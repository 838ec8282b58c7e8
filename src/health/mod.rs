//! Periodic status probes rendered in the health panel.

mod command;
mod http;

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::HealthCheckConfig;
use crate::error::Result;

pub use command::CommandCheck;
pub use http::{HttpCheck, HttpData};

/// Delay before the first probe, so status shows up right away
pub const FIRST_POLL_DELAY: Duration = Duration::from_millis(2);

/// Rows of one poll plus how many rows the previous poll handed out
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub rows: Vec<String>,
    pub rows_to_erase: usize,
}

/// Latest probe result of one checker
#[derive(Debug, Default)]
pub(crate) struct RowState {
    inner: Mutex<RowStateInner>,
}

#[derive(Debug, Default)]
struct RowStateInner {
    rows: Vec<String>,
    last_rows: usize,
}

impl RowState {
    /// Swap in the rows of a fresh probe
    pub(crate) fn replace(&self, rows: Vec<String>) {
        self.inner.lock().rows = rows;
    }

    /// Copy of the current rows; remembers their count for the next call
    pub(crate) fn snapshot(&self) -> HealthSnapshot {
        let mut inner = self.inner.lock();
        let rows = inner.rows.clone();
        let rows_to_erase = std::mem::replace(&mut inner.last_rows, rows.len());
        HealthSnapshot {
            rows,
            rows_to_erase,
        }
    }
}

/// A health checker of either kind
#[derive(Debug)]
pub enum HealthCheck {
    Command(CommandCheck),
    Http(HttpCheck),
}

impl HealthCheck {
    /// Build a checker, compiling and self-testing any template
    pub fn from_config(config: &HealthCheckConfig) -> Result<Self> {
        let check = match config {
            HealthCheckConfig::Command { command, interval } => {
                Self::Command(CommandCheck::new(command, *interval))
            }
            HealthCheckConfig::Http {
                url,
                template,
                interval,
            } => Self::Http(HttpCheck::new(url, template, *interval)?),
        };
        Ok(check)
    }

    pub fn interval(&self) -> Duration {
        match self {
            Self::Command(check) => check.interval(),
            Self::Http(check) => check.interval(),
        }
    }

    /// Probe on a timer until `token` is cancelled
    ///
    /// The first probe runs after [`FIRST_POLL_DELAY`], later ones every
    /// interval. Each probe replaces the stored rows.
    pub async fn start(&self, token: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + FIRST_POLL_DELAY, self.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let rows = tokio::select! {
                _ = token.cancelled() => return,
                rows = self.probe() => rows,
            };
            self.rows().replace(rows);
        }
    }

    /// Latest rows and the row count of the previous poll
    pub fn poll(&self) -> HealthSnapshot {
        self.rows().snapshot()
    }

    async fn probe(&self) -> Vec<String> {
        match self {
            Self::Command(check) => check.probe().await,
            Self::Http(check) => check.probe().await,
        }
    }

    pub(crate) fn rows(&self) -> &RowState {
        match self {
            Self::Command(check) => &check.rows,
            Self::Http(check) => &check.rows,
        }
    }
}

/// Split probe output into display rows
fn split_rows(text: &str) -> Vec<String> {
    text.lines().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_state_snapshot_reports_previous_row_count() {
        let state = RowState::default();

        state.replace(vec!["a".into(), "b".into()]);
        assert_eq!(state.snapshot().rows_to_erase, 0);

        state.replace(vec!["c".into(), "d".into(), "e".into()]);
        let snapshot = state.snapshot();
        assert_eq!(snapshot.rows, vec!["c", "d", "e"]);
        assert_eq!(snapshot.rows_to_erase, 2);

        state.replace(Vec::new());
        assert_eq!(state.snapshot().rows_to_erase, 3);
        assert_eq!(state.snapshot().rows_to_erase, 0);
    }

    #[test]
    fn split_rows_drops_line_endings() {
        assert_eq!(split_rows("up\r\ndown\n"), vec!["up", "down"]);
        assert!(split_rows("").is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn health_check_start_probes_soon_and_stops_on_cancel() {
        let check = HealthCheck::from_config(&HealthCheckConfig::Command {
            command: "echo ready".into(),
            interval: Duration::from_secs(60),
        })
        .unwrap();
        let token = CancellationToken::new();

        let polled = async {
            for _ in 0..100 {
                let snapshot = check.poll();
                if !snapshot.rows.is_empty() {
                    return snapshot.rows;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Vec::new()
        };
        let (_, rows) = tokio::join!(check.start(token.clone()), async {
            let rows = polled.await;
            token.cancel();
            rows
        });

        assert_eq!(rows, vec!["ready"]);
    }
}
