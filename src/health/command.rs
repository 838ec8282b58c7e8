use std::time::Duration;

use crate::command::{ExitSummary, capture_merged};
use crate::health::{RowState, split_rows};

/// Shows the merged output of a shell command
#[derive(Debug)]
pub struct CommandCheck {
    command: String,
    interval: Duration,
    pub(crate) rows: RowState,
}

impl CommandCheck {
    pub fn new(command: &str, interval: Duration) -> Self {
        Self {
            command: command.to_string(),
            interval,
            rows: RowState::default(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run the command once; a failing exit adds its status as a last row
    pub async fn probe(&self) -> Vec<String> {
        match capture_merged(&self.command).await {
            Ok((output, status)) => {
                let mut text = String::from_utf8_lossy(&output).into_owned();
                if !status.success() {
                    if !text.is_empty() && !text.ends_with('\n') {
                        text.push('\n');
                    }
                    text.push_str(&ExitSummary::from(status).to_string());
                }
                split_rows(&text)
            }
            Err(e) => {
                tracing::debug!(command = %self.command, error = %e, "health command failed to run");
                vec![e.to_string()]
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn command_check_probe_returns_output_rows() {
        let check = CommandCheck::new("echo db: up; echo cache: up >&2", Duration::from_secs(1));
        assert_eq!(check.probe().await, vec!["db: up", "cache: up"]);
    }

    #[tokio::test]
    async fn command_check_probe_appends_exit_status_on_failure() {
        let check = CommandCheck::new("printf down; exit 2", Duration::from_secs(1));
        assert_eq!(check.probe().await, vec!["down", "exit status 2"]);
    }
}
