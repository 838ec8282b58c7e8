use std::fmt;

use crate::command::ExitSummary;

/// Errors raised by the supervisor and orchestrator
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration, reported before anything runs
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    /// Prefix or health-check template could not be compiled
    #[error(transparent)]
    Template(#[from] crate::template::TemplateError),

    /// Internal output pipe could not be allocated
    #[error("failed to create output pipe for `{command}`: {source}")]
    Pipe {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// OS process could not be started
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the process failed
    #[error("failed to wait for `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading the merged output pipe failed
    #[error("failed to read output of `{command}`: {source}")]
    Read {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Prefix renderer could not be built
    #[error(transparent)]
    Prefix(#[from] crate::prefix::PrefixError),

    /// HTTP client for a health check could not be built
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    /// Process ended with a non-zero status or was killed by a signal
    #[error("`{command}` exited with {status}")]
    Exited {
        command: String,
        status: ExitSummary,
    },

    /// A background task panicked or was aborted
    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure collected over one concurrent run
#[derive(Debug, Default)]
pub struct RunErrors {
    errors: Vec<Error>,
}

impl RunErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: Error) {
        self.errors.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// `Ok(())` when nothing failed, otherwise the joined errors
    pub fn into_result(self) -> std::result::Result<(), RunErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl From<Error> for RunErrors {
    fn from(error: Error) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

impl fmt::Display for RunErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for RunErrors {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_errors_into_result_is_ok_when_empty() {
        assert!(RunErrors::new().into_result().is_ok());
    }

    #[test]
    fn run_errors_display_joins_one_error_per_line() {
        let mut errors = RunErrors::new();
        errors.push(Error::Exited {
            command: "exit 1".into(),
            status: ExitSummary::Code(1),
        });
        errors.push(Error::Exited {
            command: "exit 2".into(),
            status: ExitSummary::Code(2),
        });

        assert_eq!(
            errors.to_string(),
            "`exit 1` exited with exit status 1\n`exit 2` exited with exit status 2"
        );
        assert_eq!(errors.len(), 2);
    }
}
