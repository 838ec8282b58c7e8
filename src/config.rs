//! Run configuration, built once by the caller and passed by reference.

use std::path::PathBuf;
use std::time::Duration;

use crossterm::style::Color;

use crate::command::KillSignal;
use crate::style::Style;

/// Default maximum characters of command text shown in a prefix
pub const DEFAULT_PREFIX_LENGTH: usize = 10;

/// Default prefix timestamp format (strftime notation)
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%H:%M:%S%.3f";

/// Default health panel redraw interval
pub const DEFAULT_PRINT_INTERVAL: Duration = Duration::from_secs(1);

/// Default label of the health panel
pub const DEFAULT_STATUS_TEXT: &str = "HEALTH";

/// Smallest accepted polling or redraw interval
pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("empty command")]
    EmptyCommand,
    #[error("no commands to run")]
    NoCommands,
    #[error("status is enabled but no checks are configured")]
    NoChecks,
    #[error("{what} interval too small: {interval:?} (must be greater than 100ms)")]
    IntervalTooSmall { what: &'static str, interval: Duration },
    #[error("invalid URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("empty template for `{0}`")]
    EmptyTemplate(String),
    #[error("number of {what} ({given}) must match number of commands ({expected})")]
    CountMismatch {
        what: &'static str,
        given: usize,
        expected: usize,
    },
}

/// One command to run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    /// Shell command line, passed to `sh -c` / `cmd /c`
    pub command: String,
    pub name: Option<String>,
    pub cwd: Option<PathBuf>,
    /// Per-command raw override, falls back to [`Config::raw`]
    pub raw: Option<bool>,
    pub style: Style,
    /// Echo escaped raw output bytes as diagnostics
    pub debug: bool,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_raw(mut self, raw: bool) -> Self {
        self.raw = Some(raw);
        self
    }

    pub fn with_style(mut self, style: Style) -> Self {
        self.style = style;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Effective raw flag given the group default
    pub fn is_raw(&self, default: bool) -> bool {
        self.raw.unwrap_or(default)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command.trim().is_empty() {
            return Err(ConfigError::EmptyCommand);
        }
        Ok(())
    }
}

/// How prefixes are rendered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixConfig {
    /// `index`, `name`, `command`, `pid`, `time`, empty, or a template
    pub template: String,
    /// Pad every prefix to the width of the longest one
    pub pad_prefix: bool,
    /// Maximum characters of command text, 0 disables truncation
    pub prefix_length: usize,
    pub timestamp_format: String,
    /// Show elapsed time since start instead of the wall clock
    pub time_since_start: bool,
}

impl Default for PrefixConfig {
    fn default() -> Self {
        Self {
            template: String::new(),
            pad_prefix: false,
            prefix_length: DEFAULT_PREFIX_LENGTH,
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
            time_since_start: false,
        }
    }
}

/// When the exit of one command terminates the others
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KillMode {
    #[default]
    None,
    /// Any exit terminates every other command
    KillOthers,
    /// A failing exit terminates every other command
    KillOthersOnFail,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KillPolicy {
    pub mode: KillMode,
    pub signal: KillSignal,
    /// Force-kill a signalled process still alive after this long
    pub timeout: Option<Duration>,
}

impl KillPolicy {
    /// Whether an exit (failed or not) should cancel the whole group
    pub fn triggers(&self, failed: bool) -> bool {
        match self.mode {
            KillMode::None => false,
            KillMode::KillOthers => true,
            KillMode::KillOthersOnFail => failed,
        }
    }
}

/// A health probe shown in the status panel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthCheckConfig {
    /// Run a shell command and show its merged output
    Command { command: String, interval: Duration },
    /// GET a URL and render the response through a template
    Http {
        url: String,
        template: String,
        interval: Duration,
    },
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        match self {
            Self::Command { interval, .. } | Self::Http { interval, .. } => *interval,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval() <= MIN_INTERVAL {
            return Err(ConfigError::IntervalTooSmall {
                what: "health check",
                interval: self.interval(),
            });
        }

        match self {
            Self::Command { command, .. } => {
                if command.trim().is_empty() {
                    return Err(ConfigError::EmptyCommand);
                }
            }
            Self::Http { url, template, .. } => {
                reqwest::Url::parse(url).map_err(|e| ConfigError::InvalidUrl {
                    url: url.clone(),
                    reason: e.to_string(),
                })?;
                if template.is_empty() {
                    return Err(ConfigError::EmptyTemplate(url.clone()));
                }
            }
        }
        Ok(())
    }
}

/// Health panel configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusConfig {
    pub enabled: bool,
    /// Label rendered as `[text]` before every row
    pub text: String,
    pub style: Style,
    pub print_interval: Duration,
    pub checks: Vec<HealthCheckConfig>,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            text: DEFAULT_STATUS_TEXT.to_string(),
            style: Style::color(Color::DarkRed).bold(),
            print_interval: DEFAULT_PRINT_INTERVAL,
            checks: Vec::new(),
        }
    }
}

impl StatusConfig {
    /// Prefix put in front of every health row, empty when disabled
    pub fn row_prefix(&self) -> String {
        if !self.enabled {
            return String::new();
        }
        format!("{} ", self.style.apply(&format!("[{}]", self.text)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if self.checks.is_empty() {
            return Err(ConfigError::NoChecks);
        }
        if self.print_interval <= MIN_INTERVAL {
            return Err(ConfigError::IntervalTooSmall {
                what: "print",
                interval: self.print_interval,
            });
        }
        self.checks.iter().try_for_each(HealthCheckConfig::validate)
    }
}

/// Everything one run needs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub commands: Vec<CommandSpec>,
    /// Group default for raw passthrough
    pub raw: bool,
    pub debug: bool,
    pub prefix: PrefixConfig,
    pub kill: KillPolicy,
    pub status: StatusConfig,
    /// Run sequentially, raw, before the concurrent group
    pub before: Vec<CommandSpec>,
    /// Run sequentially, raw, after the concurrent group
    pub after: Vec<CommandSpec>,
}

impl Config {
    pub fn new(commands: Vec<CommandSpec>) -> Self {
        Self {
            commands,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.commands.is_empty() {
            return Err(ConfigError::NoCommands);
        }
        self.commands
            .iter()
            .chain(&self.before)
            .chain(&self.after)
            .try_for_each(CommandSpec::validate)?;
        self.status.validate()
    }
}
