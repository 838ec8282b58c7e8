use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use concur::app::App;
use concur::command::KillSignal;
use concur::config::{
    CommandSpec, Config, ConfigError, DEFAULT_PREFIX_LENGTH, DEFAULT_TIMESTAMP_FORMAT,
    HealthCheckConfig, KillMode, KillPolicy, PrefixConfig, StatusConfig,
};
use concur::style::Style;

#[derive(Parser, Debug)]
#[command(
    name = "concur",
    author,
    version,
    about = "Run multiple commands concurrently with prefixed output",
    long_about = None
)]
struct Args {
    /// Commands to run concurrently
    #[arg(required = true)]
    commands: Vec<String>,

    /// Command names, one per command
    #[arg(short = 'n', long, value_delimiter = ',')]
    names: Vec<String>,

    /// Prefix styles, one per command (e.g. `red`, `hiblue.bold`, `#ff8800`)
    #[arg(short = 'c', long, value_delimiter = ',')]
    prefix_colors: Vec<Style>,

    /// Prefix type: index, name, command, pid, time, or a template such as
    /// `{{.Index}}-{{.Name}}`
    #[arg(short = 'p', long, default_value = "")]
    prefix: String,

    /// Maximum characters of command text in a prefix, 0 for no limit
    #[arg(long, default_value_t = DEFAULT_PREFIX_LENGTH)]
    prefix_length: usize,

    /// Pad every prefix to the longest one
    #[arg(long)]
    pad_prefix: bool,

    /// Timestamp format for `time` prefixes (strftime notation)
    #[arg(short = 't', long, default_value = DEFAULT_TIMESTAMP_FORMAT)]
    timestamp_format: String,

    /// Show time since start instead of the wall clock
    #[arg(long)]
    time_since_start: bool,

    /// Connect command output straight to the terminal
    #[arg(short = 'r', long)]
    raw: bool,

    /// Verbose diagnostics on stderr, echo raw output bytes, print run errors
    #[arg(long)]
    debug: bool,

    /// Kill all other commands when one exits
    #[arg(short = 'k', long, conflicts_with = "kill_others_on_fail")]
    kill_others: bool,

    /// Kill all other commands when one fails
    #[arg(long)]
    kill_others_on_fail: bool,

    /// Signal sent to commands being killed
    #[arg(long, default_value = "SIGINT")]
    kill_signal: KillSignal,

    /// Force-kill commands still running this long after the kill signal
    #[arg(long, value_parser = humantime::parse_duration)]
    kill_timeout: Option<Duration>,

    /// Health check command shown in the status panel (repeatable)
    #[arg(long)]
    status_cmd: Vec<String>,

    /// Health check URL shown in the status panel (repeatable)
    #[arg(long)]
    status_url: Vec<String>,

    /// Template rendering the response, one per `--status-url`
    #[arg(long)]
    status_template: Vec<String>,

    /// Health check polling interval
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    status_interval: Duration,

    /// Label of the status panel
    #[arg(long, default_value = concur::config::DEFAULT_STATUS_TEXT)]
    status_text: String,

    /// Command run before the group (repeatable)
    #[arg(long)]
    before: Vec<String>,

    /// Command run after the group (repeatable)
    #[arg(long)]
    after: Vec<String>,
}

impl Args {
    fn into_config(self) -> Result<Config, ConfigError> {
        let count = self.commands.len();
        check_count("names", self.names.len(), count)?;
        check_count("prefix colors", self.prefix_colors.len(), count)?;
        check_count(
            "status templates",
            self.status_template.len(),
            self.status_url.len(),
        )?;

        let debug = self.debug;
        let mut names = self.names.into_iter();
        let mut colors = self.prefix_colors.into_iter();
        let commands = self
            .commands
            .into_iter()
            .map(|command| {
                let mut spec = CommandSpec::new(command).with_debug(debug);
                if let Some(name) = names.next() {
                    spec = spec.with_name(name);
                }
                if let Some(style) = colors.next() {
                    spec = spec.with_style(style);
                }
                spec
            })
            .collect();

        let interval = self.status_interval;
        let checks: Vec<HealthCheckConfig> = self
            .status_cmd
            .into_iter()
            .map(|command| HealthCheckConfig::Command { command, interval })
            .chain(
                self.status_url
                    .into_iter()
                    .zip(self.status_template)
                    .map(|(url, template)| HealthCheckConfig::Http {
                        url,
                        template,
                        interval,
                    }),
            )
            .collect();

        let mode = if self.kill_others {
            KillMode::KillOthers
        } else if self.kill_others_on_fail {
            KillMode::KillOthersOnFail
        } else {
            KillMode::None
        };

        Ok(Config {
            commands,
            raw: self.raw,
            debug,
            prefix: PrefixConfig {
                template: self.prefix,
                pad_prefix: self.pad_prefix,
                prefix_length: self.prefix_length,
                timestamp_format: self.timestamp_format,
                time_since_start: self.time_since_start,
            },
            kill: KillPolicy {
                mode,
                signal: self.kill_signal,
                timeout: self.kill_timeout,
            },
            status: StatusConfig {
                enabled: !checks.is_empty(),
                text: self.status_text,
                checks,
                ..StatusConfig::default()
            },
            before: self.before.into_iter().map(CommandSpec::new).collect(),
            after: self.after.into_iter().map(CommandSpec::new).collect(),
        })
    }
}

/// Empty lists are fine, otherwise lengths must match
fn check_count(what: &'static str, given: usize, expected: usize) -> Result<(), ConfigError> {
    if given != 0 && given != expected {
        return Err(ConfigError::CountMismatch {
            what,
            given,
            expected,
        });
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    concur::logging::init(args.debug)?;

    let config = args.into_config()?;
    tracing::debug!(?config, "resolved configuration");
    let debug = config.debug;

    let app = Arc::new(App::new(config).context("invalid configuration")?);

    let interrupts = Arc::clone(&app);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            interrupts.interrupt();
        }
    });

    match app.run().await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(errors) => {
            if debug {
                eprintln!("Error: {errors}");
            }
            Ok(ExitCode::FAILURE)
        }
    }
}
