use std::io::{self, Write};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::command::CommandRunner;
use crate::config::{CommandSpec, Config, ConfigError};
use crate::error::{Error, Result, RunErrors};
use crate::health::HealthCheck;
use crate::output::{self, Multiplexer};
use crate::prefix::PrefixRenderer;
use crate::style::Style;

/// Interrupt state of the running stage
#[derive(Debug, Clone, Default)]
struct StageTokens {
    /// Sends the kill signal
    cancel: CancellationToken,
    /// Skips straight to SIGKILL
    force: CancellationToken,
}

/// Runs the configured command group
///
/// Before-commands run one at a time, then the concurrent group, then the
/// after-commands. Before-commands and the group share one stage; the
/// after-commands get a fresh one, so an interrupt that tore the group down
/// does not reach the cleanup commands. The group's kill policy only cancels
/// a child of the stage token.
pub struct App {
    config: Config,
    stage: Mutex<StageTokens>,
}

impl App {
    pub fn new(config: Config) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            stage: Mutex::new(StageTokens::default()),
        })
    }

    /// Handle Ctrl-C: the first one signals the current stage, any further
    /// one force-kills it
    pub fn interrupt(&self) {
        let stage = self.stage.lock();
        if stage.cancel.is_cancelled() {
            tracing::warn!("interrupted again, killing commands");
            stage.force.cancel();
        } else {
            tracing::debug!("interrupted, cancelling commands");
            stage.cancel.cancel();
        }
    }

    fn stage(&self) -> StageTokens {
        self.stage.lock().clone()
    }

    fn next_stage(&self) -> StageTokens {
        let stage = StageTokens::default();
        *self.stage.lock() = stage.clone();
        stage
    }

    /// Run all stages against stdout
    ///
    /// A failing before-command aborts the run. After-commands run whatever
    /// the group's outcome, and their failures join the group's.
    pub async fn run(&self) -> std::result::Result<(), RunErrors> {
        let staged = !self.config.before.is_empty() || !self.config.after.is_empty();

        if !self.config.before.is_empty() {
            banner("[RunBefore]")?;
            let stage = self.stage();
            for spec in &self.config.before {
                self.run_sequential(spec, &stage).await?;
            }
        }

        if staged {
            banner("[Concurrently]")?;
        }
        let mut errors = match self.run_concurrent(io::stdout()).await {
            Ok(()) => RunErrors::new(),
            Err(errors) => errors,
        };

        if !self.config.after.is_empty() {
            banner("[RunAfter]")?;
            let stage = self.next_stage();
            for spec in &self.config.after {
                if let Err(e) = self.run_sequential(spec, &stage).await {
                    errors.push(e);
                    break;
                }
            }
        }

        errors.into_result()
    }

    /// Run the concurrent group, writing all output through one multiplexer
    ///
    /// Prefix templates and health checks are built first, so a bad
    /// configuration fails before any process starts.
    pub async fn run_concurrent<W>(&self, out: W) -> std::result::Result<(), RunErrors>
    where
        W: Write + Send + 'static,
    {
        let config = &self.config;
        let stage = self.stage();
        let group = stage.cancel.child_token();

        let raw_group = config.commands.iter().all(|spec| spec.is_raw(config.raw));
        let mut prefix = if raw_group {
            None
        } else {
            Some(PrefixRenderer::new(&config.prefix).map_err(Error::from)?)
        };
        let checks = if config.status.enabled {
            config
                .status
                .checks
                .iter()
                .map(|check| HealthCheck::from_config(check).map(Arc::new))
                .collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };

        let mut errors = RunErrors::new();
        let mut handles = Vec::with_capacity(config.commands.len());
        for (slot, spec) in config.commands.iter().enumerate() {
            let started = if group.is_cancelled() {
                tracing::debug!(slot, command = %spec.command, "group cancelled, not starting");
                None
            } else {
                let runner =
                    CommandRunner::new(slot, spec.clone(), config.raw, &config.kill, group.clone())
                        .with_force(stage.force.clone());
                Some(runner.start())
            };

            let pid = match &started {
                Some(Ok(handle)) => handle.pid().unwrap_or_default(),
                _ => 0,
            };
            if let Some(prefix) = &mut prefix {
                prefix.add(spec.name.as_deref(), &spec.command, pid, spec.style);
            }

            match started {
                Some(Ok(handle)) => handles.push(handle),
                Some(Err(e)) => {
                    tracing::warn!(slot, error = %e, "failed to start command");
                    if config.kill.triggers(true) {
                        group.cancel();
                    }
                    errors.push(e);
                }
                None => {}
            }
        }

        if config.prefix.pad_prefix
            && let Some(prefix) = &mut prefix
        {
            prefix.apply_even_padding();
        }

        let (tx, rx) = output::channel();
        let multiplexer = Multiplexer::new(out, rx, prefix).with_health(checks.clone(), &config.status);
        let multiplexer = tokio::spawn(multiplexer.run(group.clone()));

        let checks_token = group.child_token();
        let checkers: Vec<_> = checks
            .into_iter()
            .map(|check| {
                let token = checks_token.clone();
                tokio::spawn(async move { check.start(token).await })
            })
            .collect();

        let supervisors: Vec<_> = handles
            .into_iter()
            .map(|handle| {
                let tx = tx.clone();
                let group = group.clone();
                let kill = config.kill;
                tokio::spawn(async move {
                    let result = handle.wait(&tx).await;
                    if kill.triggers(result.is_err()) {
                        tracing::debug!("kill policy triggered, cancelling group");
                        group.cancel();
                    }
                    result
                })
            })
            .collect();

        for result in join_all(supervisors).await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.push(e),
                Err(e) => errors.push(e.into()),
            }
        }

        // Every sender is gone once the supervisors are joined
        drop(tx);
        match multiplexer.await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => errors.push(e.into()),
            Err(e) => errors.push(e.into()),
        }

        checks_token.cancel();
        for result in join_all(checkers).await {
            if let Err(e) = result {
                errors.push(e.into());
            }
        }

        errors.into_result()
    }

    /// Run one before/after command in raw mode and print its exit line
    async fn run_sequential(&self, spec: &CommandSpec, stage: &StageTokens) -> Result<()> {
        let (tx, mut rx) = output::channel();
        let runner = CommandRunner::new(
            0,
            spec.clone().with_raw(true),
            true,
            &self.config.kill,
            stage.cancel.clone(),
        )
        .with_force(stage.force.clone());

        let result = match runner.start() {
            Ok(handle) => handle.wait(&tx).await,
            Err(e) => Err(e),
        };

        drop(tx);
        let mut stdout = io::stdout().lock();
        while let Ok(message) = rx.try_recv() {
            stdout.write_all(message.text.as_bytes())?;
        }
        stdout.flush()?;
        result
    }
}

fn banner(text: &str) -> Result<()> {
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", Style::default().bold().apply(text))?;
    stdout.flush()?;
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use parking_lot::Mutex;

    use crate::config::{HealthCheckConfig, KillMode, PrefixConfig, StatusConfig};
    use crate::event::RESET;

    /// Writer whose contents stay readable after the multiplexer takes it
    #[derive(Debug, Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn lines(&self) -> Vec<String> {
            String::from_utf8_lossy(&self.0.lock())
                .replace(RESET, "")
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn named(commands: &[(&str, &str)]) -> Config {
        Config::new(
            commands
                .iter()
                .map(|(name, command)| CommandSpec::new(*command).with_name(*name))
                .collect(),
        )
    }

    async fn run(config: Config) -> (std::result::Result<(), RunErrors>, SharedBuffer) {
        let out = SharedBuffer::default();
        let app = App::new(config).unwrap();
        let result = app.run_concurrent(out.clone()).await;
        (result, out)
    }

    #[test]
    fn app_new_rejects_invalid_config() {
        assert!(App::new(Config::default()).is_err());
        assert!(App::new(Config::new(vec![CommandSpec::new(" ")])).is_err());
    }

    #[tokio::test]
    async fn app_run_concurrent_keeps_per_slot_order_and_one_exit_line() {
        let (result, out) = run(named(&[
            ("a", "echo a1; echo a2; echo a3"),
            ("b", "echo b1; echo b2"),
        ]))
        .await;

        assert!(result.is_ok());
        let lines = out.lines();
        let slot_a: Vec<&String> = lines.iter().filter(|l| l.starts_with("[a] ")).collect();
        assert_eq!(
            slot_a,
            vec![
                "[a] a1",
                "[a] a2",
                "[a] a3",
                "[a] echo a1; echo a2; echo a3 exited with exit status 0",
            ]
        );
        let slot_b: Vec<&String> = lines.iter().filter(|l| l.starts_with("[b] ")).collect();
        assert_eq!(slot_b.len(), 3);
        assert_eq!(
            lines.iter().filter(|l| l.contains("exited with")).count(),
            2
        );
    }

    #[tokio::test]
    async fn app_run_concurrent_kills_others_on_first_failure() {
        let mut config = Config::new(vec![CommandSpec::new("exit 1"), CommandSpec::new("sleep 5")]);
        config.kill.mode = KillMode::KillOthersOnFail;

        let started = Instant::now();
        let (result, out) = run(config).await;

        assert!(started.elapsed() < Duration::from_secs(4));
        let errors = result.unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(out.lines().iter().any(|l| l.ends_with("sleep 5 exited with signal: SIGINT")));
    }

    #[tokio::test]
    async fn app_run_concurrent_without_kill_policy_waits_for_all() {
        let config = Config::new(vec![CommandSpec::new("exit 1"), CommandSpec::new("sleep 0.2; echo late")]);

        let (result, out) = run(config).await;

        assert_eq!(result.unwrap_err().len(), 1);
        assert!(out.lines().iter().any(|l| l.ends_with(" late")));
    }

    #[tokio::test]
    async fn app_run_concurrent_pads_prefixes() {
        let mut config = named(&[("a", "echo x"), ("backend", "echo y")]);
        config.prefix.pad_prefix = true;

        let (_, out) = run(config).await;

        let lines = out.lines();
        assert!(lines.contains(&"[a      ] x".to_string()));
        assert!(lines.contains(&"[backend] y".to_string()));
    }

    #[tokio::test]
    async fn app_run_concurrent_renders_prefix_template() {
        let mut config = named(&[("api", "true"), ("db", "true"), ("web", "echo up")]);
        config.prefix = PrefixConfig {
            template: "{{.Index}}-{{.Name}}".into(),
            ..PrefixConfig::default()
        };

        let (_, out) = run(config).await;

        assert!(out.lines().contains(&"[2-web] up".to_string()));
    }

    #[tokio::test]
    async fn app_run_concurrent_rejects_bad_template_before_starting() {
        let mut config = Config::new(vec![CommandSpec::new("echo started")]);
        config.prefix.template = "{{.Nope}}".into();

        let (result, out) = run(config).await;

        assert!(result.is_err());
        assert!(out.lines().is_empty());
    }

    #[tokio::test]
    async fn app_run_concurrent_raw_group_writes_unprefixed_exit_line() {
        let mut config = Config::new(vec![CommandSpec::new("true")]);
        config.raw = true;

        let (result, out) = run(config).await;

        assert!(result.is_ok());
        assert_eq!(out.lines(), vec!["true exited with exit status 0"]);
    }

    #[tokio::test]
    async fn app_run_concurrent_draws_health_panel() {
        let mut config = named(&[("web", "sleep 0.6")]);
        config.status = StatusConfig {
            enabled: true,
            style: Style::default(),
            print_interval: Duration::from_millis(150),
            checks: vec![HealthCheckConfig::Command {
                command: "echo ok".into(),
                interval: Duration::from_millis(150),
            }],
            ..StatusConfig::default()
        };

        let (result, out) = run(config).await;

        assert!(result.is_ok());
        assert!(out.lines().iter().any(|l| l.ends_with("[HEALTH] ok")));
    }

    #[tokio::test]
    async fn app_run_stops_when_before_command_fails() {
        let mut config = Config::new(vec![CommandSpec::new("true")]);
        config.before.push(CommandSpec::new("exit 3"));
        let app = App::new(config).unwrap();

        let errors = app.run().await.unwrap_err();

        assert_eq!(errors.len(), 1);
        assert!(errors.to_string().contains("exit 3"));
    }

    #[tokio::test]
    async fn app_interrupt_cancels_running_group() {
        let app = App::new(Config::new(vec![CommandSpec::new("sleep 10")])).unwrap();

        let started = Instant::now();
        let (result, _) = tokio::join!(app.run_concurrent(SharedBuffer::default()), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            app.interrupt();
        });

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn app_run_after_commands_survive_interrupt_of_group() {
        let mut config = Config::new(vec![CommandSpec::new("sleep 10")]);
        config.after.push(CommandSpec::new("sleep 0.3; echo cleanup-done"));
        let app = App::new(config).unwrap();

        let (result, _) = tokio::join!(app.run(), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            app.interrupt();
        });

        let errors = result.unwrap_err();
        assert_eq!(errors.len(), 1, "{errors}");
        assert!(errors.to_string().contains("sleep 10"));
        assert!(!errors.to_string().contains("cleanup-done"));
    }

    #[tokio::test]
    async fn app_second_interrupt_kills_command_ignoring_signal() {
        let app = App::new(Config::new(vec![CommandSpec::new("trap '' INT; sleep 10")])).unwrap();
        let out = SharedBuffer::default();

        let started = Instant::now();
        let (result, _) = tokio::join!(app.run_concurrent(out.clone()), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            app.interrupt();
            tokio::time::sleep(Duration::from_millis(200)).await;
            app.interrupt();
        });

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(out.lines().iter().any(|l| l.ends_with("exited with signal: SIGKILL")));
    }
}
