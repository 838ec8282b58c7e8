use std::io::{BufRead, BufReader, ErrorKind, PipeReader, Read};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::command::{ExitSummary, KillSignal};
use crate::config::{CommandSpec, KillPolicy};
use crate::error::{Error, Result};
use crate::event::Message;

/// Build the platform shell invocation for a command line
///
/// `sh -c <command>` on POSIX, `cmd /c <command>` on Windows.
pub(crate) fn shell_command(command: &str) -> Command {
    let (shell, flag) = if cfg!(windows) {
        ("cmd", "/c")
    } else {
        ("sh", "-c")
    };
    let mut cmd = Command::new(shell);
    cmd.arg(flag).arg(command).stdin(Stdio::null());
    cmd
}

/// Run a command to completion, capturing stdout and stderr interleaved
/// through one pipe
///
/// The child is killed if the returned future is dropped.
pub(crate) async fn capture_merged(command: &str) -> std::io::Result<(Vec<u8>, ExitStatus)> {
    let (mut reader, writer) = std::io::pipe()?;
    let mut child = {
        let mut cmd = shell_command(command);
        cmd.stdout(writer.try_clone()?)
            .stderr(writer)
            .kill_on_drop(true);
        cmd.spawn()?
    };

    let read = tokio::task::spawn_blocking(move || {
        let mut output = Vec::new();
        reader.read_to_end(&mut output).map(|_| output)
    });
    let status = child.wait().await?;
    let output = read.await.map_err(std::io::Error::other)??;
    Ok((output, status))
}

/// A command registered under a slot, not yet started
#[derive(Debug, Clone)]
pub struct CommandRunner {
    slot: usize,
    spec: CommandSpec,
    raw: bool,
    signal: KillSignal,
    kill_timeout: Option<Duration>,
    token: CancellationToken,
    /// Skips the grace period once the signal has been sent
    force: CancellationToken,
}

impl CommandRunner {
    /// `raw` is the group default, overridden by the command's own flag
    pub fn new(
        slot: usize,
        spec: CommandSpec,
        raw: bool,
        kill: &KillPolicy,
        token: CancellationToken,
    ) -> Self {
        let raw = spec.is_raw(raw);
        Self {
            slot,
            spec,
            raw,
            signal: kill.signal,
            kill_timeout: kill.timeout,
            token,
            force: CancellationToken::new(),
        }
    }

    /// Token that escalates a signalled process straight to SIGKILL
    pub fn with_force(mut self, force: CancellationToken) -> Self {
        self.force = force;
        self
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn is_raw(&self) -> bool {
        self.raw
    }

    /// Spawn the shell process
    ///
    /// Prefixed commands get stdout and stderr merged into one internal
    /// pipe; raw commands write straight to the terminal. On POSIX the
    /// process leads its own process group so a cancellation signal reaches
    /// everything it started.
    pub fn start(self) -> Result<CommandHandle> {
        let command = self.spec.command.clone();

        let (child, reader) = {
            let mut cmd = shell_command(&command);
            if let Some(cwd) = &self.spec.cwd {
                cmd.current_dir(cwd);
            }
            #[cfg(unix)]
            cmd.process_group(0);

            let reader = if self.raw {
                cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
                None
            } else {
                let pipe_error = |source| Error::Pipe {
                    command: command.clone(),
                    source,
                };
                let (reader, writer) = std::io::pipe().map_err(pipe_error)?;
                let stderr = writer.try_clone().map_err(pipe_error)?;
                cmd.stdout(writer).stderr(stderr);
                Some(reader)
            };

            let child = cmd.spawn().map_err(|source| Error::Spawn {
                command: command.clone(),
                source,
            })?;
            // `cmd` drops here, closing our copies of the pipe's write end
            (child, reader)
        };

        tracing::debug!(slot = self.slot, pid = ?child.id(), %command, "started command");

        Ok(CommandHandle {
            runner: self,
            child,
            reader,
        })
    }
}

/// Handle for a running command
#[derive(Debug)]
pub struct CommandHandle {
    runner: CommandRunner,
    child: Child,
    reader: Option<PipeReader>,
}

impl CommandHandle {
    pub fn slot(&self) -> usize {
        self.runner.slot
    }

    /// Process id, `None` once the process has been reaped
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Deliver the configured termination signal to the process group
    ///
    /// Falls back to a forced kill where signals are unavailable or
    /// delivery fails.
    pub fn terminate(&mut self) {
        if self.child.id().is_none() {
            return;
        }

        #[cfg(unix)]
        {
            if self.signal_group(self.runner.signal) {
                return;
            }
        }

        self.force_kill();
    }

    /// SIGKILL the whole group, falling back to killing the shell alone
    fn force_kill(&mut self) {
        #[cfg(unix)]
        {
            if self.signal_group(KillSignal::Kill) {
                return;
            }
        }

        if let Err(e) = self.child.start_kill() {
            tracing::warn!(slot = self.slot(), error = %e, "failed to kill process");
        }
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: KillSignal) -> bool {
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            return false;
        };

        match killpg(Pid::from_raw(pid as i32), signal.to_nix()) {
            Ok(()) => {
                tracing::debug!(slot = self.slot(), pid, %signal, "sent signal");
                true
            }
            Err(e) => {
                tracing::warn!(slot = self.slot(), pid, %signal, error = %e, "failed to signal process group");
                false
            }
        }
    }

    /// Wait for the process to exit, forwarding its output to `sink`
    ///
    /// Output lines are read on a blocking thread and sent in order; the
    /// reader is joined before the final `exited with` message, so that
    /// message is always the last one for this slot. Raw commands only send
    /// the final message. Returns an error for non-zero exits, signal deaths
    /// and output read failures.
    pub async fn wait(mut self, sink: &mpsc::Sender<Message>) -> Result<()> {
        let slot = self.slot();
        let command = self.runner.spec.command.clone();

        let reader = self
            .reader
            .take()
            .map(|reader| spawn_reader(reader, slot, self.runner.spec.debug, sink.clone()));

        let status = self.wait_for_exit().await;

        let read_result = match reader {
            Some(task) => task.await?,
            None => Ok(()),
        };

        let summary = ExitSummary::from(status.map_err(|source| Error::Wait {
            command: command.clone(),
            source,
        })?);
        tracing::debug!(slot, %command, %summary, "command exited");

        if sink
            .send(Message::new(slot, format!("{command} exited with {summary}\n")))
            .await
            .is_err()
        {
            tracing::debug!(slot, %command, "output closed, dropping exit line");
        }

        if !summary.success() {
            return Err(Error::Exited {
                command,
                status: summary,
            });
        }
        read_result.map_err(|source| Error::Read { command, source })
    }

    async fn wait_for_exit(&mut self) -> std::io::Result<ExitStatus> {
        tokio::select! {
            status = self.child.wait() => return status,
            _ = self.runner.token.cancelled() => {}
        }

        self.terminate();

        let kill_timeout = self.runner.kill_timeout;
        let expired = async move {
            match kill_timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };
        let reason = tokio::select! {
            status = self.child.wait() => return status,
            _ = self.runner.force.cancelled() => "forced",
            _ = expired => "timeout",
        };

        tracing::warn!(slot = self.slot(), reason, "command ignored signal, killing");
        self.force_kill();
        self.child.wait().await
    }
}

/// Scan merged output line by line on the blocking pool
fn spawn_reader(
    reader: PipeReader,
    slot: usize,
    debug: bool,
    sink: mpsc::Sender<Message>,
) -> JoinHandle<std::io::Result<()>> {
    tokio::task::spawn_blocking(move || forward_lines(BufReader::new(reader), slot, debug, &sink))
}

/// Send every line of `reader` to `sink` until EOF or until nobody listens
///
/// Blocks the calling thread.
fn forward_lines(
    mut reader: impl BufRead,
    slot: usize,
    debug: bool,
    sink: &mpsc::Sender<Message>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => return Ok(()),
            Ok(_) => {
                if debug {
                    tracing::info!(target: "concur::raw", slot, bytes = %buf.escape_ascii());
                }
                let line = String::from_utf8_lossy(trim_line_ending(&buf));
                if sink.blocking_send(Message::line(slot, &line)).is_err() {
                    tracing::debug!(slot, "output closed, stopping reader");
                    return Ok(());
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(slot, error = %e, "failed to read command output");
                return Err(e);
            }
        }
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
