use std::fmt;
use std::process::ExitStatus;
use std::str::FromStr;

#[cfg(unix)]
use nix::sys::signal::Signal;

/// Signal delivered to running commands when the group is cancelled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KillSignal {
    #[default]
    Interrupt,
    Terminate,
    Kill,
}

impl KillSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Kill => "SIGKILL",
        }
    }

    #[cfg(unix)]
    pub fn to_nix(self) -> Signal {
        match self {
            Self::Interrupt => Signal::SIGINT,
            Self::Terminate => Signal::SIGTERM,
            Self::Kill => Signal::SIGKILL,
        }
    }
}

impl fmt::Display for KillSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid kill signal: {0}")]
pub struct KillSignalParseError(pub String);

impl FromStr for KillSignal {
    type Err = KillSignalParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        match upper.strip_prefix("SIG").unwrap_or(upper.as_str()) {
            "INT" => Ok(Self::Interrupt),
            "TERM" => Ok(Self::Terminate),
            "KILL" => Ok(Self::Kill),
            _ => Err(KillSignalParseError(s.to_string())),
        }
    }
}

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitSummary {
    Code(i32),
    /// Terminated by the given signal number
    Signal(i32),
}

impl ExitSummary {
    pub fn success(&self) -> bool {
        matches!(self, Self::Code(0))
    }
}

impl From<ExitStatus> for ExitSummary {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signal(signal);
            }
        }
        Self::Code(-1)
    }
}

impl fmt::Display for ExitSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit status {code}"),
            #[cfg(unix)]
            Self::Signal(signal) => match Signal::try_from(*signal) {
                Ok(signal) => write!(f, "signal: {}", signal.as_str()),
                Err(_) => write!(f, "signal: {signal}"),
            },
            #[cfg(not(unix))]
            Self::Signal(signal) => write!(f, "signal: {signal}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("SIGINT", KillSignal::Interrupt)]
    #[case("sigterm", KillSignal::Terminate)]
    #[case("kill", KillSignal::Kill)]
    fn kill_signal_from_str_accepts_names(#[case] input: &str, #[case] expected: KillSignal) {
        assert_eq!(input.parse::<KillSignal>().unwrap(), expected);
    }

    #[test]
    fn kill_signal_from_str_rejects_unknown() {
        assert!("SIGHUP".parse::<KillSignal>().is_err());
    }

    #[test]
    fn kill_signal_default_is_interrupt() {
        assert_eq!(KillSignal::default().to_string(), "SIGINT");
    }

    #[rstest]
    #[case(ExitSummary::Code(0), "exit status 0")]
    #[case(ExitSummary::Code(3), "exit status 3")]
    fn exit_summary_display_matches_expected(#[case] summary: ExitSummary, #[case] expected: &str) {
        assert_eq!(summary.to_string(), expected);
    }

    #[cfg(unix)]
    #[test]
    fn exit_summary_display_names_signal() {
        assert_eq!(ExitSummary::Signal(2).to_string(), "signal: SIGINT");
    }

    #[test]
    fn exit_summary_success_only_for_zero() {
        assert!(ExitSummary::Code(0).success());
        assert!(!ExitSummary::Code(1).success());
        assert!(!ExitSummary::Signal(15).success());
    }
}
