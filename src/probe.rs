//! External command probes for idle state and monitor power.
//!
//! Three independent queries back the recheck delay calculation and the
//! lock-event evaluation: the configured idle threshold (`gsettings`), the
//! current idle duration (`xprintidle`), and DPMS monitor power (`xset q`).
//! All values are whole seconds; `xprintidle` reports milliseconds and is
//! converted at this boundary.

use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;
use tokio::process::Command;
use tracing::trace;

use crate::config::Config;

/// Substring of `xset q` output that marks a powered-off monitor.
const MONITOR_OFF_MARKER: &str = "Monitor is Off";

/// Shape of the gsettings idle-delay value, e.g. `uint32 600`.
static IDLE_THRESHOLD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"uint32 (\d+)").expect("valid regex"));

/// DPMS monitor power state.
///
/// Monitor-on is an ordinary outcome, not an error; `ProbeError` is reserved
/// for commands that actually failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorPower {
    On,
    Off,
}

/// Errors from running or interpreting a probe command.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("could not run {command}: {source}")]
    Spawn {
        command: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} failed: {detail}")]
    Failed {
        command: &'static str,
        detail: String,
    },

    #[error("unexpected {command} output: {output:?}")]
    Unparseable {
        command: &'static str,
        output: String,
    },
}

/// Read-only system state queries used by the coordinator.
#[async_trait]
pub trait SystemProbes: Send + Sync {
    /// Configured seconds of inactivity after which the session goes idle.
    async fn idle_threshold(&self) -> Result<u64, ProbeError>;

    /// Seconds the user has currently been inactive.
    async fn idle_duration(&self) -> Result<u64, ProbeError>;

    /// Current DPMS monitor power state.
    async fn monitor_power(&self) -> Result<MonitorPower, ProbeError>;
}

/// Probes that shell out to `gsettings`, `xprintidle` and `xset`.
#[derive(Debug)]
pub struct ShellProbes {
    idle_setting_key: String,
    settle_delay: Duration,
}

impl ShellProbes {
    pub fn from_config(config: &Config) -> Self {
        Self {
            idle_setting_key: config.idle_setting_key.clone(),
            settle_delay: Duration::from_secs(config.settle_delay_seconds),
        }
    }
}

#[async_trait]
impl SystemProbes for ShellProbes {
    async fn idle_threshold(&self) -> Result<u64, ProbeError> {
        let mut args = vec!["get"];
        args.extend(self.idle_setting_key.split_whitespace());
        let stdout = run_command("gsettings", &args).await?;
        parse_idle_threshold(&stdout)
    }

    async fn idle_duration(&self) -> Result<u64, ProbeError> {
        let stdout = run_command("xprintidle", &[]).await?;
        parse_idle_duration(&stdout)
    }

    async fn monitor_power(&self) -> Result<MonitorPower, ProbeError> {
        // Give DPMS a moment to settle after the lock event before asking.
        tokio::time::sleep(self.settle_delay).await;

        let stdout = run_command("xset", &["q"]).await?;
        let power = monitor_power_from(&stdout);
        trace!("monitor power: {power:?}");
        Ok(power)
    }
}

/// Run a probe command to completion and return its stdout.
///
/// A non-zero exit or any stderr output counts as failure.
async fn run_command(command: &'static str, args: &[&str]) -> Result<String, ProbeError> {
    trace!("running probe: {command} {}", args.join(" "));

    let output = Command::new(command)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| ProbeError::Spawn { command, source })?;

    if !output.status.success() {
        return Err(ProbeError::Failed {
            command,
            detail: format!(
                "exit code {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        return Err(ProbeError::Failed {
            command,
            detail: format!("wrote to stderr: {}", stderr.trim()),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse the `uint32 <n>` shape gsettings prints for the idle threshold.
fn parse_idle_threshold(stdout: &str) -> Result<u64, ProbeError> {
    IDLE_THRESHOLD_RE
        .captures(stdout)
        .and_then(|captures| captures[1].parse().ok())
        .ok_or_else(|| ProbeError::Unparseable {
            command: "gsettings",
            output: stdout.trim().to_owned(),
        })
}

/// Parse xprintidle's bare millisecond count into whole seconds.
fn parse_idle_duration(stdout: &str) -> Result<u64, ProbeError> {
    stdout
        .trim()
        .parse::<u64>()
        .map(|millis| millis / 1000)
        .map_err(|_| ProbeError::Unparseable {
            command: "xprintidle",
            output: stdout.trim().to_owned(),
        })
}

fn monitor_power_from(stdout: &str) -> MonitorPower {
    if stdout.contains(MONITOR_OFF_MARKER) {
        MonitorPower::Off
    } else {
        MonitorPower::On
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_idle_threshold() {
        assert_eq!(parse_idle_threshold("uint32 600\n").unwrap(), 600);
        assert_eq!(parse_idle_threshold("uint32 0").unwrap(), 0);
    }

    #[test]
    fn test_parse_idle_threshold_rejects_other_shapes() {
        let err = parse_idle_threshold("600\n").unwrap_err();
        assert!(matches!(err, ProbeError::Unparseable { command: "gsettings", .. }));

        let err = parse_idle_threshold("").unwrap_err();
        assert!(matches!(err, ProbeError::Unparseable { .. }));
    }

    #[test]
    fn test_parse_idle_duration_converts_millis_to_seconds() {
        assert_eq!(parse_idle_duration("650000\n").unwrap(), 650);
        assert_eq!(parse_idle_duration("10500").unwrap(), 10);
        // Sub-second idle rounds down to zero.
        assert_eq!(parse_idle_duration("999").unwrap(), 0);
    }

    #[test]
    fn test_parse_idle_duration_rejects_garbage() {
        let err = parse_idle_duration("not-a-number").unwrap_err();
        assert!(matches!(err, ProbeError::Unparseable { command: "xprintidle", .. }));
    }

    #[test]
    fn test_monitor_power_from_output() {
        let off = "Keyboard Control:\n  DPMS is Enabled\n  Monitor is Off\n";
        assert_eq!(monitor_power_from(off), MonitorPower::Off);

        let on = "Keyboard Control:\n  DPMS is Enabled\n  Monitor is On\n";
        assert_eq!(monitor_power_from(on), MonitorPower::On);

        assert_eq!(monitor_power_from(""), MonitorPower::On);
    }
}
