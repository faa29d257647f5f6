//! Terminal-switch and monitor power-off effects.
//!
//! Both operations shell out to privileged commands and are fire-and-report:
//! failures are logged by the caller, never retried or escalated.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::Config;

/// Errors from a terminal-switch or power-off command.
#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("could not run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed: {detail}")]
    Failed { command: String, detail: String },
}

/// Effects the coordinator can apply to the display.
#[async_trait]
pub trait TerminalActuator: Send + Sync {
    /// Switch the active virtual terminal to `first`, then to `second`.
    ///
    /// The steps run in strict sequence; the first failure aborts the rest.
    async fn switch_terminal(&self, first: u32, second: u32) -> Result<(), ActuatorError>;

    /// Force the monitor off via DPMS, after the configured delay.
    async fn screen_off(&self) -> Result<(), ActuatorError>;
}

/// Actuator that shells out to `chvt` and `xset`.
#[derive(Debug)]
pub struct ShellActuator {
    screen_off_delay: Duration,
    dry_run: bool,
}

impl ShellActuator {
    pub fn from_config(config: &Config) -> Self {
        Self {
            screen_off_delay: Duration::from_secs(config.screen_off_delay_seconds),
            dry_run: config.dry_run,
        }
    }

    async fn chvt(&self, tty: u32) -> Result<(), ActuatorError> {
        debug!("switching to tty{tty}");
        let tty = tty.to_string();
        self.run("sudo", &["chvt", &tty]).await
    }

    /// Run an effect command to completion. A non-zero exit or stderr output
    /// counts as failure.
    async fn run(&self, program: &str, args: &[&str]) -> Result<(), ActuatorError> {
        let command = format!("{program} {}", args.join(" "));

        if self.dry_run {
            info!("[DRY RUN] Would execute: {command}");
            return Ok(());
        }

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ActuatorError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ActuatorError::Failed {
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
            return Err(ActuatorError::Failed {
                command,
                detail: format!("wrote to stderr: {}", stderr.trim()),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl TerminalActuator for ShellActuator {
    async fn switch_terminal(&self, first: u32, second: u32) -> Result<(), ActuatorError> {
        self.chvt(first).await?;
        self.chvt(second).await
    }

    async fn screen_off(&self) -> Result<(), ActuatorError> {
        if !self.screen_off_delay.is_zero() {
            tokio::time::sleep(self.screen_off_delay).await;
        }
        info!("turning the screen off");
        self.run("xset", &["dpms", "force", "off"]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dry_actuator() -> ShellActuator {
        ShellActuator {
            screen_off_delay: Duration::ZERO,
            dry_run: true,
        }
    }

    #[tokio::test]
    async fn test_dry_run_switch_succeeds_without_executing() {
        let actuator = dry_actuator();
        actuator.switch_terminal(1, 7).await.unwrap();
    }

    #[tokio::test]
    async fn test_dry_run_screen_off_succeeds_without_executing() {
        let actuator = dry_actuator();
        actuator.screen_off().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_command_is_spawn_error() {
        let actuator = ShellActuator {
            screen_off_delay: Duration::ZERO,
            dry_run: false,
        };
        let err = actuator
            .run("vtswitchd-no-such-command", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ActuatorError::Spawn { .. }));
    }
}
