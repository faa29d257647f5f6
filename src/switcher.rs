//! The recheck coordinator.
//!
//! Reacts to screen lock notifications: if the monitor is already off the
//! display is repainted by switching virtual terminals and powered back off;
//! if the monitor is still on, a single delayed recheck is scheduled from the
//! session's idle threshold and current idle duration. At most one recheck is
//! ever outstanding, and no failure past startup is fatal — every error is
//! logged and the coordinator returns to idle.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::actuator::TerminalActuator;
use crate::config::Config;
use crate::probe::{MonitorPower, ProbeError, SystemProbes};
use crate::screensaver::LockQuery;

/// The single outstanding delayed recheck: a comparison-only token plus an
/// abort handle for the task driving it.
struct RecheckSchedule {
    token: u64,
    abort: AbortHandle,
}

/// Coordinates lock events, system probes and display effects.
pub struct Switcher {
    intermediate_tty: u32,
    primary_tty: u32,
    cushion: Duration,
    lock: Arc<dyn LockQuery>,
    probes: Arc<dyn SystemProbes>,
    actuator: Arc<dyn TerminalActuator>,
    recheck: Mutex<Option<RecheckSchedule>>,
    next_token: AtomicU64,
}

impl Switcher {
    pub fn new(
        config: &Config,
        lock: Arc<dyn LockQuery>,
        probes: Arc<dyn SystemProbes>,
        actuator: Arc<dyn TerminalActuator>,
    ) -> Self {
        Self {
            intermediate_tty: config.intermediate_tty,
            primary_tty: config.primary_tty,
            cushion: Duration::from_secs(config.recheck_cushion_seconds),
            lock,
            probes,
            actuator,
            recheck: Mutex::new(None),
            next_token: AtomicU64::new(0),
        }
    }

    /// Entry point for `ActiveChanged` notifications.
    pub async fn screen_lock_changed(self: Arc<Self>, locked: bool) {
        if !locked {
            info!("screen is unlocked, nothing to do");
            return;
        }

        info!("screen is locked");
        self.evaluate().await;
    }

    /// One evaluation of the locked screen against monitor power.
    async fn evaluate(self: Arc<Self>) {
        match self.probes.monitor_power().await {
            Ok(MonitorPower::Off) => {
                info!("monitor was off when locked, switching terminals to repaint");
                self.repaint().await;
            }
            Ok(MonitorPower::On) => {
                info!("monitor is still on, scheduling a recheck");
                self.schedule_recheck().await;
            }
            Err(err) => {
                warn!("monitor power probe failed: {err}");
            }
        }
    }

    /// The two-step terminal switch followed by forcing the monitor off.
    ///
    /// Either failure ends the sequence; nothing is retried.
    async fn repaint(&self) {
        if let Err(err) = self
            .actuator
            .switch_terminal(self.intermediate_tty, self.primary_tty)
            .await
        {
            warn!("terminal switch failed: {err}");
            return;
        }

        if let Err(err) = self.actuator.screen_off().await {
            warn!("could not turn the screen back off: {err}");
        }
    }

    /// How long to wait before re-examining the lock state.
    ///
    /// The idle threshold and current idle duration are queried
    /// independently; the wait is their difference. When the session is
    /// already idle past its threshold, the configured cushion is used
    /// instead. Either probe failing fails the whole computation.
    pub async fn compute_delay(&self) -> Result<Duration, ProbeError> {
        let (threshold, idle) =
            tokio::try_join!(self.probes.idle_threshold(), self.probes.idle_duration())?;

        debug!("idle threshold: {threshold}s, idle duration: {idle}s");

        if threshold > idle {
            Ok(Duration::from_secs(threshold - idle))
        } else {
            Ok(self.cushion)
        }
    }

    /// Create the delayed recheck, unless one is already outstanding.
    async fn schedule_recheck(self: Arc<Self>) {
        let mut slot = self.recheck.lock().await;
        if slot.is_some() {
            debug!("a recheck is already scheduled, leaving it to re-evaluate");
            return;
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let this = Arc::clone(&self);
        let task = tokio::spawn(async move { this.run_recheck(token).await });

        // The slot is filled while the guard is still held, so the task's
        // first look at it cannot observe an empty slot.
        *slot = Some(RecheckSchedule {
            token,
            abort: task.abort_handle(),
        });
    }

    /// The delayed recheck cycle.
    ///
    /// Runs as its own task; the token in the schedule slot keeps a second
    /// cycle from being created while this one is alive. Each pass clears
    /// the token before branching, so a re-evaluation that finds the monitor
    /// still on re-arms the slot and loops instead of recursing.
    async fn run_recheck(self: Arc<Self>, first_token: u64) {
        let abort = {
            let slot = self.recheck.lock().await;
            match slot.as_ref() {
                Some(schedule) if schedule.token == first_token => schedule.abort.clone(),
                _ => return,
            }
        };

        let mut token = first_token;
        loop {
            let delay = match self.compute_delay().await {
                Ok(delay) => delay,
                Err(err) => {
                    warn!("could not compute the recheck delay: {err}");
                    self.clear_schedule(token).await;
                    return;
                }
            };

            info!("checking if the screen is still locked in {}s", delay.as_secs());
            tokio::time::sleep(delay).await;

            let locked = self.lock.is_locked().await;
            self.clear_schedule(token).await;

            match locked {
                Ok(false) => {
                    info!("screen was unlocked during the delay, nothing to do");
                    return;
                }
                Ok(true) => {
                    debug!("screen is still locked, re-evaluating monitor power");
                    match self.probes.monitor_power().await {
                        Ok(MonitorPower::Off) => {
                            info!("monitor went off while locked, switching terminals to repaint");
                            self.repaint().await;
                            return;
                        }
                        Ok(MonitorPower::On) => match self.try_reschedule(&abort).await {
                            Some(next) => token = next,
                            None => return,
                        },
                        Err(err) => {
                            warn!("monitor power probe failed: {err}");
                            return;
                        }
                    }
                }
                Err(err) => {
                    warn!("could not check the lock state: {err}");
                    return;
                }
            }
        }
    }

    /// Re-arm the schedule slot from inside a running cycle.
    ///
    /// Returns `None` when another event claimed the slot between the clear
    /// and this call; the live schedule will re-evaluate on its own.
    async fn try_reschedule(&self, abort: &AbortHandle) -> Option<u64> {
        let mut slot = self.recheck.lock().await;
        if slot.is_some() {
            debug!("another recheck was scheduled in the meantime");
            return None;
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        *slot = Some(RecheckSchedule {
            token,
            abort: abort.clone(),
        });
        Some(token)
    }

    /// Clear the schedule slot if it still holds `token`.
    async fn clear_schedule(&self, token: u64) {
        let mut slot = self.recheck.lock().await;
        if slot.as_ref().is_some_and(|schedule| schedule.token == token) {
            *slot = None;
        }
    }

    /// Whether a delayed recheck is currently outstanding.
    pub async fn recheck_pending(&self) -> bool {
        self.recheck.lock().await.is_some()
    }

    /// Abort the outstanding recheck task, if any.
    pub async fn cancel_pending_recheck(&self) {
        if let Some(schedule) = self.recheck.lock().await.take() {
            debug!("aborting the outstanding recheck");
            schedule.abort.abort();
        }
    }
}
