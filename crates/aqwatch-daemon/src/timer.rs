//! IntervalTimer — the refresh clock.
//!
//! Runs as its own independently scheduled task so the countdown keeps
//! moving while fetches are in flight or the consumer is busy.  It talks to
//! the orchestrator only through channels: `Start`/`Stop` commands in, tick
//! events out.  The armed deadline is shared through a `watch` channel so the
//! view layer can derive a countdown without touching the task.
//!
//! One instance exists per session; dropping the handle (or calling `stop`)
//! halts emission, so a defunct orchestrator never receives ticks.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::debug;

use crate::core::MonitorEvent;

#[derive(Debug)]
enum TimerCommand {
    Start(Duration),
    Stop,
}

pub struct IntervalTimer {
    cmd_tx: mpsc::Sender<TimerCommand>,
    deadline_rx: watch::Receiver<Option<Instant>>,
}

impl IntervalTimer {
    /// Spawn the timer task.  Ticks are delivered into `tick_tx`.
    pub fn spawn(tick_tx: mpsc::Sender<MonitorEvent>) -> Self {
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<TimerCommand>(8);
        let (deadline_tx, deadline_rx) = watch::channel::<Option<Instant>>(None);

        tokio::spawn(async move {
            let mut interval: Option<Duration> = None;
            loop {
                let deadline = *deadline_tx.borrow();
                tokio::select! {
                    cmd = cmd_rx.recv() => match cmd {
                        None => break,
                        Some(TimerCommand::Start(d)) => {
                            // Rearm replaces any previous deadline outright,
                            // so a restart never accumulates drift.
                            interval = Some(d);
                            let _ = deadline_tx.send(Some(Instant::now() + d));
                        }
                        Some(TimerCommand::Stop) => {
                            interval = None;
                            let _ = deadline_tx.send(None);
                        }
                    },
                    _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                        if deadline.is_some() =>
                    {
                        // Rearm before delivering so a slow receiver cannot
                        // stretch the cadence.
                        if let Some(d) = interval {
                            let _ = deadline_tx.send(Some(Instant::now() + d));
                        }
                        if tick_tx.send(MonitorEvent::Tick).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("IntervalTimer: task exiting");
        });

        Self {
            cmd_tx,
            deadline_rx,
        }
    }

    /// (Re)start the countdown from a full interval.
    pub async fn start(&self, interval: Duration) {
        let _ = self.cmd_tx.send(TimerCommand::Start(interval)).await;
    }

    /// Halt emission.  No tick is delivered until the next `start`.
    pub async fn stop(&self) {
        let _ = self.cmd_tx.send(TimerCommand::Stop).await;
    }

    /// Handle for countdown display: the currently armed deadline, `None`
    /// while the timer is idle.
    pub fn countdown(&self) -> watch::Receiver<Option<Instant>> {
        self.deadline_rx.clone()
    }
}
