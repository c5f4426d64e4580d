//! Pause/stop signalling for cooperative suspension points.
//!
//! A single `watch` channel carries the run signal. The engine owns the sender; every
//! component that sleeps (path steps, wait ticks, detection polls, loop delays) holds a
//! [`Gate`] and parks on the channel while paused instead of polling.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::sleep;

/// Current run signal.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RunSignal {
    Run,
    Pause,
    /// Cooperative stop: finish the in-flight primitive, then unwind.
    Stop,
    /// Emergency stop: abort at the next suspension point.
    Halt,
}

impl RunSignal {
    pub fn is_stopping(self) -> bool {
        matches!(self, RunSignal::Stop | RunSignal::Halt)
    }
}

/// Returned from a suspension point after an emergency stop.
#[derive(Debug, Copy, Clone, Error, PartialEq, Eq)]
#[error("execution halted by emergency stop")]
pub struct Halted;

/// Receiving side of the run signal.
#[derive(Debug, Clone)]
pub struct Gate {
    rx: watch::Receiver<RunSignal>,
}

impl Gate {
    pub fn new(rx: watch::Receiver<RunSignal>) -> Self {
        Self { rx }
    }

    /// A gate that never pauses or stops, for using the simulator or detector outside an
    /// engine. Its sender is dropped immediately; a closed channel keeps reading `Run`.
    pub fn open() -> Self {
        let (_tx, rx) = watch::channel(RunSignal::Run);
        Self { rx }
    }

    pub fn signal(&self) -> RunSignal {
        *self.rx.borrow()
    }

    pub fn is_paused(&self) -> bool {
        self.signal() == RunSignal::Pause
    }

    pub fn is_stopping(&self) -> bool {
        self.signal().is_stopping()
    }

    pub fn is_halted(&self) -> bool {
        self.signal() == RunSignal::Halt
    }

    /// Park while paused. Errors only after an emergency stop.
    pub async fn checkpoint(&mut self) -> Result<(), Halted> {
        let signal = match self.rx.wait_for(|s| *s != RunSignal::Pause).await {
            Ok(s) => *s,
            // Sender gone: nothing can pause or resume us any more.
            Err(_) => return Ok(()),
        };
        if signal == RunSignal::Halt {
            Err(Halted)
        } else {
            Ok(())
        }
    }

    /// Sleep for `d` (cut short only by an emergency stop), then park while paused.
    /// Used between the steps of a primitive, which always runs to completion otherwise.
    pub async fn pace(&mut self, d: Duration) -> Result<(), Halted> {
        if !d.is_zero() {
            tokio::select! {
                _ = sleep(d) => {}
                _ = wait_for_signal(&mut self.rx, |s| s == RunSignal::Halt) => {}
            }
        }
        self.checkpoint().await
    }

    /// Sleep for `d` unless a stop arrives first, then park while paused.
    /// Returns `Ok(false)` when the sleep was cut short by a stop.
    pub async fn delay(&mut self, d: Duration) -> Result<bool, Halted> {
        if !d.is_zero() {
            tokio::select! {
                _ = sleep(d) => {}
                _ = wait_for_signal(&mut self.rx, RunSignal::is_stopping) => {}
            }
        }
        self.checkpoint().await?;
        Ok(!self.is_stopping())
    }

    /// Resolve on the next signal change (never, if the sender is gone).
    pub async fn changed(&mut self) {
        if self.rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn wait_for_signal(rx: &mut watch::Receiver<RunSignal>, f: impl Fn(RunSignal) -> bool) {
    if rx.wait_for(|s| f(*s)).await.is_err() {
        std::future::pending::<()>().await;
    }
}
