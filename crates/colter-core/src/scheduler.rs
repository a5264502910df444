//! Cycle scheduling.
//!
//! Without an interval the scheduler runs one cycle and returns. With an
//! interval it runs a cycle immediately and then once per interval until
//! the cancellation token fires or the job asks to stop. Cycles never
//! overlap: the wait starts after a cycle finishes.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleControl {
    Continue,
    Stop,
}

#[async_trait]
pub trait CycleJob: Send {
    async fn run_cycle(&mut self, cycle: u64) -> anyhow::Result<CycleControl>;
}

pub struct Scheduler {
    interval: Option<Duration>,
    cancel: CancellationToken,
}

impl Scheduler {
    /// Run a single cycle
    pub fn once() -> Self {
        Self {
            interval: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Run a cycle now and then every `interval`
    pub fn every(interval: Duration) -> Self {
        Self {
            interval: Some(interval),
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops the loop; cancel it from a signal handler
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drive `job` until done; returns the number of cycles started
    pub async fn run<J: CycleJob + ?Sized>(&self, job: &mut J) -> u64 {
        let mut cycle = 0;

        loop {
            if self.cancel.is_cancelled() {
                info!("Shutdown requested");
                break;
            }

            cycle += 1;
            match AssertUnwindSafe(job.run_cycle(cycle)).catch_unwind().await {
                Ok(Ok(CycleControl::Continue)) => {}
                Ok(Ok(CycleControl::Stop)) => {
                    info!(cycle, "Job requested stop");
                    break;
                }
                Ok(Err(e)) => error!(cycle, error = %format!("{:#}", e), "Cycle failed"),
                Err(panic) => error!(cycle, panic = %panic_message(panic.as_ref()), "Cycle panicked"),
            }

            let Some(interval) = self.interval else {
                break;
            };
            info!(next_in_secs = interval.as_secs(), "Waiting for next cycle");
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }

        cycle
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
