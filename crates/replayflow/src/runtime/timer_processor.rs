//! Timer processor: leases due timers and dispatches them to handlers.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::RuntimeConfig;
use super::handlers;
use crate::engine::Engine;
use crate::error::Result;
use crate::timer::Timer;

/// Polls the timer store and dispatches due timers.
///
/// Several processors may share one store. Leasing makes a timer invisible
/// to other pollers for `lease_duration`, so each due timer is dispatched
/// by one processor at a time.
///
/// # Lifecycle
///
/// 1. Poll at `poll_interval`
/// 2. Lease up to `min(batch_size, free worker slots)` due timers
/// 3. Dispatch each to the handler for its kind
/// 4. On success, delete the timer if its version is unchanged
/// 5. On failure, leave the lease to expire so the timer is redelivered
/// 6. Repeat until the shutdown future completes
///
/// A handler that re-schedules its own timer (an operation retry, for
/// instance) bumps the version, so step 4 keeps the new schedule.
pub struct TimerProcessor {
    engine: Engine,
    config: RuntimeConfig,
    worker_id: String,
}

impl TimerProcessor {
    pub fn new(engine: Engine, config: RuntimeConfig) -> Self {
        let worker_id = config
            .worker_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Self {
            engine,
            config,
            worker_id,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Run until `shutdown` completes.
    ///
    /// On shutdown the processor stops leasing and waits up to
    /// `shutdown_timeout` for in-flight dispatches. Dispatches still running
    /// after that are aborted; their timers are redelivered once the lease
    /// expires.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let processor = TimerProcessor::new(engine, RuntimeConfig::default());
    /// processor.run(async { tokio::signal::ctrl_c().await.ok(); }).await?;
    /// ```
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let workers = self.config.workers.max(1);
        let permits = Arc::new(Semaphore::new(workers));
        let mut in_flight = JoinSet::new();

        let mut poll_interval = interval(self.config.poll_interval);
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            worker_id = %self.worker_id,
            workers,
            workflows = self.engine.registry().workflow_count(),
            "Timer processor started"
        );

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = poll_interval.tick() => {
                    while let Some(joined) = in_flight.try_join_next() {
                        if let Err(e) = joined {
                            error!(worker_id = %self.worker_id, error = %e, "Timer dispatch panicked");
                        }
                    }

                    let free = permits.available_permits().min(self.config.batch_size);
                    if free == 0 {
                        continue;
                    }

                    let timers = match self
                        .engine
                        .stores()
                        .timers
                        .get_expired_timers(free, self.config.lease_duration)
                        .await
                    {
                        Ok(timers) => timers,
                        Err(e) => {
                            error!(worker_id = %self.worker_id, error = %e, "Failed to lease timers");
                            continue;
                        }
                    };

                    for timer in timers {
                        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                            break;
                        };
                        let engine = self.engine.clone();
                        in_flight.spawn(async move {
                            dispatch(&engine, timer).await;
                            drop(permit);
                        });
                    }
                }
            }
        }

        info!(
            worker_id = %self.worker_id,
            in_flight = in_flight.len(),
            "Timer processor shutting down"
        );

        let drain = async { while in_flight.join_next().await.is_some() {} };
        match tokio::time::timeout(self.config.shutdown_timeout, drain).await {
            Ok(()) => {
                info!(worker_id = %self.worker_id, "Timer processor stopped gracefully");
            }
            Err(_) => {
                warn!(
                    worker_id = %self.worker_id,
                    timeout_secs = self.config.shutdown_timeout.as_secs(),
                    "Shutdown timeout exceeded, abandoning in-flight timers"
                );
            }
        }

        Ok(())
    }

    /// Lease one batch of due timers and dispatch them in order.
    ///
    /// Returns the number of timers dispatched. Useful for driving the
    /// engine step by step in tests.
    pub async fn run_once(&self) -> Result<usize> {
        let timers = self
            .engine
            .stores()
            .timers
            .get_expired_timers(self.config.batch_size.max(1), self.config.lease_duration)
            .await?;

        let count = timers.len();
        for timer in timers {
            dispatch(&self.engine, timer).await;
        }
        Ok(count)
    }
}

/// Dispatch one leased timer. Failures are logged, never propagated.
async fn dispatch(engine: &Engine, timer: Timer) {
    debug!(
        timer_id = %timer.id,
        kind = %timer.kind,
        attempt = timer.retries,
        "Dispatching timer"
    );

    if let Err(e) = handlers::handle(&timer, engine).await {
        warn!(
            timer_id = %timer.id,
            kind = %timer.kind,
            attempt = timer.retries,
            error = %e,
            "Timer handler failed, redelivering after lease expiry"
        );
        return;
    }

    match engine.stores().timers.delete(&timer).await {
        Ok(true) => debug!(timer_id = %timer.id, "Timer processed"),
        Ok(false) => debug!(timer_id = %timer.id, "Timer rescheduled during processing, keeping it"),
        Err(e) => warn!(timer_id = %timer.id, error = %e, "Failed to delete processed timer"),
    }
}
