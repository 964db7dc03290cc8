use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Counts Ctrl-C presses. The first asks the loop to stop after the cycle in
/// flight; the second abandons that cycle.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    presses: watch::Receiver<u32>,
}

impl ShutdownSignal {
    /// Listens for Ctrl-C on a background task.
    pub fn ctrl_c() -> Self {
        let (presses, signal) = Self::manual();
        tokio::spawn(async move {
            loop {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %err, "failed to listen for ctrl-c");
                    // Holding the sender keeps every wait pending.
                    std::future::pending::<()>().await;
                }
                presses.send_modify(|n| *n += 1);
                if *presses.borrow() == 1 {
                    tracing::warn!("finishing current cycle; press Ctrl-C again to abort it");
                }
            }
        });
        signal
    }

    /// A signal driven by hand through the returned sender.
    pub fn manual() -> (watch::Sender<u32>, Self) {
        let (presses, receiver) = watch::channel(0);
        (presses, Self { presses: receiver })
    }

    /// Resolves on the first press.
    pub async fn requested(self) {
        self.reached(1).await
    }

    /// Resolves on the second press.
    pub async fn forced(self) {
        self.reached(2).await
    }

    async fn reached(mut self, count: u32) {
        if self.presses.wait_for(|n| *n >= count).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Fixed-period driver for the scan loop.
///
/// The first cycle runs immediately; the next one starts one period after
/// the previous start, or right after a cycle that overran. Cycles never
/// overlap because each is awaited before the next tick is taken.
#[derive(Debug, Clone, Copy)]
pub struct PeriodicTrigger {
    period: Duration,
}

impl PeriodicTrigger {
    pub fn every(period: Duration) -> Self {
        Self { period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Runs `cycle` until `shutdown` resolves, threading `state` through each
    /// call. Shutdown is only observed between cycles; to cut a cycle short,
    /// drop this future (see [`ShutdownSignal::forced`]).
    pub async fn run<S, F, Fut, Sd>(&self, mut state: S, mut cycle: F, shutdown: Sd) -> S
    where
        F: FnMut(S) -> Fut,
        Fut: Future<Output = S>,
        Sd: Future<Output = ()>,
    {
        let mut ticker = interval_at(Instant::now(), self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let mut runs: u64 = 0;
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!(runs, "shutdown requested, stopping scan loop");
                    break;
                }
                _ = ticker.tick() => {
                    runs += 1;
                    state = cycle(state).await;
                    tracing::debug!(runs, next_in_secs = self.period.as_secs(), "waiting for next cycle");
                }
            }
        }

        state
    }
}
