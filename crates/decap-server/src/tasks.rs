//! Background tasks: the deferral ticker and the pod reaper.

use futures::{Stream, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::info;

use crate::AppState;

/// Broadcast shutdown signal shared by every background task.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    /// Resolves once shutdown has been signalled or the sender is gone.
    pub fn wait(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.rx.clone();
        async move {
            let _ = rx.wait_for(|stop| *stop).await;
        }
    }
}

/// One item per `period`, starting one period from now.
pub fn ticks(period: Duration) -> impl Stream<Item = Instant> + Send + 'static {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    futures::stream::unfold(interval, |mut interval| async move {
        let at = interval.tick().await;
        Some((at, interval))
    })
}

/// Resubmit deferred builds every `deferral_interval` until shutdown.
pub fn spawn_deferral_ticker(state: &AppState, shutdown: &Shutdown) -> JoinHandle<()> {
    let orchestrator = state.orchestrator.clone();
    let ticks = ticks(state.deferral_interval).take_until(shutdown.wait());
    info!(interval = ?state.deferral_interval, "Starting deferral ticker");

    tokio::spawn(async move {
        orchestrator.launch_deferred(ticks).await;
        info!("Deferral ticker stopped");
    })
}

pub fn spawn_reaper(state: &AppState, shutdown: &Shutdown) -> JoinHandle<()> {
    tokio::spawn(state.reaper().run(shutdown.wait()))
}
