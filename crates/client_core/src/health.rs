use std::{sync::Arc, time::Duration};

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{info, warn};

use crate::api::BackendApi;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerHealth {
    Up,
    Down,
}

/// Polls the backend's health endpoint immediately and then on every tick.
/// The task stops once every receiver is gone.
pub fn spawn_health_monitor(
    backend: Arc<dyn BackendApi>,
    every: Duration,
) -> (watch::Receiver<ServerHealth>, JoinHandle<()>) {
    let (tx, rx) = watch::channel(ServerHealth::Up);
    let task = tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let health = match backend.health().await {
                Ok(()) => ServerHealth::Up,
                Err(err) => {
                    warn!(error = %err, "health check failed");
                    ServerHealth::Down
                }
            };
            let changed = tx.send_if_modified(|current| {
                let changed = *current != health;
                *current = health;
                changed
            });
            if changed {
                info!(?health, "server health changed");
            }
            if tx.is_closed() {
                break;
            }
        }
    });
    (rx, task)
}
