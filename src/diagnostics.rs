//! Periodic diagnostic readout of the engine state

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::state::EngineHandle;

/// Log a text snapshot whenever it differs from the previous one
pub async fn run(engine: EngineHandle, every: Duration) {
    let mut ticks = tokio::time::interval(every);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last = String::new();

    loop {
        ticks.tick().await;

        let snapshot = match engine.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(_) => {
                debug!("engine closed, stopping diagnostics");
                return;
            }
        };

        let text = snapshot.to_string();
        if text != last {
            info!(target: "avatar_overlay::diagnostics", "\n{}", text);
            last = text;
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::broadcast;

    use super::*;
    use crate::config::Config;
    use crate::state::OverlayEngine;

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_engine_closes() {
        let (tx, _rx) = broadcast::channel(4);
        let (engine, handle) = OverlayEngine::new(&Config::default(), tx);
        drop(engine);

        tokio::time::timeout(Duration::from_secs(1), run(handle, Duration::from_millis(100)))
            .await
            .unwrap();
    }
}
