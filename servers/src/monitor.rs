use lib_common::ingestors::FeedState;
use lib_common::{EventRouter, RelayStats};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Logs a stats snapshot and the upstream state every `period` until shutdown.
pub async fn run(
    period: Duration,
    stats: Arc<RelayStats>,
    router: Arc<EventRouter>,
    feed_state: watch::Receiver<FeedState>,
    shutdown: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                log::info!("Monitor service received shutdown signal.");
                break;
            }
            _ = ticker.tick() => {
                let snapshot = stats.snapshot();
                let upstream = *feed_state.borrow();
                if upstream != FeedState::Receiving {
                    log::warn!("Upstream feed is {:?}", upstream);
                }
                match serde_json::to_string(&snapshot) {
                    Ok(json) => log::info!("Relay stats: upstream={:?} clients={} {}", upstream, router.subscriber_count(), json),
                    Err(e) => log::warn!("Failed to encode relay stats: {}", e),
                }
            }
        }
    }
}
