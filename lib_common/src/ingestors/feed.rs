//! # Upstream Feed Client
//!
//! A durable, infinitely retried subscription to the upstream event bus. Every
//! frame that arrives is normalized, checked for the reset signal, handed to
//! the analytics sink and finally published on the [`EventRouter`].
//!
//! ## Lifecycle
//!
//! `Disconnected → Connecting → Subscribed → Receiving`, looping on
//! `Receiving` until the session errors, the remote closes it, or the optional
//! idle timeout fires. The feed then goes back to `Disconnected`, waits for the
//! backoff delay and tries again. Only the shutdown token ends the loop.
//!
//! ## Ordering
//!
//! Frames are processed one at a time on the feed's own task. A `new_db_init`
//! purge is awaited before the event reaches the analytics sink or the router,
//! so no consumer can observe the event before the purge has completed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::core::event::{normalize, parse_frame, EventRecord};
use crate::core::router::EventRouter;
use crate::core::stats::RelayStats;
use crate::error::RelayError;
use crate::ingestors::backoff::ReconnectBackoff;
use crate::sinks::analytics::{AnalyticsSink, DigestOutcome};
use crate::sinks::reset::{PurgeOutcome, ResetHandler};

/// Opens sessions on the upstream bus.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    /// Where this connector points, for logs.
    fn endpoint(&self) -> String;

    /// Connects and subscribes with an open (all-topics) filter.
    async fn connect(&self) -> Result<Box<dyn FeedSession>, RelayError>;
}

/// One live subscription on the upstream bus.
#[async_trait]
pub trait FeedSession: Send {
    /// The next raw frame. `Ok(None)` means the remote closed the session.
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, RelayError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Disconnected,
    Connecting,
    Subscribed,
    Receiving,
}

/// Reconnect and watchdog tuning.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    /// Tear the session down after this long without a frame. `None` waits forever.
    pub idle_timeout: Option<Duration>,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            reconnect_base: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(60),
            idle_timeout: None,
        }
    }
}

enum SessionEnd {
    Shutdown,
    Closed,
    IdleTimeout(Duration),
    Failed(RelayError),
}

/// The ingestion loop.
pub struct UpstreamFeed {
    connector: Arc<dyn FeedConnector>,
    router: Arc<EventRouter>,
    analytics: AnalyticsSink,
    reset: ResetHandler,
    stats: Arc<RelayStats>,
    settings: FeedSettings,
    state: watch::Sender<FeedState>,
}

impl UpstreamFeed {
    pub fn new(
        connector: Arc<dyn FeedConnector>,
        router: Arc<EventRouter>,
        analytics: AnalyticsSink,
        reset: ResetHandler,
        stats: Arc<RelayStats>,
        settings: FeedSettings,
    ) -> Self {
        let (state, _) = watch::channel(FeedState::Disconnected);
        Self {
            connector,
            router,
            analytics,
            reset,
            stats,
            settings,
            state,
        }
    }

    pub fn state(&self) -> FeedState {
        *self.state.borrow()
    }

    /// A receiver following the feed's state, for health reporting.
    pub fn watch_state(&self) -> watch::Receiver<FeedState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: FeedState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            log::debug!("Upstream feed state: {:?} -> {:?}", previous, next);
        }
    }

    /// # Main Execution Loop
    ///
    /// Runs until `shutdown` is cancelled. Connection failures of any kind
    /// lead to another attempt after the backoff delay.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut backoff = ReconnectBackoff::new(self.settings.reconnect_base, self.settings.reconnect_max);

        loop {
            self.set_state(FeedState::Connecting);
            log::info!("Connecting to upstream realtime event feed @ {}", self.connector.endpoint());

            let connected = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.connector.connect() => result,
            };

            match connected {
                Ok(mut session) => {
                    self.set_state(FeedState::Subscribed);
                    log::info!("Connected to upstream realtime event feed");

                    let (end, frames) = self.pump(session.as_mut(), &shutdown).await;
                    if frames > 0 {
                        backoff.reset();
                    }
                    match end {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Closed => {
                            log::warn!("Upstream event feed closed by remote after {} messages. Reconnecting...", frames)
                        }
                        SessionEnd::IdleTimeout(limit) => log::warn!(
                            "Upstream event feed silent for {}s. Reconnecting...",
                            limit.as_secs()
                        ),
                        SessionEnd::Failed(e) => {
                            log::warn!("Upstream event feed connection broken: {}. Reconnecting...", e)
                        }
                    }
                }
                Err(e) => log::error!("Failed to connect to upstream event feed: {}", e),
            }

            self.set_state(FeedState::Disconnected);
            self.stats.record_reconnect();

            let delay = backoff.next_delay();
            if !delay.is_zero() {
                log::info!("Next upstream connection attempt in {} ms", delay.as_millis());
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(FeedState::Disconnected);
        log::info!("Upstream feed stopped.");
    }

    /// Reads frames from one session until it ends. Returns why it ended and
    /// how many frames it delivered.
    async fn pump(&self, session: &mut dyn FeedSession, shutdown: &CancellationToken) -> (SessionEnd, u64) {
        let mut frames = 0u64;
        self.set_state(FeedState::Receiving);

        loop {
            let idle_timeout = self.settings.idle_timeout;
            let next = async {
                match idle_timeout {
                    Some(limit) => tokio::time::timeout(limit, session.next_frame()).await.ok(),
                    None => Some(session.next_frame().await),
                }
            };

            let outcome = tokio::select! {
                _ = shutdown.cancelled() => return (SessionEnd::Shutdown, frames),
                outcome = next => outcome,
            };

            match outcome {
                Some(Ok(Some(frame))) => {
                    frames += 1;
                    if let Err(e) = self.process_frame(&frame).await {
                        log::debug!("Upstream frame #{} of this session skipped: {}", frames, e);
                    }
                }
                Some(Ok(None)) => return (SessionEnd::Closed, frames),
                Some(Err(e)) => return (SessionEnd::Failed(e), frames),
                None => return (SessionEnd::IdleTimeout(idle_timeout.unwrap_or_default()), frames),
            }
        }
    }

    /// # Process Frame
    ///
    /// The per-message pipeline:
    /// 1. decode and normalize (malformed frames are logged and dropped);
    /// 2. log the event;
    /// 3. on `new_db_init`, purge the analytics database and wait for it;
    /// 4. hand the record to the analytics sink;
    /// 5. publish it on the router.
    ///
    /// Returns the number of router subscribers that received the record.
    pub async fn process_frame(&self, frame: &[u8]) -> Result<usize, RelayError> {
        self.stats.record_received();

        let record = match parse_frame(frame).and_then(normalize) {
            Ok(record) => record,
            Err(e) => {
                self.stats.record_malformed();
                log::warn!("Dropping upstream message: {}", e);
                return Err(e);
            }
        };

        log::info!(
            "Event feed received message: {} (TS: {}, {:?})",
            record.event_type,
            record.block_time_iso,
            record
        );

        if record.is_reset_signal() {
            self.handle_reset(&record).await;
        }

        match self.analytics.digest(&record).await {
            Ok(DigestOutcome::Written) => self.stats.record_analytics_written(),
            Ok(DigestOutcome::Skipped) => self.stats.record_analytics_skipped(),
            Err(e) if e.is_upstream_contract_breach() => {
                self.stats.record_analytics_failed();
                log::error!("Upstream contract breach, event not stored: {}", e);
            }
            Err(e) => {
                self.stats.record_analytics_failed();
                log::warn!("Analytics write failed for '{}': {}", record.event_type, e);
            }
        }

        let delivered = self.router.publish(Arc::new(record));
        self.stats.record_published(delivered);
        Ok(delivered)
    }

    async fn handle_reset(&self, record: &EventRecord) {
        log::warn!(
            "Received '{}' message from upstream: DROPPING ANALYTICS DATABASE '{}' IN RESPONSE",
            record.event_type,
            self.reset.database()
        );

        match self.reset.purge().await {
            Ok(PurgeOutcome::Dropped) => self.stats.record_purge(),
            Ok(PurgeOutcome::NothingToDo) => {}
            Err(e) => log::error!("Analytics purge failed, forwarding '{}' anyway: {}", record.event_type, e),
        }
    }
}
