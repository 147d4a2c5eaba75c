//! # Relay Test Harness
//!
//! Drives the complete relay pipeline in-process. The upstream bus is
//! replaced by [`ScriptedFeed`], whose sessions are plain channels: the test
//! holds the sending half, pushes raw frames into it and drops it to simulate
//! the remote closing the connection. The analytics store and its database
//! are a shared [`MemoryAnalytics`].

use async_trait::async_trait;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use lib_common::connections::MemoryAnalytics;
use lib_common::gateway::{fanout_router, serve};
use lib_common::ingestors::{FeedConnector, FeedSession, FeedSettings, UpstreamFeed};
use lib_common::sinks::{AnalyticsSink, ResetHandler};
use lib_common::{EventRouter, RelayError, RelayStats};

pub const TEST_DATABASE: &str = "cube_test";

/// A connector whose sessions are queued up front by the test. Connecting
/// with nothing queued fails like a refused connection.
#[derive(Default)]
pub struct ScriptedFeed {
    pending: Mutex<VecDeque<mpsc::UnboundedReceiver<Vec<u8>>>>,
    connects: AtomicUsize,
}

impl ScriptedFeed {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues a session for the next successful connect and returns its
    /// input. Dropping the sender closes the session once drained.
    pub fn new_session(&self) -> mpsc::UnboundedSender<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).push_back(rx);
        tx
    }

    /// Successful connects so far.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

struct ScriptedSession {
    frames: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
impl FeedSession for ScriptedSession {
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, RelayError> {
        Ok(self.frames.recv().await)
    }
}

#[async_trait]
impl FeedConnector for ScriptedFeed {
    fn endpoint(&self) -> String {
        "scripted://feed".to_string()
    }

    async fn connect(&self) -> Result<Box<dyn FeedSession>, RelayError> {
        let next = self.pending.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        match next {
            Some(frames) => {
                self.connects.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(ScriptedSession { frames }))
            }
            None => Err(RelayError::Upstream("connection refused (no scripted session)".into())),
        }
    }
}

/// One running relay: feed loop, router and in-memory stores.
pub struct RelayHarness {
    pub upstream: Arc<ScriptedFeed>,
    pub store: Arc<MemoryAnalytics>,
    pub router: Arc<EventRouter>,
    pub stats: Arc<RelayStats>,
    pub feed: Arc<UpstreamFeed>,
    pub shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RelayHarness {
    /// Starts the feed loop with millisecond backoff.
    pub fn start() -> Self {
        let upstream = ScriptedFeed::new();
        let store = Arc::new(MemoryAnalytics::new(TEST_DATABASE));
        let router = EventRouter::new();
        let stats = Arc::new(RelayStats::new());
        let shutdown = CancellationToken::new();

        let feed = Arc::new(UpstreamFeed::new(
            upstream.clone(),
            router.clone(),
            AnalyticsSink::new(store.clone()),
            ResetHandler::new(store.clone(), TEST_DATABASE),
            stats.clone(),
            FeedSettings {
                reconnect_base: Duration::from_millis(5),
                reconnect_max: Duration::from_millis(50),
                idle_timeout: None,
            },
        ));

        let run = {
            let feed = feed.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { feed.run(shutdown).await })
        };

        Self {
            upstream,
            store,
            router,
            stats,
            feed,
            shutdown,
            tasks: vec![run],
        }
    }

    /// Serves the fan-out endpoint on an ephemeral local port.
    pub async fn start_fanout(&mut self, prefix: &str) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = fanout_router(self.router.clone(), prefix, self.shutdown.clone());
        let shutdown = self.shutdown.clone();
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = serve(listener, app, shutdown).await {
                eprintln!("fanout server error: {}", e);
            }
        }));
        Ok(addr)
    }

    /// Polls until the router has `count` subscribers or the timeout elapses.
    pub async fn wait_for_subscribers(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.router.subscriber_count() == count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.router.subscriber_count() == count
    }

    /// Cancels everything and waits for the tasks to finish.
    pub async fn stop(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Serializes a JSON value as one upstream frame.
pub fn frame(value: serde_json::Value) -> Vec<u8> {
    value.to_string().into_bytes()
}
