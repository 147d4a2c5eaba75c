//! # ZeroMQ Upstream Connector
//!
//! Connects a SUB socket to the walletd publisher and subscribes to every
//! topic. Each ZeroMQ message carries one JSON document in its last frame.
//!
//! A SUB socket keeps waiting silently when its publisher goes away, so the
//! session also follows the socket's monitor stream and ends as soon as the
//! peer disconnects. The feed then reconnects with a fresh socket.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use zeromq::{Socket, SocketEvent, SocketRecv, SubSocket};

use crate::error::RelayError;
use crate::ingestors::feed::{FeedConnector, FeedSession};

pub struct ZmqConnector {
    endpoint: String,
}

impl ZmqConnector {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            endpoint: format!("tcp://{}:{}", host, port),
        }
    }
}

#[async_trait]
impl FeedConnector for ZmqConnector {
    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    async fn connect(&self) -> Result<Box<dyn FeedSession>, RelayError> {
        let mut socket = SubSocket::new();
        // Attach before connecting so no peer event is missed.
        let events = socket.monitor().boxed();
        socket
            .connect(&self.endpoint)
            .await
            .map_err(|e| RelayError::Upstream(format!("connect {} failed: {}", self.endpoint, e)))?;
        // Empty prefix: receive all topics.
        socket
            .subscribe("")
            .await
            .map_err(|e| RelayError::Upstream(format!("subscribe on {} failed: {}", self.endpoint, e)))?;
        Ok(Box::new(ZmqSession { socket, events }))
    }
}

struct ZmqSession {
    socket: SubSocket,
    events: BoxStream<'static, SocketEvent>,
}

#[async_trait]
impl FeedSession for ZmqSession {
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, RelayError> {
        loop {
            tokio::select! {
                event = self.events.next() => match event {
                    Some(SocketEvent::Disconnected(_)) => {
                        log::warn!("Upstream publisher disconnected");
                        return Ok(None);
                    }
                    Some(_) => continue,
                    None => return Ok(None),
                },
                message = self.socket.recv() => {
                    let message = message.map_err(|e| RelayError::Upstream(format!("receive failed: {}", e)))?;
                    // Topic-prefixed publishers send [topic, body]; the body is always last.
                    return Ok(Some(message.into_vec().pop().map(|frame| frame.to_vec()).unwrap_or_default()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;
    use zeromq::{Endpoint, PubSocket, SocketSend, ZmqMessage};

    #[test]
    fn test_endpoint_is_tcp_url() {
        assert_eq!(ZmqConnector::new("127.0.0.1", 4001).endpoint(), "tcp://127.0.0.1:4001");
    }

    #[tokio::test]
    async fn test_session_ends_when_publisher_goes_away() {
        let mut publisher = PubSocket::new();
        let port = match publisher.bind("tcp://127.0.0.1:0").await.unwrap() {
            Endpoint::Tcp(_, port) => port,
            other => panic!("unexpected endpoint {:?}", other),
        };

        let mut session = ZmqConnector::new("127.0.0.1", port).connect().await.unwrap();

        // The subscription reaches the publisher asynchronously; resend until it lands.
        let payload = r#"{"_EVENT":"balance"}"#;
        let mut received = None;
        for _ in 0..50 {
            publisher.send(ZmqMessage::from(payload.to_string())).await.unwrap();
            if let Ok(frame) = timeout(Duration::from_millis(100), session.next_frame()).await {
                received = frame.unwrap();
                break;
            }
        }
        assert_eq!(received.as_deref(), Some(payload.as_bytes()));

        drop(publisher);

        let ended = timeout(Duration::from_secs(5), async {
            loop {
                // Frames still in flight are fine; the session must end after them.
                match session.next_frame().await {
                    Ok(Some(_)) => continue,
                    Ok(None) | Err(_) => break,
                }
            }
        })
        .await;
        assert!(ended.is_ok(), "session kept waiting after the publisher was dropped");
    }
}
