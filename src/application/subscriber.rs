// Stream subscriber - connection and topic lifecycle over a Transport
use crate::application::transport::{Transport, TransportError, TransportEvent, TransportEvents};
use crate::domain::payload::Payload;
use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Subscribed,
    Reconnecting,
    /// Reconnect ceiling exceeded; only an explicit `connect` leaves this state.
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubscriptionState {
    pub state: ConnectionState,
    pub connected: bool,
    pub subscribed: bool,
    pub reconnect_attempts: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubscriberEvent {
    Message { topic: String, payload: Payload },
    Reconnecting { attempt: u32 },
    Reconnected,
    Disconnected,
    /// The transport kept retrying past the ceiling. The owner should call
    /// [`StreamSubscriber::terminate`].
    ReconnectLimitExceeded { attempts: u32 },
}

pub struct StreamSubscriber {
    transport: Arc<dyn Transport>,
    state: ConnectionState,
    reconnect_attempts: u32,
    max_reconnect_attempts: u32,
    topics: BTreeSet<String>,
    events: Option<TransportEvents>,
}

impl StreamSubscriber {
    pub fn new(transport: Arc<dyn Transport>, max_reconnect_attempts: u32) -> Self {
        Self {
            transport,
            state: ConnectionState::Disconnected,
            reconnect_attempts: 0,
            max_reconnect_attempts,
            topics: BTreeSet::new(),
            events: None,
        }
    }

    #[cfg(test)]
    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    pub fn state(&self) -> SubscriptionState {
        SubscriptionState {
            state: self.state,
            connected: self.is_connected(),
            subscribed: self.state == ConnectionState::Subscribed,
            reconnect_attempts: self.reconnect_attempts,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Subscribed
        )
    }

    pub fn is_subscribed_to(&self, topic: &str) -> bool {
        self.topics.contains(topic)
    }

    /// Whether an event channel is attached and worth polling.
    pub fn is_attached(&self) -> bool {
        self.events.is_some()
    }

    #[cfg(test)]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// No-op while a connection is held; the transport recovers it on its own.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        if self.events.is_some() {
            return Ok(());
        }

        self.state = ConnectionState::Connecting;
        match self.transport.connect().await {
            Ok(events) => {
                self.events = Some(events);
                self.state = ConnectionState::Connected;
                self.reconnect_attempts = 0;
                tracing::info!("Transport connected");
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                tracing::error!(error = %e, "Transport connect failed");
                Err(e)
            }
        }
    }

    pub async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if self.topics.contains(topic) {
            return Ok(());
        }

        match self.transport.subscribe(topic).await {
            Ok(()) => {
                self.topics.insert(topic.to_string());
                self.state = ConnectionState::Subscribed;
                tracing::info!(topic, "Subscribed");
                Ok(())
            }
            Err(e) => {
                tracing::error!(topic, error = %e, "Subscribe failed");
                Err(e)
            }
        }
    }

    /// The local registration is dropped even when the broker call fails, so no
    /// message for `topic` is dispatched afterwards.
    pub async fn unsubscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        if !self.topics.remove(topic) {
            return Ok(());
        }
        if self.topics.is_empty() && self.state == ConnectionState::Subscribed {
            self.state = ConnectionState::Connected;
        }
        if self.events.is_none() {
            return Ok(());
        }

        match self.transport.unsubscribe(topic).await {
            Ok(()) => {
                tracing::info!(topic, "Unsubscribed");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(topic, error = %e, "Unsubscribe failed, registration dropped");
                Err(e)
            }
        }
    }

    pub async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.transport.publish(topic, payload).await.map_err(|e| {
            tracing::error!(topic, error = %e, "Publish failed");
            e
        })
    }

    /// Wait for the next event relevant to this subscriber. Returns `None` when
    /// no connection is attached.
    ///
    /// Cancel safe: state only changes after an event has been received.
    pub async fn recv(&mut self) -> Option<SubscriberEvent> {
        loop {
            let events = self.events.as_mut()?;
            let Some(event) = events.recv().await else {
                self.events = None;
                self.state = ConnectionState::Disconnected;
                tracing::warn!("Transport event channel closed");
                return Some(SubscriberEvent::Disconnected);
            };

            match event {
                TransportEvent::Message { topic, payload } => {
                    if !self.topics.contains(&topic) {
                        tracing::debug!(topic, "Dropping message for unregistered topic");
                        continue;
                    }
                    return Some(SubscriberEvent::Message {
                        topic,
                        payload: Payload::parse(&payload),
                    });
                }
                TransportEvent::Reconnecting => {
                    self.reconnect_attempts += 1;
                    let attempt = self.reconnect_attempts;
                    if attempt > self.max_reconnect_attempts {
                        tracing::error!(attempt, "Reconnect attempts exhausted");
                        return Some(SubscriberEvent::ReconnectLimitExceeded { attempts: attempt });
                    }
                    self.state = ConnectionState::Reconnecting;
                    tracing::info!(attempt, "Transport reconnecting");
                    return Some(SubscriberEvent::Reconnecting { attempt });
                }
                TransportEvent::Reconnected => {
                    self.reconnect_attempts = 0;
                    self.state = if self.topics.is_empty() {
                        ConnectionState::Connected
                    } else {
                        ConnectionState::Subscribed
                    };
                    tracing::info!("Transport reconnected");
                    return Some(SubscriberEvent::Reconnected);
                }
                TransportEvent::Offline => {
                    self.state = ConnectionState::Disconnected;
                    tracing::warn!("Transport offline");
                    return Some(SubscriberEvent::Disconnected);
                }
                TransportEvent::Closed => {
                    self.state = ConnectionState::Disconnected;
                    tracing::warn!("Transport closed");
                    return Some(SubscriberEvent::Disconnected);
                }
                TransportEvent::Error(reason) => {
                    self.state = ConnectionState::Disconnected;
                    tracing::error!(%reason, "Transport error");
                    return Some(SubscriberEvent::Disconnected);
                }
            }
        }
    }

    /// Fail-stop after the reconnect ceiling: detach, then release.
    pub async fn terminate(&mut self) {
        self.events = None;
        self.topics.clear();
        self.transport.disconnect().await;
        self.state = ConnectionState::Terminated;
        tracing::error!(
            attempts = self.reconnect_attempts,
            "Transport terminated, falling back to local values"
        );
    }

    /// Unsubscribe everything, detach the event channel, then release the
    /// connection.
    pub async fn close(&mut self) {
        let topics: Vec<String> = self.topics.iter().cloned().collect();
        for topic in topics {
            // Failure is already logged and the registration is gone either way.
            let _ = self.unsubscribe(&topic).await;
        }

        let held = self.events.take().is_some();
        if held {
            self.transport.disconnect().await;
            tracing::info!("Transport disconnected");
        }
        if self.state != ConnectionState::Terminated {
            self.state = ConnectionState::Disconnected;
        }
    }
}
