// In-process publish/subscribe broker
use crate::application::transport::{Transport, TransportError, TransportEvent, TransportEvents};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

struct Client {
    topics: HashSet<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

/// Transport calls as the broker saw them, in order.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerCall {
    Connect { client: u64 },
    Subscribe { client: u64, topic: String },
    Unsubscribe { client: u64, topic: String },
    /// `detached` is whether the client had already dropped its event channel.
    Disconnect { client: u64, detached: bool },
}

struct BrokerState {
    online: bool,
    next_client_id: u64,
    clients: HashMap<u64, Client>,
    connect_attempts: usize,
    fail_subscribe: bool,
    fail_unsubscribe: bool,
    #[cfg(test)]
    calls: Vec<BrokerCall>,
}

/// Routes messages between transports in the same process. Also used to
/// inject connection faults.
#[derive(Clone)]
pub struct LocalBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                online: true,
                next_client_id: 0,
                clients: HashMap::new(),
                connect_attempts: 0,
                fail_subscribe: false,
                fail_unsubscribe: false,
                #[cfg(test)]
                calls: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn transport(&self) -> LocalTransport {
        LocalTransport {
            broker: self.clone(),
            client_id: Mutex::new(None),
        }
    }

    /// Deliver to every client subscribed to `topic`; returns the fan-out.
    pub fn publish(&self, topic: &str, payload: Bytes) -> Result<usize, TransportError> {
        let state = self.lock();
        if !state.online {
            return Err(TransportError::Publish {
                topic: topic.to_string(),
                reason: "broker offline".to_string(),
            });
        }

        let delivered = state
            .clients
            .values()
            .filter(|c| c.topics.contains(topic))
            .filter(|c| {
                c.events
                    .send(TransportEvent::Message {
                        topic: topic.to_string(),
                        payload: payload.clone(),
                    })
                    .is_ok()
            })
            .count();
        tracing::trace!(topic, delivered, "Local broker publish");
        Ok(delivered)
    }

    /// Going offline notifies every connected client; they stay registered as
    /// a real client library would keep retrying.
    #[cfg(test)]
    pub fn set_online(&self, online: bool) {
        let mut state = self.lock();
        state.online = online;
        if !online {
            for client in state.clients.values() {
                let _ = client.events.send(TransportEvent::Offline);
            }
        }
    }

    /// Push a connection event to every client.
    #[cfg(test)]
    pub fn emit(&self, event: TransportEvent) -> usize {
        let state = self.lock();
        state
            .clients
            .values()
            .filter(|c| c.events.send(event.clone()).is_ok())
            .count()
    }

    #[cfg(test)]
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.lock().fail_subscribe = fail;
    }

    #[cfg(test)]
    pub fn set_fail_unsubscribe(&self, fail: bool) {
        self.lock().fail_unsubscribe = fail;
    }

    #[cfg(test)]
    pub fn connect_attempts(&self) -> usize {
        self.lock().connect_attempts
    }

    #[cfg(test)]
    pub fn calls(&self) -> Vec<BrokerCall> {
        self.lock().calls.clone()
    }

    #[cfg(test)]
    pub fn client_count(&self) -> usize {
        self.lock().clients.len()
    }

    #[cfg(test)]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.lock()
            .clients
            .values()
            .filter(|c| c.topics.contains(topic))
            .count()
    }
}

/// One connection into a [`LocalBroker`].
pub struct LocalTransport {
    broker: LocalBroker,
    client_id: Mutex<Option<u64>>,
}

impl LocalTransport {
    fn client_id(&self) -> Option<u64> {
        *self.client_id.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn connect(&self) -> Result<TransportEvents, TransportError> {
        let mut state = self.broker.lock();
        state.connect_attempts += 1;
        if !state.online {
            tracing::debug!(attempts = state.connect_attempts, "Local broker refused connection");
            return Err(TransportError::Connect("broker offline".to_string()));
        }

        let id = state.next_client_id;
        state.next_client_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        state.clients.insert(
            id,
            Client {
                topics: HashSet::new(),
                events: tx,
            },
        );
        #[cfg(test)]
        state.calls.push(BrokerCall::Connect { client: id });
        drop(state);

        let previous = self
            .client_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(id);
        if let Some(previous) = previous {
            self.broker.lock().clients.remove(&previous);
        }
        Ok(rx)
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        let id = self.client_id().ok_or(TransportError::NotConnected)?;
        let mut state = self.broker.lock();
        if state.fail_subscribe {
            return Err(TransportError::Subscribe {
                topic: topic.to_string(),
                reason: "rejected by broker".to_string(),
            });
        }
        let client = state
            .clients
            .get_mut(&id)
            .ok_or(TransportError::NotConnected)?;
        client.topics.insert(topic.to_string());
        #[cfg(test)]
        state.calls.push(BrokerCall::Subscribe {
            client: id,
            topic: topic.to_string(),
        });
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        let id = self.client_id().ok_or(TransportError::NotConnected)?;
        let mut state = self.broker.lock();
        if state.fail_unsubscribe {
            return Err(TransportError::Unsubscribe {
                topic: topic.to_string(),
                reason: "rejected by broker".to_string(),
            });
        }
        if let Some(client) = state.clients.get_mut(&id) {
            client.topics.remove(topic);
        }
        #[cfg(test)]
        state.calls.push(BrokerCall::Unsubscribe {
            client: id,
            topic: topic.to_string(),
        });
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        if self.client_id().is_none() {
            return Err(TransportError::NotConnected);
        }
        self.broker.publish(topic, payload).map(|_| ())
    }

    async fn disconnect(&self) {
        let id = self
            .client_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(id) = id else { return };
        let mut state = self.broker.lock();
        if let Some(client) = state.clients.remove(&id) {
            let detached = client.events.is_closed();
            tracing::debug!(client = id, detached, "Local client disconnected");
            #[cfg(test)]
            state.calls.push(BrokerCall::Disconnect {
                client: id,
                detached,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_routes_by_topic() {
        let broker = LocalBroker::new();
        let transport = broker.transport();
        let mut events = transport.connect().await.unwrap();
        transport.subscribe("a").await.unwrap();

        assert_eq!(broker.publish("a", Bytes::from_static(b"1")).unwrap(), 1);
        assert_eq!(broker.publish("b", Bytes::from_static(b"2")).unwrap(), 0);
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Message {
                topic: "a".to_string(),
                payload: Bytes::from_static(b"1"),
            })
        );

        transport.disconnect().await;
        assert_eq!(events.recv().await, None);
        assert_eq!(broker.client_count(), 0);
    }

    #[tokio::test]
    async fn test_offline_broker_refuses_connections() {
        let broker = LocalBroker::new();
        broker.set_online(false);

        let result = broker.transport().connect().await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
        assert_eq!(broker.connect_attempts(), 1);
        assert!(broker.publish("a", Bytes::new()).is_err());
    }
}
