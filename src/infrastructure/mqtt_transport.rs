// MQTT transport over TCP
use crate::application::transport::{Transport, TransportError, TransportEvent, TransportEvents};
use crate::infrastructure::config::BrokerSettings;
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Requests the client may queue before `publish`/`subscribe` start waiting.
const REQUEST_CAPACITY: usize = 64;
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

struct Connection {
    client: AsyncClient,
    driver: JoinHandle<()>,
}

/// One MQTT client session. The event loop runs on its own task once the
/// broker has acknowledged the connection; it keeps reconnecting on its own
/// and reports each attempt as [`TransportEvent::Reconnecting`].
pub struct MqttTransport {
    options: MqttOptions,
    connect_timeout: Duration,
    reconnect_delay: Duration,
    connection: Mutex<Option<Connection>>,
    /// Re-subscribed after every reconnect; the broker session starts clean.
    topics: Arc<Mutex<BTreeSet<String>>>,
}

impl MqttTransport {
    pub fn new(settings: &BrokerSettings, client_id: &str) -> Result<Self, TransportError> {
        if client_id.is_empty() || client_id.starts_with(char::is_whitespace) {
            return Err(TransportError::Connect(format!(
                "invalid MQTT client id {:?}",
                client_id
            )));
        }

        let mut options = MqttOptions::new(client_id, settings.host.clone(), settings.port);
        options
            .set_keep_alive(Duration::from_secs(settings.keep_alive_secs).max(MIN_KEEP_ALIVE))
            .set_clean_session(true);

        Ok(Self {
            options,
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            reconnect_delay: Duration::from_millis(settings.reconnect_delay_ms),
            connection: Mutex::new(None),
            topics: Arc::default(),
        })
    }

    fn client(&self) -> Result<AsyncClient, TransportError> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|c| c.client.clone())
            .ok_or(TransportError::NotConnected)
    }

    fn take_connection(&self) -> Option<Connection> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Poll until the broker answers CONNECT.
async fn await_connack(eventloop: &mut EventLoop) -> Result<(), String> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(_) => continue,
            Err(e) => return Err(e.to_string()),
        }
    }
}

/// Translate one event loop event. `recovering` is set while a dropped
/// connection is being re-established.
fn map_event(event: Event, recovering: bool) -> Option<TransportEvent> {
    match event {
        Event::Incoming(Packet::Publish(publish)) => Some(TransportEvent::Message {
            topic: publish.topic,
            payload: publish.payload,
        }),
        Event::Incoming(Packet::ConnAck(_)) if recovering => Some(TransportEvent::Reconnected),
        Event::Incoming(Packet::Disconnect) => Some(TransportEvent::Closed),
        _ => None,
    }
}

/// Events for one failed poll. The first failure after a good connection
/// also reports the link as offline.
fn failure_events(error: &ConnectionError, first: bool) -> Vec<TransportEvent> {
    let mut events = Vec::with_capacity(3);
    if first {
        events.push(TransportEvent::Offline);
    }
    if let ConnectionError::ConnectionRefused(code) = error {
        events.push(TransportEvent::Error(format!("broker refused connection: {:?}", code)));
    }
    events.push(TransportEvent::Reconnecting);
    events
}

fn resubscribe(client: &AsyncClient, topics: &Mutex<BTreeSet<String>>) {
    let topics = topics.lock().unwrap_or_else(PoisonError::into_inner);
    for topic in topics.iter() {
        if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
            tracing::warn!(%topic, error = %e, "MQTT re-subscribe not queued");
        }
    }
}

/// Outgoing requests only leave while the loop is polled, so this keeps
/// polling whether or not anyone still listens for events.
async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topics: Arc<Mutex<BTreeSet<String>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    reconnect_delay: Duration,
) {
    let mut recovering = false;
    loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::debug!("MQTT disconnect sent, event loop stopping");
                let _ = events.send(TransportEvent::Closed);
                return;
            }
            Ok(event) => {
                let Some(mapped) = map_event(event, recovering) else {
                    continue;
                };
                if mapped == TransportEvent::Reconnected {
                    recovering = false;
                    resubscribe(&client, &topics);
                    tracing::info!("MQTT connection re-established");
                }
                let _ = events.send(mapped);
            }
            Err(e) => {
                tracing::warn!(error = %e, "MQTT connection lost, retrying");
                for event in failure_events(&e, !recovering) {
                    let _ = events.send(event);
                }
                recovering = true;
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self) -> Result<TransportEvents, TransportError> {
        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), REQUEST_CAPACITY);
        let (host, port) = self.options.broker_address();

        match tokio::time::timeout(self.connect_timeout, await_connack(&mut eventloop)).await {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => return Err(TransportError::Connect(reason)),
            Err(_) => {
                return Err(TransportError::Connect(format!(
                    "no CONNACK from {}:{} within {:?}",
                    host, port, self.connect_timeout
                )));
            }
        }
        tracing::info!(%host, port, "MQTT connected");

        let (tx, rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(drive(
            eventloop,
            client.clone(),
            self.topics.clone(),
            tx,
            self.reconnect_delay,
        ));
        let previous = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Connection { client, driver });
        if let Some(previous) = previous {
            previous.driver.abort();
        }
        Ok(rx)
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        // Queued for the event loop; the SUBACK is not awaited.
        self.client()?
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(topic);
        self.client()?
            .unsubscribe(topic)
            .await
            .map_err(|e| TransportError::Unsubscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        self.client()?
            .publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .await
            .map_err(|e| TransportError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn disconnect(&self) {
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        let Some(Connection { client, mut driver }) = self.take_connection() else {
            return;
        };
        if let Err(e) = client.disconnect().await {
            tracing::debug!(error = %e, "MQTT disconnect request not queued");
        }
        if tokio::time::timeout(DISCONNECT_GRACE, &mut driver).await.is_err() {
            driver.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, ConnectReturnCode, Publish};

    fn settings(port: u16) -> BrokerSettings {
        BrokerSettings {
            host: "127.0.0.1".to_string(),
            port,
            connect_timeout_ms: 2000,
            ..BrokerSettings::default()
        }
    }

    #[test]
    fn test_publish_maps_to_message() {
        let publish = Publish::new("lab/signal", QoS::AtLeastOnce, b"[0.4, 0.3]".to_vec());

        assert_eq!(
            map_event(Event::Incoming(Packet::Publish(publish)), false),
            Some(TransportEvent::Message {
                topic: "lab/signal".to_string(),
                payload: Bytes::from_static(b"[0.4, 0.3]"),
            })
        );
    }

    #[test]
    fn test_connack_only_counts_after_a_drop() {
        let connack = || {
            Event::Incoming(Packet::ConnAck(ConnAck {
                session_present: false,
                code: ConnectReturnCode::Success,
            }))
        };

        assert_eq!(map_event(connack(), false), None);
        assert_eq!(map_event(connack(), true), Some(TransportEvent::Reconnected));
        assert_eq!(
            map_event(Event::Incoming(Packet::Disconnect), false),
            Some(TransportEvent::Closed)
        );
        assert_eq!(map_event(Event::Incoming(Packet::PingResp), false), None);
    }

    #[test]
    fn test_failures_report_offline_once_then_retries() {
        let reset = ConnectionError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert_eq!(
            failure_events(&reset, true),
            vec![TransportEvent::Offline, TransportEvent::Reconnecting]
        );
        assert_eq!(failure_events(&reset, false), vec![TransportEvent::Reconnecting]);

        let refused = ConnectionError::ConnectionRefused(ConnectReturnCode::NotAuthorized);
        let events = failure_events(&refused, false);
        assert!(matches!(events[0], TransportEvent::Error(_)));
        assert_eq!(events[1], TransportEvent::Reconnecting);
    }

    #[test]
    fn test_rejects_blank_client_id() {
        assert!(matches!(
            MqttTransport::new(&settings(1883), ""),
            Err(TransportError::Connect(_))
        ));
        assert!(MqttTransport::new(&settings(1883), "chart-1").is_ok());
    }

    #[tokio::test]
    async fn test_refused_connection_is_a_connect_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let transport = MqttTransport::new(&settings(port), "chart-test").unwrap();

        assert!(matches!(
            transport.connect().await,
            Err(TransportError::Connect(_))
        ));
        assert_eq!(
            transport.publish("lab/signal", Bytes::new()).await,
            Err(TransportError::NotConnected)
        );
    }
}
