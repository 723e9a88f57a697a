// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bus transport: a `rumqttc` client wrapping the publish/subscribe broker,
//! plus a mock used by the engine's own tests and the end-to-end scenario
//! suite. `BusAdapter` is generic rather than a trait object — the session
//! controller is monomorphized per adapter, so publishing never allocates.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use prost::Message as _;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, TlsConfiguration, Transport};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::event::SessionEvent;
use crate::event_queue::EventProducer;
use crate::proto::FleetMessage;

const KEEPALIVE: Duration = Duration::from_secs(15);

/// Client certificate material for a TLS broker connection, sourced from the
/// `--tls`/`--ca`/`--cert`/`--key` CLI flags.
#[derive(Clone)]
pub struct TlsOptions {
    pub ca_path: PathBuf,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl TlsOptions {
    fn into_transport(self) -> Result<Transport, EngineError> {
        let read = |path: &PathBuf| {
            std::fs::read(path).map_err(|source| EngineError::Transport(format!("reading {path:?}: {source}")))
        };
        let ca = read(&self.ca_path)?;
        let client_cert = read(&self.cert_path)?;
        let client_key = read(&self.key_path)?;
        Ok(Transport::tls_with_config(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth: Some((client_cert, client_key)),
        }))
    }
}

/// The two topics a car session's bus identity resolves to.
pub struct Topics {
    pub inbound: String,
    pub outbound: String,
}

impl Topics {
    pub fn for_car(company_name: &str, car_name: &str) -> Self {
        Self {
            inbound: format!("{company_name}/{car_name}/module_gateway"),
            outbound: format!("{company_name}/{car_name}/external_server"),
        }
    }
}

/// Publishing capability the session controller depends on. Generic so the
/// controller never boxes or dynamically dispatches a publish call.
pub trait BusAdapter: Send + Sync {
    async fn publish(&self, message: FleetMessage) -> Result<(), EngineError>;
}

/// Real broker client. `publish` returns once the broker acknowledges,
/// matching the synchronous-from-the-controller's-view contract.
pub struct RumqttcBusAdapter {
    client: AsyncClient,
    topics: Topics,
    event_loop: Mutex<Option<EventLoop>>,
}

impl RumqttcBusAdapter {
    /// Connects and subscribes to the inbound topic. Returns once the
    /// subscription is acknowledged; the feed loop that drains `event_loop`
    /// onto a session's event queue is started separately via
    /// [`RumqttcBusAdapter::start_feed_loop`] once that queue exists.
    pub async fn connect(
        broker_address: &str,
        broker_port: u16,
        company_name: &str,
        car_name: &str,
        tls: Option<TlsOptions>,
    ) -> Result<Arc<Self>, EngineError> {
        let topics = Topics::for_car(company_name, car_name);
        let client_id = format!("{company_name}-{car_name}");

        let mut options = MqttOptions::new(client_id, broker_address, broker_port);
        options.set_keep_alive(KEEPALIVE);
        if let Some(tls) = tls {
            options.set_transport(tls.into_transport()?);
        }

        let (client, event_loop) = AsyncClient::new(options, 64);
        client
            .subscribe(&topics.inbound, QoS::AtLeastOnce)
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        Ok(Arc::new(Self { client, topics, event_loop: Mutex::new(Some(event_loop)) }))
    }

    /// Spawns the task that feeds decoded frames and transport-loss
    /// notifications onto `producer`. Panics if called more than once per
    /// adapter.
    pub fn start_feed_loop(self: &Arc<Self>, producer: EventProducer, shutdown: CancellationToken) {
        let event_loop = self.event_loop.lock().expect("event loop mutex poisoned").take().expect("feed loop already started");
        tokio::spawn(feed_loop(event_loop, producer, shutdown));
    }
}

impl BusAdapter for RumqttcBusAdapter {
    async fn publish(&self, message: FleetMessage) -> Result<(), EngineError> {
        let bytes = message.encode_to_vec();
        self.client
            .publish(&self.topics.outbound, QoS::AtLeastOnce, false, bytes)
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))
    }
}

async fn feed_loop(mut event_loop: EventLoop, producer: EventProducer, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("bus feed loop stopping on shutdown");
                return;
            }
            polled = event_loop.poll() => {
                match polled {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        match FleetMessage::decode(publish.payload) {
                            Ok(message) => {
                                if producer.push(SessionEvent::Inbound(message)).await.is_err() {
                                    warn!("event queue rejected an inbound frame, session is stuck");
                                    return;
                                }
                            }
                            Err(error) => warn!(%error, "dropping a frame that failed to decode"),
                        }
                    }
                    Ok(_) => {}
                    Err(error) => {
                        warn!(%error, "bus transport reported an error");
                        let _ = producer.push(SessionEvent::TransportDown).await;
                        return;
                    }
                }
            }
        }
    }
}

/// In-memory stand-in for tests: records every published frame and never
/// touches the network.
#[derive(Default)]
pub struct MockBusAdapter {
    published: parking_lot::Mutex<Vec<FleetMessage>>,
}

impl MockBusAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<FleetMessage> {
        self.published.lock().clone()
    }
}

impl BusAdapter for MockBusAdapter {
    async fn publish(&self, message: FleetMessage) -> Result<(), EngineError> {
        self.published.lock().push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_are_scoped_by_company_and_car() {
        let topics = Topics::for_car("acme", "v1");
        assert_eq!(topics.inbound, "acme/v1/module_gateway");
        assert_eq!(topics.outbound, "acme/v1/external_server");
    }

    #[tokio::test]
    async fn mock_adapter_records_published_frames() {
        let adapter = MockBusAdapter::new();
        adapter.publish(crate::proto::wrap(crate::proto::fleet_message::Payload::Disconnect(
            crate::proto::Disconnect { session_id: "s".into(), reason: "stop".into() },
        )))
        .await
        .unwrap();
        assert_eq!(adapter.published().len(), 1);
    }
}
