//! MQTT adapter over `rumqttc`.
//!
//! The event loop lives inside [`MqttSubscription`]; whoever owns it must keep
//! polling (via `next_message` or [`MqttSubscription::drive`]) for publishes
//! to leave the process.

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::bus::{BusError, BusMessage, Publisher, Subscription};
use crate::config::BrokerConfig;

/// Requests buffered between the client handle and the event loop.
const REQUEST_CAPACITY: usize = 256;

/// Build a client for `client_id`. The connection is opened lazily by the
/// first poll of the returned subscription.
pub fn connect(
    config: &BrokerConfig,
    client_id: &str,
    filters: Vec<String>,
) -> (MqttPublisher, MqttSubscription) {
    let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
    options.set_keep_alive(config.keep_alive().max(Duration::from_secs(5)));

    let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
    info!(host = %config.host, port = config.port, %client_id, "MQTT client configured");

    (
        MqttPublisher {
            client: client.clone(),
        },
        MqttSubscription {
            client,
            eventloop,
            filters,
            reconnect_delay: config.reconnect_delay(),
        },
    )
}

#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

#[async_trait::async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| BusError::PublishFailure {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

pub struct MqttSubscription {
    client: AsyncClient,
    eventloop: EventLoop,
    filters: Vec<String>,
    reconnect_delay: Duration,
}

impl MqttSubscription {
    /// Poll the connection forever, discarding inbound messages. For
    /// processes that only publish.
    pub async fn drive(mut self) {
        while let Some(msg) = self.next_message().await {
            debug!(topic = %msg.topic, "Ignoring inbound message on publish-only client");
        }
    }

    /// Queue subscriptions without waiting; the event loop is this task, so
    /// a blocking send could deadlock.
    fn request_subscriptions(&self) -> Result<(), BusError> {
        for filter in &self.filters {
            self.client
                .try_subscribe(filter.clone(), QoS::AtMostOnce)
                .map_err(|e| BusError::SubscribeFailure {
                    filter: filter.clone(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Subscription for MqttSubscription {
    async fn next_message(&mut self) -> Option<BusMessage> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    return Some(BusMessage {
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                    });
                }
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!(code = ?ack.code, "Connected to MQTT broker");
                    if let Err(e) = self.request_subscriptions() {
                        warn!(error = %e, "Failed to request subscriptions");
                    } else if !self.filters.is_empty() {
                        info!(filters = ?self.filters, "Subscribed");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        error = %e,
                        delay_secs = self.reconnect_delay.as_secs(),
                        "MQTT connection error, retrying"
                    );
                    tokio::time::sleep(self.reconnect_delay).await;
                }
            }
        }
    }
}
