//! MQTT subscription loop.
//!
//! Maintains the broker session and feeds inbound publishes to the
//! adapter. Subscribing happens on every ConnAck, so a reconnect after
//! connection loss resubscribes automatically; while disconnected nothing
//! is enqueued.

use std::time::Duration;

use ponte_core::Qos;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{adapter::InboundAdapter, IngestError};

/// Broker connection and subscription settings.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Broker hostname or IP address.
    pub broker_host: String,
    /// Broker port.
    pub broker_port: u16,
    /// Topic filter to subscribe to.
    pub topic: String,
    /// Optional username for broker authentication.
    pub username: Option<String>,
    /// Optional password for broker authentication.
    pub password: Option<String>,
    /// Client identifier presented to the broker.
    pub client_id: String,
    /// MQTT keep-alive interval.
    pub keep_alive: Duration,
    /// QoS requested for the subscription.
    pub subscribe_qos: Qos,
    /// Delay before polling again after a connection error.
    pub reconnect_delay: Duration,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            topic: "data/sensor".to_string(),
            username: None,
            password: None,
            client_id: "ponte-bridge".to_string(),
            keep_alive: Duration::from_secs(60),
            subscribe_qos: Qos::AtLeastOnce,
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// Request-channel capacity for the MQTT client.
const CLIENT_CHANNEL_CAPACITY: usize = 10;

/// Drives the MQTT event loop and feeds the inbound adapter.
pub struct MqttSubscriber {
    config: MqttConfig,
    adapter: InboundAdapter,
    cancel: CancellationToken,
}

impl MqttSubscriber {
    /// Creates a subscriber feeding the given adapter.
    pub fn new(config: MqttConfig, adapter: InboundAdapter, cancel: CancellationToken) -> Self {
        Self { config, adapter, cancel }
    }

    /// Runs the subscription loop until cancelled or the pipeline closes.
    ///
    /// Connection errors are logged and retried after a backoff; the
    /// rumqttc event loop re-establishes the session and the ConnAck
    /// handler resubscribes.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Mqtt`] only when a subscribe request cannot
    /// be issued at all; transient broker failures are handled internally.
    pub async fn run(self) -> Result<(), IngestError> {
        let mut options = MqttOptions::new(
            &self.config.client_id,
            &self.config.broker_host,
            self.config.broker_port,
        );
        options.set_keep_alive(self.config.keep_alive);
        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            options.set_credentials(username.clone(), password.clone());
        }

        let (client, mut event_loop) = AsyncClient::new(options, CLIENT_CHANNEL_CAPACITY);

        info!(
            broker = %self.config.broker_host,
            port = self.config.broker_port,
            client_id = %self.config.client_id,
            "connecting to MQTT broker"
        );

        loop {
            tokio::select! {
                event = event_loop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        info!(code = ?ack.code, "connected to MQTT broker");
                        client
                            .subscribe(
                                self.config.topic.clone(),
                                to_mqtt_qos(self.config.subscribe_qos),
                            )
                            .await
                            .map_err(|e| IngestError::Mqtt(e.to_string()))?;
                        info!(topic = %self.config.topic, "subscribed");
                    },
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let qos = from_mqtt_qos(publish.qos);
                        if let Err(error) =
                            self.adapter.on_message(&publish.topic, publish.payload, qos).await
                        {
                            // Queue closed: the pipeline is shutting down.
                            warn!(error = %error, "pipeline closed, stopping subscriber");
                            break;
                        }
                    },
                    Ok(event) => {
                        debug!(?event, "mqtt event");
                    },
                    Err(error) => {
                        warn!(error = %error, "mqtt connection error, backing off");
                        tokio::time::sleep(self.config.reconnect_delay).await;
                    },
                },
                () = self.cancel.cancelled() => {
                    info!("shutdown signal received, disconnecting from broker");
                    if let Err(error) = client.disconnect().await {
                        debug!(error = %error, "disconnect request failed");
                    }
                    break;
                }
            }
        }

        Ok(())
    }
}

fn to_mqtt_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

fn from_mqtt_qos(qos: QoS) -> Qos {
    match qos {
        QoS::AtMostOnce => Qos::AtMostOnce,
        QoS::AtLeastOnce => Qos::AtLeastOnce,
        QoS::ExactlyOnce => Qos::ExactlyOnce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_round_trips_through_mqtt_levels() {
        for qos in [Qos::AtMostOnce, Qos::AtLeastOnce, Qos::ExactlyOnce] {
            assert_eq!(from_mqtt_qos(to_mqtt_qos(qos)), qos);
        }
    }

    #[test]
    fn default_config_matches_bridge_conventions() {
        let config = MqttConfig::default();

        assert_eq!(config.broker_host, "localhost");
        assert_eq!(config.broker_port, 1883);
        assert_eq!(config.topic, "data/sensor");
        assert_eq!(config.client_id, "ponte-bridge");
        assert!(config.username.is_none());
    }
}
