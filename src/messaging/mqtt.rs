use crate::config::MqttConfig;
use crate::error::{Error, Result};
use crate::messaging::message::OutgoingMessage;
use crate::messaging::Publisher;
use async_trait::async_trait;
use log::{debug, warn};
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;
use tokio::time::timeout;
use uuid::Uuid;

/// MQTT publisher confirming delivery at the configured QoS.
///
/// Each publish opens its own short-lived connection, so the first
/// acknowledgment observed on it belongs to that publish.
pub struct MqttPublisher {
    config: MqttConfig,
}

fn qos_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// The event that completes a publish at `qos`
fn is_delivery_confirmation(event: &Event, qos: QoS) -> bool {
    match (qos, event) {
        (QoS::AtMostOnce, Event::Outgoing(Outgoing::Publish(_))) => true,
        (QoS::AtLeastOnce, Event::Incoming(Packet::PubAck(_))) => true,
        (QoS::ExactlyOnce, Event::Incoming(Packet::PubComp(_))) => true,
        _ => false,
    }
}

impl MqttPublisher {
    pub fn new(config: MqttConfig) -> Self {
        Self { config }
    }

    fn options(&self) -> MqttOptions {
        let client_id = self
            .config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("motion-gif-relay-{}", Uuid::new_v4().simple()));

        let mut options = MqttOptions::new(client_id, &self.config.host, self.config.port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);

        let max_packet = self.config.max_packet_size_kb * 1024;
        options.set_max_packet_size(max_packet, max_packet);

        if let Some(username) = &self.config.username {
            options.set_credentials(username, self.config.password.clone().unwrap_or_default());
        }

        options
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, message: &OutgoingMessage) -> Result<()> {
        let qos = qos_level(self.config.qos);
        let (client, mut eventloop) = AsyncClient::new(self.options(), 10);

        client
            .publish(&message.topic, qos, self.config.retain, message.payload.clone())
            .await
            .map_err(|e| Error::Publish(format!("Failed to queue MQTT publish: {}", e)))?;

        let confirmation = async {
            loop {
                match eventloop.poll().await {
                    Ok(event) if is_delivery_confirmation(&event, qos) => return Ok(()),
                    Ok(_) => {}
                    Err(e) => {
                        return Err(Error::Publish(format!(
                            "MQTT connection to {}:{} failed: {}",
                            self.config.host, self.config.port, e
                        )))
                    }
                }
            }
        };

        let outcome = match timeout(Duration::from_secs(self.config.ack_timeout_secs), confirmation).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Publish(format!(
                "No acknowledgment for {} within {}s",
                message.topic, self.config.ack_timeout_secs
            ))),
        };

        if outcome.is_ok() {
            debug!("MQTT broker acknowledged publish on {}", message.topic);
        }

        // Best effort, the outcome is already decided
        match client.disconnect().await {
            Ok(_) => {
                let _ = timeout(Duration::from_secs(1), eventloop.poll()).await;
            }
            Err(e) => warn!("Failed to disconnect from MQTT broker: {}", e),
        }

        outcome
    }
}
