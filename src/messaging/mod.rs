pub mod broker;
pub mod message;
pub mod mqtt;

pub use broker::AmqpPublisher;
pub use message::OutgoingMessage;
pub use mqtt::MqttPublisher;

use crate::config::{MessageBusConfig, TransportConfig};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Deliver-and-acknowledge capability of the message bus
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Returns `Ok` only once the broker acknowledged the message
    async fn publish(&self, message: &OutgoingMessage) -> Result<()>;

    /// Release connections
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Create the publisher selected by the configuration
pub async fn create_publisher(config: &MessageBusConfig) -> Result<Arc<dyn Publisher>> {
    let publisher: Arc<dyn Publisher> = match &config.transport {
        TransportConfig::Mqtt(mqtt) => Arc::new(MqttPublisher::new(mqtt.clone())),
        TransportConfig::Amqp(amqp) => Arc::new(AmqpPublisher::new(amqp.clone()).await?),
    };

    Ok(publisher)
}
