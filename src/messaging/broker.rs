use crate::config::AmqpConfig;
use crate::error::{Error, Result};
use crate::messaging::message::OutgoingMessage;
use crate::messaging::Publisher;
use async_trait::async_trait;
use deadpool_lapin::{Config, Manager, Pool};
use lapin::{
    options::{BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions},
    publisher_confirm::Confirmation,
    types::FieldTable,
    BasicProperties, Channel, ExchangeKind,
};
use log::{debug, info, warn};
use std::time::Duration;
use tokio::sync::Mutex;

/// RabbitMQ publisher using publisher confirms.
///
/// Messages go to a topic exchange with the MQTT topic mapped to a routing
/// key, so MQTT subscribers on a RabbitMQ broker see the same topic.
pub struct AmqpPublisher {
    /// Connection pool
    pool: Pool,
    /// Configuration
    config: AmqpConfig,
    /// Confirm-mode channel, recreated when the connection drops
    channel: Mutex<Option<Channel>>,
}

impl AmqpPublisher {
    /// Create a publisher and declare its exchange
    pub async fn new(config: AmqpConfig) -> Result<Self> {
        let pool_config = Config {
            url: Some(config.uri.clone()),
            pool: Some(deadpool_lapin::PoolConfig {
                max_size: config.pool_size as usize,
                queue_mode: deadpool::managed::QueueMode::Fifo,
                timeouts: deadpool::managed::Timeouts {
                    wait: Some(Duration::from_millis(config.timeout_ms)),
                    create: Some(Duration::from_millis(config.timeout_ms)),
                    recycle: Some(Duration::from_millis(config.timeout_ms)),
                },
            }),
            connection_properties: lapin::ConnectionProperties::default(),
        };
        let pool = pool_config
            .create_pool(Some(deadpool_lapin::Runtime::Tokio1))
            .map_err(|e| Error::Config(format!("Failed to create RabbitMQ pool: {}", e)))?;

        let publisher = Self {
            pool,
            config,
            channel: Mutex::new(None),
        };

        publisher.init().await?;

        Ok(publisher)
    }

    /// Declare the exchange. `amq.*` exchanges are predeclared and may only
    /// be checked passively.
    async fn init(&self) -> Result<()> {
        let channel = self.get_channel().await?;

        channel
            .exchange_declare(
                &self.config.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    passive: self.config.exchange.starts_with("amq."),
                    durable: true,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                Error::Publish(format!(
                    "Failed to declare exchange {}: {}",
                    self.config.exchange, e
                ))
            })?;

        info!("RabbitMQ publisher ready on exchange {}", self.config.exchange);

        Ok(())
    }

    /// Get a connection from the pool with retry
    async fn get_connection(&self) -> Result<deadpool::managed::Object<Manager>> {
        let mut attempts = 0;
        let max_attempts = self.config.retry_attempts.max(1);

        loop {
            attempts += 1;
            match self.pool.get().await {
                Ok(conn) => return Ok(conn),
                Err(err) => {
                    if attempts >= max_attempts {
                        return Err(Error::Publish(format!(
                            "Failed to get RabbitMQ connection after {} attempts: {}",
                            attempts, err
                        )));
                    }

                    warn!(
                        "Failed to get RabbitMQ connection (attempt {}/{}): {}",
                        attempts, max_attempts, err
                    );

                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
            }
        }
    }

    /// Get the cached channel or open a new one in confirm mode
    async fn get_channel(&self) -> Result<Channel> {
        let mut channel_guard = self.channel.lock().await;

        if let Some(channel) = &*channel_guard {
            if channel.status().connected() {
                return Ok(channel.clone());
            }
        }

        let conn = self.get_connection().await?;
        let channel = conn
            .create_channel()
            .await
            .map_err(|e| Error::Publish(format!("Failed to create RabbitMQ channel: {}", e)))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| Error::Publish(format!("Failed to enable publisher confirms: {}", e)))?;

        *channel_guard = Some(channel.clone());

        Ok(channel)
    }
}

#[async_trait]
impl Publisher for AmqpPublisher {
    async fn publish(&self, message: &OutgoingMessage) -> Result<()> {
        let channel = self.get_channel().await?;
        let routing_key = message.routing_key();

        let confirm = channel
            .basic_publish(
                &self.config.exchange,
                &routing_key,
                BasicPublishOptions::default(),
                &message.payload,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await
            .map_err(|e| Error::Publish(format!("Failed to publish message: {}", e)))?;

        let confirmation = confirm
            .await
            .map_err(|e| Error::Publish(format!("Failed to receive publisher confirm: {}", e)))?;

        match confirmation {
            Confirmation::Nack(_) => Err(Error::Publish(format!(
                "RabbitMQ rejected message for {}",
                routing_key
            ))),
            _ => {
                debug!("Published message with routing key: {}", routing_key);
                Ok(())
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if let Some(channel) = self.channel.lock().await.take() {
            if let Err(e) = channel.close(200, "shutdown").await {
                warn!("Failed to close RabbitMQ channel: {}", e);
            }
        }
        self.pool.close();
        Ok(())
    }
}
