use crate::config::MessageEncoding;
use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::path::Path;

/// A message ready for the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Full topic, `<base_topic>/<topic_name>`
    pub topic: String,
    pub payload: Vec<u8>,
    pub encoding: MessageEncoding,
}

impl OutgoingMessage {
    /// Build the message for an artifact on disk according to the camera's encoding
    pub async fn from_artifact(topic: String, encoding: MessageEncoding, artifact: &Path) -> Result<Self> {
        let payload = match encoding {
            MessageEncoding::InlineReference => artifact
                .file_name()
                .map(|name| name.to_string_lossy().into_owned().into_bytes())
                .ok_or_else(|| Error::Io(format!("Artifact {} has no file name", artifact.display())))?,
            MessageEncoding::EmbeddedBinary => read_artifact(artifact).await?,
            MessageEncoding::Base64 => STANDARD.encode(read_artifact(artifact).await?).into_bytes(),
        };

        Ok(Self {
            topic,
            payload,
            encoding,
        })
    }

    /// Short description for logs; binary payloads are never printed
    pub fn summary(&self) -> String {
        match self.encoding {
            MessageEncoding::InlineReference => String::from_utf8_lossy(&self.payload).into_owned(),
            MessageEncoding::EmbeddedBinary => format!("{} bytes", self.payload.len()),
            MessageEncoding::Base64 => format!("{} base64 chars", self.payload.len()),
        }
    }

    /// AMQP routing key for the topic (RabbitMQ's MQTT plugin maps `/` to `.`)
    pub fn routing_key(&self) -> String {
        self.topic.replace('/', ".")
    }
}

async fn read_artifact(artifact: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(artifact)
        .await
        .map_err(|e| Error::Io(format!("Failed to read artifact {}: {}", artifact.display(), e)))
}
