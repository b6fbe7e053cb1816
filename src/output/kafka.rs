use super::{Output, Submission};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use std::time::Duration;
use tracing::debug;

/// Publishes each batch as one Kafka message keyed by its object path.
pub struct KafkaOutput {
    producer: FutureProducer,
    topic: String,
}

impl KafkaOutput {
    pub fn new(brokers: &str, topic: &str) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("message.timeout.ms", "30000")
            .create()?;

        Ok(Self {
            producer,
            topic: topic.to_string(),
        })
    }
}

#[async_trait]
impl Output for KafkaOutput {
    async fn submit(&self, data: Bytes, submission: &Submission) -> Result<()> {
        let key = submission.object_path();
        let record = FutureRecord::to(&self.topic).payload(data.as_ref()).key(&key);

        self.producer
            .send(record, Duration::from_secs(30))
            .await
            .map_err(|(e, _)| Error::Kafka(e))?;

        debug!(topic = %self.topic, key = %key, "batch published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires running Kafka (TEST_KAFKA_BROKERS)
    async fn test_publish_batch() {
        let brokers =
            std::env::var("TEST_KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9092".to_string());
        let output = KafkaOutput::new(&brokers, "logpull-test").unwrap();
        let submission = Submission {
            connector: "okta".into(),
            identity: "acme".into(),
            operation: "default".into(),
            part: 1,
            kind: "logs".into(),
            descriptor: "1".into(),
            collected_at: chrono::Utc::now(),
        };
        output
            .submit(Bytes::from_static(b"payload"), &submission)
            .await
            .unwrap();
    }
}
