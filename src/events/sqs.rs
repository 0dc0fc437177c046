use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::config::Region;
use aws_sdk_sqs::error::DisplayErrorContext;
use tracing::info;

use super::{EventQueue, PublishError};
use crate::config::QueueConfig;

/// AWS SQS destination for audit events.
#[derive(Debug, Clone)]
pub struct SqsEventQueue {
    client: aws_sdk_sqs::Client,
    queue_url: String,
}

impl SqsEventQueue {
    pub async fn from_config(config: &QueueConfig) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));

        match &config.endpoint_url {
            Some(endpoint) => {
                info!(endpoint = %endpoint, "using custom SQS endpoint");
                loader = loader.endpoint_url(endpoint);
            }
            None => info!("no AWS_ENDPOINT_URL set, using the default AWS SQS endpoint"),
        }

        let sdk_config = loader.load().await;

        Self {
            client: aws_sdk_sqs::Client::new(&sdk_config),
            queue_url: config.queue_url.clone(),
        }
    }
}

#[async_trait]
impl EventQueue for SqsEventQueue {
    async fn send(&self, body: String) -> Result<(), PublishError> {
        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| PublishError::Delivery(DisplayErrorContext(&e).to_string()))?;

        Ok(())
    }
}
