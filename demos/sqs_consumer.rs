use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Context;
use pubsub_consumer::{
    AcknowledgeRequest, BoxError, Consumer, ConsumerConfig, EventKind, PubsubMessage,
    PullRequest, PullResponse, ReceivedMessage, SubscriberClient, handler_fn,
};
use tracing_subscriber::EnvFilter;

/// Treats an SQS queue url as the subscription and receipt handles as ack ids
#[derive(Clone)]
pub struct SqsSubscriber {
    inner: aws_sdk_sqs::Client,
    wait_time_seconds: i32,
}

impl SqsSubscriber {
    pub fn new(client: aws_sdk_sqs::Client) -> Self {
        Self {
            inner: client,
            wait_time_seconds: 20,
        }
    }
}

fn to_received(message: aws_sdk_sqs::types::Message) -> ReceivedMessage {
    let attributes: HashMap<String, String> = message
        .message_attributes
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, value)| value.string_value.map(|v| (key, v)))
        .collect();

    ReceivedMessage {
        ack_id: message.receipt_handle,
        message: Some(PubsubMessage {
            data: message.body.unwrap_or_default().into_bytes(),
            attributes,
            message_id: message.message_id,
            ..Default::default()
        }),
    }
}

impl SubscriberClient for SqsSubscriber {
    type Error = aws_sdk_sqs::Error;

    async fn pull(&self, request: PullRequest) -> Result<PullResponse, Self::Error> {
        let output = self
            .inner
            .receive_message()
            .queue_url(&request.subscription)
            .wait_time_seconds(self.wait_time_seconds)
            .max_number_of_messages(i32::from(request.max_messages))
            .message_attribute_names("All")
            .send()
            .await?;

        Ok(PullResponse::new(
            output
                .messages
                .unwrap_or_default()
                .into_iter()
                .map(to_received)
                .collect(),
        ))
    }

    async fn acknowledge(&self, request: AcknowledgeRequest) -> Result<(), Self::Error> {
        for receipt_handle in &request.ack_ids {
            self.inner
                .delete_message()
                .queue_url(&request.subscription)
                .receipt_handle(receipt_handle)
                .send()
                .await?;
        }

        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_line_number(true)
        .init();

    // PUBSUB_SUBSCRIPTION holds the queue url
    let config = ConsumerConfig::from_env().context("invalid consumer configuration")?;
    let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region("us-east-1")
        .endpoint_url(&config.subscription)
        .load()
        .await;

    let subscriber = SqsSubscriber::new(aws_sdk_sqs::Client::new(&aws_config));

    // A numeric body is treated as the number of seconds the work takes
    let handler = handler_fn(|message: Arc<ReceivedMessage>| async move {
        let body = message.data_str().ok_or("body is not valid UTF-8")?;
        tracing::info!(message_id = message.message_id(), body, "processing message");
        let seconds: u64 = body.trim().parse()?;
        tokio::time::sleep(Duration::from_secs(seconds)).await;
        tracing::info!(message_id = message.message_id(), "done processing message");
        Ok::<(), BoxError>(())
    });

    let consumer = Consumer::create(config, subscriber, handler)?;

    for kind in [
        EventKind::PullingError,
        EventKind::ProcessingError,
        EventKind::TimeoutError,
        EventKind::DeletingError,
    ] {
        consumer.on(kind, move |event| {
            if let Some(error) = event.error() {
                tracing::warn!(
                    event = %kind,
                    message_id = event.message().and_then(ReceivedMessage::message_id),
                    error = %error,
                    "consumer reported an error"
                );
            }
        });
    }

    consumer.start();
    tracing::info!("initialized sqs consumer");

    tokio::signal::ctrl_c().await?;

    consumer.stop();
    consumer.stopped().await;

    println!("done");

    Ok(())
}
