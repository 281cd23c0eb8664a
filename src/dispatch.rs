//! The dispatch unit: everything that happens to one received message.

use std::sync::Arc;

use crate::{
    consumer::Inner,
    error::ConsumerError,
    events::ConsumerEvent,
    handler::{MessageHandler, run_handler},
    message::{AcknowledgeRequest, ReceivedMessage},
    subscriber::SubscriberClient,
};

impl<C, H> Inner<C, H>
where
    C: SubscriberClient + Send + Sync + 'static,
    H: MessageHandler + Send + Sync + 'static,
{
    /// Notify, handle, acknowledge, notify.
    ///
    /// Never fails: every outcome ends in an event, so one message cannot take down the rest
    /// of its batch. A message is only acknowledged after its handler returned `Ok`.
    pub(crate) async fn dispatch(&self, message: Arc<ReceivedMessage>) {
        self.events
            .emit(ConsumerEvent::MessageReceived(Arc::clone(&message)));

        if let Err(e) = run_handler(
            &self.handler,
            &message,
            self.handler_timeout(),
            self.timeout_action(),
        )
        .await
        {
            tracing::error!(
                message_id = message.message_id(),
                error = %e,
                "error processing message"
            );
            let e = Arc::new(e);
            let event = if e.is_timeout() {
                ConsumerEvent::TimeoutError(e, message)
            } else {
                ConsumerEvent::ProcessingError(e, message)
            };
            self.events.emit(event);
            return;
        }

        self.acknowledge(&message).await;
        self.events.emit(ConsumerEvent::MessageProcessed(message));
    }

    /// Acknowledge a single message. Failures are reported, never retried.
    async fn acknowledge(&self, message: &Arc<ReceivedMessage>) {
        let Some(ack_id) = message.ack_id() else {
            tracing::debug!(
                message_id = message.message_id(),
                "message has no ack id, skipping acknowledgment"
            );
            return;
        };

        tracing::debug!(message_id = message.message_id(), ack_id, "acknowledging message");

        let request = AcknowledgeRequest {
            subscription: self.config.subscription.clone(),
            ack_ids: vec![ack_id.to_owned()],
        };

        match self.client.acknowledge(request).await {
            Ok(()) => {
                tracing::debug!(ack_id, "message acknowledged");
            }
            Err(e) => {
                tracing::error!(ack_id, error = %e, "unable to acknowledge message");
                self.events.emit(ConsumerEvent::DeletingError(
                    Arc::new(ConsumerError::Acknowledge(Box::new(e))),
                    Arc::clone(message),
                ));
            }
        }
    }
}
