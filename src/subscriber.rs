//! This module provides a trait to pull messages from a subscription and acknowledge them.

use std::sync::Arc;

use crate::message::{AcknowledgeRequest, PullRequest, PullResponse};

/// A client for the remote subscription the consumer reads from.
///
/// Implement this trait to plug a queue system (Pub/Sub, SQS, an in-memory fake, ...) into
/// a [`Consumer`](crate::Consumer). The consumer shares one client across every message of a
/// batch and calls it concurrently, so implementations must be safe to invoke from several
/// tasks at once.
///
/// # Examples
///
/// ```rust
/// use pubsub_consumer::{
///     AcknowledgeRequest, PubsubMessage, PullRequest, PullResponse, ReceivedMessage,
///     SubscriberClient,
/// };
///
/// struct StaticSubscriber;
///
/// impl SubscriberClient for StaticSubscriber {
///     type Error = std::io::Error;
///
///     async fn pull(&self, request: PullRequest) -> Result<PullResponse, Self::Error> {
///         let messages = (0..request.max_messages)
///             .map(|i| ReceivedMessage::new(format!("ack-{i}"), PubsubMessage::new("ping")))
///             .collect();
///         Ok(PullResponse::new(messages))
///     }
///
///     async fn acknowledge(&self, request: AcknowledgeRequest) -> Result<(), Self::Error> {
///         println!("acknowledging {:?}", request.ack_ids);
///         Ok(())
///     }
/// }
/// ```
pub trait SubscriberClient {
    /// The error that can be returned by the client
    type Error: std::error::Error + Send + Sync + 'static;

    /// Pull at most `request.max_messages` messages from the subscription.
    ///
    /// Returning an empty response is how a client says there is nothing to do; the
    /// consumer then waits its polling interval and pulls again.
    fn pull(
        &self,
        request: PullRequest,
    ) -> impl Future<Output = Result<PullResponse, Self::Error>> + Send;

    /// Confirm that the messages behind `request.ack_ids` were processed.
    fn acknowledge(
        &self,
        request: AcknowledgeRequest,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

impl<C> SubscriberClient for Arc<C>
where
    C: SubscriberClient + Send + Sync,
{
    type Error = C::Error;

    fn pull(
        &self,
        request: PullRequest,
    ) -> impl Future<Output = Result<PullResponse, Self::Error>> + Send {
        C::pull(self, request)
    }

    fn acknowledge(
        &self,
        request: AcknowledgeRequest,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        C::acknowledge(self, request)
    }
}
