//! This module provides the trait user code implements to process messages, and the adapter
//! that runs it under the configured deadline.

use std::{any::Any, future::Future, sync::Arc, time::Duration};

use tokio::task::JoinError;
use tracing::Instrument;

use crate::{
    config::TimeoutAction,
    error::{BoxError, ConsumerError},
    message::ReceivedMessage,
    timeout::with_deadline,
};

/// A trait for message handlers that defines how to handle individual messages.
///
/// Returning `Ok(())` gets the message acknowledged. Returning an error, panicking or running
/// past the configured handler timeout leaves the message unacknowledged, so the broker
/// redelivers it once its ack deadline expires. Handlers should therefore be idempotent.
///
/// Every invocation runs on its own tokio task.
///
/// # Examples
///
/// ```rust
/// use pubsub_consumer::{BoxError, MessageHandler, ReceivedMessage};
/// use std::sync::Arc;
///
/// struct OrderHandler;
///
/// impl MessageHandler for OrderHandler {
///     async fn handle_message(&self, message: Arc<ReceivedMessage>) -> Result<(), BoxError> {
///         let body = message.data_str().ok_or("order is not valid UTF-8")?;
///         if body.is_empty() {
///             return Err("empty order".into());
///         }
///         println!("processing order {body}");
///         Ok(())
///     }
/// }
/// ```
pub trait MessageHandler {
    /// Process a single message
    fn handle_message(
        &self,
        message: Arc<ReceivedMessage>,
    ) -> impl Future<Output = Result<(), BoxError>> + Send;
}

/// A [`MessageHandler`] backed by an async closure. Built with [`handler_fn`].
#[derive(Clone)]
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as a [`MessageHandler`]
///
/// ```rust
/// use pubsub_consumer::handler_fn;
///
/// let handler = handler_fn(|message| async move {
///     println!("got {:?}", message.message_id());
///     Ok::<(), pubsub_consumer::BoxError>(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Arc<ReceivedMessage>) -> Fut,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    FnHandler { f }
}

impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Arc<ReceivedMessage>) -> Fut,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    fn handle_message(
        &self,
        message: Arc<ReceivedMessage>,
    ) -> impl Future<Output = Result<(), BoxError>> + Send {
        (self.f)(message)
    }
}

/// Run `handler` for one message and normalize the outcome.
///
/// The handler runs on a spawned task so that a deadline miss can either abandon it or abort
/// it according to `on_timeout`, and so that a panic surfaces as a
/// [`ConsumerError::HandlerFailure`] instead of unwinding through the poll loop.
pub(crate) async fn run_handler<H>(
    handler: &Arc<H>,
    message: &Arc<ReceivedMessage>,
    timeout: Option<Duration>,
    on_timeout: TimeoutAction,
) -> Result<(), ConsumerError>
where
    H: MessageHandler + Send + Sync + 'static,
{
    tracing::debug!(message_id = message.message_id(), "handling message");

    let mut task = tokio::spawn({
        let handler = Arc::clone(handler);
        let message = Arc::clone(message);
        async move { handler.handle_message(message).await }.in_current_span()
    });

    match with_deadline(timeout, &mut task).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(e))) => Err(ConsumerError::HandlerFailure(e)),
        Ok(Err(join_error)) => Err(ConsumerError::HandlerFailure(join_error_to_box(join_error))),
        Err(elapsed) => {
            match on_timeout {
                TimeoutAction::Abort => task.abort(),
                TimeoutAction::Detach => tracing::warn!(
                    message_id = message.message_id(),
                    timeout_ms = elapsed.after.as_millis() as u64,
                    "handler missed its deadline, leaving it running detached"
                ),
            }
            Err(ConsumerError::HandlerTimeout {
                timeout: elapsed.after,
            })
        }
    }
}

fn join_error_to_box(error: JoinError) -> BoxError {
    if error.is_panic() {
        let payload = error.into_panic();
        format!("handler panicked: {}", panic_message(&*payload)).into()
    } else {
        "handler task was cancelled".into()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::PubsubMessage;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn message() -> Arc<ReceivedMessage> {
        Arc::new(ReceivedMessage::new(
            "ack-1",
            PubsubMessage::new("payload").with_message_id("m-1"),
        ))
    }

    #[tokio::test]
    async fn successful_handler() {
        let handler = Arc::new(handler_fn(|_| async { Ok::<(), BoxError>(()) }));
        let result = run_handler(&handler, &message(), None, TimeoutAction::Detach).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn handler_sees_the_message() {
        let handler = Arc::new(handler_fn(|message: Arc<ReceivedMessage>| async move {
            match message.data_str() {
                Some("payload") => Ok::<(), BoxError>(()),
                other => Err(format!("unexpected body {other:?}").into()),
            }
        }));
        let result = run_handler(&handler, &message(), None, TimeoutAction::Detach).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn failing_handler_is_prefixed() {
        let handler = Arc::new(handler_fn(|_| async {
            Err::<(), BoxError>("Some handler error".into())
        }));
        let err = run_handler(&handler, &message(), None, TimeoutAction::Detach)
            .await
            .unwrap_err();
        assert!(matches!(err, ConsumerError::HandlerFailure(_)));
        assert_eq!(
            err.to_string(),
            "unexpected message handler failure: Some handler error"
        );
    }

    #[tokio::test]
    async fn panicking_handler_becomes_failure() {
        async fn explode(_: Arc<ReceivedMessage>) -> Result<(), BoxError> {
            panic!("handler blew up")
        }

        let handler = Arc::new(handler_fn(explode));
        let err = run_handler(&handler, &message(), None, TimeoutAction::Detach)
            .await
            .unwrap_err();
        assert!(matches!(err, ConsumerError::HandlerFailure(_)));
        assert!(err.to_string().contains("handler panicked: handler blew up"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out() {
        let handler = Arc::new(handler_fn(|_| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<(), BoxError>(())
        }));
        let err = run_handler(
            &handler,
            &message(),
            Some(Duration::from_millis(500)),
            TimeoutAction::Detach,
        )
        .await
        .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(
            err.to_string(),
            "message handler timed out after 500ms: operation timed out"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn detached_handler_keeps_running() {
        let finished = Arc::new(AtomicBool::new(false));
        let handler = Arc::new(handler_fn({
            let finished = Arc::clone(&finished);
            move |_| {
                let finished = Arc::clone(&finished);
                async move {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    finished.store(true, Ordering::SeqCst);
                    Ok::<(), BoxError>(())
                }
            }
        }));

        let result = run_handler(
            &handler,
            &message(),
            Some(Duration::from_millis(100)),
            TimeoutAction::Detach,
        )
        .await;
        assert!(result.unwrap_err().is_timeout());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_handler_stops() {
        let finished = Arc::new(AtomicBool::new(false));
        let handler = Arc::new(handler_fn({
            let finished = Arc::clone(&finished);
            move |_| {
                let finished = Arc::clone(&finished);
                async move {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    finished.store(true, Ordering::SeqCst);
                    Ok::<(), BoxError>(())
                }
            }
        }));

        let result = run_handler(
            &handler,
            &message(),
            Some(Duration::from_millis(100)),
            TimeoutAction::Abort,
        )
        .await;
        assert!(result.unwrap_err().is_timeout());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }
}
