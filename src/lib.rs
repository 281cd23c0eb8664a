//! # pubsub-consumer
//!
//! A long-running, poll-based consumer for Pub/Sub style subscriptions. It pulls batches of
//! messages, runs a user supplied handler for each of them under a time budget, acknowledges
//! what was handled successfully and reports everything else as typed events. Nothing that
//! happens while it runs can crash the process.
//!
//! ## Features
//!
//! - **Generic Design**: Works with any queue system by implementing the [`SubscriberClient`] and [`MessageHandler`] traits
//! - **Concurrent Batches**: Every message of a batch is handled on its own task; the next pull waits for all of them
//! - **Timeout Handling**: Optional per-message deadline, with timed out handlers either detached or aborted
//! - **Observable**: Every transition is emitted as a [`ConsumerEvent`] to registered listeners
//! - **Structured Logging**: `tracing` spans and fields for subscriptions, message ids and errors
//! - **Cooperative Shutdown**: `stop()` lets the current batch settle before the loop exits
//!
//! ## Quick Start
//!
//! ```rust
//! use pubsub_consumer::{
//!     AcknowledgeRequest, BoxError, Consumer, ConsumerConfig, EventKind, PubsubMessage,
//!     PullRequest, PullResponse, ReceivedMessage, SubscriberClient, handler_fn,
//! };
//! use std::time::Duration;
//!
//! // 1. Implement SubscriberClient for your queue system
//! struct MySubscriber;
//!
//! impl SubscriberClient for MySubscriber {
//!     type Error = std::io::Error;
//!
//!     async fn pull(&self, request: PullRequest) -> Result<PullResponse, Self::Error> {
//!         // Your pull logic here
//!         let message = ReceivedMessage::new("ack-1", PubsubMessage::new("hello"));
//!         Ok(PullResponse::new(vec![message]))
//!     }
//!
//!     async fn acknowledge(&self, request: AcknowledgeRequest) -> Result<(), Self::Error> {
//!         // Your acknowledge logic here
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // 2. Configure the consumer
//! let config = ConsumerConfig::new("projects/acme/subscriptions/orders")
//!     .with_batch_size(10)
//!     .with_handler_timeout(Duration::from_secs(30))
//!     .with_polling_interval(Duration::from_millis(500));
//!
//! // 3. Provide a handler
//! let handler = handler_fn(|message| async move {
//!     println!("processing {:?}", message.data_str());
//!     Ok::<(), BoxError>(())
//! });
//!
//! let consumer = Consumer::create(config, MySubscriber, handler)?;
//!
//! // 4. Observe what happens
//! consumer.on(EventKind::ProcessingError, |event| {
//!     eprintln!("handler failed: {:?}", event.error());
//! });
//!
//! // 5. Run until told otherwise
//! consumer.start();
//! consumer.stop();
//! consumer.stopped().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **[`SubscriberClient`]**: Pulls batches from and acknowledges messages to the subscription
//! - **[`MessageHandler`]**: Processes one message
//! - **[`Consumer`]**: Owns the poll loop and the [`EventBus`]
//!
//! ### How it Works
//!
//! While running, the poll loop repeatedly:
//! 1. Pulls up to `batch_size` messages
//! 2. Emits `pullingError` and skips to 5 if the pull failed, or `empty` if nothing came back
//! 3. Dispatches every message concurrently: `messageReceived`, run the handler under its
//!    deadline, acknowledge on success, `messageProcessed`
//! 4. Waits for the whole batch to settle and emits `responseProcessed`
//! 5. Exits with `stopped` if `stop()` was called, otherwise sleeps `polling_interval`
//!
//! A failed handler emits `processingError` (or `timeoutError`) and is never acknowledged, so
//! the broker redelivers it. A failed acknowledge emits `deletingError`.
//!
//! ## Examples
//!
//! See the `demos/` directory for a complete program consuming from AWS SQS
//! (`demos/sqs_consumer.rs`).

pub mod config;
pub mod consumer;
mod dispatch;
pub mod error;
pub mod events;
pub mod handler;
pub mod message;
pub mod subscriber;
pub mod timeout;

pub use config::{ConsumerConfig, TimeoutAction};
pub use consumer::{Consumer, ConsumerBuilder};
pub use error::{BoxError, ConfigError, ConsumerError, ErrorKind};
pub use events::{ConsumerEvent, EventBus, EventKind, ListenerId};
pub use handler::{FnHandler, MessageHandler, handler_fn};
pub use message::{AcknowledgeRequest, PubsubMessage, PullRequest, PullResponse, ReceivedMessage};
pub use subscriber::SubscriberClient;
