//! This module contains the consumer: its builder, lifecycle and the poll loop

use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{Notify, watch};
use tracing::Instrument;

use crate::{
    config::{ConsumerConfig, TimeoutAction},
    error::{ConfigError, ConsumerError},
    events::{ConsumerEvent, EventBus, EventKind, ListenerId},
    handler::MessageHandler,
    message::PullRequest,
    subscriber::SubscriberClient,
};

/// State shared between the [`Consumer`] handles and its poll loop task
pub(crate) struct Inner<C, H> {
    pub(crate) client: C,
    pub(crate) handler: Arc<H>,
    pub(crate) config: ConsumerConfig,
    pub(crate) events: EventBus,
    lifecycle: Mutex<Lifecycle>,
    /// Mirrors `Lifecycle::loop_alive` for `stopped()`; only written under the lifecycle lock
    polling: watch::Sender<bool>,
    /// Cuts the polling interval short when `stop()` is called
    wake: Notify,
}

/// Run state shared by `start()`, `stop()` and the poll loop
#[derive(Debug, Default)]
struct Lifecycle {
    running: bool,
    /// A loop task owns the consumer
    loop_alive: bool,
    /// `stop()` was called since the loop last reached a cycle boundary
    stop_pending: bool,
}

/// A long-running subscription consumer.
///
/// While running, the consumer pulls up to `batch_size` messages, hands each of them to the
/// [`MessageHandler`] concurrently, acknowledges the ones that were handled successfully and
/// waits for the whole batch to settle before pulling again. Nothing that goes wrong after
/// [`start`](Self::start) is returned to the caller: every failure is reported as a
/// [`ConsumerEvent`] and the loop keeps going until [`stop`](Self::stop) is called.
///
/// `Consumer` is a cheap handle; clones share the same loop and listeners. The loop task keeps
/// the consumer alive until it is stopped, even if every handle has been dropped.
///
/// # Examples
///
/// ```rust,no_run
/// use pubsub_consumer::{BoxError, Consumer, EventKind, handler_fn};
/// # use pubsub_consumer::{AcknowledgeRequest, PullRequest, PullResponse, SubscriberClient};
/// # struct MySubscriber;
/// # impl SubscriberClient for MySubscriber {
/// #     type Error = std::io::Error;
/// #     async fn pull(&self, _: PullRequest) -> Result<PullResponse, Self::Error> { Ok(PullResponse::default()) }
/// #     async fn acknowledge(&self, _: AcknowledgeRequest) -> Result<(), Self::Error> { Ok(()) }
/// # }
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let consumer = Consumer::builder()
///     .subscription("projects/acme/subscriptions/orders")
///     .batch_size(10)
///     .handler_timeout(std::time::Duration::from_secs(30))
///     .client(MySubscriber)
///     .handler(handler_fn(|message| async move {
///         println!("got {:?}", message.data_str());
///         Ok::<(), BoxError>(())
///     }))
///     .build()?;
///
/// consumer.on(EventKind::ProcessingError, |event| {
///     eprintln!("{:?}", event.error());
/// });
///
/// consumer.start();
/// tokio::signal::ctrl_c().await?;
/// consumer.stop();
/// consumer.stopped().await;
/// # Ok(())
/// # }
/// ```
pub struct Consumer<C, H> {
    inner: Arc<Inner<C, H>>,
}

impl<C, H> Clone for Consumer<C, H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C, H> std::fmt::Debug for Consumer<C, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("config", &self.inner.config)
            .field("running", &self.is_running())
            .field("events", &self.inner.events)
            .finish_non_exhaustive()
    }
}

impl<C, H> Consumer<C, H> {
    /// Create a consumer from a configuration, a client and a handler.
    ///
    /// Fails when the subscription is empty or the batch size is outside `1..=10`.
    pub fn create(config: ConsumerConfig, client: C, handler: H) -> Result<Self, ConfigError> {
        config.validate()?;

        let (polling, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                handler: Arc::new(handler),
                config,
                events: EventBus::new(),
                lifecycle: Mutex::new(Lifecycle::default()),
                polling,
                wake: Notify::new(),
            }),
        })
    }

    /// Start building a consumer
    pub fn builder() -> ConsumerBuilder<C, H> {
        ConsumerBuilder::default()
    }

    /// The validated configuration this consumer was created with
    pub fn config(&self) -> &ConsumerConfig {
        &self.inner.config
    }

    /// Whether the consumer is between a `start()` and a `stop()`
    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Ask the poll loop to stop.
    ///
    /// In-flight handlers and acknowledgments are not interrupted: the current batch settles,
    /// then [`ConsumerEvent::Stopped`] is emitted and the loop exits. A pending polling
    /// interval is cut short.
    pub fn stop(&self) {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            if !lifecycle.running {
                return;
            }
            lifecycle.running = false;
            lifecycle.stop_pending = true;
        }

        tracing::debug!(subscription = %self.inner.config.subscription, "stopping consumer");
        self.inner.wake.notify_waiters();
    }

    /// Wait until the poll loop has exited.
    ///
    /// Returns immediately when no loop is running.
    pub async fn stopped(&self) {
        let mut polling = self.inner.polling.subscribe();
        // The sender lives in `inner`, which outlives this borrow.
        let _ = polling.wait_for(|alive| !*alive).await;
    }

    /// The listener registry, for callers that want to hand it around
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Register a listener for every event of `kind`
    pub fn on<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&ConsumerEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, callback)
    }

    /// Register a listener for the next event of `kind`
    pub fn once<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&ConsumerEvent) + Send + Sync + 'static,
    {
        self.inner.events.once(kind, callback)
    }

    /// Remove one listener. Returns whether it was still registered.
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.events.off(id)
    }

    /// Remove every listener of `kind`
    pub fn remove_listeners(&self, kind: EventKind) {
        self.inner.events.remove_listeners(kind)
    }

    /// Number of listeners currently registered for `kind`
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.inner.events.listener_count(kind)
    }
}

impl<C, H> Consumer<C, H>
where
    C: SubscriberClient + Send + Sync + 'static,
    H: MessageHandler + Send + Sync + 'static,
{
    /// Start polling.
    ///
    /// Emits [`ConsumerEvent::Started`] and spawns the poll loop on the current tokio runtime.
    /// Calling `start` on a running consumer does nothing.
    ///
    /// A `start` that follows a `stop` while the previous batch is still settling does not
    /// spawn a second loop. The running loop finishes the batch, emits
    /// [`ConsumerEvent::Stopped`] for the old run and [`ConsumerEvent::Started`] for the new
    /// one, then keeps polling.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn start(&self) {
        let spawn = {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.running {
                drop(lifecycle);
                tracing::debug!(subscription = %self.inner.config.subscription, "consumer already running");
                return;
            }
            lifecycle.running = true;
            if lifecycle.loop_alive {
                false
            } else {
                lifecycle.loop_alive = true;
                lifecycle.stop_pending = false;
                self.inner.polling.send_replace(true);
                true
            }
        };

        if !spawn {
            tracing::debug!(
                subscription = %self.inner.config.subscription,
                "previous run still settling, the current loop resumes polling"
            );
            return;
        }

        tracing::info!(
            subscription = %self.inner.config.subscription,
            batch_size = self.inner.config.batch_size,
            "starting consumer"
        );
        self.inner.events.emit(ConsumerEvent::Started);

        let span = tracing::info_span!("consumer", subscription = %self.inner.config.subscription);
        tokio::spawn(Arc::clone(&self.inner).poll_loop().instrument(span));
    }
}

impl<C, H> Inner<C, H> {
    fn is_running(&self) -> bool {
        self.lifecycle.lock().running
    }

    /// Sleep out the polling interval only when no stop is waiting to be reported
    fn should_wait(&self) -> bool {
        let lifecycle = self.lifecycle.lock();
        lifecycle.running && !lifecycle.stop_pending
    }

    /// Consume a pending stop, if any
    fn take_stop(&self) -> bool {
        std::mem::take(&mut self.lifecycle.lock().stop_pending)
    }

    /// Called by the loop after a stop: keep going if `start()` was called meanwhile,
    /// otherwise give up ownership of the consumer.
    fn resume_or_release(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.running {
            return true;
        }
        lifecycle.loop_alive = false;
        self.polling.send_replace(false);
        false
    }

    pub(crate) fn handler_timeout(&self) -> Option<Duration> {
        self.config.effective_handler_timeout()
    }

    pub(crate) fn timeout_action(&self) -> TimeoutAction {
        self.config.timeout_action
    }
}

impl<C, H> Inner<C, H>
where
    C: SubscriberClient + Send + Sync + 'static,
    H: MessageHandler + Send + Sync + 'static,
{
    async fn poll_loop(self: Arc<Self>) {
        tracing::info!("poll loop started");

        loop {
            if self.take_stop() {
                tracing::info!("consumer stopped");
                self.events.emit(ConsumerEvent::Stopped);
                if !self.resume_or_release() {
                    return;
                }
                tracing::info!("consumer restarted");
                self.events.emit(ConsumerEvent::Started);
            }

            self.run_cycle().await;

            let wake = self.wake.notified();
            tokio::pin!(wake);
            wake.as_mut().enable();

            if self.should_wait() {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.polling_interval) => {}
                    _ = wake => {}
                }
            }
        }
    }

    /// One pull, dispatch-all, wait iteration
    async fn run_cycle(&self) {
        let request = PullRequest {
            subscription: self.config.subscription.clone(),
            max_messages: self.config.batch_size,
        };

        tracing::debug!(max_messages = request.max_messages, "polling for messages");

        let response = match self.client.pull(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, "failed to pull messages");
                self.events.emit(ConsumerEvent::PullingError(Arc::new(ConsumerError::Pull(
                    Box::new(e),
                ))));
                return;
            }
        };

        if response.is_empty() {
            tracing::debug!("no messages received");
            self.events.emit(ConsumerEvent::Empty);
            return;
        }

        tracing::debug!(message_count = response.len(), "received messages");

        let response = Arc::new(response);
        join_all(
            response
                .received_messages
                .iter()
                .map(|message| self.dispatch(Arc::clone(message))),
        )
        .await;

        tracing::debug!(message_count = response.len(), "batch settled");
        self.events.emit(ConsumerEvent::ResponseProcessed(response));
    }
}

/// Builder for [`Consumer`], validating everything on [`build`](Self::build)
pub struct ConsumerBuilder<C, H> {
    config: ConsumerConfig,
    client: Option<C>,
    handler: Option<H>,
}

impl<C, H> Default for ConsumerBuilder<C, H> {
    fn default() -> Self {
        Self {
            config: ConsumerConfig::default(),
            client: None,
            handler: None,
        }
    }
}

impl<C, H> ConsumerBuilder<C, H> {
    /// Replace the whole configuration
    pub fn config(mut self, config: ConsumerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn subscription(mut self, subscription: impl Into<String>) -> Self {
        self.config.subscription = subscription.into();
        self
    }

    pub fn batch_size(mut self, batch_size: u8) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    pub fn handler_timeout(mut self, timeout: Duration) -> Self {
        self.config.handler_timeout = Some(timeout);
        self
    }

    pub fn polling_interval(mut self, interval: Duration) -> Self {
        self.config.polling_interval = interval;
        self
    }

    pub fn timeout_action(mut self, action: TimeoutAction) -> Self {
        self.config.timeout_action = action;
        self
    }

    pub fn client(mut self, client: C) -> Self {
        self.client = Some(client);
        self
    }

    pub fn handler(mut self, handler: H) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn build(self) -> Result<Consumer<C, H>, ConfigError> {
        self.config.validate()?;
        let handler = self.handler.ok_or(ConfigError::MissingHandler)?;
        let client = self.client.ok_or(ConfigError::MissingClient)?;
        Consumer::create(self.config, client, handler)
    }
}
