#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use parking_lot::Mutex;
use pubsub_consumer::{
    AcknowledgeRequest, Consumer, ConsumerEvent, EventKind, PubsubMessage, PullRequest,
    PullResponse, ReceivedMessage, SubscriberClient,
};
use tokio::sync::mpsc;

#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct MockError(pub String);

/// What a pull returns once the scripted responses have run out
#[derive(Debug, Clone)]
pub enum Fallback {
    Empty,
    Fail(String),
}

/// In-memory subscription with scripted pull results and recorded acknowledgments
pub struct MockSubscriber {
    script: Mutex<VecDeque<Result<PullResponse, MockError>>>,
    fallback: Fallback,
    pulls: AtomicUsize,
    pull_requests: Mutex<Vec<PullRequest>>,
    acks: Mutex<Vec<AcknowledgeRequest>>,
    fail_acks: AtomicBool,
}

impl MockSubscriber {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Fallback::Empty,
            pulls: AtomicUsize::new(0),
            pull_requests: Mutex::new(Vec::new()),
            acks: Mutex::new(Vec::new()),
            fail_acks: AtomicBool::new(false),
        }
    }

    /// Queue a batch for the next pull
    pub fn with_batch(self, messages: Vec<ReceivedMessage>) -> Self {
        self.script.lock().push_back(Ok(PullResponse::new(messages)));
        self
    }

    pub fn with_fallback(mut self, fallback: Fallback) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn failing_acks(self) -> Self {
        self.fail_acks.store(true, Ordering::SeqCst);
        self
    }

    pub fn push_batch(&self, messages: Vec<ReceivedMessage>) {
        self.script.lock().push_back(Ok(PullResponse::new(messages)));
    }

    pub fn pull_count(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    pub fn pull_requests(&self) -> Vec<PullRequest> {
        self.pull_requests.lock().clone()
    }

    pub fn acks(&self) -> Vec<AcknowledgeRequest> {
        self.acks.lock().clone()
    }

    /// Every ack id acknowledged so far, sorted
    pub fn acked_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .acks
            .lock()
            .iter()
            .flat_map(|request| request.ack_ids.clone())
            .collect();
        ids.sort();
        ids
    }
}

impl SubscriberClient for MockSubscriber {
    type Error = MockError;

    async fn pull(&self, request: PullRequest) -> Result<PullResponse, Self::Error> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        self.pull_requests.lock().push(request);

        if let Some(scripted) = self.script.lock().pop_front() {
            return scripted;
        }

        match &self.fallback {
            Fallback::Empty => Ok(PullResponse::default()),
            Fallback::Fail(reason) => Err(MockError(reason.clone())),
        }
    }

    async fn acknowledge(&self, request: AcknowledgeRequest) -> Result<(), Self::Error> {
        if self.fail_acks.load(Ordering::SeqCst) {
            return Err(MockError("acknowledge unavailable".to_string()));
        }
        self.acks.lock().push(request);
        Ok(())
    }
}

/// Build `count` messages with ack ids `ack-0..` and bodies `body-0..`
pub fn messages(count: usize) -> Vec<ReceivedMessage> {
    (0..count)
        .map(|i| {
            ReceivedMessage::new(
                format!("ack-{i}"),
                PubsubMessage::new(format!("body-{i}")).with_message_id(format!("id-{i}")),
            )
        })
        .collect()
}

/// Collects every event a consumer emits
pub struct EventRecorder {
    rx: mpsc::UnboundedReceiver<ConsumerEvent>,
    seen: Vec<ConsumerEvent>,
    waited: HashMap<EventKind, usize>,
}

impl EventRecorder {
    pub fn attach<C, H>(consumer: &Consumer<C, H>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        for kind in EventKind::ALL {
            let tx = tx.clone();
            consumer.on(kind, move |event| {
                let _ = tx.send(event.clone());
            });
        }
        Self {
            rx,
            seen: Vec::new(),
            waited: HashMap::new(),
        }
    }

    /// Wait for the next event of `kind` that has not been waited for yet
    pub async fn wait_for(&mut self, kind: EventKind) -> ConsumerEvent {
        let waited = self.waited.entry(kind).or_default();
        *waited += 1;
        let n = *waited;
        self.wait_for_count(kind, n).await
    }

    /// Wait until `n` events of `kind` have been seen in total and return the `n`th
    pub async fn wait_for_count(&mut self, kind: EventKind, n: usize) -> ConsumerEvent {
        let wait = async {
            loop {
                self.drain();
                if let Some(event) = self.seen.iter().filter(|e| e.kind() == kind).nth(n - 1) {
                    return event.clone();
                }
                let event = self.rx.recv().await.expect("event channel closed");
                self.seen.push(event);
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {n} {kind} events"))
    }

    pub fn count(&mut self, kind: EventKind) -> usize {
        self.drain();
        self.seen.iter().filter(|e| e.kind() == kind).count()
    }

    pub fn kinds(&mut self) -> Vec<EventKind> {
        self.drain();
        self.seen.iter().map(ConsumerEvent::kind).collect()
    }

    pub fn events_of(&mut self, kind: EventKind) -> Vec<ConsumerEvent> {
        self.drain();
        self.seen.iter().filter(|e| e.kind() == kind).cloned().collect()
    }

    fn drain(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            self.seen.push(event);
        }
    }
}
