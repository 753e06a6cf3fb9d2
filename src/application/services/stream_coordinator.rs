use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures::stream::Stream;
use serde_json::json;
use tokio::sync::Notify;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::domain::{EventType, OperationId, StreamEvent, UserId};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StreamError {
    #[error("stream for {0} is closed")]
    Closed(OperationId),
}

struct StreamState {
    next_seq: u64,
    buffer: VecDeque<StreamEvent>,
    closed_at: Option<Instant>,
}

/// Ordered event log of one operation. Producers append through `emit`;
/// any number of consumers attach through `subscribe` and may resume after
/// the last sequence number they saw.
pub struct OperationStream {
    operation: OperationId,
    owner: Option<UserId>,
    replay_capacity: usize,
    state: Mutex<StreamState>,
    sender: broadcast::Sender<StreamEvent>,
    cancelled: AtomicBool,
    cancel_signal: Notify,
}

impl OperationStream {
    fn new(operation: OperationId, owner: Option<UserId>, replay_capacity: usize) -> Self {
        let capacity = replay_capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            operation,
            owner,
            replay_capacity: capacity,
            state: Mutex::new(StreamState {
                next_seq: 1,
                buffer: VecDeque::with_capacity(capacity),
                closed_at: None,
            }),
            sender,
            cancelled: AtomicBool::new(false),
            cancel_signal: Notify::new(),
        }
    }

    pub fn operation(&self) -> OperationId {
        self.operation
    }

    pub fn is_visible_to(&self, user_id: UserId) -> bool {
        self.owner.is_none_or(|owner| owner == user_id)
    }

    /// Appends an event. A complete or error event closes the stream and
    /// every later emit is rejected.
    pub fn emit(&self, event_type: EventType, data: serde_json::Value) -> Result<u64, StreamError> {
        let mut state = self.lock_state();
        if state.closed_at.is_some() {
            return Err(StreamError::Closed(self.operation));
        }

        let event = StreamEvent {
            event_type,
            seq: state.next_seq,
            data,
        };
        state.next_seq += 1;

        if state.buffer.len() == self.replay_capacity {
            state.buffer.pop_front();
        }
        state.buffer.push_back(event.clone());
        if event_type.is_terminal() {
            state.closed_at = Some(Instant::now());
        }

        // Sent under the lock so live delivery order matches sequence order.
        let _ = self.sender.send(event.clone());
        Ok(event.seq)
    }

    /// Replays buffered events with `seq > after` and then follows live
    /// events, with no gap or duplicate between the two.
    pub fn subscribe(self: &Arc<Self>, after: u64) -> Subscription {
        let state = self.lock_state();
        let replay = state
            .buffer
            .iter()
            .filter(|e| e.seq > after)
            .cloned()
            .collect();
        let receiver = if state.closed_at.is_some() {
            None
        } else {
            Some(self.sender.subscribe())
        };
        Subscription {
            stream: Arc::clone(self),
            replay,
            receiver,
            after,
        }
    }

    /// Marks the operation cancelled and closes the stream with an error
    /// event. Returns false when the stream had already finished.
    pub fn cancel(&self) -> bool {
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel_signal.notify_waiters();
        self.emit(
            EventType::Error,
            json!({ "code": "cancelled", "message": "operation cancelled" }),
        )
        .is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called, immediately if it already was.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.cancel_signal.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state().closed_at.is_some()
    }

    pub fn last_seq(&self) -> u64 {
        self.lock_state().next_seq - 1
    }

    fn events_after(&self, after: u64) -> Vec<StreamEvent> {
        self.lock_state()
            .buffer
            .iter()
            .filter(|e| e.seq > after)
            .cloned()
            .collect()
    }

    fn closed_longer_than(&self, retention: Duration) -> bool {
        self.lock_state()
            .closed_at
            .is_some_and(|closed| closed.elapsed() >= retention)
    }

    fn lock_state(&self) -> MutexGuard<'_, StreamState> {
        // State stays consistent across a panicking holder; every mutation is
        // a single push or flag write.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct Subscription {
    stream: Arc<OperationStream>,
    replay: Vec<StreamEvent>,
    receiver: Option<broadcast::Receiver<StreamEvent>>,
    after: u64,
}

impl Subscription {
    /// Ends after the terminal event has been yielded.
    pub fn into_stream(self) -> impl Stream<Item = StreamEvent> + Send + 'static {
        let Subscription {
            stream,
            replay,
            receiver,
            after,
        } = self;

        async_stream::stream! {
            let mut last_seq = after;
            let mut finished = false;

            for event in replay {
                last_seq = event.seq;
                finished = event.event_type.is_terminal();
                yield event;
                if finished {
                    break;
                }
            }

            if let (false, Some(mut receiver)) = (finished, receiver) {
                while !finished {
                    match receiver.recv().await {
                        Ok(event) => {
                            if event.seq <= last_seq {
                                continue;
                            }
                            last_seq = event.seq;
                            finished = event.event_type.is_terminal();
                            yield event;
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::debug!(
                                operation = %stream.operation(),
                                skipped,
                                "Subscriber lagged, catching up from replay buffer"
                            );
                            for event in stream.events_after(last_seq) {
                                last_seq = event.seq;
                                finished = event.event_type.is_terminal();
                                yield event;
                                if finished {
                                    break;
                                }
                            }
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        }
    }
}

/// Registry of live operation streams.
pub struct StreamCoordinator {
    streams: Mutex<HashMap<OperationId, Arc<OperationStream>>>,
    replay_capacity: usize,
    retention: Duration,
}

impl StreamCoordinator {
    pub fn new(replay_capacity: usize, retention: Duration) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            replay_capacity,
            retention,
        }
    }

    /// Returns the stream for `operation`, creating it when absent. The flag
    /// is true when this call created it.
    pub fn open(&self, operation: OperationId, owner: Option<UserId>) -> (Arc<OperationStream>, bool) {
        let mut streams = self.lock_streams();
        if let Some(existing) = streams.get(&operation) {
            return (Arc::clone(existing), false);
        }
        let stream = Arc::new(OperationStream::new(operation, owner, self.replay_capacity));
        streams.insert(operation, Arc::clone(&stream));
        (stream, true)
    }

    pub fn get(&self, operation: OperationId) -> Option<Arc<OperationStream>> {
        self.lock_streams().get(&operation).cloned()
    }

    pub fn emit(
        &self,
        operation: OperationId,
        event_type: EventType,
        data: serde_json::Value,
    ) -> Result<u64, StreamError> {
        let (stream, _) = self.open(operation, None);
        stream.emit(event_type, data)
    }

    pub fn subscribe(&self, operation: OperationId, after: u64) -> Option<Subscription> {
        self.get(operation).map(|stream| stream.subscribe(after))
    }

    pub fn cancel(&self, operation: OperationId) -> bool {
        self.get(operation).is_some_and(|stream| stream.cancel())
    }

    /// Drops closed streams older than the retention window.
    pub fn sweep(&self) -> usize {
        let mut streams = self.lock_streams();
        let before = streams.len();
        streams.retain(|_, stream| !stream.closed_longer_than(self.retention));
        before - streams.len()
    }

    /// Runs `sweep` on a fixed interval for the life of the process.
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = self.sweep();
            if removed > 0 {
                tracing::debug!(removed, "Swept finished streams");
            }
        }
    }

    fn lock_streams(&self) -> MutexGuard<'_, HashMap<OperationId, Arc<OperationStream>>> {
        self.streams
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
