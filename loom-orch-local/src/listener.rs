//! Serializing event listener — delivers envelopes to a
//! per-run-id consumer in strict FIFO order, with a flush barrier and an
//! idle-timeout teardown.

use loom_types::envelope::WorkflowEventEnvelope;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Run-id under which envelopes carrying an empty run id are queued.
const UNKNOWN_RUN_ID: &str = "unknown";

/// How long a per-run queue worker waits for the next message before
/// tearing itself down.
const IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// Queue channel capacity. A producer that outruns a slow consumer by
/// more than this drops events rather than blocking.
const QUEUE_CAPACITY: usize = 256;

/// Default budget for [`SerializingListener::flush`].
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a worker lingers after a terminal event before tearing its
/// queue down, so trailing same-task envelopes stay on the same worker
/// and keep their order (invariant: removal within bounded time).
const TEARDOWN_GRACE: Duration = Duration::from_millis(200);

enum QueueMsg {
    Event(WorkflowEventEnvelope),
    Flush(oneshot::Sender<()>),
}

/// Something that consumes envelopes delivered in order for one run id.
pub trait EnvelopeSink: Send + Sync + 'static {
    /// Deliver one envelope. Must tolerate concurrent calls across
    /// different run ids; calls for the same run id are serialized by
    /// the listener.
    fn deliver(&self, envelope: WorkflowEventEnvelope);
}

impl<F> EnvelopeSink for F
where
    F: Fn(WorkflowEventEnvelope) + Send + Sync + 'static,
{
    fn deliver(&self, envelope: WorkflowEventEnvelope) {
        (self)(envelope)
    }
}

struct QueueHandle {
    sender: mpsc::Sender<QueueMsg>,
}

/// Delivers envelopes to per-run-id consumers in strict arrival order,
/// tearing each run's worker down after a terminal event or idle timeout.
///
/// Producers discover queues through the shared map under a short-held
/// mutex; the worker is the sole owner of its receiving end and exits on
/// its own. A queue torn down by a
/// terminal event is recreated on the next event for that run id.
pub struct SerializingListener<S: EnvelopeSink + ?Sized> {
    queues: Mutex<HashMap<String, QueueHandle>>,
    sink: Arc<S>,
}

impl<S: EnvelopeSink + ?Sized> SerializingListener<S> {
    /// Build a listener delivering every run's envelopes to `sink`.
    pub fn new(sink: Arc<S>) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            sink,
        }
    }

    fn queue_key(run_id: &str) -> &str {
        if run_id.is_empty() {
            UNKNOWN_RUN_ID
        } else {
            run_id
        }
    }

    /// Enqueue one envelope for delivery, spawning a worker for its run
    /// id if none exists yet. Never blocks: a full queue drops the event
    /// with a warning, and a queue whose worker already exited is
    /// replaced with a fresh one. Must be called from within a tokio
    /// runtime (the worker is spawned onto it).
    pub fn dispatch(&self, envelope: WorkflowEventEnvelope) {
        let key = Self::queue_key(envelope.run_id.as_str()).to_string();
        let mut queues = self.queues.lock().unwrap();
        if let Some(handle) = queues.get(&key) {
            match handle.sender.try_send(QueueMsg::Event(envelope)) {
                Ok(()) => return,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(run_id = %key, "serializing queue full, dropping event");
                    return;
                }
                Err(mpsc::error::TrySendError::Closed(msg)) => {
                    queues.remove(&key);
                    let handle = self.spawn_worker(key.clone());
                    let _ = handle.sender.try_send(msg);
                    queues.insert(key, handle);
                    return;
                }
            }
        }
        let handle = self.spawn_worker(key.clone());
        let _ = handle.sender.try_send(QueueMsg::Event(envelope));
        queues.insert(key, handle);
    }

    /// Block until every envelope enqueued for `run_id` so far has been
    /// delivered, the queue closes, or the 2-second default budget
    /// elapses.
    pub async fn flush(&self, run_id: &str) {
        self.flush_within(run_id, FLUSH_TIMEOUT).await
    }

    /// [`Self::flush`] with an explicit budget. On expiry pending events
    /// may remain undelivered — acceptable because the caller already
    /// holds the task result.
    pub async fn flush_within(&self, run_id: &str, budget: Duration) {
        let key = Self::queue_key(run_id).to_string();
        let sender = {
            let queues = self.queues.lock().unwrap();
            queues.get(&key).map(|h| h.sender.clone())
        };
        let Some(sender) = sender else { return };
        let (ack_tx, ack_rx) = oneshot::channel();
        if sender.send(QueueMsg::Flush(ack_tx)).await.is_err() {
            return;
        }
        let _ = tokio::time::timeout(budget, ack_rx).await;
    }

    fn spawn_worker(&self, key: String) -> QueueHandle {
        let (tx, mut rx) = mpsc::channel(QUEUE_CAPACITY);
        let sink = self.sink.clone();
        tokio::spawn(async move {
            loop {
                match tokio::time::timeout(IDLE_TIMEOUT, rx.recv()).await {
                    Ok(Some(QueueMsg::Event(envelope))) => {
                        let terminal = envelope.is_terminal();
                        sink.deliver(envelope);
                        if terminal {
                            // Linger briefly so trailing same-task
                            // envelopes (stage summaries, the persist
                            // confirmation) keep their order through
                            // this worker, then refuse new sends and
                            // drain whatever is already enqueued.
                            loop {
                                match tokio::time::timeout(TEARDOWN_GRACE, rx.recv()).await {
                                    Ok(Some(QueueMsg::Event(envelope))) => sink.deliver(envelope),
                                    Ok(Some(QueueMsg::Flush(ack))) => {
                                        let _ = ack.send(());
                                    }
                                    Ok(None) | Err(_) => break,
                                }
                            }
                            rx.close();
                            while let Some(msg) = rx.recv().await {
                                match msg {
                                    QueueMsg::Event(envelope) => sink.deliver(envelope),
                                    QueueMsg::Flush(ack) => {
                                        let _ = ack.send(());
                                    }
                                }
                            }
                            tracing::debug!(run_id = %key, "serializing listener torn down: terminal event delivered");
                            break;
                        }
                    }
                    Ok(Some(QueueMsg::Flush(ack))) => {
                        let _ = ack.send(());
                    }
                    Ok(None) => break,
                    Err(_) => {
                        tracing::debug!(run_id = %key, "serializing listener torn down: idle timeout");
                        break;
                    }
                }
            }
        });
        QueueHandle { sender: tx }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_types::envelope::NodeKind;
    use loom_types::id::RunId;
    use std::sync::Mutex as StdMutex;
    use std::time::Instant;

    struct RecordingSink {
        delivered: StdMutex<Vec<String>>,
    }

    impl EnvelopeSink for RecordingSink {
        fn deliver(&self, envelope: WorkflowEventEnvelope) {
            self.delivered.lock().unwrap().push(envelope.event_type);
        }
    }

    #[tokio::test]
    async fn delivers_events_in_order_and_flushes() {
        let sink = Arc::new(RecordingSink {
            delivered: StdMutex::new(Vec::new()),
        });
        let listener = SerializingListener::new(sink.clone());
        let run_id = RunId::new("r1");
        for i in 0..5 {
            let mut env =
                WorkflowEventEnvelope::new(format!("step.{i}"), NodeKind::Step, run_id.clone());
            env.seq = i;
            listener.dispatch(env);
        }
        listener.flush(run_id.as_str()).await;
        let delivered = sink.delivered.lock().unwrap().clone();
        assert_eq!(
            delivered,
            vec!["step.0", "step.1", "step.2", "step.3", "step.4"]
        );
    }

    #[tokio::test]
    async fn events_after_a_terminal_event_are_still_delivered() {
        let sink = Arc::new(RecordingSink {
            delivered: StdMutex::new(Vec::new()),
        });
        let listener = SerializingListener::new(sink.clone());
        let run_id = RunId::new("r1");
        let mut terminal =
            WorkflowEventEnvelope::new("result.cancelled", NodeKind::Result, run_id.clone());
        terminal.seq = 1;
        listener.dispatch(terminal);
        listener.flush(run_id.as_str()).await;
        // Past the teardown grace window, a late event respawns a fresh
        // queue; inside it, the lingering worker delivers it. Either
        // way it must land.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut after = WorkflowEventEnvelope::new("step.late", NodeKind::Step, run_id.clone());
        after.seq = 2;
        listener.dispatch(after);
        listener.flush(run_id.as_str()).await;

        let delivered = sink.delivered.lock().unwrap().clone();
        assert_eq!(delivered, vec!["result.cancelled", "step.late"]);
    }

    #[tokio::test]
    async fn empty_run_id_is_routed_to_unknown_queue() {
        let sink = Arc::new(RecordingSink {
            delivered: StdMutex::new(Vec::new()),
        });
        let listener = SerializingListener::new(sink.clone());
        let env = WorkflowEventEnvelope::new("diagnostic", NodeKind::Diagnostic, RunId::new(""));
        listener.dispatch(env);
        listener.flush("").await;
        assert_eq!(sink.delivered.lock().unwrap().len(), 1);
    }

    struct SlowSink {
        delay: Duration,
        delivered: StdMutex<Vec<String>>,
    }

    impl EnvelopeSink for SlowSink {
        fn deliver(&self, envelope: WorkflowEventEnvelope) {
            std::thread::sleep(self.delay);
            self.delivered.lock().unwrap().push(envelope.event_type);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn flush_waits_for_a_slow_consumer_not_just_a_fixed_deadline() {
        let sink = Arc::new(SlowSink {
            delay: Duration::from_millis(300),
            delivered: StdMutex::new(Vec::new()),
        });
        let listener = SerializingListener::new(sink.clone());
        let run_id = RunId::new("r1");
        listener.dispatch(WorkflowEventEnvelope::new(
            "step.slow",
            NodeKind::Step,
            run_id.clone(),
        ));

        let start = Instant::now();
        listener.flush(run_id.as_str()).await;
        let waited = start.elapsed();

        assert!(waited >= Duration::from_millis(250), "waited {waited:?}");
        assert_eq!(sink.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn flush_gives_up_on_budget_expiry() {
        let sink = Arc::new(SlowSink {
            delay: Duration::from_millis(400),
            delivered: StdMutex::new(Vec::new()),
        });
        let listener = SerializingListener::new(sink.clone());
        let run_id = RunId::new("r1");
        listener.dispatch(WorkflowEventEnvelope::new(
            "step.slow",
            NodeKind::Step,
            run_id.clone(),
        ));

        let start = Instant::now();
        listener
            .flush_within(run_id.as_str(), Duration::from_millis(50))
            .await;
        assert!(start.elapsed() < Duration::from_millis(350));
    }
}
