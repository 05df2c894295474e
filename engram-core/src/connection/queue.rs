//! Connection discovery queue.
//!
//! Serializes discovery per `(user, agent, memory)` key: one task runs at a
//! time, duplicate in-flight keys resolve immediately with no work, and a
//! short debounce separates consecutive tasks. `destroy` cancels the worker
//! and rejects the backlog.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::constants::defaults;
use crate::error::{Error, Result};
use crate::types::Connection;

/// Executes one discovery task. The connection engine implements this; the
/// indirection keeps the queue free of engine internals.
#[async_trait]
pub trait DiscoveryRunner: Send + Sync + 'static {
    /// Run discovery for a stored memory.
    async fn run_discovery(
        &self,
        user_id: &str,
        agent_id: &str,
        memory_id: &str,
    ) -> Result<Vec<Connection>>;
}

struct QueueTask {
    user_id: String,
    agent_id: String,
    memory_id: String,
    key: String,
    reply: oneshot::Sender<Result<Vec<Connection>>>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueueTask>,
    in_flight: HashSet<String>,
    worker_active: bool,
    destroyed: bool,
}

/// Single-consumer discovery queue with per-key dedup and inter-task
/// debounce.
pub struct ConnectionDiscoveryQueue {
    runner: Arc<dyn DiscoveryRunner>,
    state: Arc<Mutex<QueueState>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    debounce: Duration,
}

impl ConnectionDiscoveryQueue {
    /// Create a queue draining into the given runner.
    #[must_use]
    pub fn new(runner: Arc<dyn DiscoveryRunner>) -> Self {
        Self {
            runner,
            state: Arc::new(Mutex::new(QueueState::default())),
            worker: Mutex::new(None),
            debounce: Duration::from_millis(defaults::QUEUE_DEBOUNCE_MS),
        }
    }

    /// Number of queued (not yet running) tasks.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Enqueue a discovery task and wait for its result.
    ///
    /// A task whose `(user:agent:memory)` key is already queued or running
    /// resolves immediately with `[]`. After `destroy`, enqueues fail with
    /// "queue destroyed".
    #[instrument(skip(self), fields(user_id = %user_id, memory_id = %memory_id))]
    pub async fn enqueue(
        &self,
        user_id: &str,
        agent_id: &str,
        memory_id: &str,
    ) -> Result<Vec<Connection>> {
        let key = format!("{user_id}:{agent_id}:{memory_id}");
        let receiver = {
            let mut state = self.state.lock();
            if state.destroyed {
                return Err(Error::Internal("queue destroyed".into()));
            }
            if !state.in_flight.insert(key.clone()) {
                debug!(%key, "discovery already in flight, skipping");
                return Ok(Vec::new());
            }

            let (sender, receiver) = oneshot::channel();
            state.pending.push_back(QueueTask {
                user_id: user_id.to_string(),
                agent_id: agent_id.to_string(),
                memory_id: memory_id.to_string(),
                key,
                reply: sender,
            });

            if !state.worker_active {
                state.worker_active = true;
                let handle = tokio::spawn(Self::worker_loop(
                    Arc::clone(&self.runner),
                    Arc::clone(&self.state),
                    self.debounce,
                ));
                *self.worker.lock() = Some(handle);
            }
            receiver
        };

        receiver
            .await
            .unwrap_or_else(|_| Err(Error::Internal("queue destroyed".into())))
    }

    /// One task at a time; a debounce sleep between tasks doubles as the
    /// cancellation point for shutdown.
    async fn worker_loop(
        runner: Arc<dyn DiscoveryRunner>,
        state: Arc<Mutex<QueueState>>,
        debounce: Duration,
    ) {
        loop {
            let task = {
                let mut guard = state.lock();
                if guard.destroyed {
                    guard.worker_active = false;
                    return;
                }
                match guard.pending.pop_front() {
                    Some(task) => task,
                    None => {
                        guard.worker_active = false;
                        return;
                    }
                }
            };

            let result = runner
                .run_discovery(&task.user_id, &task.agent_id, &task.memory_id)
                .await;
            if let Err(err) = &result {
                warn!(key = %task.key, error = %err, "discovery task failed");
            }

            {
                let mut guard = state.lock();
                guard.in_flight.remove(&task.key);
            }
            // Receiver may have gone away; that is fine.
            let _ = task.reply.send(result);

            tokio::time::sleep(debounce).await;
        }
    }

    /// Cancel the worker, reject every queued task, and clear state. Further
    /// enqueues fail.
    pub fn destroy(&self) {
        let drained = {
            let mut state = self.state.lock();
            state.destroyed = true;
            state.in_flight.clear();
            state.worker_active = false;
            std::mem::take(&mut state.pending)
        };

        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }
        for task in drained {
            let _ = task
                .reply
                .send(Err(Error::Internal("queue destroyed".into())));
        }
        debug!("connection discovery queue destroyed");
    }
}

impl Drop for ConnectionDiscoveryQueue {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRunner {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl DiscoveryRunner for CountingRunner {
        async fn run_discovery(
            &self,
            _user_id: &str,
            _agent_id: &str,
            memory_id: &str,
        ) -> Result<Vec<Connection>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(vec![Connection::new(
                memory_id,
                "other",
                crate::types::ConnectionType::Related,
                0.9,
                "test",
            )])
        }
    }

    fn runner(delay_ms: u64) -> Arc<CountingRunner> {
        Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(delay_ms),
        })
    }

    #[tokio::test]
    async fn enqueue_resolves_with_discovered_connections() {
        let runner = runner(0);
        let queue = ConnectionDiscoveryQueue::new(runner.clone());
        let connections = queue.enqueue("alice", "shared", "m1").await.unwrap();
        assert_eq!(connections.len(), 1);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_in_flight_key_is_skipped() {
        let runner = runner(50);
        let queue = Arc::new(ConnectionDiscoveryQueue::new(runner.clone()));

        let first = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.enqueue("alice", "shared", "m1").await })
        };
        // Give the first enqueue time to start running.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let duplicate = queue.enqueue("alice", "shared", "m1").await.unwrap();
        assert!(duplicate.is_empty());

        let first = first.await.unwrap().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_keys_all_run() {
        let runner = runner(0);
        let queue = ConnectionDiscoveryQueue::new(runner.clone());
        for id in ["m1", "m2", "m3"] {
            queue.enqueue("alice", "shared", id).await.unwrap();
        }
        assert_eq!(runner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn destroy_rejects_queued_tasks_and_future_enqueues() {
        let runner = runner(100);
        let queue = Arc::new(ConnectionDiscoveryQueue::new(runner));

        let blocked = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.enqueue("alice", "shared", "m1").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.destroy();

        let result = blocked.await.unwrap();
        assert!(matches!(result, Err(Error::Internal(_))));

        let err = queue.enqueue("alice", "shared", "m2").await.unwrap_err();
        assert!(err.to_string().contains("queue destroyed"));
    }
}
