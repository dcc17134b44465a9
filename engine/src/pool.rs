//! A fixed set of workers sharing one store.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

use reverie_providers::ReasoningBackend;
use reverie_store::ThoughtStore;

use crate::worker::{Worker, WorkerConfig};

pub const DEFAULT_WORKERS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "lowercase")]
pub enum WorkerHealth {
    Running,
    Stopped,
    Failed(String),
}

/// Last known state of every worker in a pool, indexed by worker id.
#[derive(Debug, Clone, Default)]
pub struct HealthBoard(Arc<Mutex<Vec<WorkerHealth>>>);

impl HealthBoard {
    fn with_workers(count: usize) -> Self {
        Self(Arc::new(Mutex::new(vec![WorkerHealth::Running; count])))
    }

    fn set(&self, worker: usize, health: WorkerHealth) {
        let mut slots = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get_mut(worker) {
            *slot = health;
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<WorkerHealth> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[must_use]
    pub fn running(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|health| **health == WorkerHealth::Running)
            .count()
    }
}

pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    health: HealthBoard,
}

impl WorkerPool {
    /// Spawn `count` workers. `make_backend` is called once per worker id so
    /// no backend is shared.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<B, F>(
        count: usize,
        store: &Arc<ThoughtStore>,
        config: &Arc<WorkerConfig>,
        wake: &Arc<Notify>,
        mut make_backend: F,
    ) -> Self
    where
        B: ReasoningBackend + 'static,
        F: FnMut(usize) -> B,
    {
        let (shutdown, rx) = watch::channel(false);
        let health = HealthBoard::with_workers(count);

        let handles = (0..count)
            .map(|id| {
                let worker = Worker::new(
                    id,
                    Arc::clone(store),
                    make_backend(id),
                    Arc::clone(config),
                    Arc::clone(wake),
                );
                let rx = rx.clone();
                let board = health.clone();
                tokio::spawn(async move {
                    let outcome = match worker.run(rx).await {
                        Ok(()) => WorkerHealth::Stopped,
                        Err(e) => WorkerHealth::Failed(e.to_string()),
                    };
                    board.set(id, outcome);
                })
            })
            .collect();

        tracing::info!(workers = count, "Worker pool started");
        Self {
            shutdown,
            handles,
            health,
        }
    }

    #[must_use]
    pub fn health(&self) -> HealthBoard {
        self.health.clone()
    }

    /// Ask every worker to stop and wait for them.
    ///
    /// A worker in the middle of a backend call finishes that thought first.
    pub async fn shutdown(self) {
        // Err only means every worker already exited.
        let _ = self.shutdown.send(true);
        for (id, handle) in self.handles.into_iter().enumerate() {
            if let Err(e) = handle.await {
                tracing::error!(worker = id, "Worker task panicked: {e}");
                self.health.set(id, WorkerHealth::Failed(format!("panicked: {e}")));
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reverie_providers::BackendError;
    use reverie_types::{Priority, Thought, ThoughtContext, ThoughtStatus, ThoughtType};

    use super::*;
    use crate::worker::tests::Scripted;

    fn enqueue_many(store: &ThoughtStore, n: usize) -> Vec<reverie_types::ThoughtId> {
        (0..n)
            .map(|i| {
                store
                    .enqueue(&Thought::queued(
                        ThoughtType::General,
                        format!("thought {i}"),
                        ThoughtContext::new(),
                        Priority::NORMAL,
                    ))
                    .unwrap()
            })
            .collect()
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn drains_queue_then_stops_cleanly() {
        let store = Arc::new(ThoughtStore::open_in_memory().unwrap());
        let ids = enqueue_many(&store, 9);

        let pool = WorkerPool::spawn(
            3,
            &store,
            &Arc::new(WorkerConfig::default()),
            &Arc::new(Notify::new()),
            |_| Scripted::default(),
        );
        let health = pool.health();
        assert_eq!(health.running(), 3);

        wait_until(|| {
            store.status_summary().unwrap().count(ThoughtStatus::Completed) == ids.len() as u64
        })
        .await;

        pool.shutdown().await;
        assert_eq!(health.snapshot(), vec![WorkerHealth::Stopped; 3]);
    }

    #[tokio::test]
    async fn fatal_backend_marks_worker_failed() {
        let store = Arc::new(ThoughtStore::open_in_memory().unwrap());
        enqueue_many(&store, 1);

        let pool = WorkerPool::spawn(
            1,
            &store,
            &Arc::new(WorkerConfig::default()),
            &Arc::new(Notify::new()),
            |_| Scripted::new([Err(BackendError::Fatal("no bridge".into()))]),
        );
        let health = pool.health();
        wait_until(|| health.running() == 0).await;

        match &health.snapshot()[0] {
            WorkerHealth::Failed(reason) => assert!(reason.contains("no bridge"), "{reason}"),
            other => panic!("expected Failed, got {other:?}"),
        }
        pool.shutdown().await;
    }

    #[test]
    fn health_serializes_with_state_tag() {
        let json = serde_json::to_value(WorkerHealth::Failed("x".into())).unwrap();
        assert_eq!(json, serde_json::json!({"state": "failed", "error": "x"}));
        let json = serde_json::to_value(WorkerHealth::Running).unwrap();
        assert_eq!(json, serde_json::json!({"state": "running"}));
    }
}
