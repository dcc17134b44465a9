//! Facade over the store and the worker pool.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;

use reverie_providers::ReasoningBackend;
use reverie_store::{StoreError, ThoughtStore};
use reverie_types::{
    Connection, Insight, Priority, PriorityError, StatusSummary, Thought, ThoughtContext,
    ThoughtId, ThoughtType,
};

use crate::pool::{HealthBoard, WorkerHealth, WorkerPool};
use crate::worker::WorkerConfig;

#[derive(Debug, thiserror::Error)]
pub enum DelegateError {
    #[error(transparent)]
    Priority(#[from] PriorityError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubconsciousStatus {
    /// At least one worker is running.
    pub running: bool,
    pub thoughts: StatusSummary,
    pub reasoning_model: String,
    pub fast_model: String,
    pub workers: Vec<WorkerHealth>,
}

/// Entry point for producers and observers of thoughts.
pub struct Subconscious {
    store: Arc<ThoughtStore>,
    config: Arc<WorkerConfig>,
    wake: Arc<Notify>,
    health: Option<HealthBoard>,
}

impl Subconscious {
    #[must_use]
    pub fn new(store: Arc<ThoughtStore>, config: WorkerConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
            wake: Arc::new(Notify::new()),
            health: None,
        }
    }

    /// Queue a thought. Unknown type labels are treated as general.
    ///
    /// Urgent thoughts wake an idle worker instead of waiting for its next
    /// poll.
    pub fn delegate(
        &self,
        kind: &str,
        content: impl Into<String>,
        context: ThoughtContext,
        priority: i64,
    ) -> Result<ThoughtId, DelegateError> {
        let priority = Priority::new(priority)?;
        let thought = Thought::queued(ThoughtType::parse_lenient(kind), content, context, priority);
        let id = self.store.enqueue(&thought)?;
        if priority.is_urgent() {
            tracing::debug!(thought_id = %id, "Urgent thought delegated");
            self.wake.notify_one();
        }
        Ok(id)
    }

    pub fn get(&self, id: &ThoughtId) -> Result<Option<Thought>, StoreError> {
        self.store.get(id)
    }

    pub fn insights(&self, window: Duration, limit: usize) -> Result<Vec<Insight>, StoreError> {
        self.store.recent_insights(window, limit)
    }

    pub fn insights_for(&self, id: &ThoughtId) -> Result<Vec<Insight>, StoreError> {
        self.store.insights_for(id)
    }

    pub fn connections_for(&self, id: &ThoughtId) -> Result<Vec<Connection>, StoreError> {
        self.store.connections_for(id)
    }

    pub fn status(&self) -> Result<SubconsciousStatus, StoreError> {
        let workers = self
            .health
            .as_ref()
            .map(HealthBoard::snapshot)
            .unwrap_or_default();
        Ok(SubconsciousStatus {
            running: workers.contains(&WorkerHealth::Running),
            thoughts: self.store.status_summary()?,
            reasoning_model: self.config.reasoning.model.clone(),
            fast_model: self.config.fast.model.clone(),
            workers,
        })
    }

    /// Spawn `count` workers sharing this facade's store and wake signal.
    pub fn start_workers<B, F>(&mut self, count: usize, make_backend: F) -> WorkerPool
    where
        B: ReasoningBackend + 'static,
        F: FnMut(usize) -> B,
    {
        let pool = WorkerPool::spawn(count, &self.store, &self.config, &self.wake, make_backend);
        self.health = Some(pool.health());
        pool
    }
}

#[cfg(test)]
mod tests {
    use reverie_types::ThoughtStatus;

    use super::*;

    fn subconscious() -> Subconscious {
        Subconscious::new(
            Arc::new(ThoughtStore::open_in_memory().unwrap()),
            WorkerConfig::default(),
        )
    }

    #[test]
    fn delegate_queues_with_lenient_type() {
        let sub = subconscious();
        let id = sub
            .delegate("pattern", "X", ThoughtContext::new(), 5)
            .unwrap();

        let thought = sub.get(&id).unwrap().unwrap();
        assert_eq!(thought.thought_type, ThoughtType::General);
        assert_eq!(thought.status, ThoughtStatus::Queued);
        assert_eq!(thought.priority, Priority::NORMAL);
        assert!(thought.result.is_none());
    }

    #[test]
    fn out_of_range_priority_is_rejected() {
        let sub = subconscious();
        let err = sub
            .delegate("design", "X", ThoughtContext::new(), 11)
            .unwrap_err();
        assert!(matches!(err, DelegateError::Priority(PriorityError(11))));
        assert_eq!(sub.status().unwrap().thoughts.total(), 0);
    }

    #[test]
    fn status_without_workers() {
        let sub = subconscious();
        sub.delegate("analysis", "a", ThoughtContext::new(), 8).unwrap();
        sub.delegate("analysis", "b", ThoughtContext::new(), 2).unwrap();

        let status = sub.status().unwrap();
        assert!(!status.running);
        assert!(status.workers.is_empty());
        assert_eq!(status.reasoning_model, "deepseek-r1:latest");
        let queued = status.thoughts.by_status[&ThoughtStatus::Queued];
        assert_eq!(queued.count, 2);
        assert!((queued.avg_priority - 5.0).abs() < 1e-9);
    }

    #[test]
    fn missing_thought_is_none() {
        let sub = subconscious();
        assert!(sub.get(&ThoughtId::new("nope")).unwrap().is_none());
        assert!(sub.insights_for(&ThoughtId::new("nope")).unwrap().is_empty());
    }
}
