//! The worker loop: claim, reason, parse, connect, persist.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, watch};

use reverie_providers::{BackendError, GenerateRequest, ReasoningBackend};
use reverie_store::{CompletionRecord, StoreError, ThoughtStore};
use reverie_types::{
    Insight, Priority, Thought, ThoughtId, ThoughtResult, ThoughtStatus, ThoughtType,
    now_epoch_secs,
};

use crate::analysis::{parse_response, significance};
use crate::connections::{CONNECTION_LOOKBACK, discover, to_records};
use crate::prompts::build_prompt;

pub const REASONING_MODEL: &str = "deepseek-r1:latest";
pub const FAST_MODEL: &str = "llama3.2:latest";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// A model together with its output budget and call deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelTier {
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl ModelTier {
    #[must_use]
    pub fn reasoning() -> Self {
        Self {
            model: REASONING_MODEL.to_string(),
            max_tokens: 4096,
            timeout: Duration::from_secs(300),
        }
    }

    #[must_use]
    pub fn fast() -> Self {
        Self {
            model: FAST_MODEL.to_string(),
            max_tokens: 1024,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub reasoning: ModelTier,
    pub fast: ModelTier,
    pub poll_interval: Duration,
    pub connection_lookback: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            reasoning: ModelTier::reasoning(),
            fast: ModelTier::fast(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            connection_lookback: CONNECTION_LOOKBACK,
        }
    }
}

impl WorkerConfig {
    #[must_use]
    pub fn tier_for(&self, kind: ThoughtType) -> &ModelTier {
        if kind.needs_deep_reasoning() {
            &self.reasoning
        } else {
            &self.fast
        }
    }
}

/// Infrastructure failure that ends a worker.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("reasoning backend is unusable: {0}")]
    Backend(BackendError),
}

pub struct Worker<B> {
    id: usize,
    store: Arc<ThoughtStore>,
    backend: B,
    config: Arc<WorkerConfig>,
    wake: Arc<Notify>,
}

impl<B: ReasoningBackend> Worker<B> {
    pub fn new(
        id: usize,
        store: Arc<ThoughtStore>,
        backend: B,
        config: Arc<WorkerConfig>,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            id,
            store,
            backend,
            config,
            wake,
        }
    }

    /// Process thoughts until `shutdown` flips to `true` or its sender is
    /// dropped.
    ///
    /// An idle worker sleeps for the poll interval, or until an urgent
    /// thought is delegated.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        tracing::info!(
            worker = self.id,
            backend = self.backend.name(),
            "Worker started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.process_next().await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(worker = self.id, "Worker failed: {e}");
                    return Err(e);
                }
            }

            tokio::select! {
                () = tokio::time::sleep(self.config.poll_interval) => {}
                () = self.wake.notified() => {
                    tracing::debug!(worker = self.id, "Woken for urgent thought");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!(worker = self.id, "Worker stopped");
        Ok(())
    }

    /// Claim and process one thought. Returns its id, or `None` when the
    /// queue is empty.
    pub async fn process_next(&self) -> Result<Option<ThoughtId>, WorkerError> {
        let Some(thought) = self.store.claim_next()? else {
            return Ok(None);
        };
        let id = thought.id.clone();
        self.process(thought).await?;
        Ok(Some(id))
    }

    async fn process(&self, mut thought: Thought) -> Result<(), WorkerError> {
        let tier = self.config.tier_for(thought.thought_type);
        thought.model_used = Some(tier.model.clone());
        tracing::debug!(
            worker = self.id,
            thought_id = %thought.id,
            model = %tier.model,
            "Processing thought"
        );

        let prompt = build_prompt(&thought);
        let request = GenerateRequest {
            prompt: &prompt,
            model: &tier.model,
            max_tokens: tier.max_tokens,
        };

        let answer = match tokio::time::timeout(tier.timeout, self.backend.generate(request)).await
        {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) if e.is_fatal() => {
                self.fail(thought, &e)?;
                return Err(WorkerError::Backend(e));
            }
            Ok(Err(e)) => return self.fail(thought, &e),
            Err(_) => return self.fail(thought, &BackendError::Timeout(tier.timeout)),
        };

        self.complete(thought, tier, &answer)
    }

    fn complete(
        &self,
        mut thought: Thought,
        tier: &ModelTier,
        answer: &str,
    ) -> Result<(), WorkerError> {
        let mut parsed = parse_response(answer, Some(&tier.model));

        let candidates = self
            .store
            .recently_completed(&thought.id, self.config.connection_lookback)?;
        let summaries = discover(&thought, &candidates);
        let connections = to_records(&thought.id, &summaries);
        parsed.connections = summaries;

        let follow_up = if parsed.needs_iteration {
            let content = parsed
                .iteration_prompt
                .clone()
                .unwrap_or_else(|| thought.content.clone());
            let mut context = thought.context.clone();
            context.insert(
                "previous_result".to_string(),
                serde_json::to_value(&parsed).unwrap_or_default(),
            );
            context.insert(
                "parent_content".to_string(),
                serde_json::Value::String(thought.content.clone()),
            );
            let next = thought.follow_up(content, context);
            if next.is_none() {
                tracing::debug!(thought_id = %thought.id, "Iteration limit reached");
            }
            next
        } else {
            None
        };
        parsed.follow_up_id = follow_up.as_ref().map(|next| next.id.clone());

        let insights: Vec<Insight> = parsed
            .insights
            .iter()
            .map(|text| Insight::new(thought.id.clone(), text.clone(), significance(text)))
            .collect();

        thought.status = ThoughtStatus::Completed;
        thought.completed_at = Some(now_epoch_secs());
        thought.result = Some(ThoughtResult::Completed(parsed));

        self.store.record_completion(CompletionRecord {
            thought: &thought,
            insights: &insights,
            connections: &connections,
            follow_up: follow_up.as_ref(),
        })?;

        if thought.priority >= Priority::HIGH {
            tracing::info!(
                worker = self.id,
                thought_id = %thought.id,
                insights = insights.len(),
                connections = connections.len(),
                "High-priority thought completed"
            );
        } else {
            tracing::debug!(worker = self.id, thought_id = %thought.id, "Thought completed");
        }
        Ok(())
    }

    fn fail(&self, mut thought: Thought, error: &BackendError) -> Result<(), WorkerError> {
        tracing::warn!(worker = self.id, thought_id = %thought.id, "Thought failed: {error}");
        thought.status = ThoughtStatus::Failed;
        thought.completed_at = Some(now_epoch_secs());
        thought.result = Some(ThoughtResult::failed(error.to_string()));
        self.store.update(&thought)?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use reverie_types::ThoughtContext;

    use super::*;

    /// Backend that replays canned answers and records the requests it saw.
    #[derive(Default)]
    pub(crate) struct Scripted {
        answers: Mutex<VecDeque<Result<String, BackendError>>>,
        pub(crate) seen: Mutex<Vec<(String, u32)>>,
    }

    impl Scripted {
        pub(crate) fn new(answers: impl IntoIterator<Item = Result<String, BackendError>>) -> Self {
            Self {
                answers: Mutex::new(answers.into_iter().collect()),
                seen: Mutex::default(),
            }
        }
    }

    impl ReasoningBackend for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, request: GenerateRequest<'_>) -> Result<String, BackendError> {
            self.seen
                .lock()
                .unwrap()
                .push((request.model.to_string(), request.max_tokens));
            self.answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(String::new()))
        }
    }

    fn worker(backend: Scripted) -> (Worker<Scripted>, Arc<ThoughtStore>) {
        let store = Arc::new(ThoughtStore::open_in_memory().unwrap());
        let worker = Worker::new(
            0,
            Arc::clone(&store),
            backend,
            Arc::new(WorkerConfig::default()),
            Arc::new(Notify::new()),
        );
        (worker, store)
    }

    fn enqueue(store: &ThoughtStore, kind: ThoughtType, content: &str) -> ThoughtId {
        store
            .enqueue(&Thought::queued(
                kind,
                content,
                ThoughtContext::new(),
                Priority::NORMAL,
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn empty_queue_yields_none() {
        let (worker, _store) = worker(Scripted::default());
        assert!(worker.process_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn routes_by_type() {
        let (worker, store) = worker(Scripted::default());
        enqueue(&store, ThoughtType::Design, "a");
        worker.process_next().await.unwrap();
        enqueue(&store, ThoughtType::Exploration, "b");
        worker.process_next().await.unwrap();

        let seen = worker.backend.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (REASONING_MODEL.to_string(), 4096),
                (FAST_MODEL.to_string(), 1024)
            ]
        );
    }

    #[tokio::test]
    async fn completion_stores_parsed_result_and_insights() {
        let (worker, store) = worker(Scripted::new([Ok(
            "Findings:\n- one\nInsight: caching is the lever".to_string(),
        )]));
        let id = enqueue(&store, ThoughtType::Analysis, "why is it slow");
        worker.process_next().await.unwrap();

        let done = store.get(&id).unwrap().unwrap();
        assert_eq!(done.status, ThoughtStatus::Completed);
        assert_eq!(done.model_used.as_deref(), Some(REASONING_MODEL));
        assert!(done.completed_at.is_some());
        let parsed = done.result.as_ref().and_then(ThoughtResult::parsed).unwrap();
        assert_eq!(parsed.sections["findings"], vec!["one"]);
        assert_eq!(
            store.insights_for(&id).unwrap()[0].text,
            "Insight: caching is the lever"
        );
    }

    #[tokio::test]
    async fn backend_error_fails_thought_and_continues() {
        let (worker, store) = worker(Scripted::new([Err(BackendError::Unavailable(
            "connection refused".into(),
        ))]));
        let id = enqueue(&store, ThoughtType::General, "x");
        assert_eq!(worker.process_next().await.unwrap(), Some(id.clone()));

        let failed = store.get(&id).unwrap().unwrap();
        assert_eq!(failed.status, ThoughtStatus::Failed);
        let error = failed.result.as_ref().and_then(ThoughtResult::error).unwrap();
        assert!(error.contains("connection refused"), "{error}");
    }

    #[tokio::test]
    async fn fatal_backend_error_ends_worker() {
        let (worker, store) = worker(Scripted::new([Err(BackendError::Fatal(
            "bridge cannot start".into(),
        ))]));
        let id = enqueue(&store, ThoughtType::General, "x");
        let err = worker.process_next().await.unwrap_err();
        assert!(matches!(err, WorkerError::Backend(BackendError::Fatal(_))));
        assert_eq!(store.get(&id).unwrap().unwrap().status, ThoughtStatus::Failed);
    }

    #[tokio::test]
    async fn iteration_spawns_linked_follow_up() {
        let (worker, store) = worker(Scripted::new([Ok(
            "We should explore the retry path.".to_string(),
        )]));
        let id = enqueue(&store, ThoughtType::Problem, "flaky deploys");
        worker.process_next().await.unwrap();

        let children = store.follow_ups(&id).unwrap();
        assert_eq!(children.len(), 1);
        let child = &children[0];
        assert_eq!(child.content, "We should explore the retry path.");
        assert_eq!(child.iterations, 1);
        assert_eq!(child.context["parent_content"], "flaky deploys");
        assert!(child.context.contains_key("previous_result"));

        let parent = store.get(&id).unwrap().unwrap();
        let parsed = parent.result.as_ref().and_then(ThoughtResult::parsed).unwrap();
        assert_eq!(parsed.follow_up_id.as_ref(), Some(&child.id));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_times_out() {
        struct Stalled;
        impl ReasoningBackend for Stalled {
            fn name(&self) -> &str {
                "stalled"
            }
            async fn generate(&self, _: GenerateRequest<'_>) -> Result<String, BackendError> {
                std::future::pending().await
            }
        }

        let store = Arc::new(ThoughtStore::open_in_memory().unwrap());
        let worker = Worker::new(
            0,
            Arc::clone(&store),
            Stalled,
            Arc::new(WorkerConfig::default()),
            Arc::new(Notify::new()),
        );
        let id = enqueue(&store, ThoughtType::General, "x");
        worker.process_next().await.unwrap();

        let failed = store.get(&id).unwrap().unwrap();
        assert_eq!(failed.status, ThoughtStatus::Failed);
        assert!(failed.result.unwrap().error().unwrap().contains("did not answer"));
    }
}
