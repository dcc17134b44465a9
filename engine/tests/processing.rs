//! End-to-end processing through the public engine API.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reverie_engine::{FAST_MODEL, Subconscious, Worker, WorkerConfig};
use reverie_providers::{
    BackendError, GenerateRequest, OllamaClient, OllamaConfig, ReasoningBackend, retry::RetryConfig,
};
use reverie_store::ThoughtStore;
use reverie_types::{MAX_ITERATIONS, ThoughtContext, ThoughtId, ThoughtResult, ThoughtStatus};
use tokio::sync::Notify;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Answers every prompt with the same text.
struct Fixed {
    answer: &'static str,
    calls: Arc<AtomicUsize>,
}

impl Fixed {
    fn new(answer: &'static str) -> Self {
        Self {
            answer,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl ReasoningBackend for Fixed {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn generate(&self, _request: GenerateRequest<'_>) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer.to_string())
    }
}

fn in_memory() -> Arc<ThoughtStore> {
    Arc::new(ThoughtStore::open_in_memory().unwrap())
}

fn worker<B: ReasoningBackend>(store: &Arc<ThoughtStore>, backend: B) -> Worker<B> {
    Worker::new(
        0,
        Arc::clone(store),
        backend,
        Arc::new(WorkerConfig::default()),
        Arc::new(Notify::new()),
    )
}

async fn drain<B: ReasoningBackend>(worker: &Worker<B>) -> Vec<ThoughtId> {
    let mut processed = Vec::new();
    while let Some(id) = worker.process_next().await.unwrap() {
        processed.push(id);
    }
    processed
}

#[tokio::test]
async fn delegated_thought_completes_with_insight() {
    let store = in_memory();
    let sub = Subconscious::new(Arc::clone(&store), WorkerConfig::default());
    let id = sub.delegate("pattern", "X", ThoughtContext::new(), 5).unwrap();

    let queued = sub.get(&id).unwrap().unwrap();
    assert_eq!(queued.status, ThoughtStatus::Queued);
    assert!(queued.result.is_none());

    let worker = worker(&store, Fixed::new("Looking closer.\nInsight: X relates to Y"));
    assert_eq!(drain(&worker).await, vec![id.clone()]);

    let done = sub.get(&id).unwrap().unwrap();
    assert_eq!(done.status, ThoughtStatus::Completed);
    assert_eq!(done.model_used.as_deref(), Some(FAST_MODEL));
    let insights = done.result.as_ref().unwrap().insights();
    assert!(insights.iter().any(|line| line.contains("Insight:")));

    let stored = sub.insights(Duration::from_secs(3600), 10).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].text, "Insight: X relates to Y");
    assert_eq!(stored[0].thought_id, id);
}

#[tokio::test]
async fn iteration_chain_stops_at_the_cap() {
    let store = in_memory();
    let sub = Subconscious::new(Arc::clone(&store), WorkerConfig::default());
    let root = sub
        .delegate("problem", "why do builds flake", ThoughtContext::new(), 5)
        .unwrap();

    let backend = Fixed::new("Unclear. We need more information about the runners.");
    let calls = Arc::clone(&backend.calls);
    let worker = worker(&store, backend);
    let processed = drain(&worker).await;

    // The root plus one follow-up per iteration, and nothing past the cap.
    assert_eq!(processed.len(), 1 + MAX_ITERATIONS as usize);
    assert_eq!(calls.load(Ordering::SeqCst), processed.len());

    let mut current = sub.get(&root).unwrap().unwrap();
    for depth in 1..=MAX_ITERATIONS {
        let children = store.follow_ups(&current.id).unwrap();
        assert_eq!(children.len(), 1);
        current = children.into_iter().next().unwrap();
        assert_eq!(current.iterations, depth);
        assert_eq!(current.status, ThoughtStatus::Completed);
        assert_eq!(
            current.content,
            "Unclear. We need more information about the runners."
        );
    }

    assert!(store.follow_ups(&current.id).unwrap().is_empty());
    let last = current.result.as_ref().and_then(ThoughtResult::parsed).unwrap();
    assert!(last.needs_iteration);
    assert!(last.follow_up_id.is_none());
}

#[tokio::test]
async fn overlapping_thoughts_are_connected() {
    let store = in_memory();
    let sub = Subconscious::new(Arc::clone(&store), WorkerConfig::default());
    let worker = worker(&store, Fixed::new("noted"));

    let first = sub
        .delegate(
            "analysis",
            "the cache layer drops writes under load",
            ThoughtContext::new(),
            5,
        )
        .unwrap();
    drain(&worker).await;
    let second = sub
        .delegate(
            "design",
            "redesign the cache layer so it never drops writes",
            ThoughtContext::new(),
            5,
        )
        .unwrap();
    drain(&worker).await;

    let connections = sub.connections_for(&second).unwrap();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].thought_id_1, second);
    assert_eq!(connections[0].thought_id_2, first);
    // the, cache, layer, drops, writes out of nine subject tokens.
    assert!((connections[0].strength - 5.0 / 9.0).abs() < 1e-9);
    assert_eq!(sub.connections_for(&first).unwrap().len(), 1);

    let parsed = sub
        .get(&second)
        .unwrap()
        .unwrap()
        .result
        .unwrap();
    assert_eq!(parsed.parsed().unwrap().connections[0].thought_id, first);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn urgent_thought_wakes_an_idle_pool() {
    let store = in_memory();
    let config = WorkerConfig {
        poll_interval: Duration::from_secs(3600),
        ..WorkerConfig::default()
    };
    let mut sub = Subconscious::new(Arc::clone(&store), config);
    let pool = sub.start_workers(2, |_| Fixed::new("ok"));

    // Let both workers find the empty queue and go to sleep.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let id = sub
        .delegate("general", "now please", ThoughtContext::new(), 10)
        .unwrap();

    let mut status = ThoughtStatus::Queued;
    for _ in 0..200 {
        status = sub.get(&id).unwrap().unwrap().status;
        if status == ThoughtStatus::Completed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, ThoughtStatus::Completed);
    assert!(sub.status().unwrap().running);

    pool.shutdown().await;
    assert!(!sub.status().unwrap().running);
}

fn ollama(server: &MockServer) -> OllamaClient {
    OllamaClient::new(OllamaConfig {
        base_url: server.uri(),
        retry: RetryConfig {
            max_retries: 0,
            ..RetryConfig::default()
        },
        ..OllamaConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn ollama_backed_worker_records_answer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "response": "Key finding: retries hide the real fault.\nRecommendation: log first",
            "done": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = in_memory();
    let sub = Subconscious::new(Arc::clone(&store), WorkerConfig::default());
    let id = sub
        .delegate("exploration", "what if we never retried", ThoughtContext::new(), 8)
        .unwrap();
    drain(&worker(&store, ollama(&server))).await;

    let done = sub.get(&id).unwrap().unwrap();
    let parsed = done.result.as_ref().and_then(ThoughtResult::parsed).unwrap();
    assert_eq!(parsed.recommendation.as_deref(), Some("log first"));
    assert_eq!(parsed.insights, vec!["Key finding: retries hide the real fault."]);
    assert_eq!(parsed.model.as_deref(), Some(FAST_MODEL));
}

#[tokio::test]
async fn unavailable_service_fails_the_thought_only() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("loading model"))
        .mount(&server)
        .await;

    let store = in_memory();
    let sub = Subconscious::new(Arc::clone(&store), WorkerConfig::default());
    let a = sub.delegate("general", "a", ThoughtContext::new(), 5).unwrap();
    let b = sub.delegate("general", "b", ThoughtContext::new(), 5).unwrap();

    assert_eq!(drain(&worker(&store, ollama(&server))).await, vec![a.clone(), b]);

    let failed = sub.get(&a).unwrap().unwrap();
    assert_eq!(failed.status, ThoughtStatus::Failed);
    let error = failed.result.as_ref().and_then(ThoughtResult::error).unwrap();
    assert!(error.contains("503"), "{error}");
    assert_eq!(sub.status().unwrap().thoughts.count(ThoughtStatus::Failed), 2);
}
