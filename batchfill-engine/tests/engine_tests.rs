use async_trait::async_trait;
use batchfill_engine::source::memory::MemorySource;
use batchfill_engine::{
    FillEngine, FillSummary, JoinError, JoinOptions, JoinResult, JoinStrategy, RecordSource,
    RecordStream,
};
use batchfill_model::{Predicate, Target};
use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::{Barrier, Notify};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn make_target(value: Value) -> Target {
    Target::from_value(value).unwrap()
}

fn children_options() -> JoinOptions {
    JoinOptions::new("children")
        .with_foreign_field("parentId")
        .with_source_field("name")
        .multiple()
}

fn children_source() -> Arc<MemorySource> {
    Arc::new(MemorySource::with_records(
        "children",
        [
            json!({"parentId": 1, "name": "a"}),
            json!({"parentId": 1, "name": "b"}),
            json!({"parentId": 2, "name": "c"}),
        ],
    ))
}

/// Streams every record it holds, ignoring the predicate.
struct OverFetchSource {
    records: Vec<Value>,
}

#[async_trait]
impl RecordSource for OverFetchSource {
    fn name(&self) -> &str {
        "over-fetch"
    }

    async fn get_stream(&self, _predicate: &Predicate) -> JoinResult<RecordStream> {
        let items: Vec<JoinResult<Value>> = self.records.iter().cloned().map(Ok).collect();
        Ok(futures::stream::iter(items).boxed())
    }
}

/// Holds every stream open until the gate is released.
struct GatedSource {
    inner: MemorySource,
    opened: Notify,
    gate: Notify,
}

impl GatedSource {
    fn new(inner: MemorySource) -> Self {
        Self {
            inner,
            opened: Notify::new(),
            gate: Notify::new(),
        }
    }
}

#[async_trait]
impl RecordSource for GatedSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get_stream(&self, predicate: &Predicate) -> JoinResult<RecordStream> {
        self.opened.notify_one();
        self.gate.notified().await;
        self.inner.get_stream(predicate).await
    }
}

// ── End to end ───────────────────────────────────────────────────

#[tokio::test]
async fn one_to_many_scenario() {
    init_tracing();
    let engine = FillEngine::new();
    let source = children_source();
    let sub = engine.subscribe(source.clone(), children_options()).unwrap();

    let t1 = make_target(json!({"id": 1}));
    let t2 = make_target(json!({"id": 2}));
    sub.add(&t1).unwrap();
    sub.add(&t2).unwrap();

    let summary = engine.fill_subscriptions().await.unwrap();

    assert_eq!(t1.get("children"), Some(json!(["a", "b"])));
    assert_eq!(t2.get("children"), Some(json!(["c"])));
    assert_eq!(summary.fetches.len(), 1);
    assert_eq!(summary.fetches[0].subscription, sub.id());
    assert_eq!(summary.fetches[0].source, "children");
    assert_eq!(summary.fetches[0].target_field, "children");
    assert_eq!(summary.received(), 3);
    assert_eq!(summary.applied(), 3);
    assert_eq!(source.query_count(), 1);
}

#[tokio::test]
async fn default_survives_when_nothing_matches() {
    let engine = FillEngine::new();
    let sub = engine
        .subscribe(
            children_source(),
            JoinOptions::new("favorite")
                .with_foreign_field("parentId")
                .with_source_field("name")
                .with_default_value(json!("none")),
        )
        .unwrap();

    let lonely = make_target(json!({"id": 42}));
    sub.add(&lonely).unwrap();
    engine.fill_subscriptions().await.unwrap();

    assert_eq!(lonely.get("favorite"), Some(json!("none")));
}

#[tokio::test]
async fn one_to_one_takes_last_record() {
    let engine = FillEngine::new();
    let sub = engine
        .subscribe(
            children_source(),
            JoinOptions::new("youngest")
                .with_foreign_field("parentId")
                .with_source_field("name"),
        )
        .unwrap();

    let t1 = make_target(json!({"id": 1}));
    sub.add(&t1).unwrap();
    engine.fill_subscriptions().await.unwrap();

    assert_eq!(t1.get("youngest"), Some(json!("b")));
}

#[tokio::test]
async fn forward_reference_populates_field() {
    let engine = FillEngine::new();
    let users = Arc::new(MemorySource::with_records(
        "users",
        [json!({"id": 7, "name": "ada"}), json!({"id": 8, "name": "bob"})],
    ));
    let sub = engine
        .subscribe(users.clone(), JoinOptions::new("author").forward_reference())
        .unwrap();

    let post = make_target(json!({"id": 100, "author": 7}));
    sub.add(&post).unwrap();
    engine.fill_subscriptions().await.unwrap();

    assert_eq!(post.get("author"), Some(json!({"id": 7, "name": "ada"})));
}

#[tokio::test]
async fn base_condition_filters_records() {
    let engine = FillEngine::new();
    let source = Arc::new(MemorySource::with_records(
        "children",
        [
            json!({"parentId": 1, "name": "a", "deleted": true}),
            json!({"parentId": 1, "name": "b", "deleted": false}),
        ],
    ));
    let sub = engine
        .subscribe(
            source.clone(),
            children_options().with_base_condition(json!({"deleted": false})),
        )
        .unwrap();

    let t1 = make_target(json!({"id": 1}));
    sub.add(&t1).unwrap();
    engine.fill_subscriptions().await.unwrap();

    assert_eq!(t1.get("children"), Some(json!(["b"])));
    assert_eq!(source.queries()[0].base.get("deleted"), Some(&json!(false)));
}

#[tokio::test]
async fn structured_conditions_use_disjunction() {
    let engine = FillEngine::new();
    let comments = Arc::new(MemorySource::with_records(
        "comments",
        [
            json!({"kind": "post", "ref": 1, "text": "on post"}),
            json!({"kind": "photo", "ref": 1, "text": "on photo"}),
        ],
    ));
    let sub = engine
        .make_subscription(
            comments.clone(),
            JoinOptions::new("comments").with_source_field("text").multiple(),
            JoinStrategy::new()
                .with_target_key(|fields| json!([fields["kind"], fields["id"]]))
                .with_condition(|fields| json!({"kind": fields["kind"], "ref": fields["id"]}))
                .with_foreign_key(|record| json!([record["kind"], record["ref"]])),
        )
        .unwrap();

    let post = make_target(json!({"kind": "post", "id": 1}));
    let photo = make_target(json!({"kind": "photo", "id": 1}));
    sub.add(&post).unwrap();
    sub.add(&photo).unwrap();
    engine.fill_subscriptions().await.unwrap();

    assert_eq!(post.get("comments"), Some(json!(["on post"])));
    assert_eq!(photo.get("comments"), Some(json!(["on photo"])));
}

#[tokio::test]
async fn over_fetched_records_are_ignored() {
    let engine = FillEngine::new();
    let source = Arc::new(OverFetchSource {
        records: vec![
            json!({"parentId": 1, "name": "a"}),
            json!({"parentId": 9, "name": "stray"}),
            json!({"parentId": 1, "name": "b"}),
        ],
    });
    let sub = engine.subscribe(source, children_options()).unwrap();
    let t1 = make_target(json!({"id": 1}));
    sub.add(&t1).unwrap();

    let summary = engine.fill_subscriptions().await.unwrap();

    assert_eq!(t1.get("children"), Some(json!(["a", "b"])));
    assert_eq!(summary.received(), 3);
    assert_eq!(summary.applied(), 2);
}

#[tokio::test]
async fn several_subscriptions_fill_in_one_cycle() {
    let engine = FillEngine::new();
    let children = children_source();
    let pets = Arc::new(MemorySource::with_records(
        "pets",
        [json!({"ownerId": 2, "species": "cat"})],
    ));

    let by_child = engine.subscribe(children.clone(), children_options()).unwrap();
    let by_pet = engine
        .subscribe(
            pets.clone(),
            JoinOptions::new("pet")
                .with_foreign_field("ownerId")
                .with_source_field("species"),
        )
        .unwrap();

    let t2 = make_target(json!({"id": 2}));
    by_child.add(&t2).unwrap();
    by_pet.add(&t2).unwrap();

    let summary = engine.fill_subscriptions().await.unwrap();

    assert_eq!(t2.get("children"), Some(json!(["c"])));
    assert_eq!(t2.get("pet"), Some(json!("cat")));
    let order: Vec<_> = summary.fetches.iter().map(|f| f.subscription).collect();
    assert_eq!(order, vec![by_child.id(), by_pet.id()]);
    assert_eq!(children.query_count(), 1);
    assert_eq!(pets.query_count(), 1);
}

// ── Empty cycles ─────────────────────────────────────────────────

#[tokio::test]
async fn empty_registry_resolves_immediately() {
    let engine = FillEngine::new();
    let summary = engine.fill_subscriptions().await.unwrap();
    assert_eq!(summary, FillSummary::default());
    assert!(summary.is_empty());
}

#[tokio::test]
async fn subscription_without_targets_does_no_io() {
    let engine = FillEngine::new();
    let source = children_source();
    engine.subscribe(source.clone(), children_options()).unwrap();

    let summary = engine.fill_subscriptions().await.unwrap();

    assert_eq!(summary.fetches.len(), 1);
    assert_eq!(summary.received(), 0);
    assert_eq!(source.query_count(), 0);
}

#[tokio::test]
async fn subscriptions_are_fetched_once() {
    let engine = FillEngine::new();
    let source = children_source();
    let sub = engine.subscribe(source.clone(), children_options()).unwrap();
    sub.add(&make_target(json!({"id": 1}))).unwrap();

    engine.fill_subscriptions().await.unwrap();
    let second = engine.fill_subscriptions().await.unwrap();

    assert!(second.is_empty());
    assert_eq!(source.query_count(), 1);
}

// ── Fetch modes ──────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_mode_matches_sequential_mode() {
    let records: Vec<Value> = (0..50)
        .map(|i| json!({"parentId": i % 5, "name": format!("n{i}")}))
        .collect();

    let mut results = Vec::new();
    for options in [children_options(), children_options().parallel(4)] {
        let engine = FillEngine::new();
        let source = Arc::new(MemorySource::with_records("children", records.clone()));
        let sub = engine.subscribe(source, options).unwrap();
        let targets: Vec<Target> = (0..5).map(|id| make_target(json!({"id": id}))).collect();
        sub.add_all(&targets).unwrap();

        let summary = engine.fill_subscriptions().await.unwrap();
        assert_eq!(summary.applied(), 50);
        results.push(targets.iter().map(Target::snapshot).collect::<Vec<_>>());
    }

    assert_eq!(results[0], results[1]);
}

// ── Failures ─────────────────────────────────────────────────────

#[tokio::test]
async fn open_failure_fails_fill_but_keeps_other_assignments() {
    let engine = FillEngine::new();
    let broken = Arc::new(MemorySource::new("broken"));
    broken.fail_on_open("connection refused");
    let healthy = children_source();

    let bad = engine.subscribe(broken.clone(), children_options()).unwrap();
    let good = engine.subscribe(healthy.clone(), children_options()).unwrap();

    let t1 = make_target(json!({"id": 1}));
    let t2 = make_target(json!({"id": 2}));
    bad.add(&t1).unwrap();
    good.add(&t2).unwrap();

    let err = engine.fill_subscriptions().await.unwrap_err();

    match err {
        JoinError::Source {
            source_name,
            message,
        } => {
            assert_eq!(source_name, "broken");
            assert_eq!(message, "connection refused");
        }
        other => panic!("Expected Source error, got {other:?}"),
    }
    assert_eq!(t2.get("children"), Some(json!(["c"])));
    assert_eq!(t1.get("children"), None);
}

#[tokio::test]
async fn mid_stream_failure_keeps_applied_records() {
    let engine = FillEngine::new();
    let source = children_source();
    source.fail_after(1, "cursor lost");
    let sub = engine.subscribe(source, children_options()).unwrap();

    let t1 = make_target(json!({"id": 1}));
    sub.add(&t1).unwrap();

    let err = engine.fill_subscriptions().await.unwrap_err();
    assert!(err.to_string().contains("cursor lost"));
    assert_eq!(t1.get("children"), Some(json!(["a"])));
}

#[tokio::test]
async fn mid_stream_failure_in_concurrent_mode() {
    let engine = FillEngine::new();
    let source = children_source();
    source.fail_after(2, "cursor lost");
    let sub = engine
        .subscribe(source, children_options().parallel(2))
        .unwrap();
    sub.add(&make_target(json!({"id": 1}))).unwrap();

    let err = engine.fill_subscriptions().await.unwrap_err();
    assert!(matches!(err, JoinError::Source { .. }));
}

#[tokio::test]
async fn failed_subscription_is_not_retried() {
    let engine = FillEngine::new();
    let source = children_source();
    source.fail_on_open("down");
    let sub = engine.subscribe(source.clone(), children_options()).unwrap();
    sub.add(&make_target(json!({"id": 1}))).unwrap();

    assert!(engine.fill_subscriptions().await.is_err());
    source.clear_faults();

    let summary = engine.fill_subscriptions().await.unwrap();
    assert!(summary.is_empty());
    assert_eq!(source.query_count(), 1);
}

// ── Concurrency ──────────────────────────────────────────────────

#[tokio::test]
async fn registrations_during_fetch_go_to_next_cycle() {
    let engine = Arc::new(FillEngine::new());
    let slow = Arc::new(GatedSource::new(MemorySource::with_records(
        "slow",
        [json!({"parentId": 1, "name": "a"})],
    )));
    let first = engine.subscribe(slow.clone(), children_options()).unwrap();
    let t1 = make_target(json!({"id": 1}));
    first.add(&t1).unwrap();

    let first_fill = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.fill_subscriptions().await }
    });

    // First cycle has drained and is waiting inside the fetch.
    slow.opened.notified().await;
    assert_eq!(engine.pending(), 0);
    assert!(first.is_consumed());

    let fast = Arc::new(MemorySource::with_records(
        "fast",
        [json!({"parentId": 2, "name": "b"})],
    ));
    let second = engine.subscribe(fast.clone(), children_options()).unwrap();
    let t2 = make_target(json!({"id": 2}));
    second.add(&t2).unwrap();

    let summary = engine.fill_subscriptions().await.unwrap();
    assert_eq!(summary.fetches.len(), 1);
    assert_eq!(summary.fetches[0].subscription, second.id());
    assert_eq!(t2.get("children"), Some(json!(["b"])));
    assert_eq!(t1.get("children"), None);

    slow.gate.notify_one();
    let summary = first_fill.await.unwrap().unwrap();
    assert_eq!(summary.fetches.len(), 1);
    assert_eq!(summary.fetches[0].subscription, first.id());
    assert_eq!(t1.get("children"), Some(json!(["a"])));
    assert_eq!(slow.inner.query_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_fills_fetch_each_subscription_once() {
    const TASKS: usize = 32;
    let engine = Arc::new(FillEngine::new());
    let source = Arc::new(MemorySource::with_records(
        "children",
        (0..TASKS).map(|i| json!({"parentId": i, "name": format!("c{i}")})),
    ));
    let barrier = Arc::new(Barrier::new(TASKS));

    let mut handles = Vec::new();
    let mut targets = Vec::new();
    for i in 0..TASKS {
        let target = make_target(json!({"id": i}));
        targets.push(target.clone());
        let engine = Arc::clone(&engine);
        let source = Arc::clone(&source);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            let sub = engine.subscribe(source, children_options()).unwrap();
            sub.add(&target).unwrap();
            barrier.wait().await;
            engine.fill_subscriptions().await.unwrap()
        }));
    }

    let mut fetched = 0;
    for handle in handles {
        fetched += handle.await.unwrap().fetches.len();
    }

    assert_eq!(fetched, TASKS);
    assert_eq!(source.query_count(), TASKS);
    assert_eq!(engine.pending(), 0);
    for (i, target) in targets.iter().enumerate() {
        assert_eq!(target.get("children"), Some(json!([format!("c{i}")])));
    }
}

#[tokio::test]
async fn fetched_value_wins_over_default_seeded_by_racing_add() {
    for _ in 0..2_000 {
        let engine = FillEngine::new();
        let sub = engine
            .subscribe(
                Arc::new(MemorySource::with_records(
                    "children",
                    [json!({"parentId": 1, "name": "a"})],
                )),
                JoinOptions::new("favorite")
                    .with_foreign_field("parentId")
                    .with_source_field("name")
                    .with_default_value(json!("none")),
            )
            .unwrap();
        let target = make_target(json!({"id": 1}));

        let adder = {
            let sub = Arc::clone(&sub);
            let target = target.clone();
            std::thread::spawn(move || sub.add(&target))
        };
        while sub.is_empty() {
            std::hint::spin_loop();
        }
        let summary = engine.fill_subscriptions().await.unwrap();
        adder.join().unwrap().unwrap();

        assert_eq!(summary.applied(), 1);
        assert_eq!(target.get("favorite"), Some(json!("a")));
    }
}
