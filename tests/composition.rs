//! End-to-end composition properties

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use subsys::error::{BuildPhase, FactoryStage};
use subsys::{
    BoxError, Capability, ComposeError, CompositionBuilder, Container, ContainerApi, Context,
    Contract, DependencyGraphCache, Extension, Lifecycle, Member,
};

type Log = Arc<Mutex<Vec<String>>>;

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn engine() -> CompositionBuilder {
    CompositionBuilder::new().with_cache(Arc::new(DependencyGraphCache::new(16)))
}

fn plain(kind: &'static str) -> Extension {
    Extension::new(kind, move |_, _| Ok(Capability::new(kind)))
}

/// Records factory calls, `init` start/finish and `dispose` into a shared log
struct Traced {
    kind: String,
    log: Log,
    fail_init: bool,
    fail_dispose: bool,
}

#[async_trait]
impl Lifecycle for Traced {
    async fn init(&self, _ctx: &Context) -> Result<(), BoxError> {
        self.log.lock().unwrap().push(format!("started:{}", self.kind));
        tokio::task::yield_now().await;
        self.log.lock().unwrap().push(format!("finished:{}", self.kind));
        if self.fail_init {
            return Err(format!("{} refused to start", self.kind).into());
        }
        Ok(())
    }

    async fn dispose(&self, _container: &ContainerApi<'_>) -> Result<(), BoxError> {
        self.log.lock().unwrap().push(format!("dispose:{}", self.kind));
        if self.fail_dispose {
            return Err(format!("{} left a lock behind", self.kind).into());
        }
        Ok(())
    }
}

fn traced(kind: &'static str, log: &Log) -> Extension {
    traced_with(kind, log, false)
}

fn traced_with(kind: &'static str, log: &Log, fail_init: bool) -> Extension {
    traced_as(kind, kind, log, fail_init, false)
}

/// Traced extension of `kind` whose log entries read `label`
fn traced_as(
    kind: &'static str,
    label: &'static str,
    log: &Log,
    fail_init: bool,
    fail_dispose: bool,
) -> Extension {
    let log = Arc::clone(log);
    Extension::new(kind, move |_, _| {
        log.lock().unwrap().push(format!("factory:{}", label));
        Ok(Capability::new(kind).with_lifecycle(Traced {
            kind: label.to_string(),
            log: Arc::clone(&log),
            fail_init,
            fail_dispose,
        }))
    })
}

fn disposals(log: &Log) -> Vec<String> {
    entries(log)
        .into_iter()
        .filter(|e| e.starts_with("dispose:"))
        .collect()
}

fn app_extensions(log: &Log) -> Vec<Extension> {
    vec![
        traced("http", log).depends_on("router").depends_on("log"),
        traced("router", log).depends_on("log"),
        traced("log", log),
        traced("metrics", log).depends_on("log"),
    ]
}

#[tokio::test]
async fn cold_and_warm_builds_are_identical() {
    let engine = engine();
    let log = new_log();

    let mut cold = Container::new("cold");
    let mut warm = Container::new("warm");
    for extension in app_extensions(&log) {
        cold.use_extension(extension.clone());
        warm.use_extension(extension);
    }

    let first = cold.build(&engine).await.unwrap();
    let second = warm.build(&engine).await.unwrap();

    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(first.levels, second.levels);
    assert_eq!(
        first.levels,
        vec![
            vec!["log".to_string()],
            vec!["router".to_string(), "metrics".to_string()],
            vec!["http".to_string()],
        ]
    );
    assert_eq!(cold.registry().snapshot(), warm.registry().snapshot());
    assert_eq!(first.registered, second.registered);
}

#[tokio::test]
async fn failed_init_leaves_registry_untouched() {
    let engine = engine();
    let log = new_log();
    let mut container = Container::new("app");
    container.use_extension(traced("log", &log));
    container.build(&engine).await.unwrap();
    let before = container.registry().snapshot();

    container
        .use_extension(traced("cache", &log).depends_on("log"))
        .use_extension(traced_with("db", &log, true).depends_on("cache"));
    let err = container.build(&engine).await.unwrap_err();

    assert!(matches!(err, ComposeError::Build { .. }));
    assert_eq!(err.kind(), Some("db"));
    assert_eq!(container.registry().snapshot(), before);

    // everything this build registered was disposed, newest first
    let disposed: Vec<String> = entries(&log)
        .into_iter()
        .filter(|e| e.starts_with("dispose:"))
        .collect();
    assert_eq!(disposed, vec!["dispose:db", "dispose:cache"]);
}

#[tokio::test]
async fn failed_build_can_be_retried() {
    let engine = engine();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);

    let mut container = Container::new("app");
    container.use_extension(Extension::new("flaky", move |_, _| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err("not yet".into());
        }
        Ok(Capability::new("flaky"))
    }));

    assert!(container.build(&engine).await.is_err());
    assert_eq!(container.pending_kinds(), vec!["flaky"]);

    container.build(&engine).await.unwrap();
    assert!(container.find("flaky", None).is_some());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn two_node_cycle_names_both_kinds() {
    let mut container = Container::new("app");
    container
        .use_extension(plain("a").depends_on("b"))
        .use_extension(plain("b").depends_on("a"));

    let err = container.build(&engine()).await.unwrap_err();
    match err.cause() {
        ComposeError::Cycle { path } => {
            assert!(path.contains(&"a".to_string()));
            assert!(path.contains(&"b".to_string()));
            assert_eq!(path.first(), path.last());
        }
        other => panic!("expected a cycle, got {other}"),
    }
    assert!(err.is_plan_error());
}

#[tokio::test]
async fn three_node_cycle_is_detected() {
    let mut container = Container::new("app");
    container
        .use_extension(plain("a").depends_on("b"))
        .use_extension(plain("b").depends_on("c"))
        .use_extension(plain("c").depends_on("a"))
        .use_extension(plain("d"));

    let err = container.build(&engine()).await.unwrap_err();
    match err.cause() {
        ComposeError::Cycle { path } => {
            assert_eq!(path.len(), 4);
            assert!(!path.contains(&"d".to_string()));
        }
        other => panic!("expected a cycle, got {other}"),
    }
    assert!(container.registry().is_empty());
}

#[tokio::test]
async fn missing_dependency_names_kind_and_requester() {
    let mut container = Container::new("app");
    container.use_extension(plain("api").depends_on("ghost"));

    let err = container.build(&engine()).await.unwrap_err();
    match err.cause() {
        ComposeError::MissingDependency { kind, requested_by } => {
            assert_eq!(kind, "ghost");
            assert_eq!(requested_by, "api");
        }
        other => panic!("expected a missing dependency, got {other}"),
    }
    assert!(err.hint().is_some());
}

#[tokio::test]
async fn contract_violation_names_missing_member() {
    let mut engine = engine();
    engine.register_contract(Contract::new("storage").method("read", 1).method("write", 2));

    let mut container = Container::new("app");
    container.use_extension(
        Extension::new("store", |_, _| {
            Ok(Capability::new("store").member("read", Member::method(1, |_| Ok(Value::Null))))
        })
        .contract("storage"),
    );

    let err = container.build(&engine).await.unwrap_err();
    match err.cause() {
        ComposeError::ContractViolation {
            kind, violations, ..
        } => {
            assert_eq!(kind, "store");
            assert_eq!(violations.len(), 1);
            assert_eq!(violations[0].member(), "write");
        }
        other => panic!("expected a contract violation, got {other}"),
    }
    assert!(container.registry().is_empty());
}

#[tokio::test]
async fn overwrite_replaces_and_disposes_once() {
    let engine = engine();
    let log = new_log();

    let first = {
        let log = Arc::clone(&log);
        Extension::new("k", move |_, _| {
            Ok(Capability::new("k")
                .member("generation", Member::property(1))
                .with_lifecycle(Traced {
                    kind: "k1".to_string(),
                    log: Arc::clone(&log),
                    fail_init: false,
                    fail_dispose: false,
                }))
        })
        .attach(true)
    };
    let second = Extension::new("k", |_, _| {
        Ok(Capability::new("k").member("generation", Member::property(2)))
    })
    .overwrite(true)
    .attach(true);

    let mut container = Container::new("app");
    container.use_extension(first);
    container.build(&engine).await.unwrap();
    assert_eq!(container.invoke("generation", &[]).unwrap(), json!(1));

    container.use_extension(second);
    let outcome = container.build(&engine).await.unwrap();

    assert_eq!(container.find_all("k").len(), 1);
    let current = container.find("k", None).unwrap();
    assert_eq!(current.invoke("generation", &[]).unwrap(), json!(2));
    assert_eq!(container.invoke("generation", &[]).unwrap(), json!(2));
    assert_eq!(outcome.displaced.disposed, 1);

    container.dispose().await;
    let disposes = entries(&log)
        .iter()
        .filter(|e| e.as_str() == "dispose:k1")
        .count();
    assert_eq!(disposes, 1);
}

#[tokio::test]
async fn overwrite_in_one_build_disposes_first_exactly_once() {
    let engine = engine();
    let log = new_log();

    let mut container = Container::new("app");
    container
        .use_extension(traced_as("k", "k1", &log, false, false).attach(true))
        .use_extension(
            Extension::new("k", |_, _| {
                Ok(Capability::new("k").member("generation", Member::property(2)))
            })
            .overwrite(true)
            .attach(true),
        );
    let outcome = container.build(&engine).await.unwrap();

    assert!(entries(&log).contains(&"factory:k1".to_string()));
    assert_eq!(disposals(&log), vec!["dispose:k1"]);
    assert_eq!(outcome.displaced.disposed, 1);
    assert_eq!(container.find_all("k").len(), 1);
    assert_eq!(container.invoke("generation", &[]).unwrap(), json!(2));

    container.dispose().await;
    assert_eq!(disposals(&log), vec!["dispose:k1"]);
}

#[tokio::test]
async fn overwrite_in_a_failed_build_is_disposed_not_restored() {
    let engine = engine();
    let log = new_log();

    let mut container = Container::new("app");
    container
        .use_extension(traced_as("k", "k1", &log, false, false))
        .use_extension(traced_as("k", "k2", &log, false, false).overwrite(true))
        .use_extension(traced_with("broken", &log, true).depends_on("k"));
    assert!(container.build(&engine).await.is_err());

    assert!(container.registry().is_empty());
    let mut disposed = disposals(&log);
    disposed.sort();
    assert_eq!(disposed, vec!["dispose:broken", "dispose:k1", "dispose:k2"]);
}

#[tokio::test]
async fn rollback_continues_past_failing_dispose() {
    let engine = engine();
    let log = new_log();
    let mut container = Container::new("app");
    container.use_extension(traced("log", &log));
    container.build(&engine).await.unwrap();
    let before = container.registry().snapshot();

    container
        .use_extension(traced("cache", &log).depends_on("log"))
        .use_extension(traced_as("queue", "queue", &log, false, true).depends_on("log"))
        .use_extension(
            traced_with("db", &log, true)
                .depends_on("cache")
                .depends_on("queue"),
        );
    let err = container.build(&engine).await.unwrap_err();

    assert_eq!(err.phase(), Some(BuildPhase::Execute(1)));
    assert_eq!(err.kind(), Some("db"));
    assert!(matches!(
        err.cause(),
        ComposeError::Factory { stage: FactoryStage::Init, .. }
    ));
    assert!(err.to_string().contains("db refused to start"));
    assert_eq!(container.registry().snapshot(), before);

    // newest first; the failing queue dispose did not stop the cache one
    assert_eq!(
        disposals(&log),
        vec!["dispose:db", "dispose:queue", "dispose:cache"]
    );
}

#[tokio::test]
async fn overwrite_rolled_back_restores_previous_capability() {
    let engine = engine();
    let log = new_log();

    let mut container = Container::new("app");
    container.use_extension(traced("k", &log));
    container.build(&engine).await.unwrap();
    let original = container.find("k", None).unwrap();

    container
        .use_extension(plain("k").overwrite(true))
        .use_extension(traced_with("broken", &log, true).depends_on("k"));
    assert!(container.build(&engine).await.is_err());

    let restored = container.find("k", None).unwrap();
    assert!(Arc::ptr_eq(&original, &restored));
    assert_eq!(restored.order_index(), 0);
    assert!(!entries(&log).contains(&"dispose:k".to_string()));
}

#[tokio::test]
async fn registration_order_differs_but_cache_is_shared() {
    let engine = engine();

    let mut forward = Container::new("forward");
    forward
        .use_extension(plain("a"))
        .use_extension(plain("b"))
        .use_extension(plain("c"));

    let mut backward = Container::new("backward");
    backward
        .use_extension(plain("c"))
        .use_extension(plain("b"))
        .use_extension(plain("a"));

    let one = forward.build(&engine).await.unwrap();
    let two = backward.build(&engine).await.unwrap();

    assert!(!one.cache_hit);
    assert!(two.cache_hit);
    assert_eq!(engine.cache().stats().entries, 1);

    let kinds = |outcome: &subsys::BuildOutcome| -> Vec<String> {
        outcome.registered.iter().map(|(k, _)| k.clone()).collect()
    };
    assert_eq!(kinds(&one), vec!["a", "b", "c"]);
    assert_eq!(kinds(&two), vec!["c", "b", "a"]);
}

#[tokio::test]
async fn all_factories_run_before_any_init_completes() {
    let engine = engine();
    let log = new_log();
    let mut container = Container::new("app");
    container
        .use_extension(traced("base", &log))
        .use_extension(traced("one", &log).depends_on("base"))
        .use_extension(traced("two", &log).depends_on("base"))
        .use_extension(traced("three", &log).depends_on("base"));

    container.build(&engine).await.unwrap();
    let log = entries(&log);
    let position = |entry: &str| log.iter().position(|e| e == entry).unwrap();

    let level: [&str; 3] = ["one", "two", "three"];
    let last_factory = level.iter().map(|k| position(&format!("factory:{k}"))).max().unwrap();
    let last_start = level.iter().map(|k| position(&format!("started:{k}"))).max().unwrap();
    let first_start = level.iter().map(|k| position(&format!("started:{k}"))).min().unwrap();
    let first_finish = level.iter().map(|k| position(&format!("finished:{k}"))).min().unwrap();

    assert!(last_factory < first_start);
    assert!(last_start < first_finish);

    // the previous level settled before this one began
    assert!(position("finished:base") < position("factory:one"));
}

#[tokio::test]
async fn dispose_runs_in_reverse_registration_order() {
    let engine = engine();
    let log = new_log();
    let mut container = Container::new("app");
    for extension in app_extensions(&log) {
        container.use_extension(extension);
    }
    container.build(&engine).await.unwrap();

    let report = container.dispose().await;
    assert_eq!(report.disposed, 4);
    assert!(report.is_clean());

    let disposed: Vec<String> = entries(&log)
        .into_iter()
        .filter(|e| e.starts_with("dispose:"))
        .collect();
    assert_eq!(
        disposed,
        vec!["dispose:http", "dispose:metrics", "dispose:router", "dispose:log"]
    );
}

#[tokio::test]
async fn child_container_depends_on_parent_kinds() {
    let engine = engine();
    let log = new_log();
    let child_log = Arc::clone(&log);

    let mut root = Container::new("root").with_config(json!({"db": {"url": "sqlite::memory:"}}));
    root.use_extension(traced("log", &log)).use_extension(
        Extension::new("jobs", move |_, _| {
            let worker = traced("worker", &child_log).depends_on("log");
            Ok(Capability::new("jobs").with_child(Container::new("jobs").with_extension(worker)))
        })
        .depends_on("log"),
    );
    root.build(&engine).await.unwrap();

    let jobs = root.find("jobs", None).unwrap();
    let child_path = jobs.with_child_container(0, |child| child.context().container_path().to_vec());
    assert_eq!(child_path, Some(vec!["root".to_string(), "jobs".to_string()]));

    root.dispose().await;
    let disposed: Vec<String> = entries(&log)
        .into_iter()
        .filter(|e| e.starts_with("dispose:"))
        .collect();
    assert_eq!(disposed, vec!["dispose:worker", "dispose:log"]);
}

#[tokio::test]
async fn typed_instances_are_shared_with_dependents() {
    struct Pool {
        size: usize,
    }

    let engine = engine();
    let mut container = Container::new("app").with_config(json!({"pool": {"size": 8}}));
    container
        .use_extension(Extension::new("pool", |ctx, _| {
            let size: usize = ctx.section("pool.size")?;
            Ok(Capability::new("pool").with_instance(Arc::new(Pool { size })))
        }))
        .use_extension(
            Extension::new("repo", |_, api| {
                let pool = api.instance::<Pool>("pool").ok_or("pool missing")?;
                Ok(Capability::new("repo").member("pool_size", Member::property(pool.size)))
            })
            .depends_on("pool"),
        );

    container.build(&engine).await.unwrap();
    assert_eq!(container.instance::<Pool>("pool").unwrap().size, 8);
    let repo = container.find("repo", None).unwrap();
    assert_eq!(repo.invoke("pool_size", &[]).unwrap(), json!(8));
}

#[tokio::test]
async fn incompatible_version_is_rejected_before_any_factory_runs() {
    let log = new_log();
    let mut container = Container::new("app");
    container
        .use_extension(traced("log", &log).version("1.0.0"))
        .use_extension(traced("api", &log).requires("log", ">=2.0"));

    let err = container.build(&engine()).await.unwrap_err();
    assert!(matches!(err.cause(), ComposeError::IncompatibleDependency { .. }));
    assert!(entries(&log).is_empty());
}
