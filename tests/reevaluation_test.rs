// ==========================================
// 重算任务集成测试
// ==========================================
// 覆盖: 突发变更合并、重入检测、句柄访问、重算进行中的变更
// ==========================================

mod helpers;

use hanging_protocol_engine::domain::{Constraint, MatchingRule, Protocol, Stage, ViewportDefinition};
use hanging_protocol_engine::engine::{
    spawn_reevaluation, AttributeResolver, DerivedAttribute, EngineHandle, ProtocolEvent, ProtocolEventPublisher,
    ProtocolEventType, RecordingEventPublisher,
};
use hanging_protocol_engine::{EngineError, EngineState, InMemoryMetadataProvider, InMemoryProtocolRegistry, ProtocolEngine};
use helpers::test_data_builder::*;
use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

/// 派生属性闸门：布防后第一次求值会阻塞，直到被放行
struct EvaluationGate {
    armed: AtomicBool,
    started: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl EvaluationGate {
    fn wait_if_armed(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            let _ = self.started.lock().unwrap().send(());
            let _ = self.release.lock().unwrap().recv_timeout(Duration::from_secs(5));
        }
    }
}

/// 在发布事件时尝试再次触发重算的发布者
#[derive(Default)]
struct ReentrantPublisher {
    handle: OnceLock<EngineHandle>,
    outcomes: Mutex<Vec<Result<EngineState, String>>>,
}

impl ProtocolEventPublisher for ReentrantPublisher {
    fn publish(&self, event: ProtocolEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        if event.event_type() != ProtocolEventType::ProtocolMatched {
            return Ok(());
        }
        if let Some(handle) = self.handle.get() {
            let outcome = handle.rerun(None).map_err(|e| e.to_string());
            self.outcomes.lock().map_err(|e| e.to_string())?.push(outcome);
        }
        Ok(())
    }
}

fn registry_with(protocols: Vec<hanging_protocol_engine::Protocol>) -> Arc<InMemoryProtocolRegistry> {
    let registry = InMemoryProtocolRegistry::new();
    registry.register_all(protocols).unwrap();
    Arc::new(registry)
}

#[test]
fn test_rerun_from_inside_evaluation_is_rejected() {
    let publisher = Arc::new(ReentrantPublisher::default());
    let provider = Arc::new(InMemoryMetadataProvider::new(vec![ct_chest_study()]));
    let engine = ProtocolEngine::new(provider, registry_with(vec![ct_axial_protocol()])).with_publisher(publisher.clone());

    let handle = EngineHandle::new(engine);
    assert!(publisher.handle.set(handle.clone()).is_ok());

    assert_eq!(handle.rerun(None).unwrap(), EngineState::Applied);
    assert!(!handle.is_evaluating());

    let outcomes = publisher.outcomes.lock().unwrap().clone();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0], Err(EngineError::ReentrantEvaluation.to_string()));

    // 外层重算结束后标记已复位，可再次触发
    assert_eq!(handle.rerun(None).unwrap(), EngineState::Applied);
}

#[test]
fn test_with_engine_navigates_under_lock() {
    let provider = Arc::new(InMemoryMetadataProvider::new(vec![ct_chest_study()]));
    let engine = ProtocolEngine::new(provider, registry_with(vec![three_stage_protocol()]));
    let handle = EngineHandle::new(engine);

    assert_eq!(handle.state().unwrap(), EngineState::Idle);
    handle.rerun(None).unwrap();

    let moved = handle.with_engine(|engine| engine.next_stage()).unwrap().unwrap();
    assert!(moved);
    let stage = handle
        .with_engine(|engine| engine.active().map(|a| a.stage_index))
        .unwrap();
    assert_eq!(stage, Some(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_burst_of_changes_is_coalesced() {
    let events = Arc::new(RecordingEventPublisher::new());
    let provider = Arc::new(InMemoryMetadataProvider::new(vec![ct_chest_study()]));
    let engine = ProtocolEngine::new(provider.clone(), registry_with(vec![ct_axial_protocol(), mr_only_protocol()]))
        .with_publisher(events.clone());

    let handle = EngineHandle::new(engine);
    let task = spawn_reevaluation(handle.clone(), provider.subscribe());

    const BURST: usize = 20;
    let mut last = 0;
    for i in 0..BURST {
        let study = if i % 2 == 0 { ct_chest_study() } else { mr_brain_study() };
        last = provider.replace_studies(vec![study]).unwrap();
    }

    let mut applied = None;
    for _ in 0..200 {
        applied = handle.with_engine(|engine| engine.last_generation()).unwrap();
        if applied == Some(last) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(applied, Some(last));

    // 最后一次变更为 MR 检查
    let active = handle
        .with_engine(|engine| engine.active().map(|a| a.protocol_id().to_string()))
        .unwrap();
    assert_eq!(active.as_deref(), Some("mr-only"));

    let runs = events.count_of(ProtocolEventType::ProtocolMatched);
    assert!(runs >= 1 && runs <= BURST, "runs = {}", runs);

    task.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_change_during_running_evaluation_is_applied() {
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let gate = Arc::new(EvaluationGate {
        armed: AtomicBool::new(false),
        started: Mutex::new(started_tx),
        release: Mutex::new(release_rx),
    });

    let mut resolver = AttributeResolver::with_builtins();
    let gate_fn = gate.clone();
    resolver.register(DerivedAttribute::new("SlowGate", "Slow gate", move |_, _| {
        gate_fn.wait_if_armed();
        Ok(None)
    }));

    let gated = Protocol::new("gated", "Gated").with_stage(Stage::grid("gated", 1, 1).with_viewport(
        ViewportDefinition::new().with_series_rule(MatchingRule::new("SlowGate", Constraint::equals("open"))),
    ));

    let provider = Arc::new(InMemoryMetadataProvider::new(vec![mr_brain_study()]));
    let engine = ProtocolEngine::new(
        provider.clone(),
        registry_with(vec![mr_only_protocol(), ct_axial_protocol(), gated]),
    )
    .with_resolver(Arc::new(resolver));

    let handle = EngineHandle::new(engine);
    let task = spawn_reevaluation(handle.clone(), provider.subscribe());

    // 显式重算在另一线程中被闸门拦住
    gate.armed.store(true, Ordering::SeqCst);
    let explicit = {
        let handle = handle.clone();
        std::thread::spawn(move || handle.rerun(None))
    };
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(handle.is_evaluating());

    // 重算进行中卸载 MR，改为 CT
    let generation = provider.replace_studies(vec![ct_chest_study()]).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    release_tx.send(()).unwrap();

    let mut applied = None;
    for _ in 0..300 {
        applied = handle.with_engine(|engine| engine.last_generation()).unwrap();
        if applied == Some(generation) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(applied, Some(generation));
    assert_eq!(explicit.join().unwrap().unwrap(), EngineState::Applied);

    let bound = handle
        .with_engine(|engine| {
            let protocol = engine.active().map(|a| a.protocol_id().to_string());
            let series = engine
                .current_bindings()
                .first()
                .and_then(|b| b.display_set())
                .map(|d| d.series_instance_uid.clone());
            (protocol, series)
        })
        .unwrap();
    assert_eq!(bound.0.as_deref(), Some("ct-axial"));
    assert_eq!(bound.1.as_deref(), Some("1.2.840.100.1"));

    task.abort();
}

#[test]
fn test_nested_access_on_same_thread_is_rejected() {
    let provider = Arc::new(InMemoryMetadataProvider::new(vec![ct_chest_study()]));
    let handle = EngineHandle::new(ProtocolEngine::new(provider, registry_with(vec![ct_axial_protocol()])));

    // 同线程的锁内访问同样按重入处理，而不是死锁
    let nested = handle.with_engine(|_| handle.state()).unwrap();
    assert!(matches!(nested, Err(EngineError::ReentrantEvaluation)));
    assert!(!handle.is_evaluating());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_task_ends_when_provider_dropped() {
    let provider = InMemoryMetadataProvider::new(vec![]);
    let changes = provider.subscribe();
    let engine = ProtocolEngine::new(
        Arc::new(InMemoryMetadataProvider::new(vec![])),
        registry_with(vec![ct_axial_protocol()]),
    );

    let task = spawn_reevaluation(EngineHandle::new(engine), changes);
    drop(provider);

    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("reevaluation task should stop")
        .unwrap();
}
