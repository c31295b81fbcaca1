use async_trait::async_trait;
use creationrepro::error::ServiceError;
use creationrepro::lifecycle::{Phase, Trial, TrialResult};
use creationrepro::observe::{Observer, TrialEvent};
use creationrepro::orchestrator::{ExecutionMode, Orchestrator};
use creationrepro::retry::{Remote, RetryPolicy, Suspend};
use creationrepro::service::{DatabaseService, OperationKind, RemoteOperation};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const BACKOFF: Duration = Duration::from_secs(15);
const POLL: Duration = Duration::from_secs(30);

type Step = (OperationKind, Result<(), ServiceError>);

/// Plays back a per-trial script of responses, asserting that calls arrive
/// in the scripted order and never cross trial names.
struct ScriptedService {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<(String, OperationKind)>>,
    invalidated: Mutex<Vec<String>>,
}

impl ScriptedService {
    fn new(scripts: Vec<(&str, Vec<Step>)>) -> Arc<Self> {
        Arc::new(ScriptedService {
            scripts: Mutex::new(
                scripts
                    .into_iter()
                    .map(|(name, steps)| (name.to_owned(), steps.into_iter().collect()))
                    .collect(),
            ),
            calls: Mutex::new(vec![]),
            invalidated: Mutex::new(vec![]),
        })
    }

    fn calls(&self) -> Vec<(String, OperationKind)> {
        self.calls.lock().unwrap().clone()
    }

    fn invalidated(&self) -> Vec<String> {
        self.invalidated.lock().unwrap().clone()
    }

    fn assert_drained(&self) {
        for (name, queue) in self.scripts.lock().unwrap().iter() {
            assert!(queue.is_empty(), "unconsumed script steps for {}", name);
        }
    }
}

#[async_trait]
impl DatabaseService for ScriptedService {
    async fn perform(&self, op: &RemoteOperation<'_>) -> creationrepro::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((op.name().to_owned(), op.kind()));
        let mut scripts = self.scripts.lock().unwrap();
        let queue = scripts
            .get_mut(op.name())
            .unwrap_or_else(|| panic!("unexpected trial name {}", op.name()));
        let (kind, response) = queue
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected extra call for {}", op.name()));
        assert_eq!(kind, op.kind(), "call out of scripted order for {}", op.name());
        response
    }

    async fn invalidate(&self, name: &str) {
        self.invalidated.lock().unwrap().push(name.to_owned());
    }
}

struct RecordingSuspend {
    pauses: Mutex<Vec<Duration>>,
}

impl RecordingSuspend {
    fn new() -> Arc<Self> {
        Arc::new(RecordingSuspend {
            pauses: Mutex::new(vec![]),
        })
    }

    fn pauses(&self) -> Vec<Duration> {
        self.pauses.lock().unwrap().clone()
    }
}

#[async_trait]
impl Suspend for RecordingSuspend {
    async fn pause(&self, duration: Duration) {
        self.pauses.lock().unwrap().push(duration);
    }
}

struct NullObserver;

impl Observer for NullObserver {
    fn observe(&self, _event: TrialEvent<'_>) {}
}

fn server(codes: &[i32]) -> ServiceError {
    ServiceError::server(codes.to_vec(), "scripted")
}

fn not_found() -> Result<(), ServiceError> {
    Err(server(&[4060]))
}

fn remote(
    service: Arc<ScriptedService>,
    suspend: Arc<RecordingSuspend>,
    policy: RetryPolicy,
    shutdown: Arc<AtomicBool>,
) -> Arc<Remote> {
    Arc::new(Remote::new(
        service,
        policy,
        suspend,
        Arc::new(NullObserver),
        shutdown,
    ))
}

fn trial(name: &str, remote: Arc<Remote>) -> Trial {
    Trial::new(name.to_owned(), remote, POLL, None)
}

#[tokio::test]
async fn visible_after_two_polls_ends_done() {
    let service = ScriptedService::new(vec![(
        "t0",
        vec![
            (OperationKind::CheckExistence, not_found()),
            (OperationKind::Create, Ok(())),
            (OperationKind::CheckExistence, not_found()),
            (OperationKind::CheckExistence, not_found()),
            (OperationKind::CheckExistence, Ok(())),
            (OperationKind::Delete, Ok(())),
        ],
    )]);
    let suspend = RecordingSuspend::new();
    let remote = remote(
        service.clone(),
        suspend.clone(),
        RetryPolicy::default(),
        Arc::new(AtomicBool::new(false)),
    );

    let record = trial("t0", remote).run().await;

    assert_eq!(record.phase, Phase::Done);
    assert_eq!(record.result, Some(TrialResult::Completed));
    assert_eq!(record.delete_attempts, 1);
    assert_eq!(record.visibility_waits, 2);
    // exactly the two polling sleeps, no retry backoffs
    assert_eq!(suspend.pauses(), vec![POLL, POLL]);
    assert_eq!(service.invalidated(), vec!["t0".to_owned()]);
    service.assert_drained();
}

#[tokio::test]
async fn fatal_create_abandons_without_polling() {
    let service = ScriptedService::new(vec![(
        "t0",
        vec![
            (OperationKind::CheckExistence, not_found()),
            (OperationKind::Create, Err(server(&[18456]))),
        ],
    )]);
    let suspend = RecordingSuspend::new();
    let remote = remote(
        service.clone(),
        suspend.clone(),
        RetryPolicy::default(),
        Arc::new(AtomicBool::new(false)),
    );

    let record = trial("t0", remote).run().await;

    assert_eq!(record.phase, Phase::Abandoned);
    assert!(matches!(record.result, Some(TrialResult::Abandoned(_))));
    // one check, one create, then nothing: no polling, no delete
    assert_eq!(
        service.calls(),
        vec![
            ("t0".to_owned(), OperationKind::CheckExistence),
            ("t0".to_owned(), OperationKind::Create),
        ]
    );
    assert!(service.invalidated().is_empty());
    assert!(suspend.pauses().is_empty());
}

#[tokio::test]
async fn transient_failures_are_retried_with_backoff() {
    let service = ScriptedService::new(vec![(
        "t0",
        vec![
            (OperationKind::CheckExistence, Err(server(&[40501]))),
            (OperationKind::CheckExistence, Err(ServiceError::Timeout)),
            (OperationKind::CheckExistence, Err(server(&[1205]))),
            (OperationKind::CheckExistence, Ok(())),
            (OperationKind::Delete, Ok(())),
        ],
    )]);
    let suspend = RecordingSuspend::new();
    let remote = remote(
        service.clone(),
        suspend.clone(),
        RetryPolicy::default(),
        Arc::new(AtomicBool::new(false)),
    );

    let record = trial("t0", remote).run().await;

    // three transient failures then success: four attempts, a backoff sleep
    // between each pair
    assert_eq!(record.check_attempts, 4);
    assert_eq!(suspend.pauses(), vec![BACKOFF, BACKOFF, BACKOFF]);
    assert_eq!(record.result, Some(TrialResult::Completed));
    service.assert_drained();
}

#[tokio::test]
async fn existing_database_is_dropped() {
    let service = ScriptedService::new(vec![(
        "t0",
        vec![
            (OperationKind::CheckExistence, Ok(())),
            (OperationKind::Delete, Ok(())),
        ],
    )]);
    let suspend = RecordingSuspend::new();
    let remote = remote(
        service.clone(),
        suspend,
        RetryPolicy::default(),
        Arc::new(AtomicBool::new(false)),
    );

    let record = trial("t0", remote).run().await;

    assert_eq!(record.phase, Phase::Done);
    assert_eq!(record.result, Some(TrialResult::Completed));
    assert_eq!(record.create_attempts, 0);
    assert_eq!(record.visibility_waits, 0);
    service.assert_drained();
}

#[tokio::test]
async fn fatal_delete_abandons_but_finishes() {
    let service = ScriptedService::new(vec![(
        "t0",
        vec![
            (OperationKind::CheckExistence, Ok(())),
            (OperationKind::Delete, Err(server(&[3702]))),
        ],
    )]);
    let suspend = RecordingSuspend::new();
    let remote = remote(
        service.clone(),
        suspend,
        RetryPolicy::default(),
        Arc::new(AtomicBool::new(false)),
    );

    let record = trial("t0", remote).run().await;

    assert_eq!(record.phase, Phase::Abandoned);
    assert!(matches!(record.result, Some(TrialResult::Abandoned(_))));
    service.assert_drained();
}

#[tokio::test]
async fn retry_ceiling_converts_to_fatal() {
    let service = ScriptedService::new(vec![(
        "t0",
        vec![
            (OperationKind::CheckExistence, Err(server(&[40501]))),
            (OperationKind::CheckExistence, Err(server(&[40501]))),
            (OperationKind::CheckExistence, Err(server(&[40501]))),
        ],
    )]);
    let suspend = RecordingSuspend::new();
    let remote = remote(
        service.clone(),
        suspend.clone(),
        RetryPolicy {
            backoff: BACKOFF,
            max_attempts: Some(3),
        },
        Arc::new(AtomicBool::new(false)),
    );

    let record = trial("t0", remote).run().await;

    assert_eq!(record.phase, Phase::Abandoned);
    assert_eq!(record.check_attempts, 3);
    // sleeps only between attempts, not after the exhausted one
    assert_eq!(suspend.pauses(), vec![BACKOFF, BACKOFF]);
    service.assert_drained();
}

#[tokio::test]
async fn shutdown_abandons_at_next_suspension_point() {
    let service = ScriptedService::new(vec![(
        "t0",
        vec![(OperationKind::CheckExistence, Err(server(&[40501])))],
    )]);
    let suspend = RecordingSuspend::new();
    let shutdown = Arc::new(AtomicBool::new(true));
    let remote = remote(
        service.clone(),
        suspend.clone(),
        RetryPolicy::default(),
        shutdown,
    );

    let record = trial("t0", remote).run().await;

    assert_eq!(record.phase, Phase::Abandoned);
    assert_eq!(
        record.result,
        Some(TrialResult::Abandoned(
            ServiceError::Interrupted.to_string()
        ))
    );
    assert_eq!(record.check_attempts, 1);
    assert_eq!(suspend.pauses(), vec![BACKOFF]);
    service.assert_drained();
}

#[tokio::test]
async fn poll_ceiling_abandons_stuck_trial() {
    let service = ScriptedService::new(vec![(
        "t0",
        vec![
            (OperationKind::CheckExistence, not_found()),
            (OperationKind::Create, Ok(())),
            (OperationKind::CheckExistence, not_found()),
            (OperationKind::CheckExistence, not_found()),
        ],
    )]);
    let suspend = RecordingSuspend::new();
    let remote = remote(
        service.clone(),
        suspend.clone(),
        RetryPolicy::default(),
        Arc::new(AtomicBool::new(false)),
    );

    let record = Trial::new("t0".to_owned(), remote, POLL, Some(2)).run().await;

    assert_eq!(record.phase, Phase::Abandoned);
    assert_eq!(record.visibility_waits, 2);
    // only the first wait sleeps; the second hits the ceiling
    assert_eq!(suspend.pauses(), vec![POLL]);
    service.assert_drained();
}

async fn run_all_with(mode: ExecutionMode) {
    let service = ScriptedService::new(vec![
        // trial 0: straight create-then-visible
        (
            "t0",
            vec![
                (OperationKind::CheckExistence, not_found()),
                (OperationKind::Create, Ok(())),
                (OperationKind::CheckExistence, Ok(())),
                (OperationKind::Delete, Ok(())),
            ],
        ),
        // trial 1: leftover database from an earlier run
        (
            "t1",
            vec![
                (OperationKind::CheckExistence, Ok(())),
                (OperationKind::Delete, Ok(())),
            ],
        ),
        // trial 2: delayed visibility
        (
            "t2",
            vec![
                (OperationKind::CheckExistence, not_found()),
                (OperationKind::Create, Ok(())),
                (OperationKind::CheckExistence, not_found()),
                (OperationKind::CheckExistence, Ok(())),
                (OperationKind::Delete, Ok(())),
            ],
        ),
        // trial 3: structurally failing create
        (
            "t3",
            vec![
                (OperationKind::CheckExistence, not_found()),
                (OperationKind::Create, Err(server(&[18456]))),
            ],
        ),
    ]);
    let suspend = RecordingSuspend::new();
    let remote = remote(
        service.clone(),
        suspend,
        RetryPolicy::default(),
        Arc::new(AtomicBool::new(false)),
    );
    let orchestrator = Orchestrator {
        remote,
        prefix: "t".to_owned(),
        poll_interval: POLL,
        max_visibility_waits: None,
        mode,
    };

    let records = orchestrator.run_all(4).await;

    assert_eq!(records.len(), 4);
    let names: Vec<_> = records.iter().map(|r| r.name.clone()).collect();
    for i in 0..4 {
        assert!(names.contains(&format!("t{}", i)));
    }
    for record in &records {
        assert!(record.result.is_some(), "{} not terminal", record.name);
    }
    let abandoned: Vec<_> = records
        .iter()
        .filter(|r| matches!(r.result, Some(TrialResult::Abandoned(_))))
        .map(|r| r.name.as_str())
        .collect();
    assert_eq!(abandoned, vec!["t3"]);
    service.assert_drained();
}

#[tokio::test]
async fn run_all_concurrent_reaches_terminal_states() {
    run_all_with(ExecutionMode::Concurrent).await;
}

#[tokio::test]
async fn run_all_sequential_reaches_terminal_states() {
    run_all_with(ExecutionMode::Sequential).await;
}

#[tokio::test]
async fn sequential_run_stops_between_trials_on_shutdown() {
    let service = ScriptedService::new(vec![]);
    let suspend = RecordingSuspend::new();
    let remote = remote(
        service.clone(),
        suspend,
        RetryPolicy::default(),
        Arc::new(AtomicBool::new(true)),
    );
    let orchestrator = Orchestrator {
        remote,
        prefix: "t".to_owned(),
        poll_interval: POLL,
        max_visibility_waits: None,
        mode: ExecutionMode::Sequential,
    };

    let records = orchestrator.run_all(4).await;
    assert!(records.is_empty());
    assert!(service.calls().is_empty());
}
