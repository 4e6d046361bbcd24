//! End-to-end tests of the async delivery path: gateway, queue, worker,
//! status store, and audit log wired together with a real router.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde_json::{Value, json};

use caproute_delivery::{
    AcceptGateway, AuditKind, AuditLog, DurableQueue, GatewayConfig, InMemoryAuditLog,
    InMemoryQueue, InMemoryStatusStore, JobExecutor, JobState, QueueConfig, StatusStore, Worker,
    WorkerConfig,
};
use caproute_protocol::{Envelope, ErrorCode, PROTOCOL_VERSION};
use caproute_registry::{NodeDescriptor, NodeId, NodeRegistry};
use caproute_router::{HandlerDispatcher, RouteError, Router};

struct Fixture {
    gateway: AcceptGateway,
    queue: Arc<InMemoryQueue>,
    store: Arc<InMemoryStatusStore>,
    audit: Arc<InMemoryAuditLog>,
    executor: Arc<dyn JobExecutor>,
}

impl Fixture {
    fn new(executor: Arc<dyn JobExecutor>) -> Self {
        let queue = Arc::new(InMemoryQueue::default());
        let store = Arc::new(InMemoryStatusStore::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let gateway = AcceptGateway::new(
            Arc::clone(&queue) as Arc<dyn DurableQueue>,
            Arc::clone(&store) as Arc<dyn StatusStore>,
            Arc::clone(&audit) as Arc<dyn AuditLog>,
        );
        Self {
            gateway,
            queue,
            store,
            audit,
            executor,
        }
    }

    fn worker(&self) -> Worker {
        Worker::new(
            Arc::clone(&self.queue) as Arc<dyn DurableQueue>,
            Arc::clone(&self.store) as Arc<dyn StatusStore>,
            Arc::clone(&self.audit) as Arc<dyn AuditLog>,
            Arc::clone(&self.executor),
        )
        .with_config(WorkerConfig {
            retry_backoff: Duration::ZERO,
            poll_interval: Duration::from_millis(5),
            ..WorkerConfig::default()
        })
    }

    /// Drive workers until the queue drains.
    async fn drain(&self, worker: &Worker) {
        while worker.run_once().await.unwrap() {}
    }
}

fn echo_router() -> Arc<Router> {
    let registry = Arc::new(NodeRegistry::default());
    registry
        .register(
            NodeDescriptor::new(NodeId::parse("echo-node").unwrap(), "1.0.0")
                .with_protocols([PROTOCOL_VERSION])
                .with_capabilities(["echo"]),
        )
        .unwrap();
    let mut dispatcher = HandlerDispatcher::new();
    dispatcher
        .register_fn("echo", |mut message| {
            message.payload.insert("echoed".into(), json!(true));
            Ok(message)
        })
        .unwrap();
    Arc::new(Router::new(registry, Arc::new(dispatcher)))
}

fn raw(message_id: &str, intent: &str) -> Value {
    json!({
        "protocol_version": PROTOCOL_VERSION,
        "message_id": message_id,
        "intent": intent,
        "payload": { "text": "hi" },
    })
}

#[tokio::test]
async fn accepted_job_completes_through_router() {
    let fixture = Fixture::new(echo_router());
    fixture.gateway.accept(&raw("m-1", "echo")).await.unwrap();

    let worker = fixture.worker();
    fixture.drain(&worker).await;

    let status = fixture.gateway.status("m-1").await.unwrap().unwrap();
    assert_eq!(status.state, JobState::Completed);
    assert_eq!(status.attempts, 0);
    let result = status.result.unwrap();
    assert_eq!(result.payload["echoed"], json!(true));

    let kinds: Vec<_> = fixture
        .gateway
        .replay("m-1")
        .await
        .unwrap()
        .iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            AuditKind::Enqueued,
            AuditKind::WorkerReceive,
            AuditKind::WorkerComplete
        ]
    );
}

#[tokio::test]
async fn duplicate_submissions_execute_once() {
    struct CountingExecutor {
        calls: AtomicU32,
    }
    #[async_trait::async_trait]
    impl JobExecutor for CountingExecutor {
        async fn execute(&self, message: &Envelope) -> Result<Envelope, RouteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(message.clone())
        }
    }

    let executor = Arc::new(CountingExecutor {
        calls: AtomicU32::new(0),
    });
    let fixture = Fixture::new(Arc::clone(&executor) as Arc<dyn JobExecutor>);

    // Five identical submissions.
    let mut handles = Vec::new();
    for _ in 0..5 {
        handles.push(fixture.gateway.accept(&raw("m-dup", "echo")).await.unwrap());
    }
    assert!(handles.windows(2).all(|w| w[0] == w[1]));
    // Only the first accept enqueued anything.
    assert_eq!(fixture.queue.depth().await.unwrap(), 1);

    let worker = fixture.worker();
    fixture.drain(&worker).await;

    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    let status = fixture.gateway.status("m-dup").await.unwrap().unwrap();
    assert_eq!(status.state, JobState::Completed);
}

#[tokio::test]
async fn redelivered_completed_job_is_not_reexecuted() {
    struct CountingExecutor {
        calls: AtomicU32,
    }
    #[async_trait::async_trait]
    impl JobExecutor for CountingExecutor {
        async fn execute(&self, message: &Envelope) -> Result<Envelope, RouteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(message.clone())
        }
    }

    let executor = Arc::new(CountingExecutor {
        calls: AtomicU32::new(0),
    });
    let fixture = Fixture::new(Arc::clone(&executor) as Arc<dyn JobExecutor>);
    fixture.gateway.accept(&raw("m-1", "echo")).await.unwrap();

    let worker = fixture.worker();
    fixture.drain(&worker).await;
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);

    // Simulate a duplicate delivery of the already-finished message.
    let envelope = Envelope::validate(&raw("m-1", "echo")).unwrap();
    fixture
        .queue
        .enqueue(caproute_delivery::Delivery::new(envelope))
        .await
        .unwrap();
    fixture.drain(&worker).await;

    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    let kinds: Vec<_> = fixture
        .gateway
        .replay("m-1")
        .await
        .unwrap()
        .iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(*kinds.last().unwrap(), AuditKind::DuplicateDelivery);
}

#[tokio::test]
async fn retryable_failures_exhaust_into_dlq() {
    struct AlwaysTimeout {
        calls: AtomicU32,
    }
    #[async_trait::async_trait]
    impl JobExecutor for AlwaysTimeout {
        async fn execute(&self, _message: &Envelope) -> Result<Envelope, RouteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(RouteError::new(ErrorCode::NodeTimeout, "node timed out"))
        }
    }

    let executor = Arc::new(AlwaysTimeout {
        calls: AtomicU32::new(0),
    });
    let fixture = Fixture::new(Arc::clone(&executor) as Arc<dyn JobExecutor>);
    fixture.gateway.accept(&raw("m-1", "echo")).await.unwrap();

    let worker = fixture.worker();
    fixture.drain(&worker).await;

    assert_eq!(executor.calls.load(Ordering::SeqCst), 3);
    let status = fixture.gateway.status("m-1").await.unwrap().unwrap();
    assert_eq!(status.state, JobState::Dlq);
    assert_eq!(status.attempts, 3);
    assert_eq!(status.last_error.as_deref(), Some("E_NODE_TIMEOUT"));

    let kinds: Vec<_> = fixture
        .gateway
        .replay("m-1")
        .await
        .unwrap()
        .iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            AuditKind::Enqueued,
            AuditKind::WorkerReceive,
            AuditKind::RetryScheduled,
            AuditKind::WorkerReceive,
            AuditKind::RetryScheduled,
            AuditKind::WorkerReceive,
            AuditKind::DeadLettered,
        ]
    );
}

#[tokio::test]
async fn attempt_count_survives_worker_replacement() {
    struct AlwaysTimeout;
    #[async_trait::async_trait]
    impl JobExecutor for AlwaysTimeout {
        async fn execute(&self, _message: &Envelope) -> Result<Envelope, RouteError> {
            Err(RouteError::new(ErrorCode::NodeTimeout, "node timed out"))
        }
    }

    let fixture = Fixture::new(Arc::new(AlwaysTimeout));
    fixture.gateway.accept(&raw("m-1", "echo")).await.unwrap();

    // First worker performs one attempt, then "crashes".
    let first = fixture.worker();
    first.run_once().await.unwrap();
    let status = fixture.gateway.status("m-1").await.unwrap().unwrap();
    assert_eq!(status.attempts, 1);

    // A fresh worker over the same shared state picks up where it left off.
    let second = fixture.worker();
    fixture.drain(&second).await;

    let status = fixture.gateway.status("m-1").await.unwrap().unwrap();
    assert_eq!(status.state, JobState::Dlq);
    assert_eq!(status.attempts, 3);
}

#[tokio::test]
async fn non_retryable_failure_parks_job_in_error_state() {
    let fixture = Fixture::new(echo_router());
    // The echo router has no node for this intent.
    fixture
        .gateway
        .accept(&raw("m-1", "summarize"))
        .await
        .unwrap();

    let worker = fixture.worker();
    fixture.drain(&worker).await;

    let status = fixture.gateway.status("m-1").await.unwrap().unwrap();
    assert_eq!(status.state, JobState::Error);
    assert_eq!(status.attempts, 0);
    assert_eq!(status.last_error.as_deref(), Some("E_NO_ROUTE"));

    let kinds: Vec<_> = fixture
        .gateway
        .replay("m-1")
        .await
        .unwrap()
        .iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            AuditKind::Enqueued,
            AuditKind::WorkerReceive,
            AuditKind::WorkerError
        ]
    );
}

#[tokio::test]
async fn retryable_node_error_envelope_is_retried() {
    struct FlakyNode {
        calls: AtomicU32,
    }
    #[async_trait::async_trait]
    impl JobExecutor for FlakyNode {
        async fn execute(&self, message: &Envelope) -> Result<Envelope, RouteError> {
            // First attempt returns a retryable error envelope, second
            // succeeds.
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(Envelope::error(
                    ErrorCode::NodeUnavailable,
                    "connection refused",
                    Some(&message.message_id),
                    json!({}),
                ))
            } else {
                Ok(message.clone())
            }
        }
    }

    let executor = Arc::new(FlakyNode {
        calls: AtomicU32::new(0),
    });
    let fixture = Fixture::new(Arc::clone(&executor) as Arc<dyn JobExecutor>);
    fixture.gateway.accept(&raw("m-1", "echo")).await.unwrap();

    let worker = fixture.worker();
    fixture.drain(&worker).await;

    assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    let status = fixture.gateway.status("m-1").await.unwrap().unwrap();
    assert_eq!(status.state, JobState::Completed);
    assert_eq!(status.attempts, 1);
}

#[tokio::test]
async fn audit_timeline_is_gap_free_and_ordered() {
    let fixture = Fixture::new(echo_router());
    fixture.gateway.accept(&raw("m-a", "echo")).await.unwrap();
    fixture.gateway.accept(&raw("m-b", "echo")).await.unwrap();

    let worker = fixture.worker();
    fixture.drain(&worker).await;

    for id in ["m-a", "m-b"] {
        let events = fixture.gateway.replay(id).await.unwrap();
        assert_eq!(events[0].kind, AuditKind::Enqueued);
        assert_eq!(events.last().unwrap().kind, AuditKind::WorkerComplete);
        assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));
        assert!(events.iter().all(|e| e.message_id == id));
    }
}

#[tokio::test]
async fn worker_run_loop_processes_and_shuts_down() {
    let fixture = Fixture::new(echo_router());
    fixture.gateway.accept(&raw("m-1", "echo")).await.unwrap();

    let worker = Arc::new(fixture.worker());
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = {
        let worker = Arc::clone(&worker);
        tokio::spawn(async move { worker.run(shutdown_rx).await })
    };

    // Wait for the job to finish, then stop the worker.
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status = fixture.gateway.status("m-1").await.unwrap().unwrap();
            if status.state.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();

    let status = fixture.gateway.status("m-1").await.unwrap().unwrap();
    assert_eq!(status.state, JobState::Completed);

    // A message accepted after shutdown stays queued until a fresh worker
    // picks it up.
    fixture.gateway.accept(&raw("m-2", "echo")).await.unwrap();
    let status = fixture.gateway.status("m-2").await.unwrap().unwrap();
    assert_eq!(status.state, JobState::Queued);

    let restarted = fixture.worker();
    fixture.drain(&restarted).await;
    let status = fixture.gateway.status("m-2").await.unwrap().unwrap();
    assert_eq!(status.state, JobState::Completed);
    // No duplicate side effect on the first job either.
    let events = fixture.gateway.replay("m-1").await.unwrap();
    assert_eq!(
        events
            .iter()
            .filter(|e| e.kind == AuditKind::WorkerReceive)
            .count(),
        1
    );
}

#[tokio::test]
async fn gateway_identity_gate_applies_before_enqueue() {
    let queue = Arc::new(InMemoryQueue::new(QueueConfig::default()));
    let store = Arc::new(InMemoryStatusStore::new());
    let audit = Arc::new(InMemoryAuditLog::new());
    let gateway = AcceptGateway::new(
        Arc::clone(&queue) as Arc<dyn DurableQueue>,
        store,
        audit,
    )
    .with_config(GatewayConfig {
        require_identity: true,
    });

    assert!(gateway.accept(&raw("m-1", "echo")).await.is_err());
    assert_eq!(queue.depth().await.unwrap(), 0);
}
