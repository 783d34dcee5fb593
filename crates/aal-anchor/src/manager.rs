use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use aal_types::{AnchorResult, AnchorStatus, Digest};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{AnchorBackend, AnchorPayload};
use crate::circuit::{Admission, CircuitBreaker, CircuitSnapshot};
use crate::config::DispatcherConfig;
use crate::error::{AnchorError, BackendError};
use crate::registry::BackendRegistry;
use crate::retry::RetryPolicy;

/// Invoked on a dispatcher worker once a queued anchor request completes.
pub type AnchorCallback = Box<dyn FnOnce(&AnchorReport) + Send + 'static>;

/// Everything that happened while anchoring one root.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorReport {
    pub batch_id: u64,
    pub root_hash: Digest,
    /// The first successful result, or a `failed` result carrying the last
    /// error.
    pub outcome: AnchorResult,
    /// One result per backend actually called, in call order.
    pub results: Vec<AnchorResult>,
    /// Backends skipped because their circuit was open.
    pub skipped: Vec<String>,
}

impl AnchorReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn status(&self) -> AnchorStatus {
        self.outcome.status
    }
}

/// Dispatcher counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchStats {
    /// Requests accepted onto the queue.
    pub accepted: u64,
    /// Requests refused because the queue was full or stopped.
    pub rejected: u64,
    /// Roots anchored by at least one backend.
    pub succeeded: u64,
    /// Roots no backend accepted.
    pub failed: u64,
    /// Backend calls short-circuited by an open breaker.
    pub short_circuited: u64,
}

/// Health of one backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendHealth {
    pub circuit: CircuitSnapshot,
    pub healthy: bool,
    /// Most recent results, oldest first.
    pub last_results: Vec<AnchorResult>,
}

struct Job {
    payload: AnchorPayload,
    callback: Option<AnchorCallback>,
    reply: Option<oneshot::Sender<AnchorReport>>,
}

struct BackendSlot {
    backend: Arc<dyn AnchorBackend>,
    circuit: Mutex<CircuitBreaker>,
    recent: Mutex<VecDeque<AnchorResult>>,
}

#[derive(Default)]
struct Counters {
    accepted: AtomicU64,
    rejected: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    short_circuited: AtomicU64,
}

struct Inner {
    config: DispatcherConfig,
    slots: Vec<BackendSlot>,
    history: Mutex<VecDeque<AnchorResult>>,
    counters: Counters,
    /// Raised when the stop grace period expires; checked between attempts.
    stop: AtomicBool,
}

/// Priority-ordered, circuit-protected anchoring over a set of backends,
/// fed by a bounded queue drained by a fixed worker pool.
pub struct AnchorManager {
    inner: Arc<Inner>,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl AnchorManager {
    /// Create a dispatcher over `backends`, in priority order. Call
    /// [`AnchorManager::start`] before queueing work.
    pub fn new(config: DispatcherConfig, backends: Vec<Arc<dyn AnchorBackend>>) -> Self {
        let slots = backends
            .into_iter()
            .map(|backend| BackendSlot {
                backend,
                circuit: Mutex::new(CircuitBreaker::new(
                    config.failure_threshold,
                    config.reset_timeout(),
                )),
                recent: Mutex::new(VecDeque::new()),
            })
            .collect();
        Self {
            inner: Arc::new(Inner {
                config,
                slots,
                history: Mutex::new(VecDeque::new()),
                counters: Counters::default(),
                stop: AtomicBool::new(false),
            }),
            sender: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Build backends from configuration via `registry`.
    pub fn from_config(config: DispatcherConfig, registry: &BackendRegistry) -> Result<Self, AnchorError> {
        let backends = registry.build_all(&config)?;
        Ok(Self::new(config, backends))
    }

    /// Spawn the worker pool. Idempotent while running.
    pub fn start(&self) {
        let mut sender = self.sender.lock().expect("dispatcher lock poisoned");
        if sender.is_some() {
            return;
        }
        let (tx, rx) = mpsc::channel(self.inner.config.queue_capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        self.inner.stop.store(false, Ordering::SeqCst);

        let mut workers = self.workers.lock().expect("dispatcher lock poisoned");
        let count = self.inner.config.workers.max(1);
        for worker in 0..count {
            let inner = Arc::clone(&self.inner);
            let rx = Arc::clone(&rx);
            workers.push(tokio::spawn(inner.worker_loop(worker, rx)));
        }
        *sender = Some(tx);
        info!(workers = count, backends = self.inner.slots.len(), "anchor dispatcher started");
    }

    pub fn is_running(&self) -> bool {
        self.sender.lock().expect("dispatcher lock poisoned").is_some()
    }

    /// Queue `root` for anchoring and return immediately.
    ///
    /// Returns `false` when the queue is full or the dispatcher is not
    /// running; the caller should treat that as "anchoring deferred".
    pub fn anchor_async(
        &self,
        root_hash: Digest,
        batch_id: u64,
        metadata: BTreeMap<String, String>,
        callback: Option<AnchorCallback>,
    ) -> bool {
        let Some(sender) = self.sender() else {
            self.inner.counters.rejected.fetch_add(1, Ordering::Relaxed);
            debug!(batch_id, "anchor request refused: dispatcher not running");
            return false;
        };
        let job = Job {
            payload: AnchorPayload::new(root_hash, batch_id).with_metadata(metadata),
            callback,
            reply: None,
        };
        match sender.try_send(job) {
            Ok(()) => {
                self.inner.counters.accepted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                self.inner.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(batch_id, error = %e, "anchor request refused");
                false
            }
        }
    }

    /// Queue `root` and wait up to `timeout` for the outcome.
    pub async fn anchor_sync(
        &self,
        root_hash: Digest,
        batch_id: u64,
        metadata: BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<AnchorResult, AnchorError> {
        let sender = self.sender().ok_or(AnchorError::NotRunning)?;
        let (reply, response) = oneshot::channel();
        let job = Job {
            payload: AnchorPayload::new(root_hash, batch_id).with_metadata(metadata),
            callback: None,
            reply: Some(reply),
        };

        let deadline = tokio::time::Instant::now() + timeout;
        match tokio::time::timeout_at(deadline, sender.send(job)).await {
            Err(_) => {
                self.inner.counters.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(AnchorError::QueueFull);
            }
            Ok(Err(_)) => return Err(AnchorError::NotRunning),
            Ok(Ok(())) => {
                self.inner.counters.accepted.fetch_add(1, Ordering::Relaxed);
            }
        }
        match tokio::time::timeout_at(deadline, response).await {
            Ok(Ok(report)) => Ok(report.outcome),
            Ok(Err(_)) => Err(AnchorError::NotRunning),
            Err(_) => Err(AnchorError::Timeout(timeout)),
        }
    }

    /// Anchor `root` on the calling task, bypassing the queue.
    pub async fn execute(
        &self,
        root_hash: Digest,
        batch_id: u64,
        metadata: BTreeMap<String, String>,
    ) -> AnchorReport {
        let payload = AnchorPayload::new(root_hash, batch_id).with_metadata(metadata);
        self.inner.execute(&payload).await
    }

    /// Circuit state, liveness and recent results per backend.
    pub async fn health_check(&self) -> BTreeMap<String, BackendHealth> {
        let mut report = BTreeMap::new();
        let check_timeout = self.inner.config.request_timeout();
        for slot in &self.inner.slots {
            let healthy = tokio::time::timeout(check_timeout, slot.backend.is_healthy())
                .await
                .unwrap_or(false);
            let circuit = slot
                .circuit
                .lock()
                .expect("circuit lock poisoned")
                .snapshot(Instant::now());
            let last_results = slot
                .recent
                .lock()
                .expect("history lock poisoned")
                .iter()
                .cloned()
                .collect();
            report.insert(
                slot.backend.id().to_string(),
                BackendHealth {
                    circuit,
                    healthy,
                    last_results,
                },
            );
        }
        report
    }

    pub fn stats(&self) -> DispatchStats {
        let c = &self.inner.counters;
        DispatchStats {
            accepted: c.accepted.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            succeeded: c.succeeded.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            short_circuited: c.short_circuited.load(Ordering::Relaxed),
        }
    }

    /// Recent results across all backends, oldest first.
    pub fn history(&self) -> Vec<AnchorResult> {
        self.inner
            .history
            .lock()
            .expect("history lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Backend ids in priority order.
    pub fn backend_ids(&self) -> Vec<String> {
        self.inner
            .slots
            .iter()
            .map(|s| s.backend.id().to_string())
            .collect()
    }

    /// Close the queue and let workers drain it. Workers still busy after
    /// `grace` are told to stop retrying and then aborted.
    pub async fn stop(&self, grace: Duration) {
        let sender = self.sender.lock().expect("dispatcher lock poisoned").take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let handles: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .expect("dispatcher lock poisoned")
            .drain(..)
            .collect();
        let deadline = tokio::time::Instant::now() + grace;
        let mut aborted = 0;
        for mut handle in handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                self.inner.stop.store(true, Ordering::SeqCst);
                handle.abort();
                aborted += 1;
            }
        }
        if aborted > 0 {
            warn!(aborted, ?grace, "anchor workers did not drain within grace period");
        } else {
            info!("anchor dispatcher stopped");
        }
    }

    /// Stop without draining queued work.
    pub async fn shutdown_now(&self) {
        self.inner.stop.store(true, Ordering::SeqCst);
        self.stop(Duration::ZERO).await;
    }

    fn sender(&self) -> Option<mpsc::Sender<Job>> {
        self.sender.lock().expect("dispatcher lock poisoned").clone()
    }
}

impl Inner {
    async fn worker_loop(self: Arc<Self>, worker: usize, rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>) {
        debug!(worker, "anchor worker started");
        loop {
            let job = rx.lock().await.recv().await;
            let Some(job) = job else { break };

            let report = self.execute(&job.payload).await;
            if let Some(callback) = job.callback {
                callback(&report);
            }
            if let Some(reply) = job.reply {
                let _ = reply.send(report);
            }
        }
        debug!(worker, "anchor worker exiting");
    }

    async fn execute(&self, payload: &AnchorPayload) -> AnchorReport {
        let mut results: Vec<AnchorResult> = Vec::new();
        let mut skipped = Vec::new();
        let mut first_success: Option<AnchorResult> = None;
        let timeout = self.config.request_timeout();
        let trial_policy = RetryPolicy::none();

        for slot in &self.slots {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            let id = slot.backend.id();
            let admission = slot
                .circuit
                .lock()
                .expect("circuit lock poisoned")
                .try_acquire(Instant::now());
            if !admission.is_allowed() {
                self.counters.short_circuited.fetch_add(1, Ordering::Relaxed);
                debug!(backend = id, batch_id = payload.batch_id, "circuit open; skipping backend");
                skipped.push(id.to_string());
                continue;
            }
            let trial = admission == Admission::Trial;
            let policy = if trial { &trial_policy } else { &self.config.retry };

            let guard = TrialGuard::new(&slot.circuit, trial);
            let pending = AnchorResult::pending(Uuid::now_v7(), id, payload.batch_id, payload.root_hash);
            let (outcome, attempts) = policy
                .run(timeout, &self.stop, |_| slot.backend.submit(payload))
                .await;
            guard.disarm();

            let mut result = match outcome {
                Ok(submission) => {
                    slot.circuit.lock().expect("circuit lock poisoned").record_success();
                    pending.succeed(submission.transaction_id, submission.confirmed)
                }
                Err(err) => {
                    slot.circuit
                        .lock()
                        .expect("circuit lock poisoned")
                        .record_failure(Instant::now());
                    warn!(backend = id, batch_id = payload.batch_id, attempts, error = %err, "anchor attempt failed");
                    pending.fail(err.to_string())
                }
            };
            result.attempts = attempts;
            self.record(slot, &result);

            let succeeded = result.is_success();
            if succeeded && first_success.is_none() {
                first_success = Some(result.clone());
            }
            results.push(result);

            if succeeded && !self.config.anchor_to_all {
                break;
            }
            if !succeeded && !self.config.failover && !self.config.anchor_to_all {
                break;
            }
        }

        let outcome = match first_success {
            Some(result) => {
                self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                info!(
                    batch_id = payload.batch_id,
                    backend = %result.backend,
                    tx = result.transaction_id.as_deref().unwrap_or(""),
                    "root anchored"
                );
                result
            }
            None => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                let outcome = results.last().cloned().unwrap_or_else(|| {
                    let reason = if self.stop.load(Ordering::SeqCst) {
                        "dispatcher stopping".to_string()
                    } else {
                        BackendError::Unavailable("every backend circuit is open".into()).to_string()
                    };
                    AnchorResult::pending(Uuid::now_v7(), "none", payload.batch_id, payload.root_hash)
                        .fail(reason)
                });
                warn!(
                    batch_id = payload.batch_id,
                    error = outcome.error.as_deref().unwrap_or(""),
                    "no backend anchored root"
                );
                outcome
            }
        };

        AnchorReport {
            batch_id: payload.batch_id,
            root_hash: payload.root_hash,
            outcome,
            results,
            skipped,
        }
    }

    fn record(&self, slot: &BackendSlot, result: &AnchorResult) {
        push_bounded(
            &mut slot.recent.lock().expect("history lock poisoned"),
            result.clone(),
            self.config.backend_history,
        );
        push_bounded(
            &mut self.history.lock().expect("history lock poisoned"),
            result.clone(),
            self.config.history_size,
        );
    }
}

/// Hands a half-open trial back to the breaker if the call is dropped
/// before its outcome is recorded, as happens when a worker is aborted.
struct TrialGuard<'a> {
    circuit: &'a Mutex<CircuitBreaker>,
    armed: bool,
}

impl<'a> TrialGuard<'a> {
    fn new(circuit: &'a Mutex<CircuitBreaker>, trial: bool) -> Self {
        Self { circuit, armed: trial }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(mut circuit) = self.circuit.lock() {
            circuit.abandon_trial();
            debug!("half-open trial abandoned");
        }
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, cap: usize) {
    if cap == 0 {
        return;
    }
    while queue.len() >= cap {
        queue.pop_front();
    }
    queue.push_back(item);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Submission;
    use crate::circuit::CircuitState;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    /// Scriptable backend: fails while `failing` is set, hangs while
    /// `stalled` is set, counts calls.
    struct Scripted {
        id: String,
        failing: AtomicBool,
        stalled: AtomicBool,
        delay: Duration,
        calls: AtomicU32,
    }

    impl Scripted {
        fn ok(id: &str) -> Arc<Self> {
            Self::build(id, false, Duration::ZERO)
        }

        fn failing(id: &str) -> Arc<Self> {
            Self::build(id, true, Duration::ZERO)
        }

        fn slow(id: &str, delay: Duration) -> Arc<Self> {
            Self::build(id, false, delay)
        }

        fn build(id: &str, failing: bool, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                id: id.into(),
                failing: AtomicBool::new(failing),
                stalled: AtomicBool::new(false),
                delay,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AnchorBackend for Scripted {
        fn id(&self) -> &str {
            &self.id
        }

        async fn submit(&self, payload: &AnchorPayload) -> Result<Submission, BackendError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.stalled.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(BackendError::Unavailable(format!("{} is down", self.id)));
            }
            Ok(Submission {
                transaction_id: format!("{}-{}-{n}", self.id, payload.batch_id),
                confirmed: true,
            })
        }
    }

    fn config() -> DispatcherConfig {
        DispatcherConfig {
            retry: RetryPolicy::none(),
            failure_threshold: 3,
            reset_timeout_ms: 200,
            request_timeout_ms: 1_000,
            ..Default::default()
        }
    }

    fn manager(config: DispatcherConfig, backends: &[Arc<Scripted>]) -> AnchorManager {
        let backends = backends
            .iter()
            .map(|b| Arc::clone(b) as Arc<dyn AnchorBackend>)
            .collect();
        AnchorManager::new(config, backends)
    }

    fn root(n: u8) -> Digest {
        Digest::of(&[n])
    }

    #[tokio::test]
    async fn first_success_stops_the_walk() {
        let a = Scripted::ok("a");
        let b = Scripted::ok("b");
        let m = manager(config(), &[a.clone(), b.clone()]);

        let report = m.execute(root(1), 1, BTreeMap::new()).await;
        assert!(report.is_success());
        assert_eq!(report.status(), AnchorStatus::Confirmed);
        assert_eq!(report.outcome.backend, "a");
        assert_eq!(report.results.len(), 1);
        assert_eq!((a.calls(), b.calls()), (1, 0));
    }

    #[tokio::test]
    async fn failover_moves_to_next_backend() {
        let a = Scripted::failing("a");
        let b = Scripted::ok("b");
        let m = manager(config(), &[a.clone(), b.clone()]);

        let report = m.execute(root(1), 1, BTreeMap::new()).await;
        assert!(report.is_success());
        assert_eq!(report.outcome.backend, "b");
        assert_eq!(report.results[0].status, AnchorStatus::Failed);
        assert_eq!(report.results.len(), 2);
    }

    #[tokio::test]
    async fn without_failover_first_failure_is_final() {
        let a = Scripted::failing("a");
        let b = Scripted::ok("b");
        let m = manager(
            DispatcherConfig {
                failover: false,
                ..config()
            },
            &[a.clone(), b.clone()],
        );
        let report = m.execute(root(1), 1, BTreeMap::new()).await;
        assert!(!report.is_success());
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn anchor_to_all_calls_every_backend() {
        let a = Scripted::ok("a");
        let b = Scripted::failing("b");
        let c = Scripted::ok("c");
        let m = manager(
            DispatcherConfig {
                anchor_to_all: true,
                ..config()
            },
            &[a.clone(), b.clone(), c.clone()],
        );
        let report = m.execute(root(1), 1, BTreeMap::new()).await;
        assert!(report.is_success());
        assert_eq!(report.outcome.backend, "a");
        assert_eq!(report.results.len(), 3);
        assert_eq!((a.calls(), b.calls(), c.calls()), (1, 1, 1));
    }

    #[tokio::test]
    async fn all_failing_yields_failed_outcome_with_last_error() {
        let a = Scripted::failing("a");
        let b = Scripted::failing("b");
        let m = manager(config(), &[a, b]);
        let report = m.execute(root(1), 9, BTreeMap::new()).await;
        assert_eq!(report.status(), AnchorStatus::Failed);
        assert_eq!(report.outcome.batch_id, 9);
        assert!(report.outcome.error.as_deref().unwrap().contains("b is down"));
        assert_eq!(m.stats().failed, 1);
    }

    #[tokio::test]
    async fn retries_count_as_one_circuit_failure() {
        let a = Scripted::failing("a");
        let m = manager(
            DispatcherConfig {
                retry: RetryPolicy::fixed(2, Duration::from_millis(1)),
                ..config()
            },
            &[a.clone()],
        );
        let report = m.execute(root(1), 1, BTreeMap::new()).await;
        assert_eq!(a.calls(), 3);
        assert_eq!(report.results[0].attempts, 3);
        let health = m.health_check().await;
        assert_eq!(health["a"].circuit.consecutive_failures, 1);
        assert_eq!(health["a"].circuit.state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn open_circuit_short_circuits_then_admits_one_trial() {
        let a = Scripted::failing("a");
        let m = manager(config(), &[a.clone()]);

        for batch in 1..=3 {
            m.execute(root(batch), batch as u64, BTreeMap::new()).await;
        }
        assert_eq!(a.calls(), 3);

        // Inside the reset window: nothing reaches the backend.
        for batch in 4..=6 {
            let report = m.execute(root(batch), batch as u64, BTreeMap::new()).await;
            assert_eq!(report.skipped, vec!["a".to_string()]);
            assert!(report.results.is_empty());
        }
        assert_eq!(a.calls(), 3);
        assert_eq!(m.stats().short_circuited, 3);

        tokio::time::sleep(Duration::from_millis(250)).await;
        let report = m.execute(root(7), 7, BTreeMap::new()).await;
        assert_eq!(report.results.len(), 1);
        assert_eq!(a.calls(), 4);

        // Failed trial: open again, no further calls.
        m.execute(root(8), 8, BTreeMap::new()).await;
        assert_eq!(a.calls(), 4);
    }

    #[tokio::test]
    async fn successful_trial_closes_circuit() {
        let a = Scripted::failing("a");
        let m = manager(config(), &[a.clone()]);
        for batch in 1..=3 {
            m.execute(root(batch), batch as u64, BTreeMap::new()).await;
        }
        a.failing.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert!(m.execute(root(4), 4, BTreeMap::new()).await.is_success());
        assert_eq!(m.health_check().await["a"].circuit.state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn trial_aborted_by_shutdown_is_retried_after_restart() {
        let a = Scripted::failing("a");
        let m = manager(config(), &[a.clone()]);
        for batch in 1..=3 {
            m.execute(root(batch), batch as u64, BTreeMap::new()).await;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;

        // The trial hangs on a worker until shutdown aborts it.
        a.stalled.store(true, Ordering::SeqCst);
        m.start();
        assert!(m.anchor_async(root(4), 4, BTreeMap::new(), None));
        while a.calls() < 4 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        m.shutdown_now().await;
        assert_eq!(m.health_check().await["a"].circuit.state, CircuitState::HalfOpen);

        a.stalled.store(false, Ordering::SeqCst);
        a.failing.store(false, Ordering::SeqCst);
        m.start();
        let outcome = m
            .anchor_sync(root(5), 5, BTreeMap::new(), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(a.calls(), 5);
        assert_eq!(m.health_check().await["a"].circuit.state, CircuitState::Closed);
        m.shutdown_now().await;
    }

    #[tokio::test]
    async fn anchor_async_runs_callback_on_worker() {
        let a = Scripted::ok("a");
        let m = manager(config(), &[a.clone()]);
        m.start();

        let (tx, rx) = oneshot::channel();
        let accepted = m.anchor_async(
            root(1),
            1,
            BTreeMap::from([("tenant".to_string(), "acme".to_string())]),
            Some(Box::new(move |report: &AnchorReport| {
                let _ = tx.send(report.clone());
            })),
        );
        assert!(accepted);

        let report = tokio::time::timeout(Duration::from_secs(2), rx).await.unwrap().unwrap();
        assert!(report.is_success());
        assert_eq!(report.batch_id, 1);
        m.stop(Duration::from_secs(1)).await;
        assert!(!m.is_running());
    }

    #[tokio::test]
    async fn anchor_async_refuses_when_stopped_or_full() {
        let a = Scripted::slow("a", Duration::from_millis(300));
        let m = manager(
            DispatcherConfig {
                workers: 1,
                queue_capacity: 1,
                ..config()
            },
            &[a],
        );
        assert!(!m.anchor_async(root(0), 0, BTreeMap::new(), None));

        m.start();
        // The worker cannot run until this task yields, so the queue holds
        // exactly one request.
        let accepted: Vec<bool> = (1..=4)
            .map(|i| m.anchor_async(root(i), i as u64, BTreeMap::new(), None))
            .collect();
        assert_eq!(accepted, vec![true, false, false, false]);
        assert_eq!(m.stats().accepted, 1);
        assert_eq!(m.stats().rejected, 4);
        m.shutdown_now().await;
    }

    #[tokio::test]
    async fn anchor_sync_returns_outcome() {
        let m = manager(config(), &[Scripted::ok("a")]);
        assert!(matches!(
            m.anchor_sync(root(1), 1, BTreeMap::new(), Duration::from_secs(1)).await,
            Err(AnchorError::NotRunning)
        ));

        m.start();
        let result = m
            .anchor_sync(root(1), 1, BTreeMap::new(), Duration::from_secs(2))
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(result.transaction_id.as_deref(), Some("a-1-0"));
        m.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn anchor_sync_times_out_on_slow_backend() {
        let m = manager(config(), &[Scripted::slow("a", Duration::from_millis(500))]);
        m.start();
        let err = m
            .anchor_sync(root(1), 1, BTreeMap::new(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, AnchorError::Timeout(_)));
        m.shutdown_now().await;
    }

    #[tokio::test]
    async fn stop_drains_queued_work() {
        let a = Scripted::slow("a", Duration::from_millis(20));
        let m = manager(
            DispatcherConfig {
                workers: 1,
                ..config()
            },
            &[a.clone()],
        );
        m.start();
        for i in 1..=5 {
            assert!(m.anchor_async(root(i), i as u64, BTreeMap::new(), None));
        }
        m.stop(Duration::from_secs(5)).await;
        assert_eq!(a.calls(), 5);
        assert_eq!(m.stats().succeeded, 5);
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let m = manager(
            DispatcherConfig {
                history_size: 3,
                backend_history: 2,
                ..config()
            },
            &[Scripted::ok("a")],
        );
        for i in 1..=5 {
            m.execute(root(i), i as u64, BTreeMap::new()).await;
        }
        let history = m.history();
        assert_eq!(history.iter().map(|r| r.batch_id).collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(m.health_check().await["a"].last_results.len(), 2);
    }
}
