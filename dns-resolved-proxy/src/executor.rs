//! Background executor for queued resolver calls
//!
//! Mutating calls to the resolver may be slow, time out, or race with the
//! resolver creating the link object. They are therefore queued onto a
//! single worker thread which performs them in posting order, retrying a
//! bounded number of times, while the caller returns immediately.
//!
//! # Retry strategy
//! - Up to `retry_attempts` attempts per task (3 by default)
//! - Before each attempt the target object must be visible on the bus;
//!   if it is not, wait `retry_backoff` and try again
//! - A failed call records its message and waits `retry_backoff`
//! - A success clears messages from earlier failed attempts
//! - No pause after the final attempt
//!
//! Failures are never returned to the poster. They are handed to the task's
//! error callback and reported through its [`Completion`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::config::ResolvedConfig;
use crate::error::{ResolvedError, Result};
use crate::traits::ProxyClient;
use crate::types::{MethodArgs, Target};
use crate::utils::log_sanitizer::truncate_for_log;

const WORKER_THREAD_NAME: &str = "resolved-bg";

/// Invoked on the worker with every failure message of a task that did not
/// succeed.
pub type ErrorCallback = Box<dyn FnOnce(&[String]) + Send + 'static>;

/// Final state of a queued call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    /// The call went through (possibly after failed attempts).
    Succeeded,
    /// Every attempt failed; one message per failure, in order.
    Failed(Vec<String>),
    /// The client was gone by the time the worker reached the task.
    Discarded,
    /// Nothing was queued because the operation was disabled.
    Skipped,
    /// The worker stopped before running the task.
    Cancelled,
}

/// A queued mutating call.
pub struct CallTask {
    client: Weak<dyn ProxyClient>,
    target: Target,
    method: String,
    args: MethodArgs,
    on_error: Option<ErrorCallback>,
}

impl CallTask {
    /// The task keeps only a weak reference to `client`; if every strong
    /// reference is gone when the worker reaches it, the task is dropped.
    pub fn new(
        client: &Arc<dyn ProxyClient>,
        target: Target,
        method: impl Into<String>,
        args: MethodArgs,
    ) -> Self {
        Self {
            client: Arc::downgrade(client),
            target,
            method: method.into(),
            args,
            on_error: None,
        }
    }

    #[must_use]
    pub fn on_error(mut self, callback: impl FnOnce(&[String]) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }
}

impl std::fmt::Debug for CallTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallTask")
            .field("target", &self.target)
            .field("method", &self.method)
            .field("args", &self.args)
            .field("on_error", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}

enum CompletionState {
    Pending(oneshot::Receiver<CallOutcome>),
    Ready(CallOutcome),
}

/// One-shot handle to the outcome of a posted call.
///
/// Dropping it is fine; the task still runs, including its error callback.
pub struct Completion {
    applied: Vec<String>,
    state: CompletionState,
}

impl Completion {
    fn pending(receiver: oneshot::Receiver<CallOutcome>) -> Self {
        Self {
            applied: Vec::new(),
            state: CompletionState::Pending(receiver),
        }
    }

    /// A completion for an operation that queued nothing.
    pub(crate) fn skipped() -> Self {
        Self {
            applied: Vec::new(),
            state: CompletionState::Ready(CallOutcome::Skipped),
        }
    }

    pub(crate) fn with_applied(mut self, applied: Vec<String>) -> Self {
        self.applied = applied;
        self
    }

    /// Values the operation attempted to apply, computed before the call ran.
    pub fn applied(&self) -> &[String] {
        &self.applied
    }

    /// Block until the worker has finished with the task.
    ///
    /// Must not be called from within an async runtime.
    pub fn wait(self) -> CallOutcome {
        match self.state {
            CompletionState::Ready(outcome) => outcome,
            CompletionState::Pending(receiver) => {
                receiver.blocking_recv().unwrap_or(CallOutcome::Cancelled)
            }
        }
    }

    /// Outcome if already known.
    pub fn try_outcome(&mut self) -> Option<CallOutcome> {
        match &mut self.state {
            CompletionState::Ready(outcome) => Some(outcome.clone()),
            CompletionState::Pending(receiver) => {
                let outcome = match receiver.try_recv() {
                    Ok(outcome) => outcome,
                    Err(oneshot::error::TryRecvError::Empty) => return None,
                    Err(oneshot::error::TryRecvError::Closed) => CallOutcome::Cancelled,
                };
                self.state = CompletionState::Ready(outcome.clone());
                Some(outcome)
            }
        }
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            CompletionState::Pending(_) => "pending".to_string(),
            CompletionState::Ready(outcome) => format!("{outcome:?}"),
        };
        f.debug_struct("Completion")
            .field("applied", &self.applied)
            .field("state", &state)
            .finish()
    }
}

/// Number of posted tasks the worker has not finished yet.
#[derive(Debug, Default)]
pub struct TaskCounter {
    count: AtomicUsize,
    idle_lock: Mutex<()>,
    idle: Condvar,
}

impl TaskCounter {
    pub fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Take a slot unless `ceiling` slots are already taken.
    fn try_acquire(&self, ceiling: usize) -> bool {
        self.count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < ceiling).then_some(n + 1)
            })
            .is_ok()
    }

    fn release(&self) {
        match self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        {
            Ok(1) => {
                let _guard = self.idle_lock.lock().unwrap_or_else(PoisonError::into_inner);
                self.idle.notify_all();
            }
            Ok(_) => {}
            Err(_) => log::error!("[resolved] Outstanding task counter released below zero"),
        }
    }

    fn wake_waiters(&self) {
        let _guard = self.idle_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.idle.notify_all();
    }

    /// Block until no task is outstanding. Re-checks every `poll`.
    pub fn wait_for_zero(&self, poll: Duration) {
        self.wait_for_zero_while(poll, || true);
    }

    /// [`wait_for_zero`](Self::wait_for_zero) that gives up once `active`
    /// turns false.
    fn wait_for_zero_while(&self, poll: Duration, active: impl Fn() -> bool) {
        let mut guard = self.idle_lock.lock().unwrap_or_else(PoisonError::into_inner);
        while self.get() > 0 && active() {
            guard = match self.idle.wait_timeout(guard, poll) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

/// Releases a counter slot when dropped.
struct SlotGuard<'a>(&'a TaskCounter);

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    attempts: u32,
    backoff: Duration,
}

#[derive(Debug)]
struct Shared {
    accepting: AtomicBool,
    outstanding: TaskCounter,
    policy: RetryPolicy,
    max_outstanding: usize,
}

enum Job {
    Call(CallTask, oneshot::Sender<CallOutcome>),
    Shutdown,
}

/// Cloneable posting side of a [`BackgroundExecutor`].
#[derive(Clone)]
pub struct ExecutorHandle {
    sender: mpsc::UnboundedSender<Job>,
    shared: Arc<Shared>,
}

impl ExecutorHandle {
    /// Queue a task. Returns immediately.
    ///
    /// Fails if the executor has been stopped or the outstanding-task
    /// ceiling is reached; the counter is left untouched in both cases.
    pub fn post(&self, task: CallTask) -> Result<Completion> {
        if !self.shared.accepting.load(Ordering::SeqCst) {
            log::debug!("[resolved] Rejecting {}: background worker not running", task.method);
            return Err(ResolvedError::ResourceExhausted(
                "Background worker is not running".to_string(),
            ));
        }

        if !self.shared.outstanding.try_acquire(self.shared.max_outstanding) {
            log::warn!(
                "[resolved] Rejecting {}: {} background tasks outstanding",
                task.method,
                self.shared.max_outstanding
            );
            return Err(ResolvedError::ResourceExhausted(format!(
                "Too many background tasks outstanding ({})",
                self.shared.max_outstanding
            )));
        }

        log::debug!(
            "[resolved] Queueing {}.{} on {} args={}",
            task.target.interface,
            task.method,
            task.target.object_path,
            truncate_for_log(&task.args.to_string())
        );

        let (done_tx, done_rx) = oneshot::channel();
        if self.sender.send(Job::Call(task, done_tx)).is_err() {
            self.shared.outstanding.release();
            return Err(ResolvedError::ResourceExhausted(
                "Background worker is not running".to_string(),
            ));
        }
        Ok(Completion::pending(done_rx))
    }

    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.get()
    }

    pub fn is_accepting(&self) -> bool {
        self.shared.accepting.load(Ordering::SeqCst)
    }

    /// Block until every posted task has finished, or until the executor
    /// stops. Tasks still queued at stop never run and keep their slots,
    /// so [`outstanding`](Self::outstanding) may stay above zero afterwards.
    ///
    /// Meant for tests and shutdown tooling; it says nothing about which
    /// tasks ran.
    pub fn wait_for_outstanding(&self, poll: Duration) {
        self.shared
            .outstanding
            .wait_for_zero_while(poll, || self.is_accepting());
    }
}

/// Owner of the worker thread.
///
/// Tasks may be posted before [`start`](Self::start); they run once the
/// worker is up. Dropping the executor stops and joins the worker.
pub struct BackgroundExecutor {
    handle: ExecutorHandle,
    receiver: Option<mpsc::UnboundedReceiver<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl BackgroundExecutor {
    pub fn new(config: &ResolvedConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            accepting: AtomicBool::new(true),
            outstanding: TaskCounter::default(),
            policy: RetryPolicy {
                attempts: config.retry_attempts.max(1),
                backoff: config.retry_backoff(),
            },
            max_outstanding: config.max_outstanding_tasks,
        });

        Self {
            handle: ExecutorHandle { sender, shared },
            receiver: Some(receiver),
            worker: None,
        }
    }

    /// Launch the worker. Calling it again is a no-op.
    pub fn start(&mut self) -> Result<()> {
        let Some(receiver) = self.receiver.take() else {
            return Ok(());
        };
        let shared = Arc::clone(&self.handle.shared);

        let worker = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run_loop(receiver, &shared))
            .map_err(|e| {
                ResolvedError::ResourceExhausted(format!(
                    "Could not start background worker: {e}"
                ))
            })?;

        log::debug!("[resolved] Background worker started");
        self.worker = Some(worker);
        Ok(())
    }

    pub fn handle(&self) -> ExecutorHandle {
        self.handle.clone()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some() && self.handle.is_accepting()
    }

    /// Stop accepting tasks, let the worker finish the task it is running,
    /// and join it.
    ///
    /// Tasks still queued are not run; their completions report
    /// [`CallOutcome::Cancelled`].
    pub fn stop(&mut self) {
        self.handle.shared.accepting.store(false, Ordering::SeqCst);
        // Wakes a worker parked on an empty queue.
        let _ = self.handle.sender.send(Job::Shutdown);
        self.receiver = None;

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("[resolved] Background worker panicked");
            } else {
                log::debug!("[resolved] Background worker joined");
            }
        }
        self.handle.shared.outstanding.wake_waiters();
    }
}

impl Drop for BackgroundExecutor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(mut receiver: mpsc::UnboundedReceiver<Job>, shared: &Shared) {
    while let Some(job) = receiver.blocking_recv() {
        let Job::Call(task, done) = job else {
            break;
        };
        if !shared.accepting.load(Ordering::SeqCst) {
            break;
        }
        let outcome = execute(task, shared.policy, &shared.outstanding);
        // Nobody listening is fine.
        let _ = done.send(outcome);
    }
    log::debug!("[resolved] Background worker exiting");
}

fn execute(task: CallTask, policy: RetryPolicy, counter: &TaskCounter) -> CallOutcome {
    let _slot = SlotGuard(counter);
    let CallTask {
        client,
        target,
        method,
        args,
        on_error,
    } = task;

    let attempted = panic::catch_unwind(AssertUnwindSafe(|| {
        let Some(client) = client.upgrade() else {
            log::debug!(
                "[resolved] Dropping {}.{} on {}: client released",
                target.interface,
                method,
                target.object_path
            );
            return None;
        };
        Some(call_with_retry(client.as_ref(), &target, &method, &args, policy))
    }));

    let errors = match attempted {
        Ok(None) => return CallOutcome::Discarded,
        Ok(Some(errors)) => errors,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            log::error!(
                "[resolved] Background call {}.{} aborted: {message}",
                target.interface,
                method
            );
            vec![message]
        }
    };

    if errors.is_empty() {
        return CallOutcome::Succeeded;
    }

    if let Some(callback) = on_error {
        if panic::catch_unwind(AssertUnwindSafe(|| callback(&errors))).is_err() {
            log::error!("[resolved] Error callback for {method} panicked");
        }
    }
    CallOutcome::Failed(errors)
}

fn call_with_retry(
    client: &dyn ProxyClient,
    target: &Target,
    method: &str,
    args: &MethodArgs,
    policy: RetryPolicy,
) -> Vec<String> {
    let mut errors = Vec::new();

    for attempt in 1..=policy.attempts {
        let last = attempt == policy.attempts;

        let result = match client.object_exists(target) {
            Ok(true) => client.call(target, method, args),
            Ok(false) => {
                log::warn!(
                    "[resolved] {target} not found for {method} (attempt {attempt}/{})",
                    policy.attempts
                );
                if last {
                    errors.push(format!(
                        "Object {} ({}) not found on {}",
                        target.object_path,
                        target.interface,
                        client.destination()
                    ));
                    break;
                }
                thread::sleep(policy.backoff);
                continue;
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                if !errors.is_empty() {
                    log::debug!(
                        "[resolved] {method} succeeded after {} failed attempt(s)",
                        errors.len()
                    );
                }
                errors.clear();
                break;
            }
            Err(e) => {
                if e.is_timeout() || last {
                    log::warn!(
                        "[resolved] Background call failed: object_path={}, method={}.{}: {e}",
                        target.object_path,
                        target.interface,
                        method
                    );
                } else {
                    log::debug!(
                        "[resolved] Attempt {attempt}/{} of {method} failed: {e}",
                        policy.attempts
                    );
                }
                errors.push(e.to_string());
                if !last {
                    thread::sleep(policy.backoff);
                }
            }
        }
    }

    errors
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "background task panicked".to_string()
    }
}
