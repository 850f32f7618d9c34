//! Background Scheduler
//!
//! A bounded pool of worker threads (a multi-threaded tokio runtime owned
//! by the agent) running:
//! - one-shot tasks (event delivery, init)
//! - fixed-rate repeating tasks (usage reset, policy refresh)
//! - long-lived service tasks (transport event loops)
//!
//! Task failures and panics are logged per task and never affect other
//! tasks. Shutdown stops repeating tasks, gives in-flight one-shot tasks a
//! grace period and then cancels whatever is left.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::Notify;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;

use crate::error::{AgentError, AgentResult};

/// Minimum time given to the runtime to stop blocking work once the grace period is spent
const FINAL_STOP_TIMEOUT: Duration = Duration::from_millis(250);

// ============================================================================
// TASK HANDLE
// ============================================================================

/// Handle to a scheduled task
#[derive(Debug)]
pub struct TaskHandle {
    abort: AbortHandle,
}

impl TaskHandle {
    pub fn cancel(&self) {
        self.abort.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

// ============================================================================
// IN-FLIGHT ACCOUNTING
// ============================================================================

#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(Arc::clone(self))
    }

    fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

// ============================================================================
// SCHEDULER
// ============================================================================

/// Name of every scheduler thread, blocking pool included
pub const WORKER_THREAD_NAME: &str = "faultline-worker";

pub struct Scheduler {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    closed: AtomicBool,
    shutting_down: Arc<AtomicBool>,
    in_flight: Arc<InFlight>,
    repeating: Mutex<Vec<AbortHandle>>,
}

impl Scheduler {
    /// Start a pool with `workers` threads (at least one)
    pub fn new(workers: usize) -> AgentResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers.max(1))
            .thread_name(WORKER_THREAD_NAME)
            .enable_all()
            .build()?;

        log::debug!("Scheduler started with {} worker thread(s)", workers.max(1));

        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Mutex::new(Some(runtime)),
            closed: AtomicBool::new(false),
            shutting_down: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(InFlight::default()),
            repeating: Mutex::new(Vec::new()),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of one-shot tasks queued or running
    pub fn in_flight(&self) -> usize {
        self.in_flight.count()
    }

    fn ensure_open(&self) -> AgentResult<()> {
        if self.is_closed() {
            Err(AgentError::SchedulerClosed)
        } else {
            Ok(())
        }
    }

    /// Run `task` once after `delay`
    pub fn schedule_once<Fut>(&self, name: &'static str, delay: Duration, task: Fut) -> AgentResult<TaskHandle>
    where
        Fut: Future<Output = AgentResult<()>> + Send + 'static,
    {
        self.ensure_open()?;

        let guard = self.in_flight.enter();
        let join = self.handle.spawn(async move {
            let _guard = guard;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Err(e) = task.await {
                log::warn!("Task '{}' failed: {}", name, e);
            }
        });

        Ok(self.supervise(name, join))
    }

    /// Run `task` every `period`, starting after `initial_delay`
    ///
    /// Each run is its own task, so a panic in one run does not stop later runs.
    pub fn schedule_repeating<F, Fut>(
        &self,
        name: &'static str,
        initial_delay: Duration,
        period: Duration,
        task: F,
    ) -> AgentResult<TaskHandle>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AgentResult<()>> + Send + 'static,
    {
        self.ensure_open()?;
        if period.is_zero() {
            return Err(AgentError::Configuration(format!("task '{}' has a zero period", name)));
        }

        let handle = self.handle.clone();
        let shutting_down = Arc::clone(&self.shutting_down);
        let join = self.handle.spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + initial_delay, period);
            loop {
                interval.tick().await;
                match handle.spawn(task()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => log::warn!("Repeating task '{}' failed: {}", name, e),
                    Err(e) if e.is_panic() => log::error!("Repeating task '{}' panicked", name),
                    Err(_) => {
                        if !shutting_down.load(Ordering::SeqCst) {
                            log::info!("Repeating task '{}' run was cancelled", name);
                        }
                        return;
                    }
                }
            }
        });

        self.repeating.lock().push(join.abort_handle());
        Ok(TaskHandle {
            abort: join.abort_handle(),
        })
    }

    /// Run a long-lived task until it ends on its own or the scheduler stops
    pub fn spawn_service<Fut>(&self, name: &'static str, task: Fut) -> AgentResult<TaskHandle>
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.ensure_open()?;
        let join = self.handle.spawn(task);
        Ok(self.supervise(name, join))
    }

    /// Log the outcome of a task without holding its result
    fn supervise(&self, name: &'static str, join: JoinHandle<()>) -> TaskHandle {
        let abort = join.abort_handle();
        let shutting_down = Arc::clone(&self.shutting_down);

        self.handle.spawn(async move {
            match join.await {
                Ok(()) => {}
                Err(e) if e.is_panic() => log::error!("Task '{}' panicked", name),
                Err(_) if shutting_down.load(Ordering::SeqCst) => {
                    log::debug!("Task '{}' cancelled during shutdown", name);
                }
                Err(_) => log::info!("Task '{}' was cancelled", name),
            }
        });

        TaskHandle { abort }
    }

    /// Stop accepting work, run `closing`, drain one-shot tasks for up to
    /// `grace`, then cancel everything left.
    ///
    /// The drain runs on a dedicated thread so this may be called from any
    /// thread, including the scheduler's own workers. Join the returned
    /// handle to wait for completion. Returns `None` if already shut down.
    pub fn shutdown<F>(&self, grace: Duration, closing: F) -> Option<std::thread::JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.closed.swap(true, Ordering::SeqCst) {
            return None;
        }
        self.shutting_down.store(true, Ordering::SeqCst);

        for task in self.repeating.lock().drain(..) {
            task.abort();
        }

        let runtime = self.runtime.lock().take()?;
        let in_flight = Arc::clone(&self.in_flight);

        let spawned = std::thread::Builder::new()
            .name("faultline-shutdown".to_string())
            .spawn(move || {
                let deadline = Instant::now() + grace;
                runtime.block_on(async {
                    if tokio::time::timeout_at(deadline, closing).await.is_err() {
                        log::warn!("Closing step did not finish within {:?}", grace);
                    }
                    if tokio::time::timeout_at(deadline, in_flight.wait_idle()).await.is_err() {
                        log::debug!(
                            "Grace period elapsed with {} task(s) in flight; cancelling",
                            in_flight.count()
                        );
                    }
                });
                runtime.shutdown_timeout(FINAL_STOP_TIMEOUT);
                log::debug!("Scheduler stopped");
            });

        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("Could not start scheduler shutdown thread: {}", e);
                None
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.shutdown_background();
        }
    }
}
