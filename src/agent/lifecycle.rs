//! Agent lifecycle
//!
//! `Uninitialized -> Starting -> Running -> ShuttingDown -> Uninitialized`
//!
//! Transitions happen under one global lock. The live agent sits in a
//! separate slot so `send` only needs a read.

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;

use super::{hooks, Agent};
use crate::config::{Collaborators, Config, Settings};
use crate::error::{AgentError, AgentResult};
use crate::event::Event;
use crate::scheduler::Scheduler;
use crate::storage::{DesktopPaths, PersistentStore, PlatformPaths};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Uninitialized,
    Starting,
    Running,
    ShuttingDown,
}

static LIFECYCLE: Lazy<Mutex<State>> = Lazy::new(|| Mutex::new(State::Uninitialized));

static AGENT: Lazy<RwLock<Option<Arc<Agent>>>> = Lazy::new(|| RwLock::new(None));

// ============================================================================
// INIT HANDLE
// ============================================================================

/// Eventual outcome of `init`
///
/// Block on it with `wait`, or `.await` it from async code.
pub struct InitHandle {
    rx: oneshot::Receiver<AgentResult<()>>,
}

impl InitHandle {
    fn ready(result: AgentResult<()>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }

    /// Block the calling thread until init completes
    ///
    /// Must not be called from inside an async runtime; await the handle there.
    pub fn wait(self) -> AgentResult<()> {
        self.rx.blocking_recv().unwrap_or(Err(AgentError::SchedulerClosed))
    }
}

impl Future for InitHandle {
    type Output = AgentResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(AgentError::SchedulerClosed)))
    }
}

// ============================================================================
// ENTRY POINTS
// ============================================================================

pub fn state() -> State {
    *LIFECYCLE.lock()
}

pub fn is_running() -> bool {
    state() == State::Running
}

pub(crate) fn has_agent() -> bool {
    AGENT.read().is_some()
}

/// The running agent, if any
pub(crate) fn current() -> Option<Arc<Agent>> {
    AGENT.read().clone()
}

/// Start the agent in the background
///
/// Configuration is validated immediately; registration, policy fetch and
/// transport setup run on the agent's own workers.
pub fn init(config: Config) -> InitHandle {
    let mut state = LIFECYCLE.lock();
    if *state != State::Uninitialized {
        log::warn!("init() called while agent is {:?}; ignoring", *state);
        return InitHandle::ready(Err(AgentError::AlreadyInitialized));
    }

    let (settings, collaborators) = match config.resolve() {
        Ok(resolved) => resolved,
        Err(e) => {
            log::error!("Agent configuration rejected: {}", e);
            return InitHandle::ready(Err(e));
        }
    };
    log::debug!("Agent settings: {:?}", settings);

    let scheduler = match Scheduler::new(settings.worker_threads) {
        Ok(scheduler) => Arc::new(scheduler),
        Err(e) => {
            log::error!("Could not start agent workers: {}", e);
            return InitHandle::ready(Err(e));
        }
    };

    *state = State::Starting;

    let (tx, rx) = oneshot::channel();
    let task = run_init(Arc::new(settings), collaborators, Arc::clone(&scheduler), tx);
    if let Err(e) = scheduler.schedule_once("agent-init", Duration::ZERO, task) {
        log::error!("Could not schedule agent init: {}", e);
        *state = State::Uninitialized;
    }

    InitHandle { rx }
}

/// Queue `event` for delivery; does nothing unless the agent is running
pub fn send(event: Event) {
    if event.is_empty() {
        return;
    }

    let Some(agent) = current() else {
        return;
    };

    match agent.dispatch(event) {
        Ok(()) => {}
        Err(AgentError::SchedulerClosed) => log::warn!("Agent is shutting down; event dropped"),
        Err(e) => log::warn!("Could not queue event: {}", e),
    }
}

/// Capture `err` with the current stack and queue it
pub fn send_error<E: std::error::Error + ?Sized>(err: &E) {
    if !has_agent() {
        return;
    }
    send(Event::from_error(err));
}

/// Stop the agent and wait (bounded) for background work to finish
pub fn shutdown() {
    let mut state = LIFECYCLE.lock();
    if *state != State::Running {
        return;
    }
    *state = State::ShuttingDown;
    log::info!("Shutting down agent");

    let agent = AGENT.write().take();
    if let Some(agent) = agent {
        if let Some(drain) = agent.stop() {
            if drain.join().is_err() {
                log::error!("Scheduler shutdown thread panicked");
            }
        }
        agent.monitor().persist();
    }

    *state = State::Uninitialized;
    log::info!("Agent stopped");
}

// ============================================================================
// BACKGROUND INIT
// ============================================================================

async fn run_init(
    settings: Arc<Settings>,
    collaborators: Collaborators,
    scheduler: Arc<Scheduler>,
    done: oneshot::Sender<AgentResult<()>>,
) -> AgentResult<()> {
    match bring_up(Arc::clone(&settings), collaborators, Arc::clone(&scheduler)).await {
        Ok(agent) => {
            let mut state = LIFECYCLE.lock();
            hooks::install(&settings);
            *AGENT.write() = Some(agent);
            *state = State::Running;
            drop(state);

            log::info!("Agent running");
            let _ = done.send(Ok(()));
        }
        Err(e) => {
            log::error!("Agent init failed: {}", e);
            // Runs on one of the scheduler's own workers, so the drain is detached
            drop(scheduler.shutdown(settings.shutdown_grace, async {}));
            *LIFECYCLE.lock() = State::Uninitialized;
            let _ = done.send(Err(e));
        }
    }
    Ok(())
}

/// Build and start the agent; on failure everything already started is stopped
async fn bring_up(
    settings: Arc<Settings>,
    mut collaborators: Collaborators,
    scheduler: Arc<Scheduler>,
) -> AgentResult<Arc<Agent>> {
    let paths: Arc<dyn PlatformPaths> = collaborators
        .paths
        .take()
        .unwrap_or_else(|| Arc::new(DesktopPaths));
    let store = PersistentStore::open_first(&paths.candidate_dirs(settings.config_dir.as_deref()))?;

    let agent = Arc::new(Agent::new(settings, collaborators, scheduler, store)?);

    if let Err(e) = agent.start().await {
        agent.sink().shutdown().await;
        return Err(e);
    }
    Ok(agent)
}
