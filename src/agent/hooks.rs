//! Process hooks
//!
//! - Exit hook: shuts the agent down when the process exits
//! - Panic hook: reports panics as events, then defers to the previous hook
//!
//! Each hook is registered at most once per process; flags decide whether
//! it acts for the current agent.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

use super::lifecycle;
use crate::config::Settings;
use crate::event::Event;
use crate::scheduler::WORKER_THREAD_NAME;

static EXIT_HOOK: Once = Once::new();
static PANIC_HOOK: Once = Once::new();

static SHUTDOWN_ON_EXIT: AtomicBool = AtomicBool::new(false);
static CAPTURE_PANICS: AtomicBool = AtomicBool::new(false);

/// Apply the agent's hook settings, registering hooks on first use
pub fn install(settings: &Settings) {
    SHUTDOWN_ON_EXIT.store(settings.auto_shutdown, Ordering::SeqCst);
    CAPTURE_PANICS.store(settings.panic_hook, Ordering::SeqCst);

    if settings.auto_shutdown {
        EXIT_HOOK.call_once(register_exit_hook);
    }
    if settings.panic_hook {
        PANIC_HOOK.call_once(install_panic_hook);
    }
}

// ============================================================================
// EXIT HOOK
// ============================================================================

extern "C" fn on_process_exit() {
    if !SHUTDOWN_ON_EXIT.load(Ordering::SeqCst) {
        return;
    }
    // Unwinding out of an atexit callback is undefined behaviour
    let _ = std::panic::catch_unwind(lifecycle::shutdown);
}

fn register_exit_hook() {
    // SAFETY: `on_process_exit` is a plain extern "C" fn that never unwinds
    let rc = unsafe { libc::atexit(on_process_exit) };
    if rc != 0 {
        log::warn!("Could not register exit hook; call shutdown() explicitly");
    } else {
        log::debug!("Exit hook registered");
    }
}

// ============================================================================
// PANIC HOOK
// ============================================================================

fn install_panic_hook() {
    let previous = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |info| {
        if CAPTURE_PANICS.load(Ordering::SeqCst)
            && lifecycle::has_agent()
            && is_reportable_thread(std::thread::current().name())
        {
            let message = panic_message(info.payload());
            let location = info.location().map(|l| (l.file(), l.line()));
            lifecycle::send(Event::from_panic(&message, location));
        }
        previous(info);
    }));

    log::debug!("Panic hook installed");
}

/// Panics on the agent's own workers are logged by the scheduler instead
fn is_reportable_thread(name: Option<&str>) -> bool {
    name != Some(WORKER_THREAD_NAME)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}
