//! Faultline - in-process crash reporting agent
//!
//! Embed the agent, call [`init`] once at startup, report errors with
//! [`send`] or [`send_error`] and call [`shutdown`] before exit (or let the
//! exit hook do it).
//!
//! ```no_run
//! let handle = faultline::init(faultline::Config::new().app_id("my-app").api_key("key"));
//! if let Err(e) = handle.wait() {
//!     eprintln!("crash reporting disabled: {}", e);
//! }
//!
//! let err = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
//! faultline::send_error(&err);
//!
//! faultline::shutdown();
//! ```

pub mod agent;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod identity;
pub mod metrics;
pub mod remote;
pub mod scheduler;
pub mod sink;
pub mod storage;
pub mod usage;

#[cfg(test)]
mod testing;

pub use agent::{init, is_running, send, send_error, shutdown, InitHandle};
pub use config::{Config, TransportKind};
pub use error::{AgentError, AgentResult};
pub use event::Event;
