//! Faultline smoke test
//!
//! Starts the agent from `FAULTLINE_*` environment variables, reports one
//! test error and shuts down.

use std::time::Duration;

use faultline::constants::AGENT_VERSION;
use faultline::Config;

#[derive(Debug)]
struct SmokeTestError;

impl std::fmt::Display for SmokeTestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "faultline smoke test error")
    }
}

impl std::error::Error for SmokeTestError {}

fn main() {
    if std::env::args().any(|arg| arg == "--version" || arg == "-V") {
        println!("faultline {}", AGENT_VERSION);
        return;
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting Faultline agent v{} smoke test...", AGENT_VERSION);

    if let Err(e) = faultline::init(Config::new()).wait() {
        log::error!("Agent failed to start: {}", e);
        std::process::exit(1);
    }

    faultline::send_error(&SmokeTestError);

    // Give the delivery task a moment before draining
    std::thread::sleep(Duration::from_secs(2));

    faultline::shutdown();
    log::info!("Smoke test finished");
}
