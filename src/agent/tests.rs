use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::lifecycle::{self, State};
use super::*;
use crate::config::Config;
use crate::constants::ENV_APP_ID;
use crate::metrics::NullMetrics;
use crate::constants::IDENTITY_FILE;
use crate::scheduler::Scheduler;
use crate::testing::{FakeApi, FakeTransport, TransportLog, AGENT_LOCK, FAKE_PUBLIC_IP};
use crate::usage::UsageTracker;
use serde_json::Value;
use tempfile::tempdir;

fn test_config(dir: &Path, api: Arc<FakeApi>, transport: FakeTransport) -> Config {
    Config::new()
        .app_id("A")
        .api_key("K")
        .config_dir(dir)
        .auto_shutdown(false)
        .panic_hook(false)
        .worker_threads(2)
        .shutdown_grace(Duration::from_millis(500))
        .remote_api(api)
        .transport(Box::new(transport))
        .metrics(Arc::new(NullMetrics))
}

fn start_agent(dir: &Path, api: Arc<FakeApi>) -> Arc<TransportLog> {
    let (transport, log) = FakeTransport::new();
    init(test_config(dir, api, transport)).wait().unwrap();
    log
}

fn decode(payload: &[u8]) -> Value {
    rmp_serde::from_slice(payload).unwrap()
}

/// Build an agent directly, bypassing `init`
fn construct_agent(dir: &Path) -> AgentResult<Agent> {
    let (transport, _log) = FakeTransport::new();
    let (settings, collaborators) = test_config(dir, Arc::new(FakeApi::with_limit(0)), transport)
        .resolve()
        .unwrap();
    let scheduler = Arc::new(Scheduler::new(1).unwrap());
    Agent::new(Arc::new(settings), collaborators, scheduler, PersistentStore::open(dir).unwrap())
}

fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn test_init_send_shutdown() {
    let _guard = AGENT_LOCK.lock();
    let dir = tempdir().unwrap();
    let api = Arc::new(FakeApi::with_limit(0));

    let log = start_agent(dir.path(), api.clone());
    assert!(is_running());
    assert_eq!(log.starts(), 1);
    assert_eq!(api.registrations(), 1);

    send(Event::new("app::Error: boom", Vec::new()));
    assert!(wait_until(|| log.payloads().len() == 1));

    shutdown();
    assert!(!is_running());
    assert_eq!(lifecycle::state(), State::Uninitialized);
    assert_eq!(log.shutdowns(), 1);
}

#[test]
fn test_double_init_keeps_running_agent() {
    let _guard = AGENT_LOCK.lock();
    let dir = tempdir().unwrap();
    let api = Arc::new(FakeApi::with_limit(0));
    let first = start_agent(dir.path(), api.clone());

    let (transport, second) = FakeTransport::new();
    let result = init(test_config(dir.path(), api, transport)).wait();
    assert!(matches!(result, Err(AgentError::AlreadyInitialized)));
    assert!(is_running());

    send(Event::new("still here", Vec::new()));
    assert!(wait_until(|| first.payloads().len() == 1));
    assert_eq!(second.starts(), 0);

    shutdown();
}

#[test]
fn test_shutdown_twice_closes_transport_once() {
    let _guard = AGENT_LOCK.lock();
    let dir = tempdir().unwrap();
    let log = start_agent(dir.path(), Arc::new(FakeApi::with_limit(0)));

    shutdown();
    shutdown();
    assert_eq!(log.shutdowns(), 1);
    assert!(!is_running());
}

#[test]
fn test_empty_event_is_not_delivered() {
    let _guard = AGENT_LOCK.lock();
    let dir = tempdir().unwrap();
    let log = start_agent(dir.path(), Arc::new(FakeApi::with_limit(0)));

    send(Event::default());
    std::thread::sleep(Duration::from_millis(100));
    assert!(log.payloads().is_empty());

    shutdown();
}

#[test]
fn test_send_without_agent_is_a_no_op() {
    let _guard = AGENT_LOCK.lock();
    assert!(!is_running());
    send(Event::new("nobody listening", Vec::new()));
    send_error(&std::io::Error::new(std::io::ErrorKind::Other, "ignored"));
}

#[test]
fn test_missing_app_id_fails_init() {
    let _guard = AGENT_LOCK.lock();
    std::env::remove_var(ENV_APP_ID);

    let result = init(Config::new().api_key("K")).wait();
    assert!(matches!(result, Err(AgentError::Configuration(_))));
    assert_eq!(lifecycle::state(), State::Uninitialized);
}

#[test]
fn test_unavailable_sink_aborts_init_and_allows_retry() {
    let _guard = AGENT_LOCK.lock();
    let dir = tempdir().unwrap();
    let api = Arc::new(FakeApi::with_limit(0));

    let (transport, log) = FakeTransport::unavailable();
    let result = init(test_config(dir.path(), api.clone(), transport)).wait();
    assert!(matches!(result, Err(AgentError::SinkUnavailable(_))));
    assert!(!is_running());
    assert_eq!(log.shutdowns(), 1);

    let retry = start_agent(dir.path(), api);
    assert!(is_running());
    assert_eq!(retry.starts(), 1);
    shutdown();
}

#[test]
fn test_registration_failure_aborts_init() {
    let _guard = AGENT_LOCK.lock();
    let dir = tempdir().unwrap();
    let api = Arc::new(FakeApi::with_limit(0));
    api.fail_registration(true);

    let (transport, log) = FakeTransport::new();
    let result = init(test_config(dir.path(), api, transport)).wait();
    assert!(matches!(result, Err(AgentError::RegistrationFailed(_))));
    assert_eq!(lifecycle::state(), State::Uninitialized);
    assert_eq!(log.starts(), 0);
}

#[test]
fn test_identity_is_reused_across_restarts() {
    let _guard = AGENT_LOCK.lock();
    let dir = tempdir().unwrap();
    let api = Arc::new(FakeApi::with_limit(0));

    start_agent(dir.path(), api.clone());
    shutdown();
    start_agent(dir.path(), api.clone());
    shutdown();

    assert_eq!(api.registrations(), 1);
}

#[test]
fn test_usage_cap_end_to_end() {
    let _guard = AGENT_LOCK.lock();
    let dir = tempdir().unwrap();
    UsageTracker::load(PersistentStore::open(dir.path()).unwrap()).add(900);

    let log = start_agent(dir.path(), Arc::new(FakeApi::with_limit(1000)));
    let agent = lifecycle::current().unwrap();
    let monitor = agent.monitor();
    assert_eq!(monitor.bytes_sent(), 900);

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    runtime.block_on(async {
        agent.sink().send_payload(&[7u8; 50]).await.unwrap();
        assert_eq!(monitor.bytes_sent(), 950);

        agent.sink().send_payload(&[7u8; 100]).await.unwrap();
        assert_eq!(monitor.bytes_sent(), 950);
    });
    assert_eq!(log.payloads().len(), 1);

    drop(agent);
    shutdown();

    let persisted = UsageTracker::load(PersistentStore::open(dir.path()).unwrap());
    assert_eq!(persisted.bytes_sent(), 950);
}

#[test]
fn test_concurrent_sends_share_usage_cap() {
    let _guard = AGENT_LOCK.lock();
    let dir = tempdir().unwrap();
    UsageTracker::load(PersistentStore::open(dir.path()).unwrap()).add(900);

    let (transport, log) = FakeTransport::slow(Duration::from_millis(50));
    init(test_config(dir.path(), Arc::new(FakeApi::with_limit(1000)), transport))
        .wait()
        .unwrap();
    let agent = lifecycle::current().unwrap();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(3)
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        let sends: Vec<_> = (0..3)
            .map(|_| {
                let sink = agent.sink();
                tokio::spawn(async move { sink.send_payload(&[1u8; 60]).await })
            })
            .collect();
        for send in sends {
            send.await.unwrap().unwrap();
        }
    });

    assert_eq!(agent.monitor().bytes_sent(), 960);
    assert_eq!(log.payloads().len(), 1);

    drop(agent);
    shutdown();
}

#[test]
fn test_failed_delivery_is_not_charged() {
    let _guard = AGENT_LOCK.lock();
    let dir = tempdir().unwrap();
    UsageTracker::load(PersistentStore::open(dir.path()).unwrap()).add(900);

    let (transport, log) = FakeTransport::failing();
    init(test_config(dir.path(), Arc::new(FakeApi::with_limit(1000)), transport))
        .wait()
        .unwrap();
    let agent = lifecycle::current().unwrap();

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    runtime.block_on(async {
        agent.sink().send_payload(&[1u8; 60]).await.unwrap();
    });
    assert_eq!(agent.monitor().bytes_sent(), 900);
    assert!(log.payloads().is_empty());

    drop(agent);
    shutdown();
}

#[test]
fn test_direct_construction_rejected_while_agent_lives() {
    let _guard = AGENT_LOCK.lock();
    let dir = tempdir().unwrap();
    start_agent(dir.path(), Arc::new(FakeApi::with_limit(0)));

    let other = tempdir().unwrap();
    assert!(matches!(construct_agent(other.path()), Err(AgentError::AlreadyInitialized)));
    assert!(is_running());

    shutdown();

    let agent = construct_agent(other.path()).unwrap();
    assert!(matches!(construct_agent(other.path()), Err(AgentError::AlreadyInitialized)));
    drop(agent);
    assert!(construct_agent(other.path()).is_ok());
}

#[test]
fn test_send_error_delivers_resolved_frames_and_public_ip() {
    let _guard = AGENT_LOCK.lock();
    let dir = tempdir().unwrap();
    let log = start_agent(dir.path(), Arc::new(FakeApi::with_limit(0)));

    send_error(&std::io::Error::new(std::io::ErrorKind::Other, "disk on fire"));
    assert!(wait_until(|| log.payloads().len() == 1));

    let payload = decode(&log.payloads()[0]);
    assert_eq!(payload["publicIp"], FAKE_PUBLIC_IP);
    assert_eq!(payload["device"], "install-1");
    assert!(payload["excType"].as_str().unwrap().contains("disk on fire"));
    assert!(!payload["stackTrace"].as_array().unwrap().is_empty());

    shutdown();
}

#[test]
fn test_public_ip_lookup_failure_keeps_empty_address() {
    let _guard = AGENT_LOCK.lock();
    let dir = tempdir().unwrap();
    let api = Arc::new(FakeApi::with_limit(0));
    api.fail_public_ip(true);

    let log = start_agent(dir.path(), api);
    assert!(is_running());
    assert_eq!(lifecycle::current().unwrap().public_ip(), "");

    send(Event::new("no address", Vec::new()));
    assert!(wait_until(|| log.payloads().len() == 1));
    assert_eq!(decode(&log.payloads()[0])["publicIp"], "");

    shutdown();
}

#[test]
fn test_unreadable_identity_is_discarded() {
    let _guard = AGENT_LOCK.lock();
    let dir = tempdir().unwrap();
    let store = PersistentStore::open(dir.path()).unwrap();
    std::fs::write(store.path_of(IDENTITY_FILE), br#"{"format_version":1,"nonce":"x","data":"y"}"#).unwrap();

    let api = Arc::new(FakeApi::with_limit(0));
    api.fail_registration(true);
    let (transport, _log) = FakeTransport::new();
    let result = init(test_config(dir.path(), Arc::clone(&api), transport)).wait();

    assert!(matches!(result, Err(AgentError::RegistrationFailed(_))));
    assert!(!store.exists(IDENTITY_FILE));
}
