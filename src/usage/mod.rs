//! Data Usage Monitor
//!
//! This module handles:
//! - Admission control for every outbound payload
//! - Accounting of bytes sent since the last plan reset
//! - The monthly reset on the plan's reset day
//! - Periodic refresh of the usage policy from the remote API
//!
//! Limit and tracker live behind one lock, so an admission check never
//! interleaves with a concurrent reset or refresh.

pub mod limits;
pub mod tracker;

pub use limits::UsageLimitConfig;
pub use tracker::UsageTracker;

use chrono::{Datelike, NaiveDate};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::Agent;
use crate::constants::{LIMITS_FILE, REFRESH_TICKS_PER_FETCH, REFRESH_TICK_PERIOD, RESET_CHECK_PERIOD};
use crate::error::{AgentError, AgentResult};
use crate::remote::RemoteApi;
use crate::storage::PersistentStore;

struct MonitorState {
    limits: UsageLimitConfig,
    tracker: UsageTracker,
    awaiting_monthly_reset: bool,
    ticks_since_refresh: u32,
}

/// Owns the usage policy and the byte counter
pub struct DataUsageMonitor {
    store: PersistentStore,
    state: Mutex<MonitorState>,
}

/// Admission rule: non-positive sizes are always blocked, a zero limit never blocks
pub fn exceeds_limit(bytes_sent: u64, limit: u64, proposed: i64) -> bool {
    if proposed <= 0 {
        return true;
    }
    if limit == 0 {
        return false;
    }
    bytes_sent.saturating_add(proposed as u64) > limit
}

impl DataUsageMonitor {
    /// Load the tracker from `store`; limits stay unlimited until `start`
    pub fn new(store: PersistentStore) -> Self {
        let tracker = UsageTracker::load(store.clone());
        Self {
            store,
            state: Mutex::new(MonitorState {
                limits: UsageLimitConfig::default(),
                tracker,
                awaiting_monthly_reset: false,
                ticks_since_refresh: 0,
            }),
        }
    }

    // ========================================================================
    // ADMISSION
    // ========================================================================

    /// True if sending `proposed` more bytes must be blocked
    pub fn will_exceed_limit(&self, proposed: i64) -> bool {
        let state = self.state.lock();
        exceeds_limit(state.tracker.bytes_sent(), state.limits.cellular_data_limit, proposed)
    }

    /// Admit and count `proposed` bytes in one step
    ///
    /// Returns false, counting nothing, when the payload would break the
    /// limit. Concurrent senders cannot all slip under the same headroom.
    pub fn try_reserve(&self, proposed: i64) -> bool {
        let mut state = self.state.lock();
        if exceeds_limit(state.tracker.bytes_sent(), state.limits.cellular_data_limit, proposed) {
            return false;
        }
        state.tracker.add(proposed as u64);
        true
    }

    /// Return a reservation whose payload was never delivered
    pub fn release(&self, bytes: i64) {
        if bytes < 1 {
            return;
        }
        self.state.lock().tracker.release(bytes as u64);
    }

    /// Account for bytes that were sent; values below 1 are ignored
    pub fn add_more_data(&self, bytes: i64) {
        if bytes < 1 {
            return;
        }
        self.state.lock().tracker.add(bytes as u64);
    }

    pub fn get_usage_config(&self) -> UsageLimitConfig {
        self.state.lock().limits.clone()
    }

    pub fn bytes_sent(&self) -> u64 {
        self.state.lock().tracker.bytes_sent()
    }

    pub fn is_awaiting_reset(&self) -> bool {
        self.state.lock().awaiting_monthly_reset
    }

    /// Replace the policy wholesale
    pub fn set_limits(&self, limits: UsageLimitConfig) {
        self.state.lock().limits = limits;
    }

    /// Write the counter one last time
    pub fn persist(&self) {
        self.state.lock().tracker.persist();
    }

    // ========================================================================
    // MONTHLY RESET
    // ========================================================================

    /// Run one reset check for the calendar day `today`
    ///
    /// Any day other than the reset day arms the reset; the reset day fires
    /// it once and disarms it until the day changes again.
    pub fn check_monthly_reset(&self, today: NaiveDate) {
        let mut state = self.state.lock();
        let reset_day = effective_reset_day(state.limits.cellular_plan_reset_day, today);

        if today.day() != reset_day {
            state.awaiting_monthly_reset = true;
            return;
        }

        if state.awaiting_monthly_reset {
            state.tracker.reset();
            state.awaiting_monthly_reset = false;
        }
    }

    // ========================================================================
    // POLICY REFRESH
    // ========================================================================

    /// One hourly tick; every `REFRESH_TICKS_PER_FETCH` ticks the policy is re-fetched
    pub async fn on_refresh_tick(&self, api: &dyn RemoteApi) {
        let due = {
            let mut state = self.state.lock();
            state.ticks_since_refresh += 1;
            if state.ticks_since_refresh >= REFRESH_TICKS_PER_FETCH {
                state.ticks_since_refresh = 0;
                true
            } else {
                false
            }
        };

        if due {
            if let Err(e) = self.refresh(api).await {
                log::warn!("Usage policy refresh failed, keeping previous policy: {}", e);
            }
        }
    }

    /// Fetch the policy, replace the current one and cache it
    pub async fn refresh(&self, api: &dyn RemoteApi) -> AgentResult<()> {
        let limits = api.fetch_usage_limits().await?;

        if let Err(e) = self.store.save(LIMITS_FILE, &limits) {
            log::warn!("Could not cache usage policy: {}", e);
        }

        log::info!(
            "Usage policy updated: limit={} bytes, reset day={}",
            limits.cellular_data_limit,
            limits.cellular_plan_reset_day
        );
        self.set_limits(limits);
        Ok(())
    }

    /// Initial policy fetch, falling back to the cached copy
    pub async fn load_limits(&self, api: &dyn RemoteApi) -> AgentResult<()> {
        match self.refresh(api).await {
            Ok(()) => Ok(()),
            Err(e) => match self.store.load::<UsageLimitConfig>(LIMITS_FILE) {
                Some(cached) => {
                    log::warn!("Usage policy fetch failed ({}), using cached policy", e);
                    self.set_limits(cached);
                    Ok(())
                }
                None => Err(AgentError::RemoteApi(format!(
                    "usage policy unavailable and no cached copy: {}",
                    e
                ))),
            },
        }
    }

    /// Load the policy and schedule the reset and refresh tasks
    pub async fn start(self: &Arc<Self>, agent: &Agent) -> AgentResult<()> {
        let api = agent.remote_api();
        self.load_limits(api.as_ref()).await?;

        let monitor = Arc::clone(self);
        agent
            .scheduler()
            .schedule_repeating("usage-reset", Duration::ZERO, RESET_CHECK_PERIOD, move || {
                let monitor = Arc::clone(&monitor);
                async move {
                    monitor.check_monthly_reset(chrono::Local::now().date_naive());
                    Ok(())
                }
            })?;

        let monitor = Arc::clone(self);
        agent
            .scheduler()
            .schedule_repeating("usage-refresh", REFRESH_TICK_PERIOD, REFRESH_TICK_PERIOD, move || {
                let monitor = Arc::clone(&monitor);
                let api = Arc::clone(&api);
                async move {
                    monitor.on_refresh_tick(api.as_ref()).await;
                    Ok(())
                }
            })?;

        log::info!(
            "Data usage monitor started ({} bytes sent this cycle)",
            self.bytes_sent()
        );
        Ok(())
    }
}

/// Reset day for the month containing `today`; days past the month's end
/// fall on its last day
fn effective_reset_day(reset_day: u32, today: NaiveDate) -> u32 {
    reset_day.clamp(1, days_in_month(today))
}

fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };

    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first_of_next| first_of_next.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}
