//! Counters for the refresh path
//!
//! - `auth_refresh_total` (counter): label `outcome` = success | failure | skipped | superseded
//! - `auth_refresh_waiters_total` (counter): requests queued behind a refresh
//! - `auth_replays_total` (counter): requests replayed with a new credential

pub(crate) fn record_refresh(outcome: &'static str) {
    metrics::counter!("auth_refresh_total", "outcome" => outcome).increment(1);
}

pub(crate) fn record_waiter() {
    metrics::counter!("auth_refresh_waiters_total").increment(1);
}

pub(crate) fn record_replay() {
    metrics::counter!("auth_replays_total").increment(1);
}
