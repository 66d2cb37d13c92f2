//! Decides whether the modem should be powered right now.

use color_eyre::Result;
use derive_more::Display;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

use crate::{state::ControllerState, utils::State};

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum OnOffReason {
    #[display("modem was requested to stay off")]
    StayOffRequested,
    #[display("modem was requested to stay on")]
    StayOnRequested,
    #[display("modem could not be found, waiting for a request to retry")]
    FailedToFindModem,
    #[display("no SIM card was found, waiting for a request to retry")]
    FailedToFindSimCard,
    #[display("backing off after failing to find the modem")]
    FindModemBackoff,
    #[display("backing off after a failed connection")]
    ConnectionBackoff,
    #[display("modem should be on for its initial on duration")]
    InitialOnDuration,
    #[display("modem was recently requested to be on")]
    RecentOnRequest,
    #[display("modem has been off for longer than the maximum off duration")]
    MaxOffDurationExceeded,
    #[display("modem is within its minimum connection duration")]
    MinConnDuration,
    #[display("maintenance jobs are running")]
    MaintenanceRunning,
    #[display("no reason the modem should be on")]
    NoReason,
}

impl OnOffReason {
    pub fn is_on(self) -> bool {
        matches!(
            self,
            OnOffReason::StayOnRequested
                | OnOffReason::InitialOnDuration
                | OnOffReason::RecentOnRequest
                | OnOffReason::MaxOffDurationExceeded
                | OnOffReason::MinConnDuration
                | OnOffReason::MaintenanceRunning
        )
    }
}

fn before(now: Instant, until: Option<Instant>) -> bool {
    until.is_some_and(|t| now < t)
}

fn within(now: Instant, since: Option<Instant>, window: Duration) -> bool {
    since.is_some_and(|t| now.saturating_duration_since(t) < window)
}

/// First matching rule wins. Pure: the same state and clock give the same answer.
pub fn should_be_on(state: &ControllerState, now: Instant) -> (bool, OnOffReason) {
    let t = &state.timings;

    let reason = if before(now, state.stay_off_until) {
        OnOffReason::StayOffRequested
    } else if before(now, state.stay_on_until) {
        OnOffReason::StayOnRequested
    } else if state.failed_to_find_modem {
        OnOffReason::FailedToFindModem
    } else if state.failed_to_find_sim_card {
        OnOffReason::FailedToFindSimCard
    } else if within(now, state.last_failed_find_modem, t.retry_find_modem_interval) {
        OnOffReason::FindModemBackoff
    } else if within(now, state.last_failed_connection, t.retry_interval) {
        OnOffReason::ConnectionBackoff
    } else if within(now, Some(state.started_at), t.initial_on_duration) {
        OnOffReason::InitialOnDuration
    } else if within(now, state.last_on_request, t.request_on_duration) {
        OnOffReason::RecentOnRequest
    } else if !within(now, state.last_successful_ping, t.max_off_duration) {
        // never having pinged counts as being off for too long
        OnOffReason::MaxOffDurationExceeded
    } else if within(now, state.connected_time, t.min_conn_duration) {
        OnOffReason::MinConnDuration
    } else if state.maintenance_running {
        OnOffReason::MaintenanceRunning
    } else {
        OnOffReason::NoReason
    };

    (reason.is_on(), reason)
}

/// Evaluates the policy against the shared state, records the reason and logs it
/// when it changed.
pub fn evaluate(state: &State<ControllerState>) -> Result<bool> {
    let now = Instant::now();

    state.write(|s| {
        let (on, reason) = should_be_on(s, now);
        if s.on_off_reason != Some(reason) {
            info!("modem should be {}: {reason}", if on { "on" } else { "off" });
            s.on_off_reason = Some(reason);
        }

        on
    })
}
