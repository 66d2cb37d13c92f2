use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

use crate::{modem::Modem, policy::OnOffReason, settings::Settings};

/// Windows the on/off policy measures against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyTimings {
    pub initial_on_duration: Duration,
    pub request_on_duration: Duration,
    pub retry_interval: Duration,
    pub retry_find_modem_interval: Duration,
    pub max_off_duration: Duration,
    pub min_conn_duration: Duration,
}

impl From<&Settings> for PolicyTimings {
    fn from(s: &Settings) -> Self {
        Self {
            initial_on_duration: s.initial_on_duration,
            request_on_duration: s.request_on_duration,
            retry_interval: s.retry_interval,
            retry_find_modem_interval: s.retry_find_modem_interval,
            max_off_duration: s.max_off_duration,
            min_conn_duration: s.min_conn_duration,
        }
    }
}

/// Runtime state shared by the lifecycle, the policy and the D-Bus service. Lives
/// behind a [`crate::utils::State`].
#[derive(Debug, Clone)]
pub struct ControllerState {
    pub timings: PolicyTimings,
    pub started_at: Instant,
    pub is_powered: bool,
    pub last_on_request: Option<Instant>,
    pub last_successful_ping: Option<Instant>,
    pub last_failed_connection: Option<Instant>,
    pub last_failed_find_modem: Option<Instant>,
    pub connected_time: Option<Instant>,
    pub stay_on_until: Option<Instant>,
    pub stay_off_until: Option<Instant>,
    /// Last reason the policy gave, `None` until it first runs.
    pub on_off_reason: Option<OnOffReason>,
    pub failed_to_find_modem: bool,
    pub failed_to_find_sim_card: bool,
    pub maintenance_running: bool,
    pub modem: Option<Modem>,
}

impl ControllerState {
    pub fn new(timings: PolicyTimings, started_at: Instant) -> Self {
        Self {
            timings,
            started_at,
            is_powered: false,
            last_on_request: None,
            last_successful_ping: None,
            last_failed_connection: None,
            last_failed_find_modem: None,
            connected_time: None,
            stay_on_until: None,
            stay_off_until: None,
            on_off_reason: None,
            failed_to_find_modem: false,
            failed_to_find_sim_card: false,
            maintenance_running: false,
            modem: None,
        }
    }

    pub fn request_on(&mut self, now: Instant) {
        self.last_on_request = Some(now);
    }

    /// Stay on regardless of earlier failures until `now + duration`.
    pub fn stay_on_for(&mut self, now: Instant, duration: Duration) {
        info!("request to keep modem on for {duration:?}");
        self.stay_on_until = Some(now + duration);
        self.stay_off_until = None;
        self.clear_sticky_failures();
    }

    pub fn stay_off_for(&mut self, now: Instant, duration: Duration) {
        info!("request to keep modem off for {duration:?}");
        self.stay_off_until = Some(now + duration);
        self.stay_on_until = None;
        self.clear_sticky_failures();
    }

    fn clear_sticky_failures(&mut self) {
        self.failed_to_find_modem = false;
        self.failed_to_find_sim_card = false;
    }

    pub fn modem_at_ready(&self) -> bool {
        self.modem.as_ref().is_some_and(|m| m.at_ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;

    #[test]
    fn stay_requests_replace_each_other_and_clear_sticky_flags() {
        // Arrange
        let now = Instant::now();
        let mut state = ControllerState::new((&Settings::default()).into(), now);
        state.failed_to_find_modem = true;
        state.failed_to_find_sim_card = true;

        // Act
        state.stay_off_for(now, Duration::from_secs(60));
        state.failed_to_find_modem = true;
        state.stay_on_for(now, Duration::from_secs(120));

        // Assert
        assert_eq!(state.stay_on_until, Some(now + Duration::from_secs(120)));
        assert_eq!(state.stay_off_until, None);
        assert!(!state.failed_to_find_modem);
        assert!(!state.failed_to_find_sim_card);
    }
}
