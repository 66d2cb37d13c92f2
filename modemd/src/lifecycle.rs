//! Brings the modem up step by step and keeps it connected.
//!
//! Every step has its own deadline. A step that fails sends the whole sequence back
//! to [`Stage::PoweredOff`] instead of retrying locally.

use color_eyre::Result;
use derive_more::Display;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::broadcast,
    time::{self, Instant},
};
use tracing::{debug, error, info, warn};

use crate::{
    at::AtClient,
    events::{self, Event, EventKind, EventSink},
    modem::{Modem, ModemCommands, SimStatus},
    net::Network,
    policy,
    power::PowerController,
    settings::Settings,
    state::ControllerState,
    usb::{self, UsbDiscovery},
    utils::State,
};

pub const SETUP_STEPS: usize = 10;

const POLICY_POLL_INTERVAL: Duration = Duration::from_secs(1);
const USB_POLL_INTERVAL: Duration = Duration::from_secs(1);
const AT_CHECK_INTERVAL: Duration = Duration::from_secs(1);
const AT_CHECK_TIMEOUT: Duration = Duration::from_secs(1);
const SIM_POLL_INTERVAL: Duration = Duration::from_secs(1);
const SIGNAL_POLL_INTERVAL: Duration = Duration::from_secs(3);
const NETWORK_POLL_INTERVAL: Duration = Duration::from_secs(1);
const PING_ROUND_PAUSE: Duration = Duration::from_secs(2);
const ERROR_RETRY_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    PoweredOff,
    PoweringOn,
    FindingModem,
    CheckingAtReady,
    DisablingGps,
    CheckingUsbMode,
    CheckingSim,
    CheckingSignal,
    CheckingNetworkInterfaceUp,
    InitialPingTest,
    SteadyStatePing,
}

impl Stage {
    fn setup_step(self) -> Option<(usize, &'static str)> {
        let step = match self {
            Stage::PoweredOff => return None,
            Stage::PoweringOn => (1, "powering on USB modem"),
            Stage::FindingModem => (2, "finding USB modem"),
            Stage::CheckingAtReady => (3, "checking for AT response from modem"),
            Stage::DisablingGps => (4, "disabling GPS"),
            Stage::CheckingUsbMode => (5, "checking that the modem is in the correct mode"),
            Stage::CheckingSim => (6, "checking SIM card"),
            Stage::CheckingSignal => (7, "checking signal strength"),
            Stage::CheckingNetworkInterfaceUp => (8, "checking that the network is up"),
            Stage::InitialPingTest => (9, "checking ping through the network"),
            Stage::SteadyStatePing => (10, "running regular ping tests"),
        };

        Some(step)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Next(Stage),
    /// Start over from [`Stage::PoweredOff`].
    Restart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PingOutcome {
    Reachable,
    Unreachable,
    /// The policy turned the modem off mid-test.
    Abandoned,
}

#[derive(bon::Builder)]
pub struct Lifecycle {
    settings: Settings,
    state: State<ControllerState>,
    at: AtClient,
    commands: ModemCommands,
    power: PowerController,
    usb: Arc<dyn UsbDiscovery>,
    net: Arc<dyn Network>,
    events: Arc<dyn EventSink>,
    connected_tx: broadcast::Sender<bool>,
}

impl Lifecycle {
    /// Never returns under normal operation.
    pub async fn run(self) -> Result<()> {
        info!("starting modem lifecycle");
        let mut stage = Stage::PoweredOff;

        loop {
            if let Some((i, text)) = stage.setup_step() {
                info!("modem set up step ({i}/{SETUP_STEPS}): {text}");
            }

            let transition = match self.step(stage).await {
                Ok(transition) => transition,
                Err(e) => {
                    error!("modem set up failed at {stage}: {e:?}");
                    time::sleep(ERROR_RETRY_DELAY).await;
                    Transition::Restart
                }
            };

            stage = match transition {
                Transition::Next(next) => next,
                Transition::Restart => {
                    debug!("restarting modem set up from {stage}");
                    Stage::PoweredOff
                }
            };
        }
    }

    async fn step(&self, stage: Stage) -> Result<Transition> {
        match stage {
            Stage::PoweredOff => self.powered_off().await,
            Stage::PoweringOn => self.powering_on().await,
            Stage::FindingModem => self.finding_modem().await,
            Stage::CheckingAtReady => self.checking_at_ready().await,
            Stage::DisablingGps => self.disabling_gps().await,
            Stage::CheckingUsbMode => self.checking_usb_mode().await,
            Stage::CheckingSim => self.checking_sim().await,
            Stage::CheckingSignal => self.checking_signal().await,
            Stage::CheckingNetworkInterfaceUp => self.checking_network().await,
            Stage::InitialPingTest => self.initial_ping_test().await,
            Stage::SteadyStatePing => self.steady_state_ping().await,
        }
    }

    async fn powered_off(&self) -> Result<Transition> {
        if policy::evaluate(&self.state)? {
            return Ok(Transition::Next(Stage::PoweringOn));
        }

        if self.state.read(|s| s.is_powered)? {
            info!("powering off USB modem");
            self.power.set_power(false).await?;
        }
        self.state.write(|s| s.modem = None)?;

        while !policy::evaluate(&self.state)? {
            time::sleep(POLICY_POLL_INTERVAL).await;
        }

        Ok(Transition::Next(Stage::PoweringOn))
    }

    async fn powering_on(&self) -> Result<Transition> {
        self.power.set_power(true).await?;

        Ok(Transition::Next(Stage::FindingModem))
    }

    /// Holds here, so status stays queryable, until the policy turns the modem off
    /// or a stay on request clears the `latched` failure.
    async fn park(&self, latched: fn(&ControllerState) -> bool) -> Result<Transition> {
        while policy::evaluate(&self.state)? {
            if !self.state.read(latched)? {
                info!("asked to retry, starting modem set up again");
                break;
            }
            time::sleep(POLICY_POLL_INTERVAL).await;
        }

        Ok(Transition::Restart)
    }

    async fn finding_modem(&self) -> Result<Transition> {
        if self.state.read(|s| s.failed_to_find_modem)? {
            info!("failed to find the USB modem before, not trying to find it again");
            return self.park(|s| s.failed_to_find_modem).await;
        }

        let timeout = self.settings.find_modem_timeout;
        let deadline = Instant::now() + timeout;
        loop {
            match self.usb.list().await {
                Ok(seen) => {
                    if let Some((config, id)) = usb::find_configured(&self.settings.modems, &seen)
                    {
                        info!("found modem {} with USB id {id}", config.name);
                        let modem = Modem::new(config, id);
                        self.state.write(|s| s.modem = Some(modem))?;

                        return Ok(Transition::Next(Stage::CheckingAtReady));
                    }
                }
                Err(e) => error!("failed to list USB devices: {e}"),
            }

            if Instant::now() >= deadline {
                break;
            }
            time::sleep(USB_POLL_INTERVAL).await;
        }

        info!("failed to find modem within {timeout:?}, USB devices on the system:");
        match self.usb.dump().await {
            Ok(dump) => dump
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .for_each(|l| info!("\t{l}")),
            Err(e) => error!("failed to list USB devices: {e}"),
        }

        self.state.write(|s| {
            s.failed_to_find_modem = true;
            s.last_failed_find_modem = Some(Instant::now());
        })?;
        self.report(Event::new(EventKind::NoModemFound)).await;

        Ok(Transition::Restart)
    }

    async fn checking_at_ready(&self) -> Result<Transition> {
        let timeout = self.settings.at_ready_timeout;
        let deadline = Instant::now() + timeout;
        loop {
            match self.at.request("AT", AT_CHECK_TIMEOUT, 0).await {
                Ok(_) => {
                    info!("AT command responding");
                    self.state.write(|s| {
                        if let Some(modem) = s.modem.as_mut() {
                            modem.at_ready = true;
                        }
                    })?;

                    break;
                }
                Err(e) => debug!("modem not answering AT commands yet: {e}"),
            }

            if Instant::now() >= deadline {
                // later steps fail on their own if the modem really is unreachable
                error!("no AT command response within {timeout:?}");
                self.report(Event::new(EventKind::NoModemAtCommandResponse))
                    .await;

                break;
            }
            time::sleep(AT_CHECK_INTERVAL).await;
        }

        Ok(Transition::Next(Stage::DisablingGps))
    }

    async fn disabling_gps(&self) -> Result<Transition> {
        if let Err(e) = self.commands.disable_gps().await {
            error!("failed to disable GPS: {e}");
        }

        Ok(Transition::Next(Stage::CheckingUsbMode))
    }

    async fn checking_usb_mode(&self) -> Result<Transition> {
        let Some(modem) = self.state.read(|s| s.modem.clone())? else {
            warn!("modem disappeared before its USB mode was checked");
            return Ok(Transition::Restart);
        };

        if modem.in_target_mode() {
            info!("modem is in the correct mode {}", modem.observed);
            return Ok(Transition::Next(Stage::CheckingSim));
        }

        info!(
            "modem is in mode {}, moving it to mode {}",
            modem.observed, modem.target
        );
        if let Err(e) = self.commands.set_usb_mode(modem.target).await {
            error!("failed to set USB mode: {e}");
        }
        if let Err(e) = self.commands.reset().await {
            error!("failed to reset modem: {e}");
        }

        let timeout = self.settings.usb_mode_switch_timeout;
        let deadline = Instant::now() + timeout;
        loop {
            match self.usb.list().await {
                Ok(seen) if seen.contains(&modem.target) => {
                    info!("modem is back with the correct USB id {}", modem.target);
                    break;
                }
                Ok(_) => {}
                Err(e) => error!("failed to list USB devices: {e}"),
            }

            if Instant::now() >= deadline {
                error!("modem did not come back in mode {} within {timeout:?}", modem.target);
                break;
            }
            time::sleep(USB_POLL_INTERVAL).await;
        }

        Ok(Transition::Restart)
    }

    async fn checking_sim(&self) -> Result<Transition> {
        if self.state.read(|s| s.failed_to_find_sim_card)? {
            info!("modem failed to find a SIM card before, not trying again");
            return self.park(|s| s.failed_to_find_sim_card).await;
        }

        for remaining in (0..self.settings.sim_check_retries).rev() {
            match self.commands.sim_status().await {
                Ok(status) if status == "READY" => {
                    info!("SIM card ready");
                    self.state.write(|s| {
                        s.failed_to_find_sim_card = false;
                        if let Some(modem) = s.modem.as_mut() {
                            modem.set_sim_status(SimStatus::Ready);
                        }
                    })?;

                    return Ok(Transition::Next(Stage::CheckingSignal));
                }
                Ok(status) => info!(
                    "SIM card not ready, current status: {status}, {remaining} tries left"
                ),
                Err(e) => warn!("failed to check SIM card, {remaining} tries left: {e}"),
            }

            if remaining > 0 {
                time::sleep(SIM_POLL_INTERVAL).await;
            }
        }

        self.state.write(|s| {
            s.failed_to_find_sim_card = true;
            if let Some(modem) = s.modem.as_mut() {
                modem.set_sim_status(SimStatus::Failed);
            }
        })?;
        self.report_with_details(EventKind::NoModemSimCard).await;

        Ok(Transition::Restart)
    }

    async fn checking_signal(&self) -> Result<Transition> {
        let deadline = Instant::now() + self.settings.signal_timeout;
        loop {
            match self.commands.signal_quality().await {
                Ok(signal) if signal.has_signal() => {
                    info!(
                        "signal strength: {}, bit error rate: {}, signal status: {}",
                        signal.rssi,
                        signal.ber,
                        signal.level()
                    );
                    self.report_with_details(EventKind::ModemSignal).await;

                    return Ok(Transition::Next(Stage::CheckingNetworkInterfaceUp));
                }
                Ok(_) => debug!("no signal yet, looking again in {SIGNAL_POLL_INTERVAL:?}"),
                Err(e) => debug!("failed to read signal strength: {e}"),
            }

            time::sleep(SIGNAL_POLL_INTERVAL).await;

            if Instant::now() >= deadline {
                info!("timed out waiting for signal");
                self.state
                    .write(|s| s.last_failed_connection = Some(Instant::now()))?;
                self.report_with_details(EventKind::NoModemSignal).await;

                return Ok(Transition::Restart);
            }
        }
    }

    async fn checking_network(&self) -> Result<Transition> {
        let Some(netdev) = self.netdev()? else {
            return Ok(Transition::Restart);
        };

        let deadline = Instant::now() + self.settings.network_timeout;
        loop {
            if Instant::now() >= deadline {
                error!("took too long for {netdev} to come up");
                self.report_with_details(EventKind::NoModemNetwork).await;

                return Ok(Transition::Restart);
            }

            match self.net.addresses(&netdev).await {
                Ok(addrs) if !addrs.is_empty() => {
                    for addr in addrs {
                        info!("network address on {netdev}: {addr}");
                    }

                    return Ok(Transition::Next(Stage::InitialPingTest));
                }
                Ok(_) => debug!("no addresses on {netdev} yet"),
                Err(e) => error!("failed to get addresses of {netdev}: {e}"),
            }

            time::sleep(NETWORK_POLL_INTERVAL).await;
        }
    }

    async fn initial_ping_test(&self) -> Result<Transition> {
        let Some(netdev) = self.netdev()? else {
            return Ok(Transition::Restart);
        };

        match self.net.is_default_route(&netdev).await {
            Ok(true) => info!("{netdev} is the default route"),
            Ok(false) => info!("{netdev} is not the default route"),
            Err(e) => warn!("failed to read routes: {e}"),
        }

        let timeout = self.settings.connection_timeout;
        let deadline = Instant::now() + timeout;
        loop {
            if !policy::evaluate(&self.state)? {
                info!("canceling ping test as modem should be off");
                return Ok(Transition::Restart);
            }

            if Instant::now() >= deadline {
                error!("took too long to ping through {netdev}");
                self.state
                    .write(|s| s.last_failed_connection = Some(Instant::now()))?;
                self.report_with_details(EventKind::NoModemPing).await;

                return Ok(Transition::Restart);
            }

            match self.ping_test(&netdev).await? {
                PingOutcome::Reachable => break,
                PingOutcome::Unreachable => {
                    info!("ping test failed, trying again until the {timeout:?} timeout")
                }
                PingOutcome::Abandoned => {
                    info!("canceling ping test as modem should be off");
                    return Ok(Transition::Restart);
                }
            }
        }

        info!("modem has connected to a network");
        self.state.write(|s| {
            let now = Instant::now();
            s.connected_time = Some(now);
            s.last_successful_ping = Some(now);
        })?;
        self.report_with_details(EventKind::ModemConnectedToNetwork)
            .await;
        if self.connected_tx.send(true).is_err() {
            debug!("nobody is listening for modem connections");
        }

        Ok(Transition::Next(Stage::SteadyStatePing))
    }

    async fn steady_state_ping(&self) -> Result<Transition> {
        let Some(netdev) = self.netdev()? else {
            return Ok(Transition::Restart);
        };

        info!("running ping tests every {:?}", self.settings.test_interval);
        let mut failures = 0;
        loop {
            if !self.wait_for_next_ping_test().await? {
                info!("modem should be off, stopping ping tests");
                return Ok(Transition::Restart);
            }

            debug!("running a regular ping test");
            match self.ping_test(&netdev).await? {
                PingOutcome::Reachable => {
                    failures = 0;
                    self.state
                        .write(|s| s.last_successful_ping = Some(Instant::now()))?;
                }
                PingOutcome::Unreachable => {
                    failures += 1;
                    info!("ping test failed {failures} times in a row");
                }
                PingOutcome::Abandoned => {
                    info!("modem should be off, stopping ping tests");
                    return Ok(Transition::Restart);
                }
            }

            if failures >= self.settings.ping_failure_threshold {
                info!("ping test failed {failures} times in a row, reporting failure");
                self.state
                    .write(|s| s.last_failed_connection = Some(Instant::now()))?;

                return Ok(Transition::Restart);
            }
        }
    }

    /// Waits one test interval. False when the policy turned the modem off meanwhile.
    async fn wait_for_next_ping_test(&self) -> Result<bool> {
        let deadline = Instant::now() + self.settings.test_interval;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(true);
            }
            time::sleep(POLICY_POLL_INTERVAL.min(deadline - now)).await;

            if !policy::evaluate(&self.state)? {
                return Ok(false);
            }
        }
    }

    /// Up to `ping_retries` rounds over every test host, stopping at the first reply.
    async fn ping_test(&self, netdev: &str) -> Result<PingOutcome> {
        let rounds = self.settings.ping_retries.max(1);
        for round in 1..=rounds {
            for host in &self.settings.test_hosts {
                if self
                    .net
                    .ping(netdev, host, self.settings.ping_wait_time)
                    .await
                {
                    return Ok(PingOutcome::Reachable);
                }
            }

            if round < rounds {
                info!("ping test failed, {} more retries", rounds - round);
            }
            time::sleep(PING_ROUND_PAUSE).await;

            if !policy::evaluate(&self.state)? {
                return Ok(PingOutcome::Abandoned);
            }
        }

        Ok(PingOutcome::Unreachable)
    }

    fn netdev(&self) -> Result<Option<String>> {
        let netdev = self.state.read(|s| s.modem.as_ref().map(|m| m.netdev.clone()))?;
        if netdev.is_none() {
            warn!("modem disappeared during set up");
        }

        Ok(netdev)
    }

    async fn report(&self, event: Event) {
        events::report(self.events.as_ref(), event).await;
    }

    async fn report_with_details(&self, kind: EventKind) {
        let details = self.commands.event_details().await;
        self.report(Event::new(kind).with_details(details)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_steps_are_numbered_in_order() {
        let stages = [
            Stage::PoweringOn,
            Stage::FindingModem,
            Stage::CheckingAtReady,
            Stage::DisablingGps,
            Stage::CheckingUsbMode,
            Stage::CheckingSim,
            Stage::CheckingSignal,
            Stage::CheckingNetworkInterfaceUp,
            Stage::InitialPingTest,
            Stage::SteadyStatePing,
        ];

        let numbers: Vec<_> = stages
            .iter()
            .filter_map(|s| s.setup_step())
            .map(|(i, _)| i)
            .collect();

        assert_eq!(numbers, (1..=SETUP_STEPS).collect::<Vec<_>>());
        assert_eq!(Stage::PoweredOff.setup_step(), None);
    }
}
