use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use color_eyre::Result;
use modemd_dbus::{
    Modemd, ModemStatus, ModemdError, ModemdStatus, ModemdT, OBJ_PATH, SERVICE,
    SignalStatus, SimCardStatus,
};
use std::{fmt::Display, sync::Arc, time::Duration};
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::{self, JoinHandle},
    time::Instant,
};
use tracing::{error, info, warn};
use zbus::SignalContext;

use crate::{
    at::{AtClient, AtError},
    modem::{ModemCommands, queries},
    net::Network,
    state::ControllerState,
    utils::State,
};

const AT_PASSTHROUGH_TIMEOUT: Duration = Duration::from_secs(5);
const AT_PASSTHROUGH_RETRIES: u32 = 1;
/// Keeps `GetStatus` well inside the default D-Bus reply timeout.
const STATUS_QUERY_TIMEOUT: Duration = Duration::from_secs(2);

pub struct ModemdService {
    state: State<ControllerState>,
    at: AtClient,
    commands: ModemCommands,
    status_commands: ModemCommands,
    net: Arc<dyn Network>,
}

impl ModemdService {
    pub fn new(
        state: State<ControllerState>,
        at: AtClient,
        commands: ModemCommands,
        net: Arc<dyn Network>,
    ) -> Self {
        Self {
            state,
            at,
            status_commands: commands.clone().with_budget(STATUS_QUERY_TIMEOUT, 0),
            commands,
            net,
        }
    }

    pub fn spawn(self, conn: zbus::Connection) -> JoinHandle<Result<()>> {
        info!("spawning dbus service {SERVICE} at path {OBJ_PATH}!");

        task::spawn(async move {
            conn.request_name(SERVICE)
                .await
                .inspect_err(|e| error!("failed to request name on dbus {e}"))?;

            conn.object_server()
                .at(OBJ_PATH, Modemd::from(self))
                .await
                .inspect_err(|e| error!("failed to serve obj on dbus {e}"))?;

            info!("dbus service spawned successfully!");
            futures::future::pending::<()>().await;

            Ok(())
        })
    }

    fn read_state<K>(&self, f: impl FnOnce(&ControllerState) -> K) -> modemd_dbus::Result<K> {
        self.state
            .read(f)
            .map_err(|e| ModemdError::Failed(e.to_string()))
    }

    fn ensure_at_ready(&self) -> modemd_dbus::Result<()> {
        if self.read_state(ControllerState::modem_at_ready)? {
            Ok(())
        } else {
            Err(ModemdError::NotReady(
                "modem not ready for AT commands".to_string(),
            ))
        }
    }

    async fn signal_status(&self, reader: &mut StatusReader) -> SignalStatus {
        let mut status = SignalStatus::default();
        match reader.fetch(self.status_commands.signal_quality()).await {
            Ok(signal) => {
                status.strength = signal.rssi.to_string();
                status.bit_error_rate = signal.ber.to_string();
                status.status = signal.level().to_string();
            }
            Err(reason) => {
                status.strength = reason.clone();
                status.bit_error_rate = reason.clone();
                status.status = reason;
            }
        }
        status.band = reader.read(self.status_commands.band()).await;
        match reader.fetch(self.status_commands.provider()).await {
            Ok(provider) => {
                status.provider = provider.name;
                status.access_technology = provider.access_technology.to_string();
            }
            Err(reason) => {
                status.provider = reason.clone();
                status.access_technology = reason;
            }
        }

        status
    }

    async fn sim_card_status(&self, reader: &mut StatusReader) -> SimCardStatus {
        SimCardStatus {
            status: reader.read(self.status_commands.sim_status()).await,
            iccid: reader.read(self.status_commands.iccid()).await,
            provider: reader.read(self.status_commands.sim_provider()).await,
        }
    }
}

/// Reads status values one at a time. Once the modem stops answering, the values
/// left are reported unavailable without asking it.
#[derive(Debug, Default)]
struct StatusReader {
    gave_up: Option<String>,
}

impl StatusReader {
    fn given_up(reason: &str) -> Self {
        Self {
            gave_up: Some(reason.to_string()),
        }
    }

    async fn fetch<T>(
        &mut self,
        query: impl Future<Output = Result<T>>,
    ) -> std::result::Result<T, String> {
        if let Some(reason) = &self.gave_up {
            return Err(unavailable(reason));
        }

        query.await.map_err(|e| {
            warn!("status value unavailable: {e}");
            if e.downcast_ref::<AtError>().is_some_and(AtError::is_unresponsive) {
                self.gave_up = Some("modem not responding".to_string());
            }

            unavailable(e)
        })
    }

    async fn read<T: Display>(&mut self, query: impl Future<Output = Result<T>>) -> String {
        match self.fetch(query).await {
            Ok(value) => value.to_string(),
            Err(reason) => reason,
        }
    }
}

fn unavailable(reason: impl Display) -> String {
    format!("unavailable: {reason}")
}

fn minutes_to_duration(minutes: i32) -> modemd_dbus::Result<Duration> {
    let minutes = u64::try_from(minutes).map_err(|_| {
        ModemdError::InvalidArgs(format!("minutes must not be negative, got {minutes}"))
    })?;

    Ok(Duration::from_secs(minutes * 60))
}

fn wall_clock(at: Instant) -> Option<DateTime<Utc>> {
    let elapsed = TimeDelta::from_std(Instant::now().saturating_duration_since(at)).ok()?;

    Some(Utc::now() - elapsed)
}

#[async_trait]
impl ModemdT for ModemdService {
    async fn stay_on(&self) -> modemd_dbus::Result<()> {
        info!("dbus request to keep modem on");
        self.state
            .write(|s| s.request_on(Instant::now()))
            .map_err(|e| ModemdError::Failed(e.to_string()))
    }

    async fn stay_on_for(&self, minutes: i32) -> modemd_dbus::Result<()> {
        let duration = minutes_to_duration(minutes)?;
        self.state
            .write(|s| s.stay_on_for(Instant::now(), duration))
            .map_err(|e| ModemdError::Failed(e.to_string()))
    }

    async fn stay_off_for(&self, minutes: i32) -> modemd_dbus::Result<()> {
        let duration = minutes_to_duration(minutes)?;
        self.state
            .write(|s| s.stay_off_for(Instant::now(), duration))
            .map_err(|e| ModemdError::Failed(e.to_string()))
    }

    async fn get_status(&self) -> modemd_dbus::Result<ModemdStatus> {
        let (mut status, modem, connected_time) = self.read_state(|s| {
            let status = ModemdStatus {
                timestamp: Utc::now().to_rfc2822(),
                powered: s.is_powered,
                on_off_reason: s
                    .on_off_reason
                    .map(|r| r.to_string())
                    .unwrap_or_default(),
                failed_to_find_modem: s.failed_to_find_modem,
                failed_to_find_sim_card: s.failed_to_find_sim_card,
                ..Default::default()
            };

            (status, s.modem.clone(), s.connected_time)
        })?;

        let Some(modem) = modem else {
            return Ok(status);
        };

        let mut modem_status = ModemStatus {
            name: modem.name.clone(),
            netdev: modem.netdev.clone(),
            vendor_product: modem.target.to_string(),
            usb_id: modem.observed.to_string(),
            at_ready: modem.at_ready,
            sim_status: modem.sim_status().to_string(),
            connected_time: connected_time
                .and_then(wall_clock)
                .map(|t| t.to_rfc2822()),
            ..Default::default()
        };

        modem_status.default_route = StatusReader::default()
            .read(self.net.is_default_route(&modem.netdev))
            .await;

        let mut reader = if modem.at_ready {
            StatusReader::default()
        } else {
            StatusReader::given_up("modem not ready for AT commands")
        };
        modem_status.manufacturer = reader.read(self.status_commands.manufacturer()).await;
        modem_status.model = reader.read(self.status_commands.model()).await;
        modem_status.serial = reader.read(self.status_commands.serial_number()).await;
        modem_status.voltage = reader.read(self.status_commands.voltage()).await;
        modem_status.temp = reader.read(self.status_commands.temperature()).await;

        status.modem = Some(modem_status);
        status.signal = Some(self.signal_status(&mut reader).await);
        status.sim_card = Some(self.sim_card_status(&mut reader).await);
        status.apn = Some(reader.read(self.status_commands.apn()).await);

        Ok(status)
    }

    async fn set_apn(&self, apn: String) -> modemd_dbus::Result<()> {
        info!("setting APN to {apn}");
        queries::validate_apn(&apn).map_err(|e| ModemdError::InvalidArgs(e.to_string()))?;
        self.ensure_at_ready()?;

        self.commands.set_apn(&apn).await.map_err(|e| {
            error!("failed to set APN: {e}");
            ModemdError::AtCommand(e.to_string())
        })
    }

    async fn run_at_command(&self, command: String) -> modemd_dbus::Result<(String, String)> {
        self.ensure_at_ready()?;

        let response = self
            .at
            .submit(command, AT_PASSTHROUGH_TIMEOUT, AT_PASSTHROUGH_RETRIES)
            .await
            .map_err(|e| ModemdError::AtCommand(e.to_string()))?;

        Ok((response.transcript.joined(), response.text))
    }
}

/// Re-emits lifecycle connection notices as the `ModemConnected` D-Bus signal.
pub fn spawn_connected_signal(
    conn: zbus::Connection,
    mut connected_rx: broadcast::Receiver<bool>,
) -> JoinHandle<Result<()>> {
    task::spawn(async move {
        let ctxt = SignalContext::new(&conn, OBJ_PATH)?;
        loop {
            let connected = match connected_rx.recv().await {
                Ok(connected) => connected,
                Err(RecvError::Lagged(n)) => {
                    warn!("missed {n} modem connection notices");
                    continue;
                }
                Err(RecvError::Closed) => return Ok(()),
            };

            if let Err(e) = Modemd::<ModemdService>::modem_connected(&ctxt, connected).await
            {
                error!("failed to emit ModemConnected signal: {e}");
            }
        }
    })
}
