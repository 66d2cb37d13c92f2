use color_eyre::Result;
use std::{sync::Arc, time::Duration};
use tokio::{
    fs,
    sync::broadcast,
    task::{self, JoinHandle},
    time::{self, Instant},
};
use tracing::{error, info};

use at::{AtClient, AtPort};
use events::EventSink;
use lifecycle::Lifecycle;
use maintenance::MaintenanceCheck;
use modem::ModemCommands;
use net::Network;
use power::{PowerController, PowerSwitch};
use service::ModemdService;
use settings::Settings;
use state::ControllerState;
use usb::UsbDiscovery;
use utils::State;

pub mod at;
pub mod events;
pub mod lifecycle;
pub mod maintenance;
pub mod modem;
pub mod net;
pub mod policy;
pub mod power;
pub mod service;
pub mod settings;
pub mod state;
pub mod usb;
pub mod utils;

pub type Tasks = Vec<JoinHandle<Result<()>>>;

const MIN_HOST_UPTIME: Duration = Duration::from_secs(2 * 60);
const BOOT_GRACE: Duration = Duration::from_secs(10);

#[bon::builder(finish_fn = run)]
pub async fn program(
    settings: Settings,
    system_bus: zbus::Connection,
    at_port: impl AtPort,
    usb: impl UsbDiscovery,
    net: impl Network,
    power_switch: impl PowerSwitch,
    events: impl EventSink,
    maintenance: impl MaintenanceCheck,
) -> Result<Tasks> {
    info!("modemd starting, watching for modems: {:?}", settings.modems);

    let usb: Arc<dyn UsbDiscovery> = Arc::new(usb);
    let net: Arc<dyn Network> = Arc::new(net);
    let events: Arc<dyn EventSink> = Arc::new(events);
    let state = State::new(ControllerState::new((&settings).into(), Instant::now()));

    let (at, at_engine) = AtClient::spawn(at_port);
    let commands = ModemCommands::new(at.clone());
    let power = PowerController::builder()
        .switch(Arc::new(power_switch))
        .usb(usb.clone())
        .events(events.clone())
        .commands(commands.clone())
        .state(state.clone())
        .modems(settings.modems.clone())
        .settle(settings.power_off_settle)
        .build();

    let mut tasks = vec![at_engine];
    tasks.push(maintenance::spawn_monitor(
        maintenance,
        state.clone(),
        settings.maintenance_poll_interval,
    ));

    let (connected_tx, connected_rx) = broadcast::channel(16);
    tasks.push(
        ModemdService::new(state.clone(), at.clone(), commands.clone(), net.clone())
            .spawn(system_bus.clone()),
    );
    tasks.push(service::spawn_connected_signal(system_bus, connected_rx));

    wait_for_host_boot().await;

    if !policy::evaluate(&state)? || settings.restart_modem {
        info!("powering modem down before starting");
        if let Err(e) = power.set_power(false).await {
            error!("failed to power modem down: {e}");
        }
    }

    let lifecycle = Lifecycle::builder()
        .settings(settings)
        .state(state)
        .at(at)
        .commands(commands)
        .power(power)
        .usb(usb)
        .net(net)
        .events(events)
        .connected_tx(connected_tx)
        .build();
    tasks.push(task::spawn(lifecycle.run()));

    Ok(tasks)
}

/// Touching modem power right after boot can brown out the host.
async fn wait_for_host_boot() {
    let uptime = match fs::read_to_string("/proc/uptime").await {
        Ok(contents) => parse_uptime(&contents),
        Err(e) => {
            error!("failed to read host uptime: {e}");
            None
        }
    };

    if uptime.is_none_or(|uptime| uptime < MIN_HOST_UPTIME) {
        info!("host recently booted, waiting {BOOT_GRACE:?} before touching modem power");
        time::sleep(BOOT_GRACE).await;
    }
}

fn parse_uptime(contents: &str) -> Option<Duration> {
    let secs: f64 = contents.split_whitespace().next()?.parse().ok()?;

    Duration::try_from_secs_f64(secs).ok()
}
