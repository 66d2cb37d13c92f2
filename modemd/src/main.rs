use clap::Parser as _;
use color_eyre::eyre::Result;
use modemd::{
    at::SerialAtPort,
    events::DbusEventReporter,
    maintenance::SaltCheck,
    net::SystemNet,
    power::SysfsPower,
    settings::{Args, DEFAULT_CONFIG_PATH, ENV_PREFIX, Settings},
    usb::Lsusb,
};
use modemd_telemetry::Logging;
use tokio::signal::unix::{self, SignalKind};
use tracing::{info, warn};

const SYSLOG_IDENTIFIER: &str = "modemd";

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let log_flusher = Logging::new(SYSLOG_IDENTIFIER)
        .filter("info,zbus=warn")
        .try_init()?;

    let result = async {
        let args = Args::parse();
        let config = args
            .config
            .clone()
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.into());
        let settings = Settings::get(&args, config, ENV_PREFIX)?;
        let system_bus = zbus::Connection::system().await?;

        let tasks = modemd::program()
            .at_port(SerialAtPort::new(settings.at_port.clone()))
            .power_switch(SysfsPower::new(&settings))
            .settings(settings)
            .events(DbusEventReporter::new(system_bus.clone()))
            .system_bus(system_bus)
            .usb(Lsusb)
            .net(SystemNet)
            .maintenance(SaltCheck::default())
            .run()
            .await?;

        let mut sigterm = unix::signal(SignalKind::terminate())?;
        let mut sigint = unix::signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => warn!("received SIGTERM"),
            _ = sigint.recv()  => warn!("received SIGINT"),
        }

        info!("aborting tasks and exiting gracefully");

        for handle in tasks {
            handle.abort();
        }

        Ok(())
    }
    .await;

    log_flusher.flush();

    result
}
