use clap::{
    Parser, Subcommand,
    builder::{Styles, styling::AnsiColor},
};
use color_eyre::eyre::{Result, bail};
use modemd_dbus::{ConnectionRequester, ModemConnectedListener, ModemdProxy, PingConnectivity};
use modemd_telemetry::{Logging, Output};
use std::time::Duration;
use tokio::time::{self, Instant};

const RESTART_MINUTES: i32 = 10;
const RESTART_POWER_OFF_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const RESTART_POLL_INTERVAL: Duration = Duration::from_secs(5);
const RESTART_OFF_TIME: Duration = Duration::from_secs(10);
const CONNECT_RETRY_AFTER: Duration = Duration::from_secs(60);

fn clap_v3_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Green.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Talks to modemd over the system bus.
#[derive(Debug, Parser)]
#[command(author, version, about, styles = clap_v3_styles())]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a raw AT command on the modem and print the full response.
    At { command: String },
    /// Change the modem's power.
    #[command(subcommand)]
    Power(Power),
    /// Print the daemon's view of the modem.
    Status,
    /// Print every ModemConnected signal modemd broadcasts.
    Listen,
    /// Keep the modem on until the internet is reachable.
    Connect {
        /// Seconds to wait for a connection on each try.
        #[arg(long, default_value_t = 300)]
        timeout: u64,
        /// Tries after the first one. Unlimited when left out.
        #[arg(long)]
        retries: Option<u32>,
    },
}

#[derive(Debug, Subcommand)]
enum Power {
    /// Keep the modem on for the given minutes.
    On { minutes: i32 },
    /// Keep the modem off for the given minutes.
    Off { minutes: i32 },
    /// Power the modem off, then on again.
    Restart,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let log_flusher = Logging::new("modem-cli")
        .output(Output::Stderr)
        .filter("info,zbus=warn")
        .try_init()?;
    let cli = Cli::parse();
    let result = run(cli).await;
    log_flusher.flush();

    result
}

async fn run(cli: Cli) -> Result<()> {
    let conn = zbus::Connection::system().await?;
    let modemd = ModemdProxy::new(&conn).await?;

    match cli.command {
        Command::At { command } => {
            let (transcript, _text) = modemd.run_at_command(command).await?;
            println!("{transcript}");
        }
        Command::Power(Power::On { minutes }) => modemd.stay_on_for(minutes).await?,
        Command::Power(Power::Off { minutes }) => modemd.stay_off_for(minutes).await?,
        Command::Power(Power::Restart) => restart(&modemd).await?,
        Command::Status => {
            let status = serde_json::to_value(modemd.get_status().await?)?;
            // serde_json objects keep their keys sorted
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Listen => {
            let mut listener = ModemConnectedListener::new(&conn).await?;
            while let Some(connected) = listener.next().await {
                println!("modem connected: {connected}");
            }
        }
        Command::Connect { timeout, retries } => {
            let requester = ConnectionRequester::spawn(modemd, PingConnectivity::default());
            requester.start();
            requester
                .wait_until_up_loop(Duration::from_secs(timeout), CONNECT_RETRY_AFTER, retries)
                .await?;
            requester.stop();
            println!("connected");
        }
    }

    Ok(())
}

async fn restart(modemd: &ModemdProxy<'_>) -> Result<()> {
    println!("turning modem off");
    modemd.stay_off_for(RESTART_MINUTES).await?;

    let deadline = Instant::now() + RESTART_POWER_OFF_TIMEOUT;
    while modemd.get_status().await?.powered {
        if Instant::now() >= deadline {
            bail!("modem still powered after {RESTART_POWER_OFF_TIMEOUT:?}");
        }
        time::sleep(RESTART_POLL_INTERVAL).await;
    }

    println!("modem is off, waiting {RESTART_OFF_TIME:?}");
    time::sleep(RESTART_OFF_TIME).await;

    println!("turning modem on");
    modemd.stay_on_for(RESTART_MINUTES).await?;

    Ok(())
}
