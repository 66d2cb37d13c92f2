use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use figment::providers::Format as _;
use serde::{Deserialize, Serialize};
use serde_with::{DurationSeconds, serde_as};

use crate::usb::UsbId;

mod args;
pub use args::Args;

#[cfg(test)]
mod tests;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/modemd/modemd.toml";
pub const ENV_PREFIX: &str = "MODEMD_";

/// A modem this daemon knows how to drive.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ModemConfig {
    pub name: String,
    /// Network interface the modem shows up as once it is in `vendor_product` mode.
    pub netdev: String,
    /// USB id of the mode the modem must be switched into. A malformed value fails
    /// settings extraction.
    pub vendor_product: UsbId,
}

/// `Settings` are the configurable options for running modemd.
///
/// The only entry point to construct `Settings` from the outside world is
/// `Settings::get`. Every duration is given in seconds.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    pub modems: Vec<ModemConfig>,
    pub test_hosts: Vec<String>,
    #[serde_as(as = "DurationSeconds")]
    pub test_interval: Duration,
    #[serde_as(as = "DurationSeconds")]
    pub initial_on_duration: Duration,
    #[serde_as(as = "DurationSeconds")]
    pub find_modem_timeout: Duration,
    #[serde_as(as = "DurationSeconds")]
    pub connection_timeout: Duration,
    #[serde_as(as = "DurationSeconds")]
    pub ping_wait_time: Duration,
    pub ping_retries: u32,
    #[serde_as(as = "DurationSeconds")]
    pub request_on_duration: Duration,
    #[serde_as(as = "DurationSeconds")]
    pub retry_interval: Duration,
    #[serde_as(as = "DurationSeconds")]
    pub retry_find_modem_interval: Duration,
    #[serde_as(as = "DurationSeconds")]
    pub max_off_duration: Duration,
    #[serde_as(as = "DurationSeconds")]
    pub min_conn_duration: Duration,
    #[serde_as(as = "DurationSeconds")]
    pub at_ready_timeout: Duration,
    pub sim_check_retries: u32,
    #[serde_as(as = "DurationSeconds")]
    pub signal_timeout: Duration,
    #[serde_as(as = "DurationSeconds")]
    pub network_timeout: Duration,
    #[serde_as(as = "DurationSeconds")]
    pub usb_mode_switch_timeout: Duration,
    /// Consecutive steady-state ping failures that trigger a restart.
    pub ping_failure_threshold: u32,
    #[serde_as(as = "DurationSeconds")]
    pub maintenance_poll_interval: Duration,
    pub at_port: PathBuf,
    pub gpio_root: PathBuf,
    pub enable_pin: u32,
    pub power_enable_pin: u32,
    pub usb_bus_power: PathBuf,
    #[serde_as(as = "DurationSeconds")]
    pub power_off_settle: Duration,
    /// Cycle modem power once at startup.
    pub restart_modem: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            modems: vec![ModemConfig {
                name: "Qualcomm".into(),
                netdev: "usb0".into(),
                vendor_product: UsbId::new(0x1e0e, 0x9018),
            }],
            test_hosts: vec!["8.8.8.8".into(), "1.1.1.1".into()],
            test_interval: Duration::from_secs(5 * 60),
            initial_on_duration: Duration::from_secs(60 * 60),
            find_modem_timeout: Duration::from_secs(2 * 60),
            connection_timeout: Duration::from_secs(3 * 60),
            ping_wait_time: Duration::from_secs(5),
            ping_retries: 3,
            request_on_duration: Duration::from_secs(24 * 60 * 60),
            retry_interval: Duration::from_secs(10 * 60),
            retry_find_modem_interval: Duration::from_secs(24 * 60 * 60),
            max_off_duration: Duration::from_secs(24 * 60 * 60),
            min_conn_duration: Duration::from_secs(60),
            at_ready_timeout: Duration::from_secs(60),
            sim_check_retries: 30,
            signal_timeout: Duration::from_secs(2 * 60),
            network_timeout: Duration::from_secs(2 * 60),
            usb_mode_switch_timeout: Duration::from_secs(60),
            ping_failure_threshold: 3,
            maintenance_poll_interval: Duration::from_secs(60),
            at_port: PathBuf::from("/dev/UsbModemAT"),
            gpio_root: PathBuf::from("/sys/class/gpio"),
            enable_pin: 22,
            power_enable_pin: 20,
            usb_bus_power: PathBuf::from("/sys/devices/platform/soc/3f980000.usb/buspower"),
            power_off_settle: Duration::from_secs(30),
            restart_modem: false,
        }
    }
}

impl Settings {
    /// Constructs `Settings` from built-in defaults, a config file, environment
    /// variables, and command line arguments. Command line arguments always take
    /// precedence over environment variables, which in turn take precedence over the
    /// config file. A missing config file is not an error.
    pub fn get<P: AsRef<Path>>(
        args: &Args,
        config: P,
        env_prefix: &str,
    ) -> figment::error::Result<Settings> {
        figment::Figment::new()
            .merge(figment::providers::Serialized::defaults(Settings::default()))
            .merge(figment::providers::Toml::file(config))
            .merge(figment::providers::Env::prefixed(env_prefix))
            .merge(figment::providers::Serialized::defaults(args))
            .extract()
    }
}
