//! Modem and USB bus power sequencing.

use async_trait::async_trait;
use color_eyre::{Result, eyre::WrapErr as _};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::{fs, time};
use tracing::{debug, info, warn};

use crate::{
    events::{self, Event, EventKind, EventSink},
    modem::ModemCommands,
    settings::{ModemConfig, Settings},
    state::ControllerState,
    usb::{self, UsbDiscovery},
    utils::State,
};

/// The three lines that feed the modem.
#[async_trait]
pub trait PowerSwitch: 'static + Send + Sync {
    async fn set_enable(&self, on: bool) -> Result<()>;
    async fn set_power_enable(&self, on: bool) -> Result<()>;
    async fn set_usb_bus_power(&self, on: bool) -> Result<()>;
}

/// [`PowerSwitch`] through the sysfs GPIO class and the USB controller's buspower
/// attribute.
#[derive(Debug, Clone)]
pub struct SysfsPower {
    gpio_root: PathBuf,
    enable_pin: u32,
    power_enable_pin: u32,
    usb_bus_power: PathBuf,
}

impl SysfsPower {
    pub fn new(settings: &Settings) -> Self {
        Self {
            gpio_root: settings.gpio_root.clone(),
            enable_pin: settings.enable_pin,
            power_enable_pin: settings.power_enable_pin,
            usb_bus_power: settings.usb_bus_power.clone(),
        }
    }

    async fn set_gpio(&self, pin: u32, high: bool) -> Result<()> {
        let dir = self.gpio_root.join(format!("gpio{pin}"));
        if !fs::try_exists(&dir).await? {
            write(&self.gpio_root.join("export"), &pin.to_string()).await?;
        }
        write(&dir.join("direction"), "out").await?;
        write(&dir.join("value"), if high { "1" } else { "0" }).await
    }
}

async fn write(path: &Path, value: &str) -> Result<()> {
    fs::write(path, value)
        .await
        .wrap_err_with(|| format!("failed to write '{value}' to {}", path.display()))
}

#[async_trait]
impl PowerSwitch for SysfsPower {
    async fn set_enable(&self, on: bool) -> Result<()> {
        self.set_gpio(self.enable_pin, on).await
    }

    async fn set_power_enable(&self, on: bool) -> Result<()> {
        self.set_gpio(self.power_enable_pin, on).await
    }

    async fn set_usb_bus_power(&self, on: bool) -> Result<()> {
        info!("{} USB power", if on { "enabling" } else { "disabling" });
        write(&self.usb_bus_power, if on { "1" } else { "0" }).await
    }
}

#[derive(Clone, bon::Builder)]
pub struct PowerController {
    switch: Arc<dyn PowerSwitch>,
    usb: Arc<dyn UsbDiscovery>,
    events: Arc<dyn EventSink>,
    commands: ModemCommands,
    state: State<ControllerState>,
    modems: Vec<ModemConfig>,
    settle: Duration,
}

impl PowerController {
    pub async fn set_power(&self, on: bool) -> Result<()> {
        if on {
            self.power_on().await
        } else {
            self.power_off().await
        }
    }

    pub async fn cycle_power(&self) -> Result<()> {
        self.power_off().await?;
        self.power_on().await
    }

    async fn power_on(&self) -> Result<()> {
        info!("powering on USB modem");
        self.switch.set_enable(true).await?;
        self.switch.set_power_enable(true).await?;
        self.switch.set_usb_bus_power(true).await?;

        self.state.write(|s| s.is_powered = true)?;

        Ok(())
    }

    async fn power_off(&self) -> Result<()> {
        info!("triggering modem shutdown");
        // an unresponsive modem is the usual reason we are here
        if let Err(e) = self.commands.power_off().await {
            debug!("modem did not take the power off command: {e}");
        }
        self.switch.set_enable(false).await?;

        info!("waiting {:?} for modem to shut down", self.settle);
        time::sleep(self.settle).await;

        match self.usb.list().await {
            Ok(seen) => {
                if let Some((modem, id)) = usb::find_configured(&self.modems, &seen) {
                    warn!(
                        "modem {} ({id}) is not shutting down, cutting power anyway",
                        modem.name
                    );
                    events::report(
                        self.events.as_ref(),
                        Event::new(EventKind::FailedModemShutdown),
                    )
                    .await;
                }
            }
            Err(e) => warn!("failed to check if modem is powered off: {e}"),
        }

        info!("powering off modem");
        self.switch.set_power_enable(false).await?;
        self.switch.set_usb_bus_power(false).await?;

        self.state.write(|s| {
            s.is_powered = false;
            s.modem = None;
        })?;

        Ok(())
    }
}
