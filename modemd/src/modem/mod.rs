use derive_more::Display;

use crate::{settings::ModemConfig, usb::UsbId};

pub mod queries;

pub use queries::{AccessTechnology, ModemCommands, Provider, SignalLevel, SignalQuality};

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimStatus {
    #[default]
    #[display("finding")]
    Finding,
    #[display("ready")]
    Ready,
    #[display("failed")]
    Failed,
}

/// The modem currently attached, as last seen by USB discovery. Lives for one power
/// cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modem {
    pub name: String,
    pub netdev: String,
    /// Id of the USB mode we want the modem in.
    pub target: UsbId,
    /// Id the modem enumerated with.
    pub observed: UsbId,
    pub at_ready: bool,
    sim_status: SimStatus,
}

impl Modem {
    pub fn new(config: &ModemConfig, observed: UsbId) -> Self {
        Self {
            name: config.name.clone(),
            netdev: config.netdev.clone(),
            target: config.vendor_product,
            observed,
            at_ready: false,
            sim_status: SimStatus::Finding,
        }
    }

    pub fn in_target_mode(&self) -> bool {
        self.observed == self.target
    }

    pub fn sim_status(&self) -> SimStatus {
        self.sim_status
    }

    /// Moves the SIM out of [`SimStatus::Finding`]. Once settled, the status stays
    /// put until the next power cycle builds a new `Modem`. Returns whether the
    /// status changed.
    pub fn set_sim_status(&mut self, status: SimStatus) -> bool {
        if self.sim_status != SimStatus::Finding || status == SimStatus::Finding {
            return false;
        }
        self.sim_status = status;

        true
    }
}
