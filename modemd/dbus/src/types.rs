use zbus::zvariant::{DeserializeDict, SerializeDict, Type};

/// Snapshot returned by `GetStatus`.
///
/// The sub-records are absent while no modem is attached. Values read from the
/// modem over AT commands are rendered as strings; a read that failed becomes
/// `"unavailable: <reason>"`.
#[derive(Debug, Clone, Default, PartialEq, SerializeDict, DeserializeDict, Type)]
#[zvariant(signature = "a{sv}")]
pub struct ModemdStatus {
    /// RFC 2822 time at which the snapshot was taken.
    pub timestamp: String,
    pub powered: bool,
    #[zvariant(rename = "onOffReason")]
    pub on_off_reason: String,
    #[zvariant(rename = "failedToFindModem")]
    pub failed_to_find_modem: bool,
    #[zvariant(rename = "failedToFindSimCard")]
    pub failed_to_find_sim_card: bool,
    pub modem: Option<ModemStatus>,
    pub signal: Option<SignalStatus>,
    #[zvariant(rename = "simCard")]
    pub sim_card: Option<SimCardStatus>,
    pub apn: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, SerializeDict, DeserializeDict, Type)]
#[zvariant(signature = "a{sv}")]
pub struct ModemStatus {
    pub name: String,
    pub netdev: String,
    /// Configured `vendor:product` pair the modem is expected to run in.
    #[zvariant(rename = "vendorProduct")]
    pub vendor_product: String,
    /// `vendor:product` pair seen on the USB bus.
    #[zvariant(rename = "usbId")]
    pub usb_id: String,
    #[zvariant(rename = "atReady")]
    pub at_ready: bool,
    #[zvariant(rename = "simStatus")]
    pub sim_status: String,
    #[zvariant(rename = "connectedTime")]
    pub connected_time: Option<String>,
    #[zvariant(rename = "defaultRoute")]
    pub default_route: String,
    pub manufacturer: String,
    pub model: String,
    pub serial: String,
    pub voltage: String,
    pub temp: String,
}

#[derive(Debug, Clone, Default, PartialEq, SerializeDict, DeserializeDict, Type)]
#[zvariant(signature = "a{sv}")]
pub struct SignalStatus {
    pub strength: String,
    #[zvariant(rename = "bitErrorRate")]
    pub bit_error_rate: String,
    pub status: String,
    pub band: String,
    pub provider: String,
    #[zvariant(rename = "accessTechnology")]
    pub access_technology: String,
}

#[derive(Debug, Clone, Default, PartialEq, SerializeDict, DeserializeDict, Type)]
#[zvariant(signature = "a{sv}")]
pub struct SimCardStatus {
    pub status: String,
    #[zvariant(rename = "ICCID")]
    pub iccid: String,
    pub provider: String,
}
