//! USB enumeration, used to detect modem presence and its current USB mode.

use crate::{settings::ModemConfig, utils::run_cmd};
use async_trait::async_trait;
use color_eyre::Result;
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::{fmt, str::FromStr};

/// A `vendor:product` pair as printed by `lsusb`, e.g. `1e0e:9018`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr,
)]
pub struct UsbId {
    pub vendor: u16,
    pub product: u16,
}

impl UsbId {
    pub const fn new(vendor: u16, product: u16) -> Self {
        Self { vendor, product }
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid vendor:product id '{0}', expected two hex numbers like 1e0e:9018")]
pub struct UsbIdParseError(String);

impl FromStr for UsbId {
    type Err = UsbIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || UsbIdParseError(s.to_string());
        let (vendor, product) = s.trim().split_once(':').ok_or_else(err)?;
        if vendor.len() != 4 || product.len() != 4 {
            return Err(err());
        }

        Ok(Self {
            vendor: u16::from_str_radix(vendor, 16).map_err(|_| err())?,
            product: u16::from_str_radix(product, 16).map_err(|_| err())?,
        })
    }
}

impl fmt::Display for UsbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor, self.product)
    }
}

#[async_trait]
pub trait UsbDiscovery: 'static + Send + Sync {
    /// Ids of every device currently on the bus.
    async fn list(&self) -> Result<Vec<UsbId>>;

    /// Human readable listing, only used for diagnostics.
    async fn dump(&self) -> Result<String>;
}

/// [`UsbDiscovery`] backed by the `lsusb` binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lsusb;

#[async_trait]
impl UsbDiscovery for Lsusb {
    async fn list(&self) -> Result<Vec<UsbId>> {
        let output = run_cmd("lsusb", &[]).await?;

        Ok(parse_lsusb(&output))
    }

    async fn dump(&self) -> Result<String> {
        run_cmd("lsusb", &[]).await
    }
}

/// Lines look like `Bus 001 Device 006: ID 1e0e:9011 Qualcomm / Option`.
pub fn parse_lsusb(output: &str) -> Vec<UsbId> {
    output
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            tokens.find(|t| *t == "ID")?;
            tokens.next()?.parse().ok()
        })
        .collect()
}

/// First configured modem whose vendor id is on the bus, together with the id it
/// was seen with. The product id may differ from the configured one when the
/// modem booted into another USB mode.
pub fn find_configured<'a>(
    modems: &'a [ModemConfig],
    seen: &[UsbId],
) -> Option<(&'a ModemConfig, UsbId)> {
    modems.iter().find_map(|modem| {
        seen.iter()
            .find(|id| id.vendor == modem.vendor_product.vendor)
            .map(|id| (modem, *id))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LSUSB: &str = "\
Bus 001 Device 004: ID 1e0e:9011 Qualcomm / Option SimTech, Incorporated
Bus 001 Device 003: ID 0424:ec00 Microchip Technology, Inc. SMSC9512/9514 Fast Ethernet Adapter
Bus 001 Device 002: ID 0424:9514 Microchip Technology, Inc. SMC9514 Hub
Bus 001 Device 001: ID 1d6b:0002 Linux Foundation 2.0 root hub
";

    fn qualcomm() -> ModemConfig {
        ModemConfig {
            name: "Qualcomm".into(),
            netdev: "usb0".into(),
            vendor_product: UsbId::new(0x1e0e, 0x9018),
        }
    }

    #[test]
    fn parses_every_device_line() {
        // Act
        let ids = parse_lsusb(LSUSB);

        // Assert
        assert_eq!(
            ids,
            vec![
                UsbId::new(0x1e0e, 0x9011),
                UsbId::new(0x0424, 0xec00),
                UsbId::new(0x0424, 0x9514),
                UsbId::new(0x1d6b, 0x0002),
            ]
        );
    }

    #[test]
    fn ignores_lines_without_an_id() {
        assert!(parse_lsusb("garbage\nBus 001 Device 001: ID\n").is_empty());
    }

    #[test]
    fn matches_modem_by_vendor_and_reports_observed_product() {
        // Arrange
        let modems = [qualcomm()];

        // Act
        let (modem, seen) = find_configured(&modems, &parse_lsusb(LSUSB)).unwrap();

        // Assert
        assert_eq!(modem.name, "Qualcomm");
        assert_eq!(seen, UsbId::new(0x1e0e, 0x9011));
    }

    #[test]
    fn no_match_without_configured_vendor() {
        let modems = [qualcomm()];
        let seen = [UsbId::new(0x1d6b, 0x0002)];

        assert!(find_configured(&modems, &seen).is_none());
    }

    #[test]
    fn usb_id_roundtrips_through_display() {
        let id: UsbId = "1e0e:9018".parse().unwrap();

        assert_eq!(id, UsbId::new(0x1e0e, 0x9018));
        assert_eq!(id.to_string(), "1e0e:9018");
    }

    #[test]
    fn usb_id_rejects_malformed_values() {
        for bad in ["1e0e", "1e0e:", "zzzz:9018", "1e0e:9018:1", "1e0e9018", ""] {
            assert!(bad.parse::<UsbId>().is_err(), "{bad} should not parse");
        }
    }
}
