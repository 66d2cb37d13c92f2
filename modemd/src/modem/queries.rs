//! Informational AT queries and the handful of commands that change modem state.

use color_eyre::{
    Result,
    eyre::{bail, eyre},
};
use derive_more::Display;
use serde_json::Value;
use std::{collections::BTreeMap, time::Duration};
use tracing::warn;

use crate::{at::AtClient, usb::UsbId};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_RETRIES: u32 = 2;
const RESET_TIMEOUT: Duration = Duration::from_millis(2000);
const RESET_RETRIES: u32 = 3;

/// `+CSQ` reading. `rssi` 99 means the modem has no signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalQuality {
    pub rssi: u8,
    pub ber: u8,
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum SignalLevel {
    #[display("no signal")]
    NoSignal,
    #[display("marginal")]
    Marginal,
    #[display("ok")]
    Ok,
    #[display("good")]
    Good,
    #[display("excellent")]
    Excellent,
}

impl SignalQuality {
    pub const NO_SIGNAL: u8 = 99;

    pub fn has_signal(&self) -> bool {
        self.rssi != Self::NO_SIGNAL
    }

    pub fn level(&self) -> SignalLevel {
        match self.rssi {
            Self::NO_SIGNAL => SignalLevel::NoSignal,
            0..=9 => SignalLevel::Marginal,
            10..=14 => SignalLevel::Ok,
            15..=19 => SignalLevel::Good,
            _ => SignalLevel::Excellent,
        }
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum AccessTechnology {
    #[display("GSM")]
    Gsm,
    #[display("GSM Compact")]
    GsmCompact,
    #[display("3G")]
    Utran,
    #[display("4G")]
    Eutran,
    #[display("CDMA/HDR")]
    CdmaHdr,
    #[display("Unknown")]
    Unknown,
}

impl From<u8> for AccessTechnology {
    fn from(code: u8) -> Self {
        match code {
            0 => AccessTechnology::Gsm,
            1 => AccessTechnology::GsmCompact,
            2 => AccessTechnology::Utran,
            7 => AccessTechnology::Eutran,
            8 => AccessTechnology::CdmaHdr,
            _ => AccessTechnology::Unknown,
        }
    }
}

/// Network operator the modem is registered with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provider {
    pub name: String,
    pub access_technology: AccessTechnology,
}

fn strip<'a>(text: &'a str, prefix: &str) -> &'a str {
    let text = text.trim();
    text.strip_prefix(prefix).unwrap_or(text).trim()
}

fn unquote(s: &str) -> &str {
    s.trim().trim_matches('"')
}

/// `+CSQ: 18,2`
pub fn parse_signal_quality(text: &str) -> Result<SignalQuality> {
    let body = strip(text, "+CSQ:");
    let (rssi, ber) = body
        .split_once(',')
        .ok_or_else(|| eyre!("unable to read reception, '{body}'"))?;

    Ok(SignalQuality {
        rssi: rssi.trim().parse()?,
        ber: ber.trim().parse()?,
    })
}

/// `+CPIN: READY`
pub fn parse_sim_status(text: &str) -> String {
    strip(text, "+CPIN:").to_string()
}

/// `+COPS: 0,0,"Spark NZ Spark NZ",7`
pub fn parse_provider(text: &str) -> Result<Provider> {
    let body = strip(text, "+COPS:");
    let items: Vec<_> = body.split(',').collect();
    let [_, _, name, act, ..] = items.as_slice() else {
        bail!("invalid COPS format {body}");
    };

    Ok(Provider {
        name: unquote(name).to_string(),
        access_technology: act.trim().parse::<u8>()?.into(),
    })
}

/// `+ICCID: 8964011234567890123`
pub fn parse_iccid(text: &str) -> Result<String> {
    let iccid = strip(text, "+ICCID:");
    if iccid.is_empty() {
        bail!("empty ICCID response");
    }

    Ok(iccid.to_string())
}

/// `+CSPN: "One NZ",0`
pub fn parse_sim_provider(text: &str) -> Result<String> {
    let body = strip(text, "+CSPN:");
    match body.split(',').collect::<Vec<_>>().as_slice() {
        [name, _] => Ok(unquote(name).to_string()),
        _ => bail!("invalid CSPN format {body}"),
    }
}

/// The field of a `+CPSI:` report naming the band, e.g. `EUTRAN-BAND3`.
pub fn parse_band(text: &str) -> Result<String> {
    text.split(',')
        .map(str::trim)
        .find(|part| part.contains("BAND"))
        .map(str::to_string)
        .ok_or_else(|| eyre!("no band in '{text}'"))
}

/// APN of PDP context 1 from a `+CGDCONT?` listing.
pub fn parse_apn(text: &str) -> Result<String> {
    text.lines()
        .map(|line| strip(line, "+CGDCONT:"))
        .find_map(|line| {
            let fields: Vec<_> = line.split(',').collect();
            match fields.as_slice() {
                [cid, _, apn, ..] if cid.trim() == "1" => Some(unquote(apn).to_string()),
                _ => None,
            }
        })
        .ok_or_else(|| eyre!("no PDP context 1 in '{text}'"))
}

/// An APN has to fit inside the quotes of `AT+CGDCONT`.
pub fn validate_apn(apn: &str) -> Result<()> {
    if apn.is_empty() || apn.chars().any(|c| c == '"' || c.is_control()) {
        bail!("invalid APN '{apn}'");
    }

    Ok(())
}

/// `+CBC: 3.305V`
pub fn parse_voltage(text: &str) -> Result<f64> {
    let volts = strip(text, "+CBC:").trim_end_matches('V').trim();

    Ok(volts.parse()?)
}

/// `+CPMUTEMP: 32`
pub fn parse_temperature(text: &str) -> Result<i32> {
    Ok(strip(text, "+CPMUTEMP:").parse()?)
}

/// Named AT operations on the attached modem.
#[derive(Debug, Clone)]
pub struct ModemCommands {
    at: AtClient,
    timeout: Duration,
    retries: u32,
}

impl ModemCommands {
    pub fn new(at: AtClient) -> Self {
        Self {
            at,
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
        }
    }

    /// Runs informational queries with this timeout and retry count instead.
    pub fn with_budget(self, timeout: Duration, retries: u32) -> Self {
        Self {
            timeout,
            retries,
            ..self
        }
    }

    async fn query(&self, command: &str) -> Result<String> {
        Ok(self.at.request(command, self.timeout, self.retries).await?)
    }

    pub async fn signal_quality(&self) -> Result<SignalQuality> {
        parse_signal_quality(&self.query("AT+CSQ").await?)
    }

    /// Raw `+CPIN` status, `READY` once the SIM is usable.
    pub async fn sim_status(&self) -> Result<String> {
        // verbose errors, so a missing SIM reads as such instead of a bare ERROR
        self.query("AT+CMEE=2").await?;

        Ok(parse_sim_status(&self.query("AT+CPIN?").await?))
    }

    pub async fn band(&self) -> Result<String> {
        parse_band(&self.query("AT+CPSI?").await?)
    }

    pub async fn provider(&self) -> Result<Provider> {
        parse_provider(&self.query("AT+COPS?").await?)
    }

    pub async fn iccid(&self) -> Result<String> {
        parse_iccid(&self.query("AT+CICCID").await?)
    }

    pub async fn sim_provider(&self) -> Result<String> {
        parse_sim_provider(&self.query("AT+CSPN?").await?)
    }

    pub async fn apn(&self) -> Result<String> {
        parse_apn(&self.query("AT+CGDCONT?").await?)
    }

    /// Writes the APN of PDP context 1 and reads it back.
    pub async fn set_apn(&self, apn: &str) -> Result<()> {
        validate_apn(apn)?;
        self.query(&format!("AT+CGDCONT=1,\"IP\",\"{apn}\"")).await?;

        let read_back = self.apn().await?;
        if read_back != apn {
            bail!("APN read back as '{read_back}' after setting it to '{apn}'");
        }

        Ok(())
    }

    /// Tells the modem which USB mode to boot into. Takes effect after a reset.
    pub async fn set_usb_mode(&self, target: UsbId) -> Result<()> {
        self.query(&format!("AT+CUSBPIDSWITCH={:04x},1,1", target.product))
            .await?;

        Ok(())
    }

    pub async fn reset(&self) -> Result<()> {
        self.at
            .request("AT+CRESET", RESET_TIMEOUT, RESET_RETRIES)
            .await?;

        Ok(())
    }

    pub async fn power_off(&self) -> Result<()> {
        self.query("AT+CPOF").await?;

        Ok(())
    }

    pub async fn disable_gps(&self) -> Result<()> {
        self.query("AT+CGPS=0").await?;

        Ok(())
    }

    pub async fn manufacturer(&self) -> Result<String> {
        Ok(self.query("AT+CGMI").await?.trim().to_string())
    }

    pub async fn model(&self) -> Result<String> {
        Ok(strip(&self.query("AT+CGMR").await?, "+CGMR:").to_string())
    }

    pub async fn serial_number(&self) -> Result<String> {
        Ok(self.query("AT+CGSN").await?.trim().to_string())
    }

    pub async fn voltage(&self) -> Result<f64> {
        parse_voltage(&self.query("AT+CBC").await?)
    }

    pub async fn temperature(&self) -> Result<i32> {
        parse_temperature(&self.query("AT+CPMUTEMP").await?)
    }

    /// Modem details attached to lifecycle events. Readings that fail are left out.
    pub async fn event_details(&self) -> BTreeMap<String, Value> {
        fn put(
            details: &mut BTreeMap<String, Value>,
            key: &str,
            value: Result<impl Into<Value>>,
        ) {
            match value {
                Ok(v) => {
                    details.insert(key.to_string(), v.into());
                }
                Err(e) => warn!("failed to get {key} for event: {e}"),
            }
        }

        let mut details = BTreeMap::new();

        match self.signal_quality().await {
            Ok(signal) => {
                details.insert("signalStrength".into(), signal.rssi.into());
                details.insert("bitErrorRate".into(), signal.ber.into());
                details.insert("signalStatus".into(), signal.level().to_string().into());
            }
            Err(e) => warn!("failed to get signal strength for event: {e}"),
        }
        put(&mut details, "band", self.band().await);
        put(&mut details, "simStatus", self.sim_status().await);
        put(&mut details, "apn", self.apn().await);
        match self.provider().await {
            Ok(provider) => {
                details.insert("provider".into(), provider.name.into());
                details.insert(
                    "accessTechnology".into(),
                    provider.access_technology.to_string().into(),
                );
            }
            Err(e) => warn!("failed to get provider for event: {e}"),
        }
        put(&mut details, "simProvider", self.sim_provider().await);
        put(&mut details, "iccid", self.iccid().await);

        details
    }
}
