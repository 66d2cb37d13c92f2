pub mod listener;
pub mod requester;
pub mod types;

pub use listener::ModemConnectedListener;
pub use requester::{ConnectionRequester, PingConnectivity};
pub use types::{ModemStatus, ModemdStatus, SignalStatus, SimCardStatus};

use async_trait::async_trait;
use zbus::{DBusError, SignalContext, interface};

pub const SERVICE: &str = "org.cacophony.modemd";
pub const IFACE: &str = "org.cacophony.modemd";
pub const OBJ_PATH: &str = "/org/cacophony/modemd";

#[derive(Debug, DBusError)]
#[zbus(prefix = "org.cacophony.modemd")]
pub enum ModemdError {
    #[zbus(error)]
    ZBus(zbus::Error),
    /// No modem is attached, or it is not answering AT commands yet.
    NotReady(String),
    /// The modem was reached but the AT command did not succeed.
    AtCommand(String),
    InvalidArgs(String),
    Failed(String),
}

pub type Result<T> = std::result::Result<T, ModemdError>;

#[async_trait]
pub trait ModemdT: 'static + Send + Sync {
    async fn stay_on(&self) -> Result<()>;
    async fn stay_on_for(&self, minutes: i32) -> Result<()>;
    async fn stay_off_for(&self, minutes: i32) -> Result<()>;
    async fn get_status(&self) -> Result<ModemdStatus>;
    async fn set_apn(&self, apn: String) -> Result<()>;
    /// Returns the full transcript and the salient response text.
    async fn run_at_command(&self, command: String) -> Result<(String, String)>;
}

#[derive(Debug, derive_more::From)]
pub struct Modemd<T>(pub T);

#[interface(
    name = "org.cacophony.modemd",
    proxy(
        default_service = "org.cacophony.modemd",
        default_path = "/org/cacophony/modemd",
    )
)]
impl<T: ModemdT> Modemd<T> {
    async fn stay_on(&self) -> Result<()> {
        self.0.stay_on().await
    }

    async fn stay_on_for(&self, minutes: i32) -> Result<()> {
        self.0.stay_on_for(minutes).await
    }

    async fn stay_off_for(&self, minutes: i32) -> Result<()> {
        self.0.stay_off_for(minutes).await
    }

    async fn get_status(&self) -> Result<ModemdStatus> {
        self.0.get_status().await
    }

    #[zbus(name = "SetAPN")]
    async fn set_apn(&self, apn: String) -> Result<()> {
        self.0.set_apn(apn).await
    }

    #[zbus(name = "RunATCommand")]
    async fn run_at_command(&self, command: String) -> Result<(String, String)> {
        self.0.run_at_command(command).await
    }

    /// Broadcast once per power cycle when the modem first reaches the internet.
    #[zbus(signal)]
    pub async fn modem_connected(
        ctxt: &SignalContext<'_>,
        connected: bool,
    ) -> zbus::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_are_namespaced_under_the_service() {
        // Arrange
        let err = ModemdError::NotReady("modem not ready for AT commands".into());

        // Act
        let name = err.name();

        // Assert
        assert_eq!(name.as_str(), "org.cacophony.modemd.NotReady");
        assert_eq!(
            err.description(),
            Some("modem not ready for AT commands")
        );
    }
}
