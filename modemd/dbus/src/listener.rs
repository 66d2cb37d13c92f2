use futures::StreamExt as _;
use tracing::warn;
use zbus::{MatchRule, MessageStream, message::Type as MessageType};

use crate::{IFACE, OBJ_PATH};

const SIGNAL: &str = "ModemConnected";
const MAX_QUEUED: usize = 16;

fn match_rule() -> zbus::Result<MatchRule<'static>> {
    Ok(MatchRule::builder()
        .msg_type(MessageType::Signal)
        .interface(IFACE)?
        .path(OBJ_PATH)?
        .member(SIGNAL)?
        .build())
}

/// Receives modemd's `ModemConnected` signal, sent once per power cycle when the
/// modem first reaches the internet.
pub struct ModemConnectedListener {
    stream: MessageStream,
}

impl ModemConnectedListener {
    pub async fn new(conn: &zbus::Connection) -> zbus::Result<Self> {
        let stream =
            MessageStream::for_match_rule(match_rule()?, conn, Some(MAX_QUEUED)).await?;

        Ok(Self { stream })
    }

    /// Waits for the next signal. `None` once the bus connection is gone.
    pub async fn next(&mut self) -> Option<bool> {
        while let Some(message) = self.stream.next().await {
            let connected = message.and_then(|message| {
                let body = message.body();
                body.deserialize::<bool>()
            });

            match connected {
                Ok(connected) => return Some(connected),
                Err(e) => warn!("ignoring malformed {SIGNAL} signal: {e}"),
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_matches_modem_connected_signals() {
        // Act
        let rule = match_rule().unwrap();

        // Assert
        assert_eq!(rule.msg_type(), Some(MessageType::Signal));
        assert_eq!(rule.interface().map(|i| i.as_str()), Some(IFACE));
        assert_eq!(rule.member().map(|m| m.as_str()), Some(SIGNAL));
    }
}
