use derive_more::Display;
use std::io;

use super::response::Transcript;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum AtErrorKind {
    #[display("the AT port was not found in the given time limit")]
    PortNotFound,
    #[display("timed out waiting in the queue for the AT command to be run")]
    QueueTimeout,
    #[display("timed out waiting for the AT command response")]
    ResponseTimeout,
    #[display("the AT command failed")]
    CommandFailed,
    #[display("the modem returned an error response")]
    ErrorResponse,
    #[display("the ATE0 test command failed")]
    TestCommandFailed,
}

/// Final outcome of an AT request that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to run AT command '{command}' because {kind}{}", detail_suffix(.detail))]
pub struct AtError {
    pub kind: AtErrorKind,
    pub command: String,
    /// Description of the last failed attempt, if any attempt was made.
    pub detail: Option<String>,
    /// Kind of the last failed attempt, when it maps onto one.
    pub cause: Option<AtErrorKind>,
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail
        .as_ref()
        .map(|d| format!(", extra details: {d}"))
        .unwrap_or_default()
}

impl AtError {
    pub fn new(kind: AtErrorKind, command: impl Into<String>) -> Self {
        Self {
            kind,
            command: command.into(),
            detail: None,
            cause: None,
        }
    }

    pub(crate) fn with_last_attempt(mut self, attempt: Option<&AttemptError>) -> Self {
        if let Some(attempt) = attempt {
            self.detail = Some(attempt.to_string());
            self.cause = attempt.kind();
        }

        self
    }

    /// True when the modem itself answered with `ERROR` on the last attempt.
    pub fn is_error_response(&self) -> bool {
        self.kind == AtErrorKind::ErrorResponse
            || self.cause == Some(AtErrorKind::ErrorResponse)
    }

    /// True when nothing came back from the modem, not even an error line.
    pub fn is_unresponsive(&self) -> bool {
        let answered = |kind: AtErrorKind| {
            matches!(kind, AtErrorKind::ErrorResponse | AtErrorKind::TestCommandFailed)
        };

        !answered(self.kind) && !self.cause.is_some_and(answered)
    }
}

/// Why a single open/echo-off/command attempt failed. Never leaves the engine except
/// as the detail of an [`AtError`].
#[derive(Debug, thiserror::Error)]
pub(crate) enum AttemptError {
    #[error("failed to open serial port: {0}")]
    Open(#[source] io::Error),
    #[error("serial io error: {0}")]
    Io(#[from] io::Error),
    #[error("serial port closed before a response was read")]
    Closed,
    #[error("ATE0 returned an error, full response: {0}")]
    TestCommandFailed(Transcript),
    #[error("error response, full response: {0}")]
    ErrorResponse(Transcript),
    #[error("no terminator within the response timeout, full response: {0}")]
    ResponseTimeout(Transcript),
}

impl AttemptError {
    fn kind(&self) -> Option<AtErrorKind> {
        match self {
            AttemptError::TestCommandFailed(_) => Some(AtErrorKind::TestCommandFailed),
            AttemptError::ErrorResponse(_) => Some(AtErrorKind::ErrorResponse),
            AttemptError::ResponseTimeout(_) => Some(AtErrorKind::ResponseTimeout),
            AttemptError::Open(_) | AttemptError::Io(_) | AttemptError::Closed => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_carries_command_and_last_attempt() {
        // Arrange
        let attempt = AttemptError::ErrorResponse(Transcript::from(vec!["ERROR"]));

        // Act
        let err = AtError::new(AtErrorKind::CommandFailed, "AT+CSQ")
            .with_last_attempt(Some(&attempt));

        // Assert
        assert_eq!(
            err.to_string(),
            "failed to run AT command 'AT+CSQ' because the AT command failed, \
             extra details: error response, full response: 'ERROR'"
        );
        assert_eq!(err.cause, Some(AtErrorKind::ErrorResponse));
        assert!(err.is_error_response());
    }

    #[test]
    fn message_without_attempt_has_no_details() {
        let err = AtError::new(AtErrorKind::QueueTimeout, "AT");

        assert_eq!(
            err.to_string(),
            "failed to run AT command 'AT' because timed out waiting in the queue \
             for the AT command to be run"
        );
        assert!(!err.is_error_response());
    }

    #[test]
    fn an_error_line_means_the_modem_answered() {
        // Arrange
        let silent = AttemptError::ResponseTimeout(Transcript::default());
        let refused = AttemptError::TestCommandFailed(Transcript::from(vec!["ERROR"]));

        // Act
        let timed_out = AtError::new(AtErrorKind::CommandFailed, "AT+CGMI")
            .with_last_attempt(Some(&silent));
        let check_failed = AtError::new(AtErrorKind::CommandFailed, "AT+CGMI")
            .with_last_attempt(Some(&refused));
        let port_missing = AtError::new(AtErrorKind::PortNotFound, "AT+CGMI");

        // Assert
        assert!(timed_out.is_unresponsive());
        assert!(port_missing.is_unresponsive());
        assert!(!check_failed.is_unresponsive());
    }
}
