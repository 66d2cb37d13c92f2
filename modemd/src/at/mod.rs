//! Serialized access to the modem's AT port.
//!
//! Every component talks to the modem through an [`AtClient`]. Requests are queued
//! and executed one at a time by a single engine task, which is the only code that
//! ever opens the port. Each attempt gets a fresh session: open, `ATE0`, the
//! command, close.

use color_eyre::Result;
use std::time::Duration;
use tokio::{
    sync::{mpsc, oneshot},
    task::{self, JoinHandle},
    time::{self, Instant},
};
use tracing::{debug, info, trace};

mod error;
pub mod response;
mod transport;

use error::AttemptError;
pub use error::{AtError, AtErrorKind};
pub use response::{AtResponse, Transcript};
use transport::AtSession;
pub use transport::{AtPort, SerialAtPort};

pub const QUEUE_CAPACITY: usize = 100;
const PORT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const RETRY_BACKOFF: Duration = Duration::from_millis(100);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);
const ECHO_OFF: &str = "ATE0";

struct AtRequest {
    command: String,
    deadline: Instant,
    retries: u32,
    reply: oneshot::Sender<Result<AtResponse, AtError>>,
}

/// Handle for submitting AT commands. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AtClient {
    tx: mpsc::Sender<AtRequest>,
}

impl AtClient {
    /// Starts the engine for `port`. The engine stops once every client is dropped.
    pub fn spawn<P: AtPort>(port: P) -> (Self, JoinHandle<Result<()>>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let engine = task::spawn(run_engine(port, rx));

        (Self { tx }, engine)
    }

    /// Runs `command`, giving up once `timeout` has elapsed since submission. A
    /// failed attempt is retried up to `retries` more times while time remains.
    /// Waits for queue space when the queue is full.
    pub async fn submit(
        &self,
        command: impl Into<String>,
        timeout: Duration,
        retries: u32,
    ) -> Result<AtResponse, AtError> {
        let command = command.into();
        let (reply, rx) = oneshot::channel();
        let request = AtRequest {
            command: command.clone(),
            deadline: Instant::now() + timeout,
            retries,
            reply,
        };

        if self.tx.send(request).await.is_err() {
            return Err(engine_stopped(command));
        }

        rx.await.unwrap_or_else(|_| Err(engine_stopped(command)))
    }

    /// Like [`AtClient::submit`], only returning the salient text.
    pub async fn request(
        &self,
        command: impl Into<String>,
        timeout: Duration,
        retries: u32,
    ) -> Result<String, AtError> {
        self.submit(command, timeout, retries)
            .await
            .map(|response| response.text)
    }
}

fn engine_stopped(command: String) -> AtError {
    AtError {
        kind: AtErrorKind::CommandFailed,
        command,
        detail: Some("AT engine stopped".to_string()),
        cause: None,
    }
}

async fn run_engine<P: AtPort>(port: P, mut rx: mpsc::Receiver<AtRequest>) -> Result<()> {
    info!("starting AT engine");

    while let Some(AtRequest {
        command,
        deadline,
        retries,
        reply,
    }) = rx.recv().await
    {
        let result = execute(&port, &command, deadline, retries).await;
        if let Err(e) = &result {
            debug!("{e}");
        }

        // the submitter may have stopped waiting
        let _ = reply.send(result);
    }

    info!("AT engine stopped, no clients left");

    Ok(())
}

async fn execute<P: AtPort>(
    port: &P,
    command: &str,
    deadline: Instant,
    retries: u32,
) -> Result<AtResponse, AtError> {
    if Instant::now() >= deadline {
        return Err(AtError::new(AtErrorKind::QueueTimeout, command));
    }

    let mut attempts = 0;
    let mut last_attempt = None;
    loop {
        if Instant::now() >= deadline {
            return Err(AtError::new(AtErrorKind::ResponseTimeout, command)
                .with_last_attempt(last_attempt.as_ref()));
        }
        if attempts > retries {
            return Err(AtError::new(AtErrorKind::CommandFailed, command)
                .with_last_attempt(last_attempt.as_ref()));
        }

        // the port vanishes while the modem re-enumerates on USB
        while !port.exists().await {
            if Instant::now() >= deadline {
                return Err(AtError::new(AtErrorKind::PortNotFound, command)
                    .with_last_attempt(last_attempt.as_ref()));
            }
            time::sleep(PORT_POLL_INTERVAL).await;
        }

        attempts += 1;
        trace!("running AT command '{command}', attempt {attempts}");

        match attempt(port, command).await {
            Ok(response) => return Ok(response),
            Err(e) => {
                debug!("AT command '{command}' attempt {attempts} failed: {e}");
                last_attempt = Some(e);
                time::sleep(RETRY_BACKOFF).await;
            }
        }
    }
}

async fn attempt<P: AtPort>(port: &P, command: &str) -> Result<AtResponse, AttemptError> {
    let stream = port.open().await.map_err(AttemptError::Open)?;
    let mut session = AtSession::new(stream);

    match session.exchange(ECHO_OFF, RESPONSE_TIMEOUT).await {
        Ok(_) => {}
        Err(AttemptError::ErrorResponse(transcript)) => {
            return Err(AttemptError::TestCommandFailed(transcript));
        }
        Err(e) => return Err(e),
    }

    session.exchange(command, RESPONSE_TIMEOUT).await
}
