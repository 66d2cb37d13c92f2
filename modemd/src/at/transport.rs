use async_trait::async_trait;
use futures::StreamExt as _;
use std::{io, path::PathBuf, time::Duration};
use tokio::{
    fs,
    io::{AsyncRead, AsyncWrite, AsyncWriteExt as _},
    time,
};
use tokio_serial::{
    ClearBuffer, DataBits, Parity, SerialPort as _, SerialPortBuilderExt as _,
    SerialStream, StopBits,
};
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Framed};
use tracing::{debug, warn};

use super::{
    error::AttemptError,
    response::{AtResponse, Terminator, Transcript, parse_transcript},
};

const MAX_LINE_LENGTH: usize = 4096;

/// The modem's AT command channel. Only the AT engine opens it.
#[async_trait]
pub trait AtPort: 'static + Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn exists(&self) -> bool;

    /// Opens a fresh session. Dropping the stream closes it.
    async fn open(&self) -> io::Result<Self::Stream>;
}

/// [`AtPort`] on a serial device node, 115200 8N1.
#[derive(Debug, Clone)]
pub struct SerialAtPort {
    path: PathBuf,
}

impl SerialAtPort {
    pub const BAUD_RATE: u32 = 115_200;

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AtPort for SerialAtPort {
    type Stream = SerialStream;

    async fn exists(&self) -> bool {
        match fs::try_exists(&self.path).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!("error checking for AT port {}: {e}", self.path.display());
                false
            }
        }
    }

    async fn open(&self) -> io::Result<SerialStream> {
        let stream = tokio_serial::new(self.path.to_string_lossy(), Self::BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(Duration::from_secs(1))
            .open_native_async()?;

        // whatever the modem said before we showed up is noise
        stream.clear(ClearBuffer::Input)?;

        Ok(stream)
    }
}

/// One open port. Lines are buffered by the codec, so a line split across reads is
/// kept until its newline arrives. Modems emit the odd non UTF-8 byte, so lines are
/// decoded lossily.
pub(crate) struct AtSession<S> {
    framed: Framed<S, AnyDelimiterCodec>,
}

impl<S> AtSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            framed: Framed::new(
                stream,
                AnyDelimiterCodec::new_with_max_length(
                    b"\n".to_vec(),
                    b"\n".to_vec(),
                    MAX_LINE_LENGTH,
                ),
            ),
        }
    }

    /// Writes `command` and reads until a terminator line or `timeout`.
    pub async fn exchange(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<AtResponse, AttemptError> {
        let port = self.framed.get_mut();
        port.write_all(format!("{command}\r").as_bytes()).await?;
        port.flush().await?;

        let mut transcript = Transcript::default();
        let framed = &mut self.framed;
        let read = async {
            loop {
                let chunk = match framed.next().await {
                    Some(Ok(chunk)) => chunk,
                    Some(Err(AnyDelimiterCodecError::Io(e))) => {
                        return Err(AttemptError::Io(e));
                    }
                    Some(Err(AnyDelimiterCodecError::MaxChunkLengthExceeded)) => {
                        return Err(AttemptError::Io(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("line longer than {MAX_LINE_LENGTH} bytes"),
                        )));
                    }
                    None => return Err(AttemptError::Closed),
                };

                let line = String::from_utf8_lossy(&chunk);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                transcript.push(line.to_string());

                if Terminator::classify(line).is_some() {
                    return Ok(());
                }
            }
        };
        let outcome = time::timeout(timeout, read).await;

        debug!("AT command '{command}' full response: {transcript}");

        match outcome {
            Err(_elapsed) => Err(AttemptError::ResponseTimeout(transcript)),
            Ok(Err(e)) => Err(e),
            Ok(Ok(())) => parse_transcript(transcript.lines())
                .map_err(|_| AttemptError::ErrorResponse(transcript.clone())),
        }
    }
}
