use modemd_telemetry::{Logging, LoggingError, Output};
use tracing::{debug, error, info, trace, warn};

fn main() -> Result<(), LoggingError> {
    let flusher = Logging::new("modemd-example")
        .output(Output::Stderr)
        .filter("trace")
        .try_init()?;

    trace!("TRACE");
    debug!("DEBUG");
    info!(vendor_product = "2c7c:0125", "INFO");
    warn!("WARN");
    error!("ERROR");

    flusher.flush();

    Ok(())
}
