//! Lifecycle events handed to the host's event reporter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{Result, eyre::eyre};
use derive_more::Display;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{error, info};
use zbus::proxy;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    #[display("noModemFound")]
    NoModemFound,
    #[display("noModemATCommandResponse")]
    NoModemAtCommandResponse,
    #[display("noModemSimCard")]
    NoModemSimCard,
    #[display("modemSignal")]
    ModemSignal,
    #[display("noModemSignal")]
    NoModemSignal,
    #[display("noModemNetwork")]
    NoModemNetwork,
    #[display("noModemPing")]
    NoModemPing,
    #[display("modemConnectedToNetwork")]
    ModemConnectedToNetwork,
    #[display("failed-modem-shutdown")]
    FailedModemShutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub details: BTreeMap<String, Value>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            details: BTreeMap::new(),
        }
    }

    pub fn with_details(mut self, details: BTreeMap<String, Value>) -> Self {
        self.details = details;
        self
    }
}

#[async_trait]
pub trait EventSink: 'static + Send + Sync {
    async fn add(&self, event: Event) -> Result<()>;
}

/// Hands `event` to `sink`. Reporting never fails the caller.
pub async fn report(sink: &dyn EventSink, event: Event) {
    info!("making modem event '{}'", event.kind);
    let kind = event.kind;
    if let Err(e) = sink.add(event).await {
        error!("failed to report event '{kind}': {e}");
    }
}

#[proxy(
    interface = "org.cacophony.Events",
    gen_blocking = false,
    default_service = "org.cacophony.Events",
    default_path = "/org/cacophony/Events"
)]
trait Events {
    fn add(&self, details: &str, event_type: &str, unix_time_nanos: i64) -> zbus::Result<()>;
}

/// [`EventSink`] that forwards to the event reporter on the system bus.
#[derive(Debug, Clone)]
pub struct DbusEventReporter {
    conn: zbus::Connection,
}

impl DbusEventReporter {
    pub fn new(conn: zbus::Connection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl EventSink for DbusEventReporter {
    async fn add(&self, event: Event) -> Result<()> {
        let details = serde_json::to_string(&event.details)?;
        let nanos = event
            .timestamp
            .timestamp_nanos_opt()
            .ok_or_else(|| eyre!("event timestamp out of range"))?;

        EventsProxy::new(&self.conn)
            .await?
            .add(&details, &event.kind.to_string(), nanos)
            .await?;

        Ok(())
    }
}
