//! Asks modemd to keep the modem on for as long as a program needs the internet.
//!
//! [`ConnectionRequester`] sends `StayOn` every [`REQUEST_INTERVAL`] while started,
//! unless wifi already reaches the internet.

use async_trait::async_trait;
use futures::{StreamExt as _, stream::FuturesUnordered};
use std::{process::Stdio, sync::Arc, time::Duration};
use tokio::{
    process::Command,
    sync::watch,
    task::JoinHandle,
    time::{self, Instant},
};
use tracing::{debug, info, warn};

use crate::ModemdProxy;

pub const REQUEST_INTERVAL: Duration = Duration::from_secs(20);
const CHECK_INTERVAL: Duration = Duration::from_secs(1);

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("no connection within {0:?}")]
    Timeout(Duration),
    #[error("no connection after {0} retries")]
    RetriesExhausted(u32),
}

#[async_trait]
pub trait OnRequests: 'static + Send + Sync {
    async fn request_on(&self) -> Result<(), BoxError>;
}

#[async_trait]
impl OnRequests for ModemdProxy<'static> {
    async fn request_on(&self) -> Result<(), BoxError> {
        Ok(self.stay_on().await?)
    }
}

#[async_trait]
pub trait Connectivity: 'static + Send + Sync {
    /// True when wifi already reaches the internet and the modem is not needed.
    async fn wifi_online(&self) -> bool;

    /// True when the internet is reachable over any interface.
    async fn online(&self) -> bool;
}

/// [`Connectivity`] from `ip` and `ping`.
#[derive(Debug, Clone)]
pub struct PingConnectivity {
    pub wifi_iface: String,
    pub hosts: Vec<String>,
    pub wait: Duration,
}

impl Default for PingConnectivity {
    fn default() -> Self {
        Self {
            wifi_iface: "wlan0".into(),
            hosts: vec!["8.8.8.8".into(), "8.8.4.4".into()],
            wait: Duration::from_secs(5),
        }
    }
}

impl PingConnectivity {
    /// True as soon as one host answers.
    async fn ping_any(&self, iface: Option<&str>) -> bool {
        let mut pings: FuturesUnordered<_> = self
            .hosts
            .iter()
            .map(|host| ping(iface, host, self.wait))
            .collect();
        let any = async {
            while let Some(answered) = pings.next().await {
                if answered {
                    return true;
                }
            }

            false
        };

        time::timeout(self.wait, any).await.unwrap_or(false)
    }
}

async fn ping(iface: Option<&str>, host: &str, wait: Duration) -> bool {
    let mut cmd = Command::new("ping");
    if let Some(iface) = iface {
        cmd.args(["-I", iface]);
    }

    cmd.args(["-n", "-q", "-c1", &format!("-w{}", wait.as_secs().max(1)), host])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .is_ok_and(|status| status.success())
}

#[async_trait]
impl Connectivity for PingConnectivity {
    async fn wifi_online(&self) -> bool {
        let output = Command::new("ip")
            .args(["a", "show", &self.wifi_iface])
            .output()
            .await;
        let up = output.is_ok_and(|out| {
            out.status.success() && String::from_utf8_lossy(&out.stdout).contains("state UP")
        });

        up && self.ping_any(Some(&self.wifi_iface)).await
    }

    async fn online(&self) -> bool {
        self.ping_any(None).await
    }
}

pub struct ConnectionRequester {
    requesting: watch::Sender<bool>,
    connectivity: Arc<dyn Connectivity>,
    task: JoinHandle<()>,
}

impl Drop for ConnectionRequester {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl ConnectionRequester {
    /// Nothing is requested until [`ConnectionRequester::start`] is called.
    pub fn spawn(modemd: impl OnRequests, connectivity: impl Connectivity) -> Self {
        let (requesting, rx) = watch::channel(false);
        let connectivity: Arc<dyn Connectivity> = Arc::new(connectivity);
        let task = tokio::spawn(request_loop(modemd, connectivity.clone(), rx));

        Self {
            requesting,
            connectivity,
            task,
        }
    }

    pub fn start(&self) {
        self.requesting.send_replace(true);
    }

    pub fn stop(&self) {
        self.requesting.send_replace(false);
    }

    /// Checks once a second until the internet is reachable.
    pub async fn wait_until_up(&self, timeout: Duration) -> Result<(), ConnectionError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.connectivity.online().await {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ConnectionError::Timeout(timeout));
            }
            time::sleep(CHECK_INTERVAL).await;
        }
    }

    /// Like [`ConnectionRequester::wait_until_up`], retrying after `retry_after`,
    /// which doubles every retry. Requests stop during the pause to save power.
    /// `None` retries until a connection is made.
    pub async fn wait_until_up_loop(
        &self,
        timeout: Duration,
        mut retry_after: Duration,
        max_retries: Option<u32>,
    ) -> Result<(), ConnectionError> {
        let mut retries = 0;
        loop {
            match self.wait_until_up(timeout).await {
                Ok(()) => return Ok(()),
                Err(e) => info!("{e}"),
            }
            if max_retries.is_some_and(|max| retries >= max) {
                return Err(ConnectionError::RetriesExhausted(retries));
            }

            retries += 1;
            self.stop();
            info!("connection failed, retrying in {retry_after:?}");
            time::sleep(retry_after).await;
            retry_after *= 2;
            self.start();
        }
    }
}

async fn request_loop(
    modemd: impl OnRequests,
    connectivity: Arc<dyn Connectivity>,
    mut requesting: watch::Receiver<bool>,
) {
    loop {
        if !*requesting.borrow_and_update() {
            if requesting.changed().await.is_err() {
                return;
            }
            continue;
        }

        if connectivity.wifi_online().await {
            debug!("wifi is online, not asking for the modem");
        } else if let Err(e) = modemd.request_on().await {
            warn!("failed to ask modemd to keep the modem on: {e}");
        }

        tokio::select! {
            changed = requesting.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            () = time::sleep(REQUEST_INTERVAL) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    };

    #[derive(Clone, Default)]
    struct CountingModemd(Arc<AtomicUsize>);

    #[async_trait]
    impl OnRequests for CountingModemd {
        async fn request_on(&self) -> Result<(), BoxError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Wifi stays as set; the internet becomes reachable at `online_at`.
    #[derive(Clone)]
    struct FakeConnectivity {
        wifi: Arc<AtomicBool>,
        online_at: Arc<Mutex<Instant>>,
    }

    impl FakeConnectivity {
        fn online_after(delay: Duration) -> Self {
            Self {
                wifi: Arc::new(AtomicBool::new(false)),
                online_at: Arc::new(Mutex::new(Instant::now() + delay)),
            }
        }
    }

    #[async_trait]
    impl Connectivity for FakeConnectivity {
        async fn wifi_online(&self) -> bool {
            self.wifi.load(Ordering::SeqCst)
        }

        async fn online(&self) -> bool {
            Instant::now() >= *self.online_at.lock().unwrap()
        }
    }

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    #[tokio::test(start_paused = true)]
    async fn requests_on_every_interval_only_while_started() {
        // Arrange
        let modemd = CountingModemd::default();
        let requester =
            ConnectionRequester::spawn(modemd.clone(), FakeConnectivity::online_after(DAY));
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(modemd.0.load(Ordering::SeqCst), 0);

        // Act
        requester.start();
        time::sleep(3 * REQUEST_INTERVAL - Duration::from_secs(1)).await;
        let while_started = modemd.0.load(Ordering::SeqCst);
        requester.stop();
        time::sleep(5 * REQUEST_INTERVAL).await;

        // Assert
        assert_eq!(while_started, 3);
        assert_eq!(modemd.0.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_ask_for_the_modem_while_wifi_is_online() {
        // Arrange
        let modemd = CountingModemd::default();
        let connectivity = FakeConnectivity::online_after(DAY);
        connectivity.wifi.store(true, Ordering::SeqCst);
        let requester = ConnectionRequester::spawn(modemd.clone(), connectivity);

        // Act
        requester.start();
        time::sleep(3 * REQUEST_INTERVAL).await;

        // Assert
        assert_eq!(modemd.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_a_doubling_pause() {
        // Arrange
        let requester = ConnectionRequester::spawn(
            CountingModemd::default(),
            FakeConnectivity::online_after(Duration::from_secs(70)),
        );
        let start = Instant::now();

        // Act
        let result = requester
            .wait_until_up_loop(Duration::from_secs(10), Duration::from_secs(5), None)
            .await;

        // Assert
        assert_eq!(result, Ok(()));
        // tries at 0s, 15s, 35s and 65s with pauses of 5s, 10s and 20s
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(70), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(71), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_the_last_retry() {
        // Arrange
        let requester = ConnectionRequester::spawn(
            CountingModemd::default(),
            FakeConnectivity::online_after(DAY),
        );
        let start = Instant::now();

        // Act
        let result = requester
            .wait_until_up_loop(Duration::from_secs(10), Duration::from_secs(5), Some(1))
            .await;

        // Assert
        assert_eq!(result, Err(ConnectionError::RetriesExhausted(1)));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(25), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(26), "{elapsed:?}");
    }
}
