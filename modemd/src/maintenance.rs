//! Tracks whether host maintenance jobs are running, which keeps the modem on.

use async_trait::async_trait;
use color_eyre::Result;
use std::{path::PathBuf, time::Duration};
use tokio::{
    fs,
    task::{self, JoinHandle},
    time,
};
use tracing::{error, info, warn};

use crate::{
    state::ControllerState,
    utils::{State, run_cmd_timeout},
};

#[async_trait]
pub trait MaintenanceCheck: 'static + Send + Sync {
    async fn is_running(&self) -> bool;
}

/// Asks the local salt minion whether it is running any jobs.
#[derive(Debug, Clone)]
pub struct SaltCheck {
    minion_id: PathBuf,
    timeout: Duration,
}

impl Default for SaltCheck {
    fn default() -> Self {
        Self {
            minion_id: PathBuf::from("/etc/salt/minion_id"),
            timeout: Duration::from_secs(20),
        }
    }
}

#[async_trait]
impl MaintenanceCheck for SaltCheck {
    async fn is_running(&self) -> bool {
        // salt-call would create a minion id from the hostname, so don't call it
        // on unprovisioned hosts
        if !fs::try_exists(&self.minion_id).await.unwrap_or(false) {
            return false;
        }

        match run_cmd_timeout(
            "salt-call",
            &["--local", "saltutil.running"],
            self.timeout,
        )
        .await
        {
            Ok(output) => jobs_listed(&output),
            Err(e) => {
                warn!("failed to check for running salt jobs: {e}");
                false
            }
        }
    }
}

/// An idle minion prints a two line header and nothing else.
fn jobs_listed(output: &str) -> bool {
    output.trim().lines().count() > 2
}

pub fn spawn_monitor(
    check: impl MaintenanceCheck,
    state: State<ControllerState>,
    poll_interval: Duration,
) -> JoinHandle<Result<()>> {
    info!("starting maintenance monitor");

    task::spawn(async move {
        loop {
            let running = check.is_running().await;
            let changed = state.write(|s| {
                std::mem::replace(&mut s.maintenance_running, running) != running
            });

            match changed {
                Ok(true) => info!("maintenance jobs running: {running}"),
                Ok(false) => {}
                Err(e) => error!("failed to record maintenance state: {e}"),
            }

            time::sleep(poll_interval).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use mockall::mock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    mock! {
        Check {}

        #[async_trait]
        impl MaintenanceCheck for Check {
            async fn is_running(&self) -> bool;
        }
    }

    #[test]
    fn counts_salt_job_lines() {
        assert!(!jobs_listed("local:\n    ----------"));
        assert!(jobs_listed(
            "local:\n    ----------\n    20240101000000000000:\n        fun: state.apply"
        ));
    }

    #[tokio::test]
    async fn missing_minion_id_means_no_maintenance() {
        let check = SaltCheck {
            minion_id: PathBuf::from("/nonexistent/minion_id"),
            timeout: Duration::from_secs(1),
        };

        assert!(!check.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_mirrors_the_check_into_state() {
        // Arrange
        let mut check = MockCheck::new();
        let calls = AtomicUsize::new(0);
        check
            .expect_is_running()
            .returning(move || calls.fetch_add(1, Ordering::SeqCst) == 0);
        let state = State::new(ControllerState::new(
            (&Settings::default()).into(),
            Instant::now(),
        ));

        // Act
        let monitor = spawn_monitor(check, state.clone(), Duration::from_secs(60));
        time::sleep(Duration::from_secs(1)).await;
        let first = state.read(|s| s.maintenance_running).unwrap();
        time::sleep(Duration::from_secs(60)).await;
        let second = state.read(|s| s.maintenance_running).unwrap();
        monitor.abort();

        // Assert
        assert!(first);
        assert!(!second);
    }
}
