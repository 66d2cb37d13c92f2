use color_eyre::{Result, eyre::eyre};
use std::{
    sync::{Arc, RwLock},
    time::Duration,
};
use tokio::{process::Command, time};

pub async fn run_cmd(cmd: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(cmd).args(args).output().await?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let err = String::from_utf8_lossy(&output.stderr);
        let args = args.join(" ");
        Err(eyre!("Failed to run {cmd} {args}. Error {err}"))
    }
}

/// Like [`run_cmd`], but gives up after `timeout` and kills the child.
pub async fn run_cmd_timeout(
    cmd: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<String> {
    let child = Command::new(cmd).args(args).kill_on_drop(true).output();
    let output = time::timeout(timeout, child)
        .await
        .map_err(|_| eyre!("{cmd} did not finish within {timeout:?}"))??;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let err = String::from_utf8_lossy(&output.stderr);
        Err(eyre!("Failed to run {cmd} {}. Error {err}", args.join(" ")))
    }
}

/// Shared, lock-guarded value. Every access goes through a closure so the guard
/// never escapes and is never held across an `.await`.
pub struct State<T> {
    state: Arc<RwLock<T>>,
}

impl<T> State<T> {
    pub fn new(state: T) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub fn read<F, K>(&self, f: F) -> Result<K>
    where
        F: FnOnce(&T) -> K,
    {
        let value = self
            .state
            .read()
            .map_err(|e| eyre!("state lock poisoned: {e}"))?;

        Ok(f(&value))
    }

    pub fn write<F, K>(&self, f: F) -> Result<K>
    where
        F: FnOnce(&mut T) -> K,
    {
        let mut value = self
            .state
            .write()
            .map_err(|e| eyre!("state lock poisoned: {e}"))?;

        Ok(f(&mut value))
    }
}

impl<T> Clone for State<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}
