//! Network interface checks for the modem's netdev.

use async_trait::async_trait;
use color_eyre::Result;
use nix::ifaddrs;
use std::{
    net::{IpAddr, SocketAddrV4, SocketAddrV6},
    process::Stdio,
    time::Duration,
};
use tokio::{process::Command, time};
use tracing::debug;

use crate::utils::run_cmd;

#[async_trait]
pub trait Network: 'static + Send + Sync {
    /// Addresses assigned to `iface`. Empty when the interface does not exist.
    async fn addresses(&self, iface: &str) -> Result<Vec<IpAddr>>;

    async fn is_default_route(&self, iface: &str) -> Result<bool>;

    /// One ICMP echo to `host` through `iface`, waiting up to `wait` for a reply.
    async fn ping(&self, iface: &str, host: &str, wait: Duration) -> bool;
}

/// [`Network`] backed by `getifaddrs`, `ip route` and `ping`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemNet;

#[async_trait]
impl Network for SystemNet {
    async fn addresses(&self, iface: &str) -> Result<Vec<IpAddr>> {
        let addrs = ifaddrs::getifaddrs()?
            .filter(|ifa| ifa.interface_name == iface)
            .filter_map(|ifa| {
                let addr = ifa.address?;
                if let Some(sin) = addr.as_sockaddr_in() {
                    Some(IpAddr::V4(*SocketAddrV4::from(*sin).ip()))
                } else {
                    addr.as_sockaddr_in6()
                        .map(|sin6| IpAddr::V6(*SocketAddrV6::from(*sin6).ip()))
                }
            })
            .collect();

        Ok(addrs)
    }

    async fn is_default_route(&self, iface: &str) -> Result<bool> {
        let routes = run_cmd("ip", &["route"]).await?;

        Ok(has_default_route(&routes, iface))
    }

    async fn ping(&self, iface: &str, host: &str, wait: Duration) -> bool {
        let wait_arg = format!("-w{}", wait.as_secs().max(1));
        let child = Command::new("ping")
            .args(["-I", iface, "-n", "-q", "-c1", &wait_arg, host])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match time::timeout(wait + Duration::from_secs(1), child).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                debug!("failed to run ping: {e}");
                false
            }
            Err(_) => false,
        }
    }
}

/// Whether `ip route` output has a default route through `iface`.
fn has_default_route(routes: &str, iface: &str) -> bool {
    let dev = format!(" dev {iface} ");
    routes
        .lines()
        .any(|line| line.starts_with("default") && line.contains(&dev))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUTES: &str = "\
default via 192.168.225.1 dev usb0 proto dhcp src 192.168.225.32 metric 204
default via 192.168.1.1 dev wlan0 proto dhcp src 192.168.1.20 metric 303
192.168.225.0/24 dev usb0 proto dhcp scope link src 192.168.225.32 metric 204
";

    #[test]
    fn finds_default_route_per_interface() {
        assert!(has_default_route(ROUTES, "usb0"));
        assert!(has_default_route(ROUTES, "wlan0"));
        assert!(!has_default_route(ROUTES, "usb1"));
        assert!(!has_default_route(ROUTES, "usb"));
    }

    #[test]
    fn non_default_routes_do_not_count() {
        let routes = "192.168.225.0/24 dev usb0 proto dhcp scope link\n";

        assert!(!has_default_route(routes, "usb0"));
    }

    #[tokio::test]
    async fn missing_interface_has_no_addresses() {
        let addrs = SystemNet.addresses("no-such-iface0").await.unwrap();

        assert!(addrs.is_empty());
    }
}
