//! Server reachability probing.
//!
//! Desktop hosts feed device-level connectivity through
//! [`ServerReachability::set_network_available`]; reachability of the
//! configured media server is probed here with a bounded TCP connect.
//! The probe never blocks a caller past its timeout and retry budget.

use async_trait::async_trait;
use bridge_traits::NetworkMonitor;
use core_runtime::{keys, SettingsStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Probe tuning.
#[derive(Debug, Clone)]
pub struct ReachabilityConfig {
    /// Per-attempt TCP connect deadline.
    pub probe_timeout: Duration,
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    /// Fixed pause between attempts.
    pub retry_backoff: Duration,
}

impl Default for ReachabilityConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(2),
            max_retries: 3,
            retry_backoff: Duration::from_millis(300),
        }
    }
}

/// `NetworkMonitor` implementation probing the configured host.
pub struct ServerReachability {
    settings: Arc<SettingsStore>,
    config: ReachabilityConfig,
    network: watch::Sender<bool>,
    server: watch::Sender<bool>,
}

impl ServerReachability {
    pub fn new(settings: Arc<SettingsStore>, config: ReachabilityConfig) -> Arc<Self> {
        Arc::new(Self {
            settings,
            config,
            // Assume connectivity until the host reports otherwise.
            network: watch::channel(true).0,
            server: watch::channel(false).0,
        })
    }

    /// Host-supplied device connectivity signal. Losing the network also
    /// takes the server offline immediately.
    pub fn set_network_available(&self, available: bool) {
        self.network.send_replace(available);
        if !available {
            self.server.send_replace(false);
        }
    }

    /// Watch the configured host preference and re-probe on change.
    pub fn spawn_host_watcher(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let Ok(mut receiver) = monitor.settings.subscribe(keys::HOST).await else {
                return;
            };
            loop {
                monitor.refresh().await;
                if receiver.changed().await.is_err() {
                    return;
                }
            }
        })
    }

    async fn probe(&self, host: &str, port: u16) -> bool {
        for attempt in 0..=self.config.max_retries {
            let connect = TcpStream::connect((host, port));
            match tokio::time::timeout(self.config.probe_timeout, connect).await {
                Ok(Ok(_)) => return true,
                Ok(Err(err)) => {
                    debug!(host, port, attempt, %err, "server probe refused")
                }
                Err(_) => debug!(host, port, attempt, "server probe timed out"),
            }

            if attempt < self.config.max_retries {
                tokio::time::sleep(self.config.retry_backoff).await;
            }
        }
        false
    }
}

#[async_trait]
impl NetworkMonitor for ServerReachability {
    fn is_network_available(&self) -> bool {
        *self.network.borrow()
    }

    fn is_server_available(&self) -> bool {
        *self.server.borrow()
    }

    fn subscribe_network(&self) -> watch::Receiver<bool> {
        self.network.subscribe()
    }

    fn subscribe_server(&self) -> watch::Receiver<bool> {
        self.server.subscribe()
    }

    async fn refresh(&self) {
        if !self.is_network_available() {
            self.server.send_replace(false);
            return;
        }

        let host = match self.settings.host().await {
            Ok(host) => host,
            Err(err) => {
                warn!(%err, "failed to read configured host");
                None
            }
        };

        let Some(target) = host.as_deref().and_then(socket_target) else {
            self.server.send_replace(false);
            return;
        };

        let reachable = self.probe(&target.0, target.1).await;
        self.server.send_replace(reachable);
    }
}

/// Extract (host, port) from a configured base URL. Unparseable values
/// yield `None` and count as unreachable.
fn socket_target(url: &str) -> Option<(String, u16)> {
    let (scheme, rest) = url.split_once("://")?;
    let default_port = match scheme {
        "https" => 443,
        "http" => 80,
        _ => return None,
    };

    let authority = rest.split(['/', '?', '#']).next()?;
    if authority.is_empty() {
        return None;
    }

    match authority.rsplit_once(':') {
        Some((host, port)) => port.parse().ok().map(|port| (host.to_string(), port)),
        None => Some((authority.to_string(), default_port)),
    }
}
