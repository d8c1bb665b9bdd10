//! Network and server reachability abstraction.

use async_trait::async_trait;
use tokio::sync::watch;

/// Connectivity information for the core.
///
/// Two independent signals: whether the device has a network at all, and
/// whether the configured media server answers on it. Both are exposed as
/// `watch` channels so observers always see the current value immediately
/// on subscription and every change afterwards.
#[async_trait]
pub trait NetworkMonitor: Send + Sync {
    /// Current snapshot: does the device have any network?
    fn is_network_available(&self) -> bool;

    /// Current snapshot: does the configured server answer?
    fn is_server_available(&self) -> bool;

    /// Subscribe to network availability changes.
    fn subscribe_network(&self) -> watch::Receiver<bool>;

    /// Subscribe to server reachability changes.
    fn subscribe_server(&self) -> watch::Receiver<bool>;

    /// Re-probe reachability now. Must complete within a bounded time;
    /// never blocks the caller indefinitely.
    async fn refresh(&self);
}
