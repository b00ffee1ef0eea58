//! Tunnel identity and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique tunnel IDs for tracing
//! - Count tunnels that are still open for graceful shutdown
//! - Keep the `proxy_active_tunnels` gauge in step with that count

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::observability::metrics;

/// Global atomic counter for tunnel IDs.
static TUNNEL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an intercepted tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TunnelId(u64);

impl TunnelId {
    pub fn new() -> Self {
        Self(TUNNEL_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TunnelId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TunnelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tun-{}", self.0)
    }
}

/// Stage of an intercepted tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    /// Hijacked, leaf issued, TLS handshake pending.
    AwaitingHandshake,
    /// Handshake done; requests are read and forwarded in order.
    Established,
    /// Both sides released.
    Closed,
}

impl std::fmt::Display for TunnelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TunnelState::AwaitingHandshake => "awaiting_handshake",
            TunnelState::Established => "established",
            TunnelState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Tracks open tunnels for graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct TunnelTracker {
    active_count: Arc<AtomicU64>,
}

impl TunnelTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new open tunnel. Returns a guard that decrements on drop.
    pub fn track(&self) -> TunnelGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        metrics::tunnel_opened();
        TunnelGuard {
            active_count: Arc::clone(&self.active_count),
            id: TunnelId::new(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until every tunnel has closed, or `deadline` elapses.
    ///
    /// Returns `true` when the tracker drained in time.
    pub async fn wait_idle(&self, deadline: Duration) -> bool {
        let drained = async {
            while self.active_count.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        tokio::time::timeout(deadline, drained).await.is_ok()
    }
}

/// Guard that tracks a tunnel's lifetime.
#[derive(Debug)]
pub struct TunnelGuard {
    active_count: Arc<AtomicU64>,
    id: TunnelId,
}

impl TunnelGuard {
    pub fn id(&self) -> TunnelId {
        self.id
    }
}

impl Drop for TunnelGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        metrics::tunnel_closed();
        tracing::trace!(tunnel_id = %self.id, "Tunnel released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tunnel_id_unique() {
        let id1 = TunnelId::new();
        let id2 = TunnelId::new();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("tun-"));
    }

    #[test]
    fn tracker_counts() {
        let tracker = TunnelTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track();
        let guard2 = tracker.track();
        assert_eq!(tracker.active_count(), 2);
        assert_ne!(guard1.id(), guard2.id());

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);

        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_idle_honours_deadline() {
        let tracker = TunnelTracker::new();
        assert!(tracker.wait_idle(Duration::from_secs(1)).await);

        let guard = tracker.track();
        assert!(!tracker.wait_idle(Duration::from_secs(1)).await);

        let background = tracker.clone();
        let waiter = tokio::spawn(async move { background.wait_idle(Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(250)).await;
        drop(guard);
        assert!(waiter.await.unwrap());
    }
}
