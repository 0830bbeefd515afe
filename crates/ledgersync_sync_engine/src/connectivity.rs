//! Online/offline signal.

use crate::transport::SyncTransport;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Network reachability as last reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// The remote can be reached.
    Online,
    /// The remote cannot be reached.
    Offline,
}

impl Connectivity {
    /// Returns true when online.
    pub fn is_online(self) -> bool {
        self == Connectivity::Online
    }
}

impl From<bool> for Connectivity {
    fn from(online: bool) -> Self {
        if online {
            Connectivity::Online
        } else {
            Connectivity::Offline
        }
    }
}

/// An explicit connectivity event source.
///
/// Whatever observes the platform's network state calls
/// [`set`](Self::set); subscribers see every transition.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<Connectivity>>,
}

impl ConnectivityMonitor {
    /// Creates a monitor with a known starting state.
    pub fn new(initial: Connectivity) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Reports the current state. Returns true on a transition.
    pub fn set(&self, state: Connectivity) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            info!(?state, "connectivity changed");
        }
        changed
    }

    /// Shorthand for [`set`](Self::set).
    pub fn set_online(&self, online: bool) -> bool {
        self.set(online.into())
    }

    /// Takes the state from a transport's own view.
    pub fn probe<T: SyncTransport + ?Sized>(&self, transport: &T) -> Connectivity {
        let state = Connectivity::from(transport.is_connected());
        self.set(state);
        state
    }

    /// Last reported state.
    pub fn current(&self) -> Connectivity {
        *self.tx.borrow()
    }

    /// Returns true if last reported online.
    pub fn is_online(&self) -> bool {
        self.current().is_online()
    }

    /// A receiver that wakes on each transition.
    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(Connectivity::Online)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    #[test]
    fn repeated_state_is_not_a_transition() {
        let monitor = ConnectivityMonitor::new(Connectivity::Offline);
        assert!(!monitor.set_online(false));
        assert!(monitor.set_online(true));
        assert!(!monitor.set_online(true));
        assert!(monitor.is_online());
    }

    #[test]
    fn probe_follows_transport() {
        let monitor = ConnectivityMonitor::default();
        let transport = MockTransport::new();
        transport.set_connected(false);
        assert_eq!(monitor.probe(&transport), Connectivity::Offline);
        assert!(!monitor.is_online());
    }

    #[tokio::test]
    async fn subscribers_see_transitions() {
        let monitor = ConnectivityMonitor::new(Connectivity::Offline);
        let mut rx = monitor.subscribe();
        let clone = monitor.clone();

        clone.set_online(true);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Connectivity::Online);
    }
}
