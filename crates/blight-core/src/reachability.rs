//! Reachability monitor
//!
//! Holds the platform's online/offline signal and broadcasts
//! transitions over a watch channel. Subscribers unsubscribe by
//! dropping their receiver; there is no callback registry to unwind on
//! teardown.

use tokio::sync::watch;

/// Shared online/offline state fed by the platform glue.
///
/// Cloning is cheap; all clones observe the same state.
#[derive(Clone)]
pub struct ReachabilityMonitor {
    sender: std::sync::Arc<watch::Sender<bool>>,
}

impl ReachabilityMonitor {
    /// Create a monitor with the given initial state
    #[must_use]
    pub fn new(initially_online: bool) -> Self {
        let (sender, _receiver) = watch::channel(initially_online);
        Self {
            sender: std::sync::Arc::new(sender),
        }
    }

    /// Synchronous read of the current state
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    /// Feed a connectivity change from the platform.
    ///
    /// Repeated reports of the same state are swallowed, so flapping
    /// platform callbacks don't wake subscribers needlessly.
    pub fn set_online(&self, online: bool) {
        self.sender.send_if_modified(|state| {
            if *state == online {
                false
            } else {
                tracing::debug!(
                    "Connectivity changed: {}",
                    if online { "online" } else { "offline" }
                );
                *state = online;
                true
            }
        });
    }

    /// Subscribe to transition events.
    ///
    /// The receiver yields the new state after each transition; dropping
    /// it is the unsubscribe.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

impl Default for ReachabilityMonitor {
    fn default() -> Self {
        // Assume online until the platform says otherwise, matching the
        // behavior of the connectivity plugins this state is fed from.
        Self::new(true)
    }
}
