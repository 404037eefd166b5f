//! Online/offline signal.
//!
//! The host environment reports connectivity changes through
//! [`Connectivity::set_online`]. The database watches the signal and starts a
//! sync sweep on every offline-to-online transition.

use std::sync::Arc;

use tokio::sync::watch;

/// Shared connectivity flag. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Report the current connectivity. Only actual changes wake watchers.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::debug!(online, "Connectivity changed");
        }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Watch for changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
