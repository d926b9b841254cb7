use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityChange {
    CameOnline,
    WentOffline,
    Unchanged,
}

/// Online/offline flag fed by host events. Readers subscribe to a watch
/// channel so the sync engine always sees the latest value.
pub struct ConnectivityMonitor {
    online_tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (online_tx, _) = watch::channel(initially_online);
        Self { online_tx }
    }

    pub fn is_online(&self) -> bool {
        *self.online_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online_tx.subscribe()
    }

    pub fn set_online(&self, online: bool) -> ConnectivityChange {
        let changed = self.online_tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        match (changed, online) {
            (false, _) => ConnectivityChange::Unchanged,
            (true, true) => ConnectivityChange::CameOnline,
            (true, false) => ConnectivityChange::WentOffline,
        }
    }
}
