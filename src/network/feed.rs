//! Device/State Change Feed
//!
//! Two passive listeners translate platform broadcasts into observable
//! state updates. Both are registered when the connection manager is
//! created and torn down again at `release()`.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::LinkError;
use crate::network::adapter::{LinkAdapter, SystemEvent};
use crate::network::state::StateHandle;

/// Spawn the discovery feed: every `DeviceFound` broadcast appends the
/// device to the scanned list unless its address is already known.
pub(crate) fn spawn_discovery_feed(
    adapter: Arc<dyn LinkAdapter>,
    state: StateHandle,
) -> JoinHandle<()> {
    let mut events = adapter.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SystemEvent::DeviceFound(device)) => {
                    debug!("discovered {}", device.display_name());
                    state.add_scanned(device);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!("discovery feed lagged, skipped {skipped} events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Spawn the link-state feed: connection broadcasts for bonded devices
/// update the connection flag; broadcasts for unknown devices only warn.
pub(crate) fn spawn_link_state_feed(
    adapter: Arc<dyn LinkAdapter>,
    state: StateHandle,
) -> JoinHandle<()> {
    let mut events = adapter.subscribe();
    tokio::spawn(async move {
        loop {
            let (device, connected) = match events.recv().await {
                Ok(SystemEvent::LinkConnected(device)) => (device, true),
                Ok(SystemEvent::LinkDisconnected(device)) => (device, false),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    debug!("link-state feed lagged, skipped {skipped} events");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let bonded = adapter.bonded_devices().await.unwrap_or_default();
            if bonded.iter().any(|b| b.address == device.address) {
                state.set_connected(connected);
            } else {
                debug!("{}", LinkError::not_paired(device.display_name()));
                state.report_error("Can't connect to a non-paired device.");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::device::RemoteDevice;
    use crate::network::tcp::TcpLinkAdapter;
    use tokio::time::{sleep, Duration};

    fn device(address: &str) -> RemoteDevice {
        RemoteDevice::new(None, address)
    }

    async fn settle() {
        sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_discovery_feed_dedups() {
        let adapter = Arc::new(TcpLinkAdapter::new());
        let state = StateHandle::new();
        let feed = spawn_discovery_feed(adapter.clone(), state.clone());

        adapter.emit(SystemEvent::DeviceFound(device("aa")));
        adapter.emit(SystemEvent::DeviceFound(device("bb")));
        adapter.emit(SystemEvent::DeviceFound(device("aa")));
        settle().await;

        let snapshot = state.snapshot();
        assert_eq!(snapshot.scanned_devices.len(), 2);
        assert_eq!(snapshot.scanned_devices[0].address, "aa");
        feed.abort();
    }

    #[tokio::test]
    async fn test_link_state_feed_tracks_bonded_devices() {
        let adapter = Arc::new(TcpLinkAdapter::new());
        adapter.set_bonded(vec![device("aa")]);
        let state = StateHandle::new();
        let feed = spawn_link_state_feed(adapter.clone(), state.clone());

        adapter.emit(SystemEvent::LinkConnected(device("aa")));
        settle().await;
        assert!(state.snapshot().is_connected);

        adapter.emit(SystemEvent::LinkDisconnected(device("aa")));
        settle().await;
        assert!(!state.snapshot().is_connected);
        feed.abort();
    }

    #[tokio::test]
    async fn test_link_state_feed_warns_on_unpaired_device() {
        let adapter = Arc::new(TcpLinkAdapter::new());
        let state = StateHandle::new();
        let mut errors = state.subscribe_errors();
        let feed = spawn_link_state_feed(adapter.clone(), state.clone());

        adapter.emit(SystemEvent::LinkConnected(device("stranger")));
        settle().await;

        assert!(!state.snapshot().is_connected);
        assert_eq!(
            errors.recv().await.unwrap(),
            "Can't connect to a non-paired device."
        );
        feed.abort();
    }
}
