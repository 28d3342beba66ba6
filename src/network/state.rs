//! Observable Link State
//!
//! Explicitly owned state container with single-writer discipline: only the
//! [`crate::network::ConnectionManager`] and its feed tasks hold a
//! [`StateHandle`]; everyone else observes through a watch subscription or
//! snapshots.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::warn;

use crate::network::device::RemoteDevice;

/// Capacity of the transient error notification channel
const ERROR_CHANNEL_CAPACITY: usize = 16;

/// Snapshot of the observable connection state
#[derive(Debug, Clone, Default)]
pub struct LinkState {
    /// Devices reported by discovery, in discovery order, deduplicated by
    /// address
    pub scanned_devices: Vec<RemoteDevice>,
    /// Devices bonded with the local adapter, deduplicated by address
    pub paired_devices: Vec<RemoteDevice>,
    /// Whether a session is currently established
    pub is_connected: bool,
    /// Most recent error message, cleared when a session establishes
    pub last_error: Option<String>,
}

struct StateInner {
    state: watch::Sender<LinkState>,
    errors: broadcast::Sender<String>,
}

/// Writer handle over the observable state plus the transient error channel
#[derive(Clone)]
pub struct StateHandle {
    inner: Arc<StateInner>,
}

impl StateHandle {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(LinkState::default());
        let (errors, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(StateInner { state, errors }),
        }
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.inner.state.subscribe()
    }

    /// Subscribe to transient error notifications
    pub fn subscribe_errors(&self) -> broadcast::Receiver<String> {
        self.inner.errors.subscribe()
    }

    /// Current state snapshot
    pub fn snapshot(&self) -> LinkState {
        self.inner.state.borrow().clone()
    }

    /// Append a discovered device unless its address is already known.
    ///
    /// Discovery order is preserved; re-reports of a known address leave the
    /// list untouched.
    pub(crate) fn add_scanned(&self, device: RemoteDevice) {
        self.inner.state.send_modify(|state| {
            if !state
                .scanned_devices
                .iter()
                .any(|d| d.address == device.address)
            {
                state.scanned_devices.push(device);
            }
        });
    }

    /// Replace the paired device list, deduplicated by address
    pub(crate) fn set_paired(&self, devices: Vec<RemoteDevice>) {
        self.inner.state.send_modify(|state| {
            state.paired_devices.clear();
            for device in devices {
                if !state
                    .paired_devices
                    .iter()
                    .any(|d| d.address == device.address)
                {
                    state.paired_devices.push(device);
                }
            }
        });
    }

    /// Record that a session established; clears the last error
    pub(crate) fn set_established(&self) {
        self.inner.state.send_modify(|state| {
            state.is_connected = true;
            state.last_error = None;
        });
    }

    /// Update the connection flag without touching the error state
    pub(crate) fn set_connected(&self, connected: bool) {
        self.inner
            .state
            .send_modify(|state| state.is_connected = connected);
    }

    /// Surface a transient error and record it as the last error
    pub(crate) fn report_error(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("link error: {message}");
        self.inner
            .state
            .send_modify(|state| state.last_error = Some(message.clone()));
        // Nobody listening is fine; the state snapshot still carries it
        let _ = self.inner.errors.send(message);
    }

    /// Record a failure that also ends the session
    pub(crate) fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        self.inner.state.send_modify(|state| {
            state.is_connected = false;
            state.last_error = Some(message.clone());
        });
        let _ = self.inner.errors.send(message);
    }
}
