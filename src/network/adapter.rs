//! Platform Adapter Seam
//!
//! The connection core never talks to a radio or a platform API directly.
//! Everything environment-specific (permissions, the local alias, bonded
//! devices, discovery, binding and connecting stream sockets, link-state
//! broadcasts) comes in through the [`LinkAdapter`] trait, so the core
//! stays testable without real hardware.
//!
//! [`crate::network::TcpLinkAdapter`] is the reference implementation.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::network::device::RemoteDevice;

/// Platform permissions the core checks before touching I/O
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Device discovery
    Scan,
    /// Opening and accepting connections
    Connect,
}

/// Broadcast events delivered by the platform.
///
/// These are the raw environment signals; the feed tasks translate them
/// into observable state updates.
#[derive(Debug, Clone)]
pub enum SystemEvent {
    /// Discovery reported a nearby device
    DeviceFound(RemoteDevice),
    /// A low-level link to the device came up
    LinkConnected(RemoteDevice),
    /// A low-level link to the device went down
    LinkDisconnected(RemoteDevice),
}

/// A bidirectional stream socket to one peer
pub trait LinkStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> LinkStream for T {}

/// A bound listening endpoint
#[async_trait]
pub trait LinkListener: Send {
    /// Wait for the next incoming connection that matches the service
    /// identifier the listener was bound with.
    async fn accept(&mut self) -> Result<Box<dyn LinkStream>>;

    /// Address the listener is reachable at, if known
    fn local_address(&self) -> Option<String>;
}

/// The injected platform surface
#[async_trait]
pub trait LinkAdapter: Send + Sync {
    /// Locally advertised device name, if the platform has one
    fn alias(&self) -> Option<String>;

    /// Whether the given platform permission is currently granted
    fn has_permission(&self, permission: Permission) -> bool;

    /// Devices currently bonded/paired with this adapter
    async fn bonded_devices(&self) -> Result<Vec<RemoteDevice>>;

    /// Begin populating discovery broadcasts; idempotent
    async fn start_discovery(&self) -> Result<()>;

    /// Halt discovery; idempotent
    async fn stop_discovery(&self) -> Result<()>;

    /// Bind a listening endpoint under the given service identifier
    async fn bind(&self, service_name: &str, service_uuid: &str) -> Result<Box<dyn LinkListener>>;

    /// Open an initiating connection to `address` under the given service
    /// identifier. Blocks until the connect succeeds or fails.
    async fn connect(&self, address: &str, service_uuid: &str) -> Result<Box<dyn LinkStream>>;

    /// Subscribe to platform broadcast events
    fn subscribe(&self) -> broadcast::Receiver<SystemEvent>;
}
