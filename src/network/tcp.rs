//! TCP Reference Adapter
//!
//! [`TcpLinkAdapter`] implements the [`LinkAdapter`] seam over plain TCP.
//! It is the transport used by the integration tests and by desktop builds
//! that bridge the link over a network instead of a radio.
//!
//! ## Service identifier handshake
//!
//! Stream sockets carry no service metadata, so the pre-shared identifier
//! is enforced with a minimal preamble before a session exists: the
//! initiator writes the 36-byte UUID string, the listener verifies it and
//! answers a single ACK byte. A mismatch or a stalled handshake drops the
//! socket and the listener keeps waiting; the initiator sees the drop as a
//! failed connect. No preamble bytes ever reach the session layer.
//!
//! ## Platform signals
//!
//! Discovery broadcasts and low-level link events have no TCP equivalent;
//! the embedding platform (or a test) injects them through
//! [`TcpLinkAdapter::emit`], and configures the bonded list and granted
//! permissions directly.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{LinkError, Result};
use crate::network::adapter::{LinkAdapter, LinkListener, LinkStream, Permission, SystemEvent};
use crate::network::device::RemoteDevice;

/// Accept-side handshake deadline
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Byte the listener answers when the service identifier matches
const HANDSHAKE_ACK: u8 = 0x06;

/// Length of a canonical UUID string
const UUID_LEN: usize = 36;

/// Capacity of the injected system event channel
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// [`LinkAdapter`] implementation over TCP
pub struct TcpLinkAdapter {
    alias: RwLock<Option<String>>,
    bind_address: String,
    permissions: RwLock<HashSet<Permission>>,
    bonded: RwLock<Vec<RemoteDevice>>,
    events: broadcast::Sender<SystemEvent>,
    discovering: AtomicBool,
    last_bound: RwLock<Option<String>>,
}

impl TcpLinkAdapter {
    /// Create an adapter that binds listeners on an ephemeral loopback port
    pub fn new() -> Self {
        Self::with_bind_address("127.0.0.1:0")
    }

    /// Create an adapter that binds listeners on the given address
    pub fn with_bind_address(bind_address: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            alias: RwLock::new(None),
            bind_address: bind_address.into(),
            permissions: RwLock::new(HashSet::from([Permission::Scan, Permission::Connect])),
            bonded: RwLock::new(Vec::new()),
            events,
            discovering: AtomicBool::new(false),
            last_bound: RwLock::new(None),
        }
    }

    /// Set the locally advertised name
    pub fn set_alias(&self, alias: impl Into<String>) {
        *self.alias.write().unwrap() = Some(alias.into());
    }

    /// Grant a permission
    pub fn grant(&self, permission: Permission) {
        self.permissions.write().unwrap().insert(permission);
    }

    /// Revoke a permission
    pub fn revoke(&self, permission: Permission) {
        self.permissions.write().unwrap().remove(&permission);
    }

    /// Replace the bonded device list
    pub fn set_bonded(&self, devices: Vec<RemoteDevice>) {
        *self.bonded.write().unwrap() = devices;
    }

    /// Inject a platform broadcast event
    pub fn emit(&self, event: SystemEvent) {
        let _ = self.events.send(event);
    }

    /// Whether discovery is currently running
    pub fn is_discovering(&self) -> bool {
        self.discovering.load(Ordering::Acquire)
    }

    /// Address of the most recently bound listener
    pub fn last_bound_address(&self) -> Option<String> {
        self.last_bound.read().unwrap().clone()
    }
}

impl Default for TcpLinkAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LinkAdapter for TcpLinkAdapter {
    fn alias(&self) -> Option<String> {
        self.alias.read().unwrap().clone()
    }

    fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.read().unwrap().contains(&permission)
    }

    async fn bonded_devices(&self) -> Result<Vec<RemoteDevice>> {
        Ok(self.bonded.read().unwrap().clone())
    }

    async fn start_discovery(&self) -> Result<()> {
        self.discovering.store(true, Ordering::Release);
        debug!("discovery started");
        Ok(())
    }

    async fn stop_discovery(&self) -> Result<()> {
        self.discovering.store(false, Ordering::Release);
        debug!("discovery stopped");
        Ok(())
    }

    async fn bind(&self, service_name: &str, service_uuid: &str) -> Result<Box<dyn LinkListener>> {
        let listener = TcpListener::bind(&self.bind_address).await?;
        let local = listener.local_addr()?.to_string();
        debug!("listening for '{service_name}' on {local}");
        *self.last_bound.write().unwrap() = Some(local.clone());
        Ok(Box::new(TcpLinkListener {
            listener,
            service_uuid: service_uuid.to_string(),
            local_address: local,
        }))
    }

    async fn connect(&self, address: &str, service_uuid: &str) -> Result<Box<dyn LinkStream>> {
        let mut stream = TcpStream::connect(address)
            .await
            .map_err(|err| LinkError::connect(err.to_string()))?;
        handshake_initiator(&mut stream, service_uuid).await?;
        debug!("connected to {address}");
        Ok(Box::new(stream))
    }

    fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.events.subscribe()
    }
}

/// Bound TCP listener that filters connections by service identifier
pub struct TcpLinkListener {
    listener: TcpListener,
    service_uuid: String,
    local_address: String,
}

#[async_trait]
impl LinkListener for TcpLinkListener {
    async fn accept(&mut self) -> Result<Box<dyn LinkStream>> {
        loop {
            let (mut stream, peer) = self.listener.accept().await?;
            match timeout(
                HANDSHAKE_TIMEOUT,
                handshake_listener(&mut stream, &self.service_uuid),
            )
            .await
            {
                Ok(Ok(())) => {
                    debug!("accepted {peer}");
                    return Ok(Box::new(stream));
                }
                Ok(Err(err)) => {
                    warn!("rejected {peer}: {err}");
                }
                Err(_) => {
                    warn!("rejected {peer}: handshake timed out");
                }
            }
            // Socket dropped; keep waiting for a matching peer
        }
    }

    fn local_address(&self) -> Option<String> {
        Some(self.local_address.clone())
    }
}

/// Initiator side: announce the service identifier, wait for the ACK
async fn handshake_initiator(stream: &mut TcpStream, service_uuid: &str) -> Result<()> {
    if service_uuid.len() != UUID_LEN {
        return Err(LinkError::connect("service identifier must be a UUID"));
    }
    stream
        .write_all(service_uuid.as_bytes())
        .await
        .map_err(|err| LinkError::connect(err.to_string()))?;

    let mut ack = [0u8; 1];
    stream
        .read_exact(&mut ack)
        .await
        .map_err(|err| LinkError::connect(err.to_string()))?;
    if ack[0] != HANDSHAKE_ACK {
        return Err(LinkError::connect("service identifier rejected"));
    }
    Ok(())
}

/// Listener side: verify the announced identifier, answer the ACK
async fn handshake_listener(stream: &mut TcpStream, service_uuid: &str) -> Result<()> {
    let mut announced = [0u8; UUID_LEN];
    stream.read_exact(&mut announced).await?;
    if announced != service_uuid.as_bytes() {
        return Err(LinkError::connect("service identifier mismatch"));
    }
    stream.write_all(&[HANDSHAKE_ACK]).await?;
    Ok(())
}
