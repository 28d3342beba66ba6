//! Connection Manager
//!
//! Orchestrates the lifecycle of acquiring a [`TransferSession`], either by
//! listening for an incoming connection or by initiating one to a
//! discovered peer, and folds the whole lifecycle (establish, data,
//! teardown) into one event sequence per attempt.
//!
//! ## Responsibilities
//!
//! - Device discovery state (scanned/paired lists) via the feed tasks
//! - Listener-role and initiator-role session establishment
//! - The at-most-one-session invariant: installing a new session tears the
//!   prior one down first
//! - Translating transfer failures into terminal `Error` events; deciding
//!   which failures end a session (reads and connects do, writes do not)
//! - Cancellation: cancelling the token handed to `start_server` /
//!   `connect_to_device`, or dropping the returned stream, closes the
//!   listener and the active session
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gaze_grasper_core::network::{ConnectionManager, ConnectionEvent, TcpLinkAdapter};
//! use tokio_stream::StreamExt;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let adapter = Arc::new(TcpLinkAdapter::new());
//! let manager = ConnectionManager::new(adapter).await;
//!
//! let cancel = CancellationToken::new();
//! let mut events = manager.start_server(cancel.clone());
//! while let Some(event) = events.next().await {
//!     if let ConnectionEvent::MessageReceived(msg) = event {
//!         println!("{}: {}", msg.sender_name, msg.body);
//!     }
//! }
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::network::adapter::{LinkAdapter, LinkStream, Permission};
use crate::network::device::RemoteDevice;
use crate::network::feed::{spawn_discovery_feed, spawn_link_state_feed};
use crate::network::session::TransferSession;
use crate::network::state::{LinkState, StateHandle};
use crate::protocol::{ChatMessage, FrameChunk, InboundPayload};

/// Terminal event message when an initiating connection fails
const CONNECTION_INTERRUPTED: &str = "Connection was interrupted";

/// Buffered events per attempt sequence
const EVENT_BUFFER: usize = 32;

/// One step in a session lifecycle
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A session was established
    Established,
    /// A text message arrived on the active session
    MessageReceived(ChatMessage),
    /// A frame chunk arrived on the active session
    FrameReceived(FrameChunk),
    /// The attempt or the active session failed
    Error {
        /// Human-readable failure description
        message: String,
    },
}

struct ActiveSession {
    session: TransferSession,
    owner: u64,
}

type SessionSlot = Arc<Mutex<Option<ActiveSession>>>;

/// Everything a role task needs, detached from the manager's lifetime
#[derive(Clone)]
struct RoleContext {
    adapter: Arc<dyn LinkAdapter>,
    config: LinkConfig,
    state: StateHandle,
    slot: SessionSlot,
    token: CancellationToken,
    owner: u64,
}

/// Connection lifecycle orchestrator
pub struct ConnectionManager {
    adapter: Arc<dyn LinkAdapter>,
    config: LinkConfig,
    state: StateHandle,
    slot: SessionSlot,
    role_cancel: StdMutex<Option<CancellationToken>>,
    role_seq: AtomicU64,
    feeds: StdMutex<Vec<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Create a manager with the default configuration
    pub async fn new(adapter: Arc<dyn LinkAdapter>) -> Self {
        Self::with_config(adapter, LinkConfig::default()).await
    }

    /// Create a manager, register the passive feeds, seed the paired list
    pub async fn with_config(adapter: Arc<dyn LinkAdapter>, config: LinkConfig) -> Self {
        let state = StateHandle::new();
        let feeds = vec![
            spawn_discovery_feed(adapter.clone(), state.clone()),
            spawn_link_state_feed(adapter.clone(), state.clone()),
        ];
        let manager = Self {
            adapter,
            config,
            state,
            slot: Arc::new(Mutex::new(None)),
            role_cancel: StdMutex::new(None),
            role_seq: AtomicU64::new(0),
            feeds: StdMutex::new(feeds),
        };
        manager.refresh_paired().await;
        manager
    }

    /// Subscribe to observable connection state
    pub fn state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Subscribe to transient error notifications
    pub fn errors(&self) -> broadcast::Receiver<String> {
        self.state.subscribe_errors()
    }

    /// Current state snapshot
    pub fn snapshot(&self) -> LinkState {
        self.state.snapshot()
    }

    /// Begin populating the scanned device list from discovery broadcasts.
    ///
    /// Without the scan permission this is a no-op that reports on the
    /// error channel.
    pub async fn start_discovery(&self) {
        if !self.adapter.has_permission(Permission::Scan) {
            self.state.report_error("Missing scan permission");
            return;
        }
        self.refresh_paired().await;
        if let Err(err) = self.adapter.start_discovery().await {
            self.state.report_error(err.to_string());
        }
    }

    /// Halt discovery; idempotent
    pub async fn stop_discovery(&self) {
        if !self.adapter.has_permission(Permission::Scan) {
            return;
        }
        if let Err(err) = self.adapter.stop_discovery().await {
            debug!("stop discovery failed: {err}");
        }
    }

    /// Listen for incoming connections under the pre-shared service
    /// identifier.
    ///
    /// Cold: every call spawns a fresh accept loop. For each accepted
    /// connection the sequence carries `Established` followed by payload
    /// events until the session errors or closes, after which the loop
    /// accepts again. A missing connect permission or a bind/accept failure
    /// emits a terminal `Error`. Cancelling `cancel` (or dropping the
    /// stream) closes the listener and any active session.
    pub fn start_server(&self, cancel: CancellationToken) -> ReceiverStream<ConnectionEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let ctx = self.begin_role(&cancel);

        tokio::spawn(async move {
            serve(&ctx, &tx).await;
            release_role(&ctx).await;
        });

        ReceiverStream::new(rx)
    }

    /// Initiate a connection to a previously discovered peer.
    ///
    /// Returns `Err(PermissionDenied)` without emitting anything when the
    /// connect permission is missing. Otherwise the sequence carries
    /// `Established` plus payload events until the session ends, or exactly
    /// one `Error { "Connection was interrupted" }` when the connect fails.
    pub async fn connect_to_device(
        &self,
        device: &RemoteDevice,
        cancel: CancellationToken,
    ) -> Result<ReceiverStream<ConnectionEvent>> {
        if !self.adapter.has_permission(Permission::Connect) {
            return Err(LinkError::permission("connect permission not granted"));
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let ctx = self.begin_role(&cancel);
        let address = device.address.clone();

        tokio::spawn(async move {
            initiate(&ctx, &tx, &address).await;
            release_role(&ctx).await;
        });

        Ok(ReceiverStream::new(rx))
    }

    /// Encode and write a chat message through the active session.
    ///
    /// Returns the locally-tagged message on success; `None` when the
    /// connect permission is missing, no session is active, or the write
    /// fails.
    pub async fn try_send_message(&self, text: &str) -> Option<ChatMessage> {
        if !self.adapter.has_permission(Permission::Connect) {
            return None;
        }
        let session = self.active_session().await?;
        let sender = self
            .adapter
            .alias()
            .unwrap_or_else(|| self.config.alias_fallback.clone());
        let message = ChatMessage::outgoing(text, sender);
        if session.send(&message.encode()).await {
            Some(message)
        } else {
            None
        }
    }

    /// Fire-and-forget write of a raw payload through the active session.
    ///
    /// Used for latency-sensitive constant-size commands such as the
    /// single-byte target selection. Failures are logged, never raised.
    pub async fn send_raw(&self, bytes: &[u8]) {
        match self.active_session().await {
            Some(session) => session.send_now(bytes).await,
            None => debug!("send_raw without an active session"),
        }
    }

    /// Close the listening endpoint and the active session, if any open.
    ///
    /// Safe to call when nothing is open.
    pub async fn close_connection(&self) {
        let role = self.role_cancel.lock().unwrap().take();
        if let Some(token) = role {
            token.cancel();
        }
        let active = self.slot.lock().await.take();
        if let Some(active) = active {
            active.session.shutdown().await;
        }
        self.state.set_connected(false);
    }

    /// Deregister the passive feeds and close everything.
    ///
    /// Call exactly once at teardown; the manager must not be used
    /// afterwards.
    pub async fn release(&self) {
        let handles: Vec<_> = self.feeds.lock().unwrap().drain(..).collect();
        for handle in handles {
            handle.abort();
        }
        self.close_connection().await;
    }

    async fn active_session(&self) -> Option<TransferSession> {
        self.slot
            .lock()
            .await
            .as_ref()
            .map(|active| active.session.clone())
    }

    async fn refresh_paired(&self) {
        if !self.adapter.has_permission(Permission::Connect) {
            return;
        }
        match self.adapter.bonded_devices().await {
            Ok(devices) => self.state.set_paired(devices),
            Err(err) => debug!("could not enumerate bonded devices: {err}"),
        }
    }

    /// Start a new role attempt, cancelling any prior one first.
    fn begin_role(&self, cancel: &CancellationToken) -> RoleContext {
        let token = cancel.child_token();
        let prior = self
            .role_cancel
            .lock()
            .unwrap()
            .replace(token.clone());
        if let Some(prior) = prior {
            prior.cancel();
        }
        RoleContext {
            adapter: self.adapter.clone(),
            config: self.config.clone(),
            state: self.state.clone(),
            slot: self.slot.clone(),
            token,
            owner: self.role_seq.fetch_add(1, Ordering::Relaxed),
        }
    }
}

/// Outcome of forwarding one session's payload events
enum Pump {
    /// The consumer dropped the event stream
    Detached,
    /// The session failed; a terminal `Error` event was emitted
    Failed,
    /// The read loop ended without a failure (cancellation)
    Ended,
}

/// Listener-role loop: bind once, then accept/serve until cancelled
async fn serve(ctx: &RoleContext, tx: &mpsc::Sender<ConnectionEvent>) {
    if !ctx.adapter.has_permission(Permission::Connect) {
        let _ = tx
            .send(ConnectionEvent::Error {
                message: "Missing connect permission".to_string(),
            })
            .await;
        return;
    }

    let mut listener = match ctx
        .adapter
        .bind(&ctx.config.service_name, &ctx.config.service_uuid)
        .await
    {
        Ok(listener) => listener,
        Err(err) => {
            let _ = tx
                .send(ConnectionEvent::Error {
                    message: err.to_string(),
                })
                .await;
            return;
        }
    };
    info!(
        "listening for peers on {}",
        listener.local_address().unwrap_or_default()
    );

    loop {
        let accepted = tokio::select! {
            _ = ctx.token.cancelled() => return,
            result = listener.accept() => result,
        };
        let stream = match accepted {
            Ok(stream) => stream,
            Err(err) => {
                let _ = tx
                    .send(ConnectionEvent::Error {
                        message: err.to_string(),
                    })
                    .await;
                return;
            }
        };

        let session = install_session(ctx, stream).await;
        ctx.state.set_established();
        if tx.send(ConnectionEvent::Established).await.is_err() {
            return;
        }

        match pump(ctx, &session, tx).await {
            Pump::Detached => return,
            Pump::Failed | Pump::Ended => {
                // This peer is gone; drop the session and relisten
                clear_session(ctx).await;
                ctx.state.set_connected(false);
            }
        }
    }
}

/// Initiator-role task: one connect attempt, one session, one sequence
async fn initiate(ctx: &RoleContext, tx: &mpsc::Sender<ConnectionEvent>, address: &str) {
    if let Err(err) = ctx.adapter.stop_discovery().await {
        debug!("stop discovery before connect failed: {err}");
    }

    let connected = tokio::select! {
        _ = ctx.token.cancelled() => return,
        result = ctx.adapter.connect(address, &ctx.config.service_uuid) => result,
    };
    let stream = match connected {
        Ok(stream) => stream,
        Err(err) => {
            warn!("connect to {address} failed: {err}");
            ctx.state.fail(CONNECTION_INTERRUPTED);
            let _ = tx
                .send(ConnectionEvent::Error {
                    message: CONNECTION_INTERRUPTED.to_string(),
                })
                .await;
            return;
        }
    };

    let session = install_session(ctx, stream).await;
    ctx.state.set_established();
    if tx.send(ConnectionEvent::Established).await.is_err() {
        return;
    }

    pump(ctx, &session, tx).await;
}

/// Forward demultiplexed payloads as events until the session ends.
///
/// A transfer failure marks the state, emits the terminal `Error` event
/// and reports `Failed`; the caller decides whether to relisten.
async fn pump(
    ctx: &RoleContext,
    session: &TransferSession,
    tx: &mpsc::Sender<ConnectionEvent>,
) -> Pump {
    let mut incoming = session.incoming(ctx.token.child_token());
    while let Some(item) = incoming.next().await {
        let event = match item {
            Ok(InboundPayload::Message(message)) => ConnectionEvent::MessageReceived(message),
            Ok(InboundPayload::Frame(frame)) => ConnectionEvent::FrameReceived(frame),
            Err(err) => {
                let message = err.to_string();
                ctx.state.fail(message.clone());
                let _ = tx.send(ConnectionEvent::Error { message }).await;
                return Pump::Failed;
            }
        };
        if tx.send(event).await.is_err() {
            return Pump::Detached;
        }
    }
    Pump::Ended
}

/// Install a fresh session, shutting down whatever was active before
async fn install_session(ctx: &RoleContext, stream: Box<dyn LinkStream>) -> TransferSession {
    let session = TransferSession::new(stream, &ctx.config);
    let prior = ctx.slot.lock().await.replace(ActiveSession {
        session: session.clone(),
        owner: ctx.owner,
    });
    if let Some(prior) = prior {
        prior.session.shutdown().await;
    }
    session
}

/// Drop this role's session without touching a successor's
async fn clear_session(ctx: &RoleContext) {
    let mut guard = ctx.slot.lock().await;
    if guard.as_ref().is_some_and(|active| active.owner == ctx.owner) {
        if let Some(active) = guard.take() {
            active.session.shutdown().await;
        }
    }
}

/// Role-task cleanup: cancellation-triggers-cleanup contract.
///
/// The slot lock is held across the teardown so a successor role cannot
/// install a session in between and have its state clobbered.
async fn release_role(ctx: &RoleContext) {
    let mut guard = ctx.slot.lock().await;
    if guard.as_ref().is_some_and(|active| active.owner == ctx.owner) {
        if let Some(active) = guard.take() {
            active.session.shutdown().await;
            ctx.state.set_connected(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::tcp::TcpLinkAdapter;

    #[tokio::test]
    async fn test_connect_without_permission_raises() {
        let adapter = Arc::new(TcpLinkAdapter::new());
        adapter.revoke(Permission::Connect);
        let manager = ConnectionManager::new(adapter).await;

        let peer = RemoteDevice::new(None, "127.0.0.1:1");
        let result = manager
            .connect_to_device(&peer, CancellationToken::new())
            .await;
        assert!(matches!(result, Err(LinkError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_server_without_permission_emits_error() {
        let adapter = Arc::new(TcpLinkAdapter::new());
        adapter.revoke(Permission::Connect);
        let manager = ConnectionManager::new(adapter).await;

        let mut events = manager.start_server(CancellationToken::new());
        match events.next().await.unwrap() {
            ConnectionEvent::Error { message } => assert!(message.contains("permission")),
            other => panic!("expected error event, got {other:?}"),
        }
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_try_send_without_session() {
        let adapter = Arc::new(TcpLinkAdapter::new());
        let manager = ConnectionManager::new(adapter).await;
        assert!(manager.try_send_message("hello").await.is_none());
    }

    #[tokio::test]
    async fn test_discovery_without_permission_reports() {
        let adapter = Arc::new(TcpLinkAdapter::new());
        adapter.revoke(Permission::Scan);
        let manager = ConnectionManager::new(adapter).await;

        let mut errors = manager.errors();
        manager.start_discovery().await;
        assert!(errors.recv().await.unwrap().contains("scan permission"));
    }

    #[tokio::test]
    async fn test_paired_list_seeded_on_creation() {
        let adapter = Arc::new(TcpLinkAdapter::new());
        adapter.set_bonded(vec![RemoteDevice::new(Some("robot".into()), "aa")]);
        let manager = ConnectionManager::new(adapter).await;

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.paired_devices.len(), 1);
        assert_eq!(snapshot.paired_devices[0].address, "aa");
    }

    #[tokio::test]
    async fn test_close_connection_when_idle() {
        let adapter = Arc::new(TcpLinkAdapter::new());
        let manager = ConnectionManager::new(adapter).await;
        manager.close_connection().await;
        assert!(!manager.snapshot().is_connected);
    }
}
