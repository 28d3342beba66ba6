//! gaze-grasper-core
//!
//! Connection core for a gaze-driven object selection system: a mobile app
//! pairs eye-gaze tracking with an external camera controller and relays
//! the selected target over a point-to-point serial link. This crate is the
//! platform-independent part: session management, the data-transfer
//! protocol, observable connection state, and the gaze hit-testing that
//! feeds the selection command onto the wire.
//!
//! ## Architecture
//!
//! - `network`: connection manager, transfer session, platform adapter
//!   seam (with a TCP reference implementation), observable state
//! - `protocol`: `<sender>#<body>` message codec and frame chunk records
//! - `gaze`: block tracking and gaze hit-testing; consumes the send
//!   primitives only
//! - `config` / `error`: shared configuration and error taxonomy
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gaze_grasper_core::network::{ConnectionManager, TcpLinkAdapter};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let adapter = Arc::new(TcpLinkAdapter::new());
//! adapter.set_alias("my-phone");
//!
//! let manager = ConnectionManager::new(adapter).await;
//! let events = manager.start_server(CancellationToken::new());
//! // consume `events`, then manager.release().await at teardown
//! # }
//! ```

// Re-export commonly used types
pub use error::{LinkError, Result};
pub use network::{ConnectionEvent, ConnectionManager, RemoteDevice};

// Public modules
pub mod config;
pub mod error;
pub mod gaze;
pub mod network;
pub mod protocol;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
