//! Transfer Session
//!
//! Owns the read/write halves of one live stream socket and converts raw
//! chunk reads into typed payload events.
//!
//! ## Read paths
//!
//! Both logical channels (text messages, frame chunks) share one socket and
//! therefore one read cursor. [`TransferSession::incoming`] is the
//! demultiplexing loop: a single reader pulls each chunk and classifies it,
//! so the two channels can never race each other. The per-kind loops
//! [`TransferSession::messages`] and [`TransferSession::frames`] serve
//! consumers that only want one kind; running both concurrently makes them
//! interleave nondeterministically on the shared cursor, so at most one of
//! them should be active on a session.
//!
//! ## Failure semantics
//!
//! A read error (or the peer closing the socket) terminates the stream with
//! a single `Err(TransferFailed)`; it is the connection manager's job to
//! translate that into a lifecycle event and tear the session down. Write
//! failures never raise: `send` degrades to `false`, `send_now` only logs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{split, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::network::adapter::LinkStream;
use crate::protocol::{ChatMessage, FrameAssembly, FrameChunk, InboundPayload, MESSAGE_DELIMITER};

type SharedReader = Arc<Mutex<ReadHalf<Box<dyn LinkStream>>>>;
type SharedWriter = Arc<Mutex<WriteHalf<Box<dyn LinkStream>>>>;

/// Buffered events per listening stream
const STREAM_BUFFER: usize = 32;

/// One active point-to-point session
#[derive(Clone)]
pub struct TransferSession {
    reader: SharedReader,
    writer: SharedWriter,
    open: Arc<AtomicBool>,
    chunk_size: usize,
    assembly: FrameAssembly,
}

impl TransferSession {
    /// Wrap a connected stream socket
    pub fn new(stream: Box<dyn LinkStream>, config: &LinkConfig) -> Self {
        let (reader, writer) = split(stream);
        Self {
            reader: Arc::new(Mutex::new(reader)),
            writer: Arc::new(Mutex::new(writer)),
            open: Arc::new(AtomicBool::new(true)),
            chunk_size: config.chunk_size,
            assembly: config.frame_assembly,
        }
    }

    /// Whether the session has not been closed locally
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Close the session: mark it closed and shut the write half down so
    /// the peer observes EOF within one read cycle.
    pub async fn shutdown(&self) {
        self.open.store(false, Ordering::Release);
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    /// Single demultiplexing read loop.
    ///
    /// Each chunk that decodes as UTF-8 and contains the `'#'` delimiter is
    /// a text message; everything else is a frame chunk. Ends immediately
    /// and silently if the session is already closed. Cancellation stops
    /// the loop without closing the socket.
    pub fn incoming(&self, cancel: CancellationToken) -> ReceiverStream<Result<InboundPayload>> {
        self.raw_chunks(cancel, classify)
    }

    /// Unbounded stream of inbound text messages.
    ///
    /// Every chunk is decoded as a remote-originated message. Shares the
    /// socket's read cursor with [`Self::frames`]; only one of the two may
    /// be active.
    pub fn messages(&self, cancel: CancellationToken) -> ReceiverStream<Result<ChatMessage>> {
        self.raw_chunks(cancel, |bytes, _, _| ChatMessage::decode(bytes, false))
    }

    /// Unbounded stream of inbound frame chunks, built with the configured
    /// assembly strategy. Shares the read cursor with [`Self::messages`].
    pub fn frames(&self, cancel: CancellationToken) -> ReceiverStream<Result<FrameChunk>> {
        self.raw_chunks(cancel, |bytes, chunk_size, assembly| {
            assembly.assemble(bytes, chunk_size)
        })
    }

    /// Write the full byte sequence to the socket.
    ///
    /// Writes are serialized through one write half, so concurrent senders
    /// cannot interleave. Returns `false` on failure instead of raising.
    pub async fn send(&self, bytes: &[u8]) -> bool {
        let mut writer = self.writer.lock().await;
        match write_all(&mut writer, bytes).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!("send failed: {err}");
                false
            }
        }
    }

    /// Fire-and-forget write for small constant payloads (e.g. a one-byte
    /// selection command). Failures are logged and swallowed.
    pub async fn send_now(&self, bytes: &[u8]) {
        let mut writer = self.writer.lock().await;
        if let Err(err) = write_all(&mut writer, bytes).await {
            tracing::debug!("fire-and-forget send failed: {err}");
        }
    }

    fn raw_chunks<T, F>(&self, cancel: CancellationToken, map: F) -> ReceiverStream<Result<T>>
    where
        T: Send + 'static,
        F: Fn(&[u8], usize, FrameAssembly) -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let reader = Arc::clone(&self.reader);
        let open = Arc::clone(&self.open);
        let chunk_size = self.chunk_size;
        let assembly = self.assembly;

        tokio::spawn(async move {
            if !open.load(Ordering::Acquire) {
                return;
            }
            loop {
                let chunk = tokio::select! {
                    _ = cancel.cancelled() => break,
                    read = read_chunk(&reader, chunk_size) => read,
                };
                let item = match chunk {
                    Ok(bytes) => Ok(map(&bytes, chunk_size, assembly)),
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        break;
                    }
                };
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });

        ReceiverStream::new(rx)
    }
}

/// Pull one chunk of up to `chunk_size` bytes off the shared read cursor.
///
/// EOF counts as a transfer failure: the session is supposed to live until
/// torn down, so the peer vanishing mid-stream is an error here.
async fn read_chunk(reader: &SharedReader, chunk_size: usize) -> Result<Vec<u8>> {
    let mut guard = reader.lock().await;
    let mut buffer = vec![0u8; chunk_size];
    match guard.read(&mut buffer).await {
        Ok(0) => Err(LinkError::transfer("connection closed by peer")),
        Ok(n) => {
            buffer.truncate(n);
            Ok(buffer)
        }
        Err(err) => Err(LinkError::transfer(err.to_string())),
    }
}

async fn write_all(writer: &mut WriteHalf<Box<dyn LinkStream>>, bytes: &[u8]) -> Result<()> {
    writer
        .write_all(bytes)
        .await
        .map_err(|err| LinkError::write(err.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|err| LinkError::write(err.to_string()))
}

/// Classify one raw chunk into a typed payload
fn classify(bytes: &[u8], chunk_size: usize, assembly: FrameAssembly) -> InboundPayload {
    match std::str::from_utf8(bytes) {
        Ok(text) if text.contains(MESSAGE_DELIMITER) => {
            InboundPayload::Message(ChatMessage::decode(bytes, false))
        }
        _ => InboundPayload::Frame(assembly.assemble(bytes, chunk_size)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    fn session_pair() -> (TransferSession, TransferSession) {
        let (a, b) = tokio::io::duplex(4096);
        let config = LinkConfig::default();
        (
            TransferSession::new(Box::new(a), &config),
            TransferSession::new(Box::new(b), &config),
        )
    }

    #[tokio::test]
    async fn test_message_delivery() {
        let (local, remote) = session_pair();
        let mut messages = remote.messages(CancellationToken::new());

        assert!(local.send(b"alice#hello").await);

        let msg = messages.next().await.unwrap().unwrap();
        assert_eq!(msg.sender_name, "alice");
        assert_eq!(msg.body, "hello");
        assert!(!msg.is_local);
    }

    #[tokio::test]
    async fn test_incoming_demultiplexes() {
        let (local, remote) = session_pair();
        let mut incoming = remote.incoming(CancellationToken::new());

        assert!(local.send(b"alice#hi").await);
        match incoming.next().await.unwrap().unwrap() {
            InboundPayload::Message(msg) => assert_eq!(msg.body, "hi"),
            other => panic!("expected message, got {other:?}"),
        }

        // A raw binary chunk without the delimiter is a frame
        assert!(local.send(&[0u8, 1, 2, 255]).await);
        match incoming.next().await.unwrap().unwrap() {
            InboundPayload::Frame(frame) => assert_eq!(frame.bytes_valid, 4),
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_peer_close_fails_within_one_read() {
        let (local, remote) = session_pair();
        let mut messages = remote.messages(CancellationToken::new());

        local.shutdown().await;
        drop(local);

        match messages.next().await.unwrap() {
            Err(LinkError::TransferFailed(_)) => {}
            other => panic!("expected transfer failure, got {other:?}"),
        }
        assert!(messages.next().await.is_none());
    }

    #[tokio::test]
    async fn test_closed_session_yields_nothing() {
        let (_local, remote) = session_pair();
        remote.shutdown().await;

        let mut messages = remote.messages(CancellationToken::new());
        assert!(messages.next().await.is_none());
    }

    #[tokio::test]
    async fn test_cancellation_stops_read_loop() {
        let (local, remote) = session_pair();
        let cancel = CancellationToken::new();
        let mut messages = remote.messages(cancel.clone());

        cancel.cancel();
        assert!(messages.next().await.is_none());

        // Cancellation must not close the socket: the session still reads
        let mut fresh = remote.messages(CancellationToken::new());
        assert!(local.send(b"a#b").await);
        assert_eq!(fresh.next().await.unwrap().unwrap().body, "b");
    }

    #[tokio::test]
    async fn test_send_reports_failure_as_false() {
        let (local, remote) = session_pair();
        remote.shutdown().await;
        drop(remote);

        // Give the duplex a chance to observe the drop; large writes fail
        let payload = vec![b'x'; 8192];
        assert!(!local.send(&payload).await);
    }

    #[tokio::test]
    async fn test_frames_use_configured_assembly() {
        let (a, b) = tokio::io::duplex(4096);
        let mut config = LinkConfig::default();
        config.frame_assembly = FrameAssembly::CopyPayload;
        let local = TransferSession::new(Box::new(a), &config);
        let remote = TransferSession::new(Box::new(b), &config);

        let mut frames = remote.frames(CancellationToken::new());
        assert!(local.send(&[9u8, 8, 7]).await);

        let frame = frames.next().await.unwrap().unwrap();
        assert_eq!(frame.bytes_valid, 3);
        assert_eq!(&frame.buffer[..3], &[9, 8, 7]);
        assert_eq!(frame.capacity, 1024);
    }
}
