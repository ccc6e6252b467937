//! Provisioning connection handling
//!
//! A [`ConnectionHandle`] owns one accepted stream and runs its receive
//! loop. The [`ConnectionCloser`] lets the connectivity service tear that
//! stream down from another task, even while the loop is blocked in a read.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::{Mutex, oneshot},
};
use tracing::{debug, info, warn};

use crate::{
    config::Settings,
    core::{error::TransportError, events::EventSender, types::ConnectionId},
    protocol::CredentialCodec,
};

/// Receive buffer size: 127 payload bytes plus a terminator
pub const RECEIVE_BUFFER_SIZE: usize = 128;

/// Largest record accepted by a single read; longer records are truncated
pub const MAX_RECORD_LEN: usize = RECEIVE_BUFFER_SIZE - 1;

/// Receive loop timing and read-error policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPolicy {
    /// Settle time between accept and the first read
    pub accept_delay: Duration,
    /// Wait before reading again after a read error
    pub retry_backoff: Duration,
    /// Consecutive read errors tolerated before closing; `None` retries forever
    pub retry_limit: Option<u32>,
}

impl From<&Settings> for ReadPolicy {
    fn from(settings: &Settings) -> Self {
        Self {
            accept_delay: settings.accept_delay,
            retry_backoff: settings.read_retry_backoff,
            retry_limit: settings.read_retry_limit,
        }
    }
}

/// Why a receive loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// Peer closed the stream (zero-length read)
    PeerClosed,
    /// Closed out-of-band through [`ConnectionCloser`]
    ClosedByServer,
    /// Too many consecutive read errors
    ReadRetriesExhausted,
    /// Connectivity service is gone
    QueueClosed,
}

#[derive(Debug)]
struct ActiveConnection {
    id: ConnectionId,
    shutdown: oneshot::Sender<()>,
}

/// Shared slot tracking the single active provisioning connection
#[derive(Debug, Clone, Default)]
pub struct ConnectionCloser {
    active: Arc<Mutex<Option<ActiveConnection>>>,
}

impl ConnectionCloser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of an accepted stream and register it as active
    pub async fn open<S>(&self, stream: S, peer: Option<SocketAddr>) -> ConnectionHandle<S> {
        let id = ConnectionId::new();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let previous = self.active.lock().await.replace(ActiveConnection {
            id,
            shutdown: shutdown_tx,
        });
        if let Some(previous) = previous {
            warn!("Replacing active connection {}", previous.id);
            let _ = previous.shutdown.send(());
        }

        ConnectionHandle {
            id,
            peer,
            stream,
            shutdown: shutdown_rx,
            closer: self.clone(),
        }
    }

    /// Close the active connection, if one is open
    ///
    /// Returns the id of the connection that was signalled.
    pub async fn close_active_connection(&self) -> Option<ConnectionId> {
        let active = self.active.lock().await.take()?;
        info!("Shutting down provisioning connection {}", active.id);
        let _ = active.shutdown.send(());
        Some(active.id)
    }

    /// Id of the currently open connection
    pub async fn active(&self) -> Option<ConnectionId> {
        self.active.lock().await.as_ref().map(|active| active.id)
    }

    async fn release(&self, id: ConnectionId) {
        let mut active = self.active.lock().await;
        if active.as_ref().is_some_and(|active| active.id == id) {
            *active = None;
        }
    }
}

/// Ownership token for one accepted provisioning stream
pub struct ConnectionHandle<S> {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    stream: S,
    shutdown: oneshot::Receiver<()>,
    closer: ConnectionCloser,
}

impl<S> ConnectionHandle<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Run the receive loop until the connection ends, then close it
    pub async fn serve(mut self, events: &EventSender, policy: &ReadPolicy) -> ConnectionOutcome {
        let outcome = self.receive(events, policy).await;
        info!(connection = %self.id, ?outcome, "Provisioning connection ended");
        self.close().await;
        outcome
    }

    async fn receive(&mut self, events: &EventSender, policy: &ReadPolicy) -> ConnectionOutcome {
        if !policy.accept_delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(policy.accept_delay) => {}
                _ = &mut self.shutdown => return ConnectionOutcome::ClosedByServer,
            }
        }

        let mut buffer = [0u8; RECEIVE_BUFFER_SIZE];
        let mut consecutive_errors = 0u32;

        loop {
            debug!(connection = %self.id, "Waiting for data");

            let result = tokio::select! {
                result = self.stream.read(&mut buffer[..MAX_RECORD_LEN]) => result,
                _ = &mut self.shutdown => return ConnectionOutcome::ClosedByServer,
            };

            match result {
                Ok(0) => {
                    info!(connection = %self.id, "Connection closed by peer");
                    return ConnectionOutcome::PeerClosed;
                }
                Ok(len) => {
                    consecutive_errors = 0;
                    if !self.handle_record(&buffer[..len], events).await {
                        return ConnectionOutcome::QueueClosed;
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    let err = TransportError::ReadFailed(e);
                    warn!(connection = %self.id, consecutive_errors, "{}", err);

                    if policy
                        .retry_limit
                        .is_some_and(|limit| consecutive_errors > limit)
                    {
                        warn!(connection = %self.id, "Read retry limit exceeded, closing");
                        return ConnectionOutcome::ReadRetriesExhausted;
                    }

                    tokio::select! {
                        _ = tokio::time::sleep(policy.retry_backoff) => {}
                        _ = &mut self.shutdown => return ConnectionOutcome::ClosedByServer,
                    }
                }
            }
        }
    }

    /// Parse one read on its own; partial records are not reassembled
    ///
    /// Returns false once the event queue is closed.
    async fn handle_record(&self, data: &[u8], events: &EventSender) -> bool {
        match self.peer {
            Some(peer) => info!(connection = %self.id, %peer, "Received {} bytes", data.len()),
            None => info!(connection = %self.id, "Received {} bytes", data.len()),
        }
        if data.len() == MAX_RECORD_LEN {
            warn!(
                connection = %self.id,
                "Record filled the receive buffer and may be truncated"
            );
        }

        match CredentialCodec::parse(data) {
            Ok(record) => {
                info!(
                    connection = %self.id,
                    ssid = %record.identifier,
                    password = %record.credential,
                    "Received upstream credentials"
                );
                events.request_join(record).await.is_ok()
            }
            Err(e) => {
                warn!(connection = %self.id, "Ignoring provisioning record: {}", e);
                true
            }
        }
    }

    async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!(connection = %self.id, "Shutdown failed: {}", e);
        }
        self.closer.release(self.id).await;
    }
}
