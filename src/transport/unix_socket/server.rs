//! Status socket server implementation
//!
//! Streams connectivity notifications to local observers, one JSON-RPC
//! notification per line.

use std::path::Path;
use tokio::{
    fs,
    net::{UnixListener, UnixStream},
    sync::{broadcast, watch},
};
use tracing::{error, info, warn};

use crate::{
    core::types::ConnectivityStatus, protocol::Notification,
    transport::unix_socket::session::StatusSession,
};

/// Status socket server
pub struct StatusSocketServer {
    socket_path: String,
    notifications: broadcast::Sender<Notification>,
    status: watch::Receiver<ConnectivityStatus>,
}

impl StatusSocketServer {
    /// Create a new status socket server
    pub fn new(
        socket_path: String,
        notifications: broadcast::Sender<Notification>,
        status: watch::Receiver<ConnectivityStatus>,
    ) -> Self {
        Self {
            socket_path,
            notifications,
            status,
        }
    }

    /// Start the server
    pub async fn start(&self) -> std::io::Result<()> {
        // Remove existing socket file if it exists
        if Path::new(&self.socket_path).exists() {
            fs::remove_file(&self.socket_path).await?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("Status socket listening on {}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    // Subscribe before reading the snapshot so no change is missed
                    let notifications = self.notifications.subscribe();
                    let current = self.status.borrow().clone();
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_client(stream, current, notifications).await
                        {
                            error!("Error handling status client: {}", e);
                        }
                    });
                }
                Err(e) => {
                    warn!("Error accepting status connection: {}", e);
                }
            }
        }
    }

    async fn handle_client(
        stream: UnixStream,
        current: ConnectivityStatus,
        mut notifications: broadcast::Receiver<Notification>,
    ) -> std::io::Result<()> {
        let mut session = StatusSession::new(stream);
        info!("Status client connected: {}", session.id());

        session
            .send_notification(Notification::StateChanged(current))
            .await?;

        loop {
            match notifications.recv().await {
                Ok(notification) => {
                    if let Err(e) = session.send_notification(notification).await {
                        info!("Status client disconnected: {} ({})", session.id(), e);
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "Status client {} lagged, {} notifications dropped",
                        session.id(),
                        skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Notification channel closed");
                    break;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{core::types::ConnectivityState, protocol::JsonRpcNotification};
    use tempfile::tempdir;
    use tokio::io::{AsyncBufReadExt, BufReader};

    async fn next_notification(
        lines: &mut tokio::io::Lines<BufReader<UnixStream>>,
    ) -> Notification {
        let line = tokio::time::timeout(std::time::Duration::from_secs(1), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        serde_json::from_str::<JsonRpcNotification>(&line)
            .unwrap()
            .notification
    }

    #[tokio::test]
    async fn test_client_receives_snapshot_and_updates() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("status.sock");

        let (notifications, _) = broadcast::channel(16);
        let (status_tx, status_rx) = watch::channel(ConnectivityStatus::ap_only());

        let server = StatusSocketServer::new(
            socket_path.to_str().unwrap().to_string(),
            notifications.clone(),
            status_rx,
        );

        // Start server in background
        tokio::spawn(async move {
            server.start().await.ok();
        });

        // Wait for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        let joining = ConnectivityStatus {
            state: ConnectivityState::JoiningUpstream,
            ssid: Some("home".to_string()),
            ip_address: None,
            retry_count: 0,
        };
        status_tx.send(joining.clone()).unwrap();

        let client = UnixStream::connect(&socket_path).await.unwrap();
        let mut lines = BufReader::new(client).lines();

        assert_eq!(
            next_notification(&mut lines).await,
            Notification::StateChanged(joining)
        );

        // Give the session time to subscribe
        tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
        notifications
            .send(Notification::retries_exhausted("home", 10))
            .unwrap();

        assert_eq!(
            next_notification(&mut lines).await,
            Notification::retries_exhausted("home", 10)
        );
    }

    #[tokio::test]
    async fn test_stale_socket_file_is_replaced() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("status.sock");
        std::fs::write(&socket_path, b"stale").unwrap();

        let (notifications, _) = broadcast::channel(16);
        let (_status_tx, status_rx) = watch::channel(ConnectivityStatus::ap_only());
        let server = StatusSocketServer::new(
            socket_path.to_str().unwrap().to_string(),
            notifications,
            status_rx,
        );

        tokio::spawn(async move {
            server.start().await.ok();
        });
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        let client = UnixStream::connect(&socket_path).await.unwrap();
        let mut lines = BufReader::new(client).lines();
        assert_eq!(
            next_notification(&mut lines).await,
            Notification::StateChanged(ConnectivityStatus::ap_only())
        );
    }
}
