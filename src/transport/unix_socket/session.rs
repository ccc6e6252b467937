//! Status socket session management

use tokio::{io::AsyncWriteExt, net::UnixStream};

use crate::{
    core::types::ConnectionId,
    protocol::{JsonRpcNotification, Notification},
};

/// Status socket client session
#[derive(Debug)]
pub struct StatusSession {
    id: ConnectionId,
    stream: UnixStream,
}

impl StatusSession {
    /// Create a new status socket session
    pub fn new(stream: UnixStream) -> Self {
        Self {
            id: ConnectionId::new(),
            stream,
        }
    }

    /// Get session ID
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Send a notification as one JSON-RPC line
    pub async fn send_notification(&mut self, notification: Notification) -> std::io::Result<()> {
        let json = serde_json::to_string(&JsonRpcNotification::new(notification))
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        self.stream.write_all(json.as_bytes()).await?;
        self.stream.write_all(b"\n").await?;
        self.stream.flush().await?;

        Ok(())
    }
}
