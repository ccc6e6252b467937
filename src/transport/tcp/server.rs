//! Provisioning TCP server implementation

use std::{
    convert::Infallible,
    net::{Ipv4Addr, SocketAddr},
};

use listenfd::ListenFd;
use tokio::net::{TcpListener, TcpSocket};
use tracing::{error, info};

use crate::{
    config::Settings,
    core::{
        error::{TransportError, TransportResult},
        events::EventSender,
    },
    transport::tcp::connection::{ConnectionCloser, ReadPolicy},
};

/// Listen backlog for the provisioning socket
pub const LISTEN_BACKLOG: u32 = 3;

/// Single-client provisioning server
pub struct ProvisioningServer {
    listener: TcpListener,
    events: EventSender,
    closer: ConnectionCloser,
    policy: ReadPolicy,
}

impl ProvisioningServer {
    /// Bind and listen on the configured port
    ///
    /// An inherited socket (systemd socket activation) takes precedence.
    pub async fn bind(
        settings: &Settings,
        events: EventSender,
        closer: ConnectionCloser,
    ) -> TransportResult<Self> {
        let listener = match Self::inherited_listener()? {
            Some(listener) => {
                info!("Using inherited listening socket");
                listener
            }
            None => Self::listen(SocketAddr::from((Ipv4Addr::UNSPECIFIED, settings.port)))?,
        };

        info!(
            "Provisioning server listening on {}",
            listener.local_addr()?
        );

        Ok(Self {
            listener,
            events,
            closer,
            policy: ReadPolicy::from(settings),
        })
    }

    fn inherited_listener() -> TransportResult<Option<TcpListener>> {
        let mut listenfd = ListenFd::from_env();
        let Some(listener) = listenfd.take_tcp_listener(0)? else {
            return Ok(None);
        };
        listener.set_nonblocking(true)?;
        Ok(Some(TcpListener::from_std(listener)?))
    }

    fn listen(addr: SocketAddr) -> TransportResult<TcpListener> {
        let socket = TcpSocket::new_v4().map_err(|source| TransportError::BindFailed {
            addr,
            source,
        })?;
        socket
            .set_reuseaddr(true)
            .map_err(|source| TransportError::BindFailed { addr, source })?;
        socket
            .bind(addr)
            .map_err(|source| TransportError::BindFailed { addr, source })?;
        socket
            .listen(LISTEN_BACKLOG)
            .map_err(|source| TransportError::ListenFailed { addr, source })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and serve connections one at a time
    ///
    /// Only returns on an accept failure.
    pub async fn run(self) -> TransportResult<Infallible> {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Unable to accept connection: {}", e);
                    return Err(TransportError::AcceptFailed(e));
                }
            };
            info!("Provisioning client connected from {}", peer);

            let handle = self.closer.open(stream, Some(peer)).await;
            handle.serve(&self.events, &self.policy).await;
        }
    }
}
