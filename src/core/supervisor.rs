//! Service supervisor
//!
//! Wires the radio backend, connectivity service, provisioning server and
//! optional status socket together, and keeps the provisioning server alive.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    backend::RadioBackend,
    config::Settings,
    core::{
        connectivity::ConnectivityStateMachine,
        error::{ServiceError, ServiceResult},
        events::{self, EVENT_QUEUE_DEPTH, EventSender, LifecycleEvent},
        service::{ConnectivityService, NOTIFICATION_CHANNEL_CAPACITY},
    },
    transport::{
        tcp::{ConnectionCloser, ProvisioningServer},
        unix_socket::StatusSocketServer,
    },
};

/// Top-level runner owning all long-lived tasks
pub struct Supervisor<B: RadioBackend> {
    backend: Arc<B>,
    settings: Settings,
}

impl<B: RadioBackend> Supervisor<B> {
    pub fn new(backend: Arc<B>, settings: Settings) -> Self {
        Self { backend, settings }
    }

    /// Run until the provisioning server fails fatally or the service stops
    pub async fn run(self) -> ServiceResult<()> {
        let (events, receiver) = events::channel(EVENT_QUEUE_DEPTH);
        let closer = ConnectionCloser::new();
        let (notifications, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);

        // Subscribe before the service starts so no lifecycle event is missed
        let lifecycle = self.backend.subscribe();
        tokio::spawn(forward_lifecycle_events(lifecycle, events.clone()));

        let service = ConnectivityService::new(
            self.backend.clone(),
            ConnectivityStateMachine::new(self.settings.max_retries, self.settings.retry_delay),
            self.settings.access_point_config(),
            (events.clone(), receiver),
            closer.clone(),
            notifications.clone(),
        );

        if let Some(path) = self.settings.status_socket.clone() {
            info!("Starting status socket on {}", path);
            let server = StatusSocketServer::new(path, notifications, service.subscribe_status());
            tokio::spawn(async move {
                if let Err(e) = server.start().await {
                    error!("Status socket server error: {}", e);
                }
            });
        }

        tokio::select! {
            result = service.run() => result,
            result = self.serve_provisioning(events, closer) => result,
        }
    }

    /// Bind and run the provisioning server, rebinding after accept failures
    async fn serve_provisioning(
        &self,
        events: EventSender,
        closer: ConnectionCloser,
    ) -> ServiceResult<()> {
        let mut notified_ready = false;

        loop {
            let server =
                match ProvisioningServer::bind(&self.settings, events.clone(), closer.clone())
                    .await
                {
                    Ok(server) => server,
                    Err(e) if e.is_fatal() => {
                        error!("Provisioning server cannot start: {}", e);
                        return Err(ServiceError::Transport(e));
                    }
                    Err(e) => {
                        warn!("Provisioning server setup failed: {}", e);
                        tokio::time::sleep(self.settings.server_restart_delay).await;
                        continue;
                    }
                };

            if !notified_ready {
                notify_ready();
                notified_ready = true;
            }

            let Err(e) = server.run().await;
            warn!(
                "Provisioning server stopped: {}, restarting in {:?}",
                e, self.settings.server_restart_delay
            );
            tokio::time::sleep(self.settings.server_restart_delay).await;
        }
    }
}

/// Forward driver lifecycle notifications into the event queue
async fn forward_lifecycle_events(
    mut lifecycle: broadcast::Receiver<LifecycleEvent>,
    events: EventSender,
) {
    loop {
        match lifecycle.recv().await {
            Ok(event) => {
                if events.send(event).await.is_err() {
                    debug!("Event queue closed, stopping lifecycle forwarder");
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Lifecycle forwarder lagged, {} events dropped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => {
                info!("Radio backend closed its lifecycle stream");
                break;
            }
        }
    }
}

#[cfg(feature = "systemd")]
fn notify_ready() {
    if let Err(e) = sd_notify::notify(false, &[sd_notify::NotifyState::Ready]) {
        warn!("Failed to notify systemd: {}", e);
    }
}

#[cfg(not(feature = "systemd"))]
fn notify_ready() {
    debug!("Provisioning server ready");
}
