//! Connectivity service
//!
//! Single consumer of the event queue. Feeds each event to the state machine
//! and carries out the resulting actions before taking the next one.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::{
    backend::RadioBackend,
    core::{
        connectivity::{Action, ConnectivityStateMachine, RadioCommand},
        error::{ServiceError, ServiceResult},
        events::{Event, EventReceiver, EventSender},
        types::{AccessPointConfig, ConnectivityStatus},
    },
    protocol::Notification,
    transport::tcp::ConnectionCloser,
};

/// Capacity of the notification broadcast channel
pub const NOTIFICATION_CHANNEL_CAPACITY: usize = 32;

/// Connectivity service driving the radio backend
pub struct ConnectivityService<B: RadioBackend> {
    backend: Arc<B>,
    state_machine: ConnectivityStateMachine,
    ap_config: AccessPointConfig,
    events: EventSender,
    receiver: EventReceiver,
    closer: ConnectionCloser,
    notifications: broadcast::Sender<Notification>,
    status: watch::Sender<ConnectivityStatus>,
}

impl<B: RadioBackend> ConnectivityService<B> {
    /// Create a new connectivity service
    ///
    /// `events` must be the producer side of `receiver`; retry timers enqueue
    /// through it.
    pub fn new(
        backend: Arc<B>,
        state_machine: ConnectivityStateMachine,
        ap_config: AccessPointConfig,
        (events, receiver): (EventSender, EventReceiver),
        closer: ConnectionCloser,
        notifications: broadcast::Sender<Notification>,
    ) -> Self {
        let (status, _) = watch::channel(state_machine.status());
        Self {
            backend,
            state_machine,
            ap_config,
            events,
            receiver,
            closer,
            notifications,
            status,
        }
    }

    /// Observe the current connectivity status
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectivityStatus> {
        self.status.subscribe()
    }

    /// Start the access point, then process events until the queue closes
    pub async fn run(mut self) -> ServiceResult<()> {
        let actions = self.state_machine.start_access_point(self.ap_config.clone());
        self.execute(actions).await;
        self.publish_status();

        while let Some(event) = self.receiver.recv().await {
            debug!(?event, "Processing event");
            let actions = self.state_machine.handle(event);
            self.execute(actions).await;
            self.publish_status();
        }

        info!("Event queue closed, stopping connectivity service");
        Err(ServiceError::QueueClosed)
    }

    async fn execute(&self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Command(command) => self.dispatch(command).await,
                Action::CloseActiveConnection => {
                    match self.closer.close_active_connection().await {
                        Some(id) => info!("Closed provisioning connection {}", id),
                        None => debug!("No provisioning connection to close"),
                    }
                }
                Action::ScheduleRetry { generation, delay } => {
                    let events = self.events.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if events.send(Event::RetryDue { generation }).await.is_err() {
                            debug!(generation, "Event queue closed before retry was due");
                        }
                    });
                }
                Action::Notify(notification) => {
                    // No subscribers is not an error
                    let _ = self.notifications.send(notification);
                }
            }
        }
    }

    async fn dispatch(&self, command: RadioCommand) {
        match command {
            RadioCommand::StartAccessPoint(config) => {
                if let Err(e) = self.backend.start_access_point(&config).await {
                    error!("Failed to start access point: {}", e);
                }
            }
            RadioCommand::StartJoinUpstream { ssid, password } => {
                if let Err(e) = self.backend.start_join_upstream(&ssid, &password).await {
                    warn!("Failed to start joining {}: {}", ssid, e);
                    // Tagged so a later join does not pay for this failure
                    let generation = self.state_machine.generation();
                    let events = self.events.clone();
                    // Enqueued from a task; the consumer must not wait on its own queue
                    tokio::spawn(async move {
                        if events.send(Event::JoinFailed { generation }).await.is_err() {
                            debug!(generation, "Event queue closed before join failure was queued");
                        }
                    });
                }
            }
            RadioCommand::StopJoinUpstream => {
                if let Err(e) = self.backend.stop_join_upstream().await {
                    error!("Failed to stop upstream join: {}", e);
                }
            }
        }
    }

    fn publish_status(&self) {
        let status = self.state_machine.status();
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}
