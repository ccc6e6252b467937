//! Events consumed by the connectivity service
//!
//! Lifecycle notifications from the radio backend, parsed credentials from
//! the provisioning server and retry timers all travel through one ordered
//! queue. A single consumer drains it, so no two transitions interleave.

use std::net::Ipv4Addr;

use tokio::sync::mpsc;

use crate::core::{
    error::{ServiceError, ServiceResult},
    types::{CredentialRecord, PeerId},
};

/// Default depth of the event queue
pub const EVENT_QUEUE_DEPTH: usize = 64;

/// Connectivity lifecycle notification from the radio driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Station interface started
    StationStarted,
    /// Associated with the upstream network, no address yet
    LinkEstablished,
    /// Upstream network assigned an address
    AddressAcquired(Ipv4Addr),
    /// Upstream link dropped or could not be established
    LinkLost,
    /// A station associated with our access point
    PeerJoinedAp(PeerId),
    /// A station left our access point
    PeerLeftAp(PeerId),
}

/// Event queued for the connectivity service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Lifecycle(LifecycleEvent),
    JoinRequested(CredentialRecord),
    /// Retry timer fired for the join attempt of the given generation
    RetryDue { generation: u64 },
    /// The radio driver rejected the join command of the given generation
    JoinFailed { generation: u64 },
}

impl From<LifecycleEvent> for Event {
    fn from(event: LifecycleEvent) -> Self {
        Event::Lifecycle(event)
    }
}

/// Producer side of the event queue
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
}

/// Consumer side of the event queue
pub type EventReceiver = mpsc::Receiver<Event>;

/// Create the event queue
pub fn channel(depth: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(depth);
    (EventSender { tx }, rx)
}

impl EventSender {
    /// Enqueue an event, waiting for queue capacity
    pub async fn send(&self, event: impl Into<Event>) -> ServiceResult<()> {
        self.tx
            .send(event.into())
            .await
            .map_err(|_| ServiceError::QueueClosed)
    }

    /// Enqueue a parsed credential record as a join request
    pub async fn request_join(&self, record: CredentialRecord) -> ServiceResult<()> {
        self.send(Event::JoinRequested(record)).await
    }
}
