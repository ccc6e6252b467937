//! Radio backend trait definition

use tokio::sync::broadcast;
use trait_variant::make;

use crate::core::{
    error::RadioResult,
    events::LifecycleEvent,
    types::{AccessPointConfig, Secret},
};

/// Capacity of the lifecycle event broadcast channel
pub const LIFECYCLE_CHANNEL_CAPACITY: usize = 32;

/// Abstraction over the radio driver (typically hostapd + wpa_supplicant)
///
/// Commands return once the driver accepted them. Their outcome is reported
/// asynchronously through the lifecycle event stream.
#[make(Send)]
pub trait RadioBackend: Send + Sync + 'static {
    /// Broadcast as an access point
    async fn start_access_point(&self, config: &AccessPointConfig) -> RadioResult<()>;

    /// Start joining the upstream network as a station
    async fn start_join_upstream(&self, ssid: &str, password: &Secret) -> RadioResult<()>;

    /// Abort any upstream join or connection
    async fn stop_join_upstream(&self) -> RadioResult<()>;

    /// Subscribe to connectivity lifecycle notifications
    fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent>;
}
