//! wifi-ctrl backend implementation
//!
//! Station mode is driven through wpa_supplicant's control socket via
//! `wifi-ctrl`; the access point is driven through `hostapd_cli`.

use std::{collections::BTreeSet, net::Ipv4Addr, sync::Arc, time::Duration};

use tokio::{
    process::Command,
    sync::{Mutex, broadcast},
};
use tracing::{debug, error, info, warn};
use wifi_ctrl::sta::{Broadcast, BroadcastReceiver, RequestClient, WifiSetup};

use crate::{
    backend::{RadioBackend, radio_backend::LIFECYCLE_CHANNEL_CAPACITY},
    core::{
        error::{RadioError, RadioResult},
        events::LifecycleEvent,
        types::{AccessPointConfig, AuthMode, PeerId, Secret},
    },
};

const IP_POLL_INTERVAL: Duration = Duration::from_millis(200);
const IP_POLL_RETRIES: usize = 30; // 30 * 200ms = 6 seconds
const AP_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Supplicant gave up on the network for now (any reason)
const SSID_TEMP_DISABLED: &str = "CTRL-EVENT-SSID-TEMP-DISABLED";

pub struct WifiCtrlBackend {
    ap_interface: String,
    client: RequestClient,
    link: Arc<Mutex<LinkTracker>>,
    events: broadcast::Sender<LifecycleEvent>,
}

impl WifiCtrlBackend {
    pub async fn new(interface: String, ap_interface: String) -> RadioResult<Self> {
        let path = format!("/var/run/wpa_supplicant/{}", interface);
        let mut setup =
            WifiSetup::new().map_err(|e| RadioError::WpaSupplicantError(e.to_string()))?;
        setup.set_socket_path(path);

        let client = setup.get_request_client();
        let broadcast_receiver = setup.get_broadcast_receiver();
        let station = setup.complete();

        // Spawn the station runtime
        tokio::spawn(async move {
            if let Err(e) = station.run().await {
                error!("WifiStation runtime error: {}", e);
            }
        });

        let (events, _) = broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY);
        let link = Arc::new(Mutex::new(LinkTracker::default()));

        tokio::spawn(Self::forward_station_events(
            broadcast_receiver,
            interface,
            link.clone(),
            events.clone(),
        ));
        tokio::spawn(Self::watch_ap_stations(ap_interface.clone(), events.clone()));

        Ok(Self {
            ap_interface,
            client,
            link,
            events,
        })
    }

    /// Translate wpa_supplicant broadcasts into lifecycle events
    async fn forward_station_events(
        mut receiver: BroadcastReceiver,
        interface: String,
        link: Arc<Mutex<LinkTracker>>,
        events: broadcast::Sender<LifecycleEvent>,
    ) {
        loop {
            let broadcast = match receiver.recv().await {
                Ok(broadcast) => broadcast,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("wpa_supplicant broadcast receiver lagged by {}", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    error!("wpa_supplicant broadcast channel closed");
                    break;
                }
            };

            let update = link.lock().await.on_broadcast(&broadcast);
            match update {
                StationUpdate::Associated { epoch } => {
                    let _ = events.send(LifecycleEvent::LinkEstablished);
                    // Polled off the receive loop so later broadcasts are not held up
                    tokio::spawn(Self::report_address(
                        interface.clone(),
                        epoch,
                        link.clone(),
                        events.clone(),
                    ));
                }
                StationUpdate::Lost => {
                    warn!("Upstream link lost: {:?}", broadcast);
                    let _ = events.send(LifecycleEvent::LinkLost);
                }
                StationUpdate::Ignored => {
                    debug!("Ignoring wpa_supplicant event: {:?}", broadcast);
                }
            }
        }
    }

    async fn report_address(
        interface: String,
        epoch: u64,
        link: Arc<Mutex<LinkTracker>>,
        events: broadcast::Sender<LifecycleEvent>,
    ) {
        let address = Self::wait_for_ipv4(&interface).await;
        if address.is_none() {
            warn!("Associated on {} but no IPv4 address assigned", interface);
        }

        match link.lock().await.address_result(epoch, address) {
            Some(event) => {
                let _ = events.send(event);
            }
            None => debug!("Discarding address result of a torn down link"),
        }
    }

    /// Poll `list_sta` and report peer join/leave events
    async fn watch_ap_stations(ap_interface: String, events: broadcast::Sender<LifecycleEvent>) {
        let mut known = BTreeSet::new();
        let mut ticker = tokio::time::interval(AP_POLL_INTERVAL);

        loop {
            ticker.tick().await;

            let output = match hostapd_cli(&ap_interface, &["list_sta"]).await {
                Ok(output) => output,
                Err(e) => {
                    debug!("Cannot list access point stations: {}", e);
                    continue;
                }
            };

            let current = parse_station_list(&output);
            for event in station_changes(&known, &current) {
                let _ = events.send(event);
            }
            known = current;
        }
    }

    async fn wait_for_ipv4(interface: &str) -> Option<Ipv4Addr> {
        for _ in 0..IP_POLL_RETRIES {
            if let Some(ip) = Self::get_ipv4_address(interface).await {
                return Some(ip);
            }
            tokio::time::sleep(IP_POLL_INTERVAL).await;
        }
        None
    }

    /// Get IP address using ip command
    async fn get_ipv4_address(interface: &str) -> Option<Ipv4Addr> {
        let output = Command::new("ip")
            .args(["-4", "addr", "show", interface])
            .output()
            .await
            .ok()?;

        parse_ipv4_address(&String::from_utf8_lossy(&output.stdout))
    }
}

/// What a supplicant broadcast means for the upstream link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StationUpdate {
    /// Associated; the address still has to be polled for this link epoch
    Associated { epoch: u64 },
    /// The current join attempt or link failed
    Lost,
    Ignored,
}

/// Upstream association as seen through supplicant broadcasts
///
/// Only failures of the attempt in progress are reported. Disconnects caused
/// by our own `DISCONNECT`/`REMOVE_NETWORK` are swallowed, and a link already
/// reported lost after an address timeout is not reported again.
#[derive(Debug, Default)]
struct LinkTracker {
    /// Bumped on every teardown; address polls of older epochs are discarded
    epoch: u64,
    associated: bool,
    teardown_pending: bool,
    loss_reported: bool,
}

impl LinkTracker {
    fn on_broadcast(&mut self, broadcast: &Broadcast) -> StationUpdate {
        match broadcast {
            Broadcast::Connected => {
                self.associated = true;
                self.teardown_pending = false;
                self.loss_reported = false;
                StationUpdate::Associated { epoch: self.epoch }
            }
            Broadcast::Disconnected => {
                let was_associated = std::mem::take(&mut self.associated);
                let teardown = std::mem::take(&mut self.teardown_pending);
                let reported = std::mem::take(&mut self.loss_reported);
                // Failed handshakes also disconnect; those surface as WrongPsk
                // or a temporarily disabled network instead
                if was_associated && !teardown && !reported {
                    StationUpdate::Lost
                } else {
                    StationUpdate::Ignored
                }
            }
            Broadcast::WrongPsk | Broadcast::NetworkNotFound => StationUpdate::Lost,
            Broadcast::Unknown(event) if event.contains(SSID_TEMP_DISABLED) => {
                StationUpdate::Lost
            }
            _ => StationUpdate::Ignored,
        }
    }

    /// Our own command is about to drop the current link
    fn teardown(&mut self) {
        self.epoch += 1;
        if self.associated {
            self.teardown_pending = true;
        }
    }

    /// Result of the address poll started for `epoch`
    fn address_result(
        &mut self,
        epoch: u64,
        address: Option<Ipv4Addr>,
    ) -> Option<LifecycleEvent> {
        if epoch != self.epoch || !self.associated {
            return None;
        }

        match address {
            Some(ip) => Some(LifecycleEvent::AddressAcquired(ip)),
            None => {
                self.loss_reported = true;
                Some(LifecycleEvent::LinkLost)
            }
        }
    }
}

impl RadioBackend for WifiCtrlBackend {
    async fn start_access_point(&self, config: &AccessPointConfig) -> RadioResult<()> {
        debug!("Configuring access point on {}", self.ap_interface);

        for (key, value) in access_point_settings(config) {
            hostapd_cli(&self.ap_interface, &["set", key, value.as_str()])
                .await
                .map_err(|e| RadioError::HostapdError(format!("Failed to set {}: {}", key, e)))?;
        }

        // disable/enable applies the runtime configuration, reload would re-read the file
        hostapd_cli(&self.ap_interface, &["disable"]).await?;
        hostapd_cli(&self.ap_interface, &["enable"]).await?;

        info!("Access point {} enabled", config.ssid);
        Ok(())
    }

    async fn start_join_upstream(&self, ssid: &str, password: &Secret) -> RadioResult<()> {
        debug!("Joining upstream network: {}", ssid);

        self.link.lock().await.teardown();
        self.client
            .send_custom("REMOVE_NETWORK all".to_string())
            .await
            .map_err(|e| {
                RadioError::WpaSupplicantError(format!("Failed to remove networks: {}", e))
            })?;

        let network_id =
            self.client.add_network().await.map_err(|e| {
                RadioError::WpaSupplicantError(format!("Failed to add network: {}", e))
            })?;

        // Set SSID (wifi-ctrl handles quoting internally via conf_escape)
        self.client
            .set_network_ssid(network_id, ssid.to_string())
            .await
            .map_err(|e| RadioError::WpaSupplicantError(format!("Failed to set SSID: {}", e)))?;

        // Passphrases are sent quoted, wpa_supplicant derives the PSK
        self.client
            .send_custom(format!(
                "SET_NETWORK {} psk \"{}\"",
                network_id,
                password.expose()
            ))
            .await
            .map_err(|e| RadioError::WpaSupplicantError(format!("Failed to set PSK: {}", e)))?;

        // Select network (enables it and selects it)
        self.client.select_network(network_id).await.map_err(|e| {
            RadioError::WpaSupplicantError(format!("Failed to select network: {}", e))
        })?;

        let _ = self.events.send(LifecycleEvent::StationStarted);
        debug!("Upstream join initiated");
        Ok(())
    }

    async fn stop_join_upstream(&self) -> RadioResult<()> {
        debug!("Disconnecting from upstream network");

        self.link.lock().await.teardown();
        self.client
            .send_custom("DISCONNECT".to_string())
            .await
            .map_err(|e| RadioError::WpaSupplicantError(format!("Failed to disconnect: {}", e)))?;

        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }
}

/// Run a hostapd_cli command against the access point interface
async fn hostapd_cli(interface: &str, args: &[&str]) -> RadioResult<String> {
    let output = Command::new("hostapd_cli")
        .arg("-i")
        .arg(interface)
        .args(args)
        .output()
        .await
        .map_err(|e| RadioError::HostapdError(format!("Failed to run hostapd_cli: {}", e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.status.success() || stdout.trim() == "FAIL" {
        return Err(RadioError::HostapdError(format!(
            "hostapd_cli {} failed: {}",
            args.first().copied().unwrap_or_default(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(stdout)
}

/// hostapd runtime settings for the access point configuration
fn access_point_settings(config: &AccessPointConfig) -> Vec<(&'static str, String)> {
    let mut settings = vec![
        ("ssid", config.ssid.clone()),
        ("max_num_sta", config.max_clients.to_string()),
    ];

    match config.auth_mode {
        AuthMode::Open => {
            settings.push(("wpa", "0".to_string()));
        }
        AuthMode::Wpa2Psk | AuthMode::WpaWpa2Psk => {
            let wpa = if config.auth_mode == AuthMode::Wpa2Psk {
                "2"
            } else {
                "3"
            };
            settings.push(("wpa", wpa.to_string()));
            settings.push(("wpa_key_mgmt", "WPA-PSK".to_string()));
            settings.push(("rsn_pairwise", "CCMP".to_string()));
            settings.push(("wpa_passphrase", config.password.expose().to_string()));
        }
    }

    settings
}

/// Parse `hostapd_cli list_sta` output (one MAC per line)
fn parse_station_list(output: &str) -> BTreeSet<PeerId> {
    output
        .lines()
        .filter_map(|line| line.trim().parse::<PeerId>().ok())
        .collect()
}

/// Peer join/leave events between two `list_sta` snapshots
fn station_changes(known: &BTreeSet<PeerId>, current: &BTreeSet<PeerId>) -> Vec<LifecycleEvent> {
    current
        .difference(known)
        .map(|peer| LifecycleEvent::PeerJoinedAp(*peer))
        .chain(
            known
                .difference(current)
                .map(|peer| LifecycleEvent::PeerLeftAp(*peer)),
        )
        .collect()
}

/// Parse the first IPv4 address from `ip -4 addr show` output
fn parse_ipv4_address(output: &str) -> Option<Ipv4Addr> {
    output.lines().find_map(|line| {
        let address = line.trim().strip_prefix("inet ")?;
        address.split('/').next()?.trim().parse().ok()
    })
}
