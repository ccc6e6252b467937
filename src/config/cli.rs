//! Command-line argument parsing

use clap::Parser;

use crate::core::types::AuthMode;

#[derive(Parser, Debug, Clone)]
#[clap(name = "softap-provisioner", version, author)]
#[clap(about = "Provision upstream WiFi credentials through a soft access point")]
pub struct CliArgs {
    /// Station interface used to join the upstream network
    #[clap(short, long, default_value = "wlan0")]
    pub interface: String,

    /// Interface hostapd runs the access point on
    #[clap(long, default_value = "ap0")]
    pub ap_interface: String,

    /// SSID broadcast by the access point
    #[clap(long, default_value = "myESP")]
    pub ap_ssid: String,

    /// Access point passphrase
    #[clap(long, default_value = "password")]
    pub ap_password: String,

    /// Maximum stations allowed on the access point
    #[clap(long, default_value = "2")]
    pub ap_max_clients: u8,

    /// Access point authentication mode
    #[clap(long, value_enum, default_value = "wpa-wpa2-psk")]
    pub ap_auth_mode: AuthMode,

    /// Upstream reconnect attempts before falling back to access point only
    #[clap(long, default_value = "10")]
    pub max_retries: u32,

    /// Delay before each upstream reconnect attempt (milliseconds)
    #[clap(long, default_value = "0")]
    pub retry_delay_ms: u64,

    /// Provisioning TCP port
    #[clap(short, long, default_value = "80")]
    pub port: u16,

    /// Settle time between accepting a client and the first read (milliseconds)
    #[clap(long, default_value = "500")]
    pub accept_delay_ms: u64,

    /// Wait before reading again after a read error (milliseconds)
    #[clap(long, default_value = "100")]
    pub read_retry_backoff_ms: u64,

    /// Consecutive read errors tolerated per connection (unbounded if unset)
    #[clap(long)]
    pub read_retry_limit: Option<u32>,

    /// Wait before rebinding the provisioning server after an accept failure (milliseconds)
    #[clap(long, default_value = "1000")]
    pub server_restart_delay_ms: u64,

    /// Path of a Unix socket streaming connectivity notifications
    #[clap(long)]
    pub status_socket: Option<String>,
}
