//! Runtime settings

use std::time::Duration;

use crate::{
    config::CliArgs,
    core::{
        connectivity::DEFAULT_MAX_RETRIES,
        types::{AccessPointConfig, AuthMode, Secret},
    },
};

/// Runtime configuration settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub interface: String,
    pub ap_interface: String,
    pub ap_ssid: String,
    pub ap_password: Secret,
    pub ap_max_clients: u8,
    pub ap_auth_mode: AuthMode,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub port: u16,
    pub accept_delay: Duration,
    pub read_retry_backoff: Duration,
    pub read_retry_limit: Option<u32>,
    pub server_restart_delay: Duration,
    pub status_socket: Option<String>,
}

impl Settings {
    /// Access point configuration derived from these settings
    pub fn access_point_config(&self) -> AccessPointConfig {
        AccessPointConfig {
            ssid: self.ap_ssid.clone(),
            password: self.ap_password.clone(),
            max_clients: self.ap_max_clients,
            auth_mode: self.ap_auth_mode,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            interface: "wlan0".to_string(),
            ap_interface: "ap0".to_string(),
            ap_ssid: "myESP".to_string(),
            ap_password: Secret::new("password"),
            ap_max_clients: 2,
            ap_auth_mode: AuthMode::WpaWpa2Psk,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::ZERO,
            port: 80,
            accept_delay: Duration::from_millis(500),
            read_retry_backoff: Duration::from_millis(100),
            read_retry_limit: None,
            server_restart_delay: Duration::from_secs(1),
            status_socket: None,
        }
    }
}

impl From<CliArgs> for Settings {
    fn from(args: CliArgs) -> Self {
        Settings {
            interface: args.interface,
            ap_interface: args.ap_interface,
            ap_ssid: args.ap_ssid,
            ap_password: Secret::new(args.ap_password),
            ap_max_clients: args.ap_max_clients,
            ap_auth_mode: args.ap_auth_mode,
            max_retries: args.max_retries,
            retry_delay: Duration::from_millis(args.retry_delay_ms),
            port: args.port,
            accept_delay: Duration::from_millis(args.accept_delay_ms),
            read_retry_backoff: Duration::from_millis(args.read_retry_backoff_ms),
            read_retry_limit: args.read_retry_limit,
            server_restart_delay: Duration::from_millis(args.server_restart_delay_ms),
            status_socket: args.status_socket,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_defaults_match_default_settings() {
        let from_cli = Settings::from(CliArgs::parse_from(["softap-provisioner"]));
        let defaults = Settings::default();

        assert_eq!(from_cli.access_point_config(), defaults.access_point_config());
        assert_eq!(from_cli.max_retries, defaults.max_retries);
        assert_eq!(from_cli.retry_delay, defaults.retry_delay);
        assert_eq!(from_cli.port, defaults.port);
        assert_eq!(from_cli.accept_delay, defaults.accept_delay);
        assert_eq!(from_cli.read_retry_backoff, defaults.read_retry_backoff);
        assert_eq!(from_cli.read_retry_limit, defaults.read_retry_limit);
        assert_eq!(from_cli.server_restart_delay, defaults.server_restart_delay);
    }

    #[test]
    fn test_durations_from_milliseconds() {
        let settings = Settings::from(CliArgs::parse_from([
            "softap-provisioner",
            "--retry-delay-ms",
            "250",
            "--server-restart-delay-ms",
            "2000",
        ]));

        assert_eq!(settings.retry_delay, Duration::from_millis(250));
        assert_eq!(settings.server_restart_delay, Duration::from_secs(2));
    }
}
