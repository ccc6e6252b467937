//! Connectivity state machine
//!
//! Governs switching between access-point-only mode, joining the upstream
//! network and being joined. The machine is synchronous and performs no
//! I/O: every transition returns the [`Action`]s the caller has to carry out.

use std::{net::Ipv4Addr, time::Duration};

use tracing::{debug, error, info, warn};

use crate::{
    core::{
        error::ConnectivityError,
        events::{Event, LifecycleEvent},
        types::{
            AccessPointConfig, ConnectivityState, ConnectivityStatus, CredentialRecord, Secret,
        },
    },
    protocol::Notification,
};

/// Default number of reconnect attempts before falling back to AP-only
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Command for the external radio driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCommand {
    StartAccessPoint(AccessPointConfig),
    StartJoinUpstream { ssid: String, password: Secret },
    StopJoinUpstream,
}

/// Side effect requested by a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Command(RadioCommand),
    /// Tear down the active provisioning connection, if any
    CloseActiveConnection,
    /// Deliver `Event::RetryDue { generation }` after `delay`
    ScheduleRetry { generation: u64, delay: Duration },
    Notify(Notification),
}

/// Connectivity state machine
#[derive(Debug)]
pub struct ConnectivityStateMachine {
    state: ConnectivityState,
    retry_count: u32,
    max_retries: u32,
    retry_delay: Duration,
    upstream_ssid: Option<String>,
    upstream_password: Option<Secret>,
    ip_address: Option<Ipv4Addr>,
    generation: u64,
}

impl ConnectivityStateMachine {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            state: ConnectivityState::ApOnly,
            retry_count: 0,
            max_retries,
            retry_delay,
            upstream_ssid: None,
            upstream_password: None,
            ip_address: None,
            generation: 0,
        }
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn has_credentials(&self) -> bool {
        self.upstream_ssid.is_some() && self.upstream_password.is_some()
    }

    pub fn status(&self) -> ConnectivityStatus {
        ConnectivityStatus {
            state: self.state,
            ssid: self.upstream_ssid.clone(),
            ip_address: self.ip_address,
            retry_count: self.retry_count,
        }
    }

    /// (Re)start access point broadcast; aborts any upstream join and forgets
    /// the credentials
    pub fn start_access_point(&mut self, config: AccessPointConfig) -> Vec<Action> {
        info!(
            ssid = %config.ssid,
            max_clients = config.max_clients,
            auth_mode = ?config.auth_mode,
            "Starting access point"
        );

        let mut actions = Vec::new();
        if self.state != ConnectivityState::ApOnly {
            debug!(from = ?self.state, "Aborting upstream join for access point restart");
            actions.push(Action::Command(RadioCommand::StopJoinUpstream));
        }

        self.generation += 1;
        self.retry_count = 0;
        self.upstream_ssid = None;
        self.upstream_password = None;
        self.ip_address = None;

        actions.push(Action::Command(RadioCommand::StartAccessPoint(config)));
        self.transition(ConnectivityState::ApOnly, &mut actions);
        actions
    }

    /// Apply a single event
    pub fn handle(&mut self, event: Event) -> Vec<Action> {
        match event {
            Event::JoinRequested(record) => self.request_join(record),
            Event::Lifecycle(event) => self.on_lifecycle(event),
            Event::RetryDue { generation } => self.on_retry_due(generation),
            Event::JoinFailed { generation } => self.on_join_failed(generation),
        }
    }

    /// Start joining the upstream network, superseding any attempt in flight
    pub fn request_join(&mut self, record: CredentialRecord) -> Vec<Action> {
        let CredentialRecord {
            identifier,
            credential,
        } = record;
        info!(ssid = %identifier, password = %credential, from = ?self.state, "Join requested");

        let mut actions = Vec::new();
        if self.state != ConnectivityState::ApOnly {
            debug!("Superseding in-flight upstream join");
            actions.push(Action::Command(RadioCommand::StopJoinUpstream));
        }

        self.generation += 1;
        self.retry_count = 0;
        self.ip_address = None;
        self.upstream_ssid = Some(identifier.clone());
        self.upstream_password = Some(credential.clone());

        actions.push(Action::Command(RadioCommand::StartJoinUpstream {
            ssid: identifier,
            password: credential,
        }));
        self.transition(ConnectivityState::JoiningUpstream, &mut actions);
        actions
    }

    fn on_lifecycle(&mut self, event: LifecycleEvent) -> Vec<Action> {
        let mut actions = Vec::new();

        match (self.state, event) {
            (_, LifecycleEvent::StationStarted) => {
                debug!("Station interface started");
            }
            (ConnectivityState::JoiningUpstream, LifecycleEvent::LinkEstablished) => {
                info!("Upstream link established, waiting for address");
            }
            (ConnectivityState::JoiningUpstream, LifecycleEvent::AddressAcquired(ip)) => {
                info!(%ip, "Upstream address acquired");
                self.retry_count = 0;
                self.ip_address = Some(ip);
                self.transition(ConnectivityState::Joined, &mut actions);
            }
            (ConnectivityState::JoiningUpstream, LifecycleEvent::LinkLost) => {
                self.attempt_failed(&mut actions);
            }
            (ConnectivityState::Joined, LifecycleEvent::LinkLost) => {
                warn!("Upstream link lost, reconnecting with a fresh retry budget");
                self.retry_count = 0;
                self.ip_address = None;
                self.schedule_retry(&mut actions);
            }
            (_, LifecycleEvent::PeerJoinedAp(peer)) => {
                info!(%peer, "Station joined access point");
            }
            (_, LifecycleEvent::PeerLeftAp(peer)) => {
                info!(%peer, "Station left access point, closing provisioning connection");
                actions.push(Action::CloseActiveConnection);
            }
            (state, event) => {
                debug!(?state, ?event, "Ignoring lifecycle event");
            }
        }

        actions
    }

    fn on_join_failed(&mut self, generation: u64) -> Vec<Action> {
        let mut actions = Vec::new();

        if generation != self.generation || self.state != ConnectivityState::JoiningUpstream {
            debug!(
                generation,
                current = self.generation,
                state = ?self.state,
                "Ignoring failure of a superseded join"
            );
            return actions;
        }

        self.attempt_failed(&mut actions);
        actions
    }

    /// Current join attempt failed: retry while budget remains, else give up
    fn attempt_failed(&mut self, actions: &mut Vec<Action>) {
        if self.retry_count < self.max_retries {
            warn!(
                retry_count = self.retry_count,
                max_retries = self.max_retries,
                "Upstream join failed, retrying"
            );
            self.schedule_retry(actions);
        } else {
            self.give_up(actions);
        }
    }

    fn on_retry_due(&mut self, generation: u64) -> Vec<Action> {
        let mut actions = Vec::new();

        if generation != self.generation || self.state != ConnectivityState::Disconnected {
            debug!(
                generation,
                current = self.generation,
                state = ?self.state,
                "Ignoring stale retry timer"
            );
            return actions;
        }

        let credentials = self
            .upstream_ssid
            .clone()
            .zip(self.upstream_password.clone());
        let Some((ssid, password)) = credentials else {
            warn!("Retry due without stored credentials, staying in access point mode");
            self.transition(ConnectivityState::ApOnly, &mut actions);
            return actions;
        };

        self.retry_count += 1;
        info!(
            ssid = %ssid,
            retry_count = self.retry_count,
            max_retries = self.max_retries,
            "Retrying upstream join"
        );
        actions.push(Action::Command(RadioCommand::StartJoinUpstream { ssid, password }));
        self.transition(ConnectivityState::JoiningUpstream, &mut actions);
        actions
    }

    fn schedule_retry(&mut self, actions: &mut Vec<Action>) {
        self.transition(ConnectivityState::Disconnected, actions);
        actions.push(Action::ScheduleRetry {
            generation: self.generation,
            delay: self.retry_delay,
        });
    }

    fn give_up(&mut self, actions: &mut Vec<Action>) {
        let err = ConnectivityError::RetriesExhausted {
            ssid: self.upstream_ssid.clone().unwrap_or_default(),
            attempts: self.retry_count,
        };
        error!("{err}, falling back to access point only");

        actions.push(Action::Command(RadioCommand::StopJoinUpstream));
        self.ip_address = None;
        self.transition(ConnectivityState::ApOnly, actions);

        let ConnectivityError::RetriesExhausted { ssid, attempts } = err;
        actions.push(Action::Notify(Notification::retries_exhausted(
            ssid, attempts,
        )));
    }

    fn transition(&mut self, to: ConnectivityState, actions: &mut Vec<Action>) {
        if self.state != to {
            debug!(from = ?self.state, ?to, "Connectivity state transition");
        }
        self.state = to;
        actions.push(Action::Notify(Notification::StateChanged(self.status())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AuthMode, PeerId};
    use pretty_assertions::assert_eq;

    fn join(ssid: &str, password: &str) -> Event {
        Event::JoinRequested(CredentialRecord {
            identifier: ssid.to_string(),
            credential: Secret::new(password),
        })
    }

    fn ap_config() -> AccessPointConfig {
        AccessPointConfig {
            ssid: "myESP".to_string(),
            password: Secret::new("password"),
            max_clients: 2,
            auth_mode: AuthMode::WpaWpa2Psk,
        }
    }

    fn commands(actions: &[Action]) -> Vec<RadioCommand> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Command(cmd) => Some(cmd.clone()),
                _ => None,
            })
            .collect()
    }

    /// Feed a link loss and the resulting retry timer
    fn fail_once(sm: &mut ConnectivityStateMachine) -> Vec<Action> {
        let mut actions = sm.handle(LifecycleEvent::LinkLost.into());
        if let Some(Action::ScheduleRetry { generation, .. }) = actions
            .iter()
            .find(|a| matches!(a, Action::ScheduleRetry { .. }))
            .cloned()
        {
            actions.extend(sm.handle(Event::RetryDue { generation }));
        }
        actions
    }

    #[test]
    fn test_initial_state() {
        let sm = ConnectivityStateMachine::new(DEFAULT_MAX_RETRIES, Duration::ZERO);
        assert_eq!(sm.state(), ConnectivityState::ApOnly);
        assert_eq!(sm.retry_count(), 0);
        assert!(!sm.has_credentials());
    }

    #[test]
    fn test_start_access_point_issues_command() {
        let mut sm = ConnectivityStateMachine::new(DEFAULT_MAX_RETRIES, Duration::ZERO);
        let actions = sm.start_access_point(ap_config());

        assert_eq!(
            commands(&actions),
            vec![RadioCommand::StartAccessPoint(ap_config())]
        );
        assert_eq!(sm.state(), ConnectivityState::ApOnly);
    }

    #[test]
    fn test_join_from_ap_only() {
        let mut sm = ConnectivityStateMachine::new(DEFAULT_MAX_RETRIES, Duration::ZERO);
        let actions = sm.handle(join("home", "secret"));

        assert_eq!(sm.state(), ConnectivityState::JoiningUpstream);
        assert_eq!(sm.retry_count(), 0);
        assert!(sm.has_credentials());
        assert_eq!(
            commands(&actions),
            vec![RadioCommand::StartJoinUpstream {
                ssid: "home".to_string(),
                password: Secret::new("secret"),
            }]
        );
    }

    #[test]
    fn test_join_link_established_address_acquired_scenario() {
        let mut sm = ConnectivityStateMachine::new(DEFAULT_MAX_RETRIES, Duration::ZERO);
        sm.handle(join("home", "secret"));

        sm.handle(LifecycleEvent::LinkEstablished.into());
        assert_eq!(sm.state(), ConnectivityState::JoiningUpstream);

        let ip: Ipv4Addr = "192.168.1.50".parse().unwrap();
        sm.handle(LifecycleEvent::AddressAcquired(ip).into());

        assert_eq!(sm.state(), ConnectivityState::Joined);
        assert_eq!(sm.retry_count(), 0);
        assert_eq!(sm.status().ip_address, Some(ip));
        assert_eq!(sm.status().ssid, Some("home".to_string()));
    }

    #[test]
    fn test_link_lost_while_joining_schedules_retry() {
        let mut sm = ConnectivityStateMachine::new(3, Duration::from_millis(250));
        sm.handle(join("home", "secret"));

        let actions = sm.handle(LifecycleEvent::LinkLost.into());
        assert_eq!(sm.state(), ConnectivityState::Disconnected);
        assert!(actions.contains(&Action::ScheduleRetry {
            generation: sm.generation(),
            delay: Duration::from_millis(250),
        }));

        let actions = sm.handle(Event::RetryDue {
            generation: sm.generation(),
        });
        assert_eq!(sm.state(), ConnectivityState::JoiningUpstream);
        assert_eq!(sm.retry_count(), 1);
        assert_eq!(
            commands(&actions),
            vec![RadioCommand::StartJoinUpstream {
                ssid: "home".to_string(),
                password: Secret::new("secret"),
            }]
        );
    }

    #[test]
    fn test_retries_exhausted_falls_back_to_ap_only() {
        let max_retries = 4;
        let mut sm = ConnectivityStateMachine::new(max_retries, Duration::ZERO);
        sm.handle(join("home", "secret"));

        let mut join_commands = 0;
        for _ in 0..max_retries {
            let actions = fail_once(&mut sm);
            join_commands += commands(&actions)
                .iter()
                .filter(|c| matches!(c, RadioCommand::StartJoinUpstream { .. }))
                .count();
            assert_eq!(sm.state(), ConnectivityState::JoiningUpstream);
            assert!(sm.retry_count() <= max_retries);
        }
        assert_eq!(join_commands, max_retries as usize);
        assert_eq!(sm.retry_count(), max_retries);

        let actions = sm.handle(LifecycleEvent::LinkLost.into());
        assert_eq!(sm.state(), ConnectivityState::ApOnly);
        assert_eq!(sm.retry_count(), max_retries);
        assert_eq!(commands(&actions), vec![RadioCommand::StopJoinUpstream]);
        assert!(actions.contains(&Action::Notify(Notification::retries_exhausted(
            "home",
            max_retries
        ))));
        assert!(
            !actions
                .iter()
                .any(|a| matches!(a, Action::ScheduleRetry { .. }))
        );

        // Still provisionable, credentials kept until the AP restarts
        assert!(sm.has_credentials());
        sm.handle(join("other", "password2"));
        assert_eq!(sm.state(), ConnectivityState::JoiningUpstream);
        assert_eq!(sm.retry_count(), 0);
    }

    #[test]
    fn test_zero_max_retries_gives_up_immediately() {
        let mut sm = ConnectivityStateMachine::new(0, Duration::ZERO);
        sm.handle(join("home", "secret"));

        sm.handle(LifecycleEvent::LinkLost.into());
        assert_eq!(sm.state(), ConnectivityState::ApOnly);
    }

    #[test]
    fn test_link_lost_after_joined_resets_retry_budget() {
        let mut sm = ConnectivityStateMachine::new(5, Duration::ZERO);
        sm.handle(join("home", "secret"));
        fail_once(&mut sm);
        fail_once(&mut sm);
        assert_eq!(sm.retry_count(), 2);

        sm.handle(LifecycleEvent::AddressAcquired("10.0.0.2".parse().unwrap()).into());
        assert_eq!(sm.state(), ConnectivityState::Joined);
        assert_eq!(sm.retry_count(), 0);

        let actions = sm.handle(LifecycleEvent::LinkLost.into());
        assert_eq!(sm.state(), ConnectivityState::Disconnected);
        assert_eq!(sm.retry_count(), 0);
        assert_eq!(sm.status().ip_address, None);
        assert!(
            actions
                .iter()
                .any(|a| matches!(a, Action::ScheduleRetry { .. }))
        );
    }

    #[test]
    fn test_join_while_joining_supersedes() {
        let mut sm = ConnectivityStateMachine::new(5, Duration::ZERO);
        sm.handle(join("home", "secret"));
        fail_once(&mut sm);
        assert_eq!(sm.retry_count(), 1);

        let actions = sm.handle(join("office", "secret2"));
        assert_eq!(sm.state(), ConnectivityState::JoiningUpstream);
        assert_eq!(sm.retry_count(), 0);
        assert_eq!(sm.status().ssid, Some("office".to_string()));
        assert_eq!(
            commands(&actions),
            vec![
                RadioCommand::StopJoinUpstream,
                RadioCommand::StartJoinUpstream {
                    ssid: "office".to_string(),
                    password: Secret::new("secret2"),
                },
            ]
        );
    }

    #[test]
    fn test_join_while_joined_supersedes() {
        let mut sm = ConnectivityStateMachine::new(5, Duration::ZERO);
        sm.handle(join("home", "secret"));
        sm.handle(LifecycleEvent::AddressAcquired("10.0.0.2".parse().unwrap()).into());

        sm.handle(join("office", "secret2"));
        assert_eq!(sm.state(), ConnectivityState::JoiningUpstream);
        assert_eq!(sm.status().ip_address, None);
    }

    #[test]
    fn test_stale_retry_timer_is_ignored() {
        let mut sm = ConnectivityStateMachine::new(5, Duration::ZERO);
        sm.handle(join("home", "secret"));
        sm.handle(LifecycleEvent::LinkLost.into());
        let stale = sm.generation();

        sm.handle(join("office", "secret2"));
        sm.handle(LifecycleEvent::LinkLost.into());
        assert_eq!(sm.state(), ConnectivityState::Disconnected);

        let actions = sm.handle(Event::RetryDue { generation: stale });
        assert!(actions.is_empty());
        assert_eq!(sm.state(), ConnectivityState::Disconnected);
        assert_eq!(sm.retry_count(), 0);
    }

    #[test]
    fn test_retry_timer_outside_disconnected_is_ignored() {
        let mut sm = ConnectivityStateMachine::new(5, Duration::ZERO);
        sm.handle(join("home", "secret"));

        let actions = sm.handle(Event::RetryDue {
            generation: sm.generation(),
        });
        assert!(actions.is_empty());
        assert_eq!(sm.retry_count(), 0);
    }

    #[test]
    fn test_peer_left_requests_connection_close() {
        let mut sm = ConnectivityStateMachine::new(5, Duration::ZERO);
        let peer: PeerId = "aa:bb:cc:dd:ee:ff".parse().unwrap();

        assert!(sm.handle(LifecycleEvent::PeerJoinedAp(peer).into()).is_empty());

        sm.handle(join("home", "secret"));
        sm.handle(LifecycleEvent::AddressAcquired("10.0.0.2".parse().unwrap()).into());

        let actions = sm.handle(LifecycleEvent::PeerLeftAp(peer).into());
        assert_eq!(actions, vec![Action::CloseActiveConnection]);
        assert_eq!(sm.state(), ConnectivityState::Joined);

        // Leaving peers are not correlated with the TCP client
        let stranger: PeerId = "02:00:00:00:00:09".parse().unwrap();
        let actions = sm.handle(LifecycleEvent::PeerLeftAp(stranger).into());
        assert_eq!(actions, vec![Action::CloseActiveConnection]);
    }

    #[test]
    fn test_irrelevant_events_are_ignored() {
        let mut sm = ConnectivityStateMachine::new(5, Duration::ZERO);

        assert!(sm.handle(LifecycleEvent::LinkLost.into()).is_empty());
        assert!(
            sm.handle(LifecycleEvent::AddressAcquired("10.0.0.2".parse().unwrap()).into())
                .is_empty()
        );
        assert!(sm.handle(LifecycleEvent::LinkEstablished.into()).is_empty());
        assert_eq!(sm.state(), ConnectivityState::ApOnly);

        sm.handle(join("home", "secret"));
        sm.handle(LifecycleEvent::LinkLost.into());
        // Duplicate loss while waiting for the retry timer
        assert!(sm.handle(LifecycleEvent::LinkLost.into()).is_empty());
        assert_eq!(sm.state(), ConnectivityState::Disconnected);
    }

    #[test]
    fn test_restarting_access_point_clears_credentials() {
        let mut sm = ConnectivityStateMachine::new(5, Duration::ZERO);
        sm.handle(join("home", "secret"));
        assert!(sm.has_credentials());

        sm.start_access_point(ap_config());
        assert!(!sm.has_credentials());
        assert_eq!(sm.status(), ConnectivityStatus::ap_only());
    }

    #[test]
    fn test_restarting_access_point_aborts_join() {
        let mut sm = ConnectivityStateMachine::new(5, Duration::ZERO);
        sm.handle(join("home", "secret"));

        let actions = sm.start_access_point(ap_config());
        assert_eq!(
            commands(&actions),
            vec![
                RadioCommand::StopJoinUpstream,
                RadioCommand::StartAccessPoint(ap_config()),
            ]
        );
        assert_eq!(sm.state(), ConnectivityState::ApOnly);
    }

    #[test]
    fn test_join_failure_of_current_attempt_retries() {
        let mut sm = ConnectivityStateMachine::new(1, Duration::ZERO);
        sm.handle(join("home", "secret"));

        let actions = sm.handle(Event::JoinFailed {
            generation: sm.generation(),
        });
        assert_eq!(sm.state(), ConnectivityState::Disconnected);
        assert!(
            actions
                .iter()
                .any(|a| matches!(a, Action::ScheduleRetry { .. }))
        );
    }

    #[test]
    fn test_join_failure_of_superseded_attempt_is_ignored() {
        let mut sm = ConnectivityStateMachine::new(0, Duration::ZERO);
        sm.handle(join("home", "secret"));
        let stale = sm.generation();
        sm.handle(LifecycleEvent::AddressAcquired("10.0.0.2".parse().unwrap()).into());

        sm.handle(join("office", "secret2"));
        let actions = sm.handle(Event::JoinFailed { generation: stale });

        assert!(actions.is_empty());
        assert_eq!(sm.state(), ConnectivityState::JoiningUpstream);
        assert_eq!(sm.status().ssid, Some("office".to_string()));
        assert_eq!(sm.retry_count(), 0);
    }

    #[test]
    fn test_every_transition_notifies() {
        let mut sm = ConnectivityStateMachine::new(5, Duration::ZERO);
        let actions = sm.handle(join("home", "secret"));

        let status = actions.iter().find_map(|a| match a {
            Action::Notify(Notification::StateChanged(status)) => Some(status.clone()),
            _ => None,
        });
        assert_eq!(status, Some(sm.status()));
    }
}
