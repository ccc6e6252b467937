//! Mock radio backend for testing

use std::sync::Arc;
use tokio::sync::{Mutex, Notify, broadcast};

use crate::backend::{RadioBackend, radio_backend::LIFECYCLE_CHANNEL_CAPACITY};
use crate::core::{
    connectivity::RadioCommand,
    error::{RadioError, RadioResult},
    events::LifecycleEvent,
    types::{AccessPointConfig, Secret},
};

/// Internal state for the mock backend
#[derive(Debug, Default)]
struct MockState {
    commands: Vec<RadioCommand>,
    should_fail_join: bool,
}

/// Mock radio backend for testing
///
/// Records every command and lets tests inject lifecycle events.
#[derive(Debug, Clone)]
pub struct MockRadioBackend {
    inner: Arc<Mutex<MockState>>,
    events: broadcast::Sender<LifecycleEvent>,
    command_issued: Arc<Notify>,
}

impl MockRadioBackend {
    /// Create a new mock backend with default state
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(MockState::default())),
            events,
            command_issued: Arc::new(Notify::new()),
        }
    }

    /// Configure mock to reject join commands
    pub async fn set_join_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_join = should_fail;
    }

    /// Inject a lifecycle event as if the driver reported it
    pub fn emit(&self, event: LifecycleEvent) {
        let _ = self.events.send(event);
    }

    /// Commands issued so far
    pub async fn commands(&self) -> Vec<RadioCommand> {
        self.inner.lock().await.commands.clone()
    }

    /// Wait until at least `count` commands have been issued
    pub async fn wait_for_commands(&self, count: usize) -> Vec<RadioCommand> {
        loop {
            let notified = self.command_issued.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let commands = self.commands().await;
            if commands.len() >= count {
                return commands;
            }
            notified.await;
        }
    }

    async fn record(&self, command: RadioCommand) {
        self.inner.lock().await.commands.push(command);
        self.command_issued.notify_waiters();
    }
}

impl Default for MockRadioBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RadioBackend for MockRadioBackend {
    async fn start_access_point(&self, config: &AccessPointConfig) -> RadioResult<()> {
        self.record(RadioCommand::StartAccessPoint(config.clone()))
            .await;
        Ok(())
    }

    async fn start_join_upstream(&self, ssid: &str, password: &Secret) -> RadioResult<()> {
        self.record(RadioCommand::StartJoinUpstream {
            ssid: ssid.to_string(),
            password: password.clone(),
        })
        .await;

        if self.inner.lock().await.should_fail_join {
            Err(RadioError::CommandFailed("Mock join failure".into()))
        } else {
            Ok(())
        }
    }

    async fn stop_join_upstream(&self) -> RadioResult<()> {
        self.record(RadioCommand::StopJoinUpstream).await;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }
}
