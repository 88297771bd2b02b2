use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{
    BotCommands, ConnectionState, EventBus, LinkEvent, Reconciler, SessionStats, SettingsUpdate,
    StatusSnapshot, SubscriptionId, Transport,
};
use crate::config::ConnectionConfig;

struct Poller {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Everything a front-end needs to drive the bot.
///
/// Wires transport, reconciler and commands to one event bus and keeps the
/// snapshot fresh with a periodic status poll.
#[derive(Clone)]
pub struct BotService {
    config: ConnectionConfig,
    bus: EventBus,
    transport: Transport,
    reconciler: Reconciler,
    commands: BotCommands,
    poller: Arc<Mutex<Option<Poller>>>,
}

impl BotService {
    pub fn new(config: ConnectionConfig) -> Self {
        let bus = EventBus::new();
        let reconciler = Reconciler::new(bus.clone());
        let transport = Transport::new(config.clone(), bus.clone(), Arc::new(reconciler.clone()));
        let commands = BotCommands::new(transport.clone(), reconciler.clone());

        Self {
            config,
            bus,
            transport,
            reconciler,
            commands,
            poller: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the connection loop and the status poller
    pub fn start(&self) {
        self.transport.start();

        let mut poller = self.poller.lock().unwrap_or_else(PoisonError::into_inner);
        if poller.as_ref().is_some_and(|p| !p.handle.is_finished()) {
            return;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let service = self.clone();
        let period = self.config.status_interval();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => service.tick(),
                }
            }
            debug!("status poller stopped");
        });
        *poller = Some(Poller { shutdown, handle });
        info!("bot service started");
    }

    pub async fn stop(&self) {
        let poller = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(poller) = poller {
            let _ = poller.shutdown.send(true);
            if let Err(err) = poller.handle.await {
                warn!(?err, "status poller ended abnormally");
            }
        }

        self.transport.stop().await;
        info!("bot service stopped");
    }

    pub fn is_running(&self) -> bool {
        self.transport.is_running()
    }

    /// One poll cycle: ask the bot for data, or keep the clock moving offline
    pub fn tick(&self) {
        if self.transport.is_connected() {
            self.commands.request_status_update();
        } else {
            let status = self.reconciler.get_status();
            self.bus.emit(LinkEvent::StatusUpdated(Box::new(status)));
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&LinkEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    pub fn get_current_status(&self) -> StatusSnapshot {
        self.reconciler.get_status()
    }

    pub fn get_session_stats(&self) -> SessionStats {
        self.reconciler.get_session_stats()
    }

    pub fn detection_settings(&self) -> Map<String, Value> {
        self.reconciler.detection_settings()
    }

    pub fn automation_settings(&self) -> Map<String, Value> {
        self.reconciler.automation_settings()
    }

    pub fn reset_session(&self) {
        self.reconciler.reset_session();
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn start_fishing(&self) -> bool {
        self.commands.start_fishing()
    }

    pub fn stop_fishing(&self) -> bool {
        self.commands.stop_fishing()
    }

    pub fn emergency_stop(&self) -> bool {
        self.commands.emergency_stop()
    }

    pub fn set_fishing_mode(&self, mode: &str) -> bool {
        self.commands.set_fishing_mode(mode)
    }

    pub fn update_settings(&self, settings: &SettingsUpdate) -> bool {
        self.commands.update_settings(settings)
    }

    pub fn send_command(&self, command: &str, data: Map<String, Value>) -> bool {
        self.commands.send_command(command, data)
    }
}
