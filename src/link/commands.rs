use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{error, info};

use super::reconciler::merge_map;
use super::{Reconciler, Transport};

/// Partial settings pushed to the bot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automation: Option<Map<String, Value>>,
}

/// Typed bot commands with optimistic snapshot updates.
///
/// Every method returns whether the transport accepted the command. A
/// rejected command leaves the snapshot untouched.
#[derive(Clone)]
pub struct BotCommands {
    transport: Transport,
    reconciler: Reconciler,
}

impl BotCommands {
    pub fn new(transport: Transport, reconciler: Reconciler) -> Self {
        Self {
            transport,
            reconciler,
        }
    }

    pub fn start_fishing(&self) -> bool {
        let sent = self.send_command("start_fishing", Map::new());
        if sent {
            self.reconciler.update_locally(|status| {
                status.bot_active = true;
                status.last_activity = "Fishing started".to_string();
            });
        }
        sent
    }

    pub fn stop_fishing(&self) -> bool {
        let sent = self.send_command("stop_fishing", Map::new());
        if sent {
            self.reconciler.update_locally(|status| {
                status.bot_active = false;
                status.last_activity = "Fishing stopped".to_string();
            });
        }
        sent
    }

    pub fn emergency_stop(&self) -> bool {
        let sent = self.send_command("emergency_stop", Map::new());
        if sent {
            info!("emergency stop sent");
            self.reconciler.update_locally(|status| {
                status.bot_active = false;
                status.last_activity = "Emergency stop".to_string();
            });
        }
        sent
    }

    pub fn set_fishing_mode(&self, mode: &str) -> bool {
        let mut data = Map::new();
        data.insert("mode".to_string(), json!(mode));

        let sent = self.send_command("set_fishing_mode", data);
        if sent {
            self.reconciler.update_locally(|status| {
                status.fishing_mode = mode.to_string();
            });
        }
        sent
    }

    pub fn update_settings(&self, settings: &SettingsUpdate) -> bool {
        let data = match serde_json::to_value(settings) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };

        let sent = self.send_command("update_settings", data);
        if sent {
            self.reconciler.update_locally(|status| {
                if let Some(detection) = &settings.detection {
                    merge_map(&mut status.detection_settings, detection);
                }
                if let Some(automation) = &settings.automation {
                    merge_map(&mut status.automation_settings, automation);
                }
            });
        }
        sent
    }

    /// Ask the bot to push fresh status, session, detection and automation data
    pub fn request_status_update(&self) -> bool {
        if !self.transport.is_connected() {
            return false;
        }

        [
            "get_status",
            "get_session_data",
            "get_detection_settings",
            "get_automation_status",
        ]
        .into_iter()
        .fold(true, |ok, command| self.send_command(command, Map::new()) && ok)
    }

    /// Send an arbitrary command without touching the snapshot
    pub fn send_command(&self, command: &str, data: Map<String, Value>) -> bool {
        match self.transport.send(command, &data) {
            Ok(sent) => sent,
            Err(err) => {
                // A JSON map always serializes
                error!(%err, command, "failed to encode command");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::link::{EventBus, LinkEvent};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn offline() -> (BotCommands, Reconciler) {
        let bus = EventBus::new();
        let reconciler = Reconciler::new(bus.clone());
        let config = ConnectionConfig {
            port: 1,
            ..ConnectionConfig::default()
        };
        let transport = Transport::new(config, bus, Arc::new(reconciler.clone()));
        (BotCommands::new(transport, reconciler.clone()), reconciler)
    }

    #[test]
    fn test_commands_fail_without_side_effects_when_disconnected() {
        let (commands, reconciler) = offline();
        let before = reconciler.peek();

        assert!(!commands.start_fishing());
        assert!(!commands.stop_fishing());
        assert!(!commands.emergency_stop());
        assert!(!commands.set_fishing_mode("Bottom"));
        assert!(!commands.update_settings(&SettingsUpdate {
            detection: Some(json!({"sensitivity": 90}).as_object().unwrap().clone()),
            automation: None,
        }));
        assert!(!commands.request_status_update());

        assert_eq!(reconciler.peek(), before);
    }

    #[test]
    fn test_settings_update_wire_shape() {
        let update = SettingsUpdate {
            detection: None,
            automation: Some(json!({"auto_cast": false}).as_object().unwrap().clone()),
        };
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({"automation": {"auto_cast": false}})
        );
    }

    async fn connected() -> (
        BotCommands,
        Reconciler,
        BufReader<tokio::net::TcpStream>,
        Transport,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ConnectionConfig {
            host: "127.0.0.1".to_string(),
            port: listener.local_addr().unwrap().port(),
            read_timeout_ms: 50,
            ..ConnectionConfig::default()
        };

        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
        let reconciler = Reconciler::new(bus.clone());
        let transport = Transport::new(config, bus, Arc::new(reconciler.clone()));
        transport.start();

        let (socket, _) = listener.accept().await.unwrap();
        timeout(Duration::from_secs(5), async {
            while let Some(event) = rx.recv().await {
                if event == LinkEvent::Connected {
                    break;
                }
            }
        })
        .await
        .unwrap();

        let commands = BotCommands::new(transport.clone(), reconciler.clone());
        (commands, reconciler, BufReader::new(socket), transport)
    }

    async fn read_command(reader: &mut BufReader<tokio::net::TcpStream>) -> Value {
        let mut line = String::new();
        timeout(Duration::from_secs(5), reader.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        serde_json::from_str(line.trim_end()).unwrap()
    }

    #[tokio::test]
    async fn test_optimistic_updates() {
        let (commands, reconciler, mut bot, transport) = connected().await;

        assert!(commands.start_fishing());
        assert_eq!(read_command(&mut bot).await["command"], "start_fishing");
        let status = reconciler.peek();
        assert!(status.bot_active);
        assert_eq!(status.last_activity, "Fishing started");

        assert!(commands.set_fishing_mode("Spinning"));
        let sent = read_command(&mut bot).await;
        assert_eq!(sent["command"], "set_fishing_mode");
        assert_eq!(sent["data"], json!({"mode": "Spinning"}));
        assert_eq!(reconciler.peek().fishing_mode, "Spinning");

        assert!(commands.emergency_stop());
        assert_eq!(read_command(&mut bot).await["command"], "emergency_stop");
        let status = reconciler.peek();
        assert!(!status.bot_active);
        assert_eq!(status.last_activity, "Emergency stop");

        transport.stop().await;
    }

    #[tokio::test]
    async fn test_update_settings_merges_locally() {
        let (commands, reconciler, mut bot, transport) = connected().await;

        let update = SettingsUpdate {
            detection: Some(json!({"sensitivity": 75}).as_object().unwrap().clone()),
            automation: Some(json!({"enabled": true}).as_object().unwrap().clone()),
        };
        assert!(commands.update_settings(&update));

        let sent = read_command(&mut bot).await;
        assert_eq!(sent["command"], "update_settings");
        assert_eq!(sent["data"]["detection"]["sensitivity"], 75);

        let status = reconciler.peek();
        assert_eq!(status.detection_settings["sensitivity"], 75);
        assert_eq!(status.detection_settings["confidence_threshold"], 0.8);
        assert_eq!(status.automation_settings["enabled"], true);
        assert_eq!(status.automation_settings["auto_cast"], true);

        transport.stop().await;
    }

    #[tokio::test]
    async fn test_request_status_update_sends_all_queries() {
        let (commands, _, mut bot, transport) = connected().await;

        assert!(commands.request_status_update());
        let mut sent = Vec::new();
        for _ in 0..4 {
            sent.push(read_command(&mut bot).await["command"].clone());
        }
        assert_eq!(
            sent,
            vec![
                json!("get_status"),
                json!("get_session_data"),
                json!("get_detection_settings"),
                json!("get_automation_status"),
            ]
        );

        transport.stop().await;
    }
}
