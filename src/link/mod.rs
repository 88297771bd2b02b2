mod codec;
mod commands;
mod error;
mod events;
mod reconciler;
mod service;
mod transport;

pub use codec::{decode, encode, InboundMessage, LineDecoder, OutboundMessage};
pub use commands::{BotCommands, SettingsUpdate};
pub use error::LinkError;
pub use events::{EventBus, LinkEvent, SubscriptionId};
pub use reconciler::{MessageSink, Reconciler};
pub use service::BotService;
pub use transport::Transport;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Connection lifecycle of the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Last known state of the bot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub bot_active: bool,
    pub fishing_mode: String,
    /// Elapsed session time as `HH:MM:SS`
    pub session_time: String,
    pub fish_caught: u64,
    pub total_casts: u64,
    pub successful_catches: u64,
    pub session_start_time: DateTime<Utc>,
    pub last_activity: String,
    pub detection_settings: Map<String, Value>,
    pub automation_settings: Map<String, Value>,
    pub game_connected: bool,
    pub rf4s_connected: bool,
    /// Fields pushed by the bot that have no dedicated slot
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StatusSnapshot {
    pub fn new() -> Self {
        Self {
            bot_active: false,
            fishing_mode: "Float".to_string(),
            session_time: "00:00:00".to_string(),
            fish_caught: 0,
            total_casts: 0,
            successful_catches: 0,
            session_start_time: Utc::now(),
            last_activity: "Idle".to_string(),
            detection_settings: object(json!({
                "sensitivity": 50,
                "confidence_threshold": 0.8,
            })),
            automation_settings: object(json!({
                "enabled": false,
                "auto_cast": true,
                "auto_reel": true,
            })),
            game_connected: false,
            rf4s_connected: false,
            extra: Map::new(),
        }
    }

    /// Overlay top-level fields from `data`, one key at a time.
    ///
    /// `null` values are skipped. Entries whose value does not fit the field
    /// type are left out and returned; every other entry still lands.
    pub fn merge(&mut self, data: &Map<String, Value>) -> Vec<(String, serde_json::Error)> {
        let mut rejected = Vec::new();
        for (key, value) in data {
            if value.is_null() {
                continue;
            }
            if let Err(err) = self.set_field(key, value) {
                rejected.push((key.clone(), err));
            }
        }
        rejected
    }

    fn set_field(&mut self, key: &str, value: &Value) -> Result<(), serde_json::Error> {
        match key {
            "bot_active" => self.bot_active = field(value)?,
            "fishing_mode" => self.fishing_mode = field(value)?,
            "session_time" => self.session_time = field(value)?,
            "fish_caught" => self.fish_caught = field(value)?,
            "total_casts" => self.total_casts = field(value)?,
            "successful_catches" => self.successful_catches = field(value)?,
            "session_start_time" => self.session_start_time = field(value)?,
            "last_activity" => self.last_activity = field(value)?,
            "detection_settings" => self.detection_settings = field(value)?,
            "automation_settings" => self.automation_settings = field(value)?,
            "game_connected" => self.game_connected = field(value)?,
            "rf4s_connected" => self.rf4s_connected = field(value)?,
            _ => {
                self.extra.insert(key.to_string(), value.clone());
            }
        }
        Ok(())
    }

    /// Recompute `session_time` against `now`
    pub fn refresh_session_time(&mut self, now: DateTime<Utc>) {
        let elapsed = (now - self.session_start_time).num_seconds().max(0);
        self.session_time = format_hms(elapsed);
    }

    pub fn stats(&self) -> SessionStats {
        let catch_rate = if self.total_casts == 0 {
            0.0
        } else {
            self.successful_catches as f64 / self.total_casts as f64 * 100.0
        };

        SessionStats {
            session_time: self.session_time.clone(),
            fish_caught: self.fish_caught,
            total_casts: self.total_casts,
            successful_catches: self.successful_catches,
            catch_rate,
            last_activity: self.last_activity.clone(),
        }
    }
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// Derived per-session figures
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    pub session_time: String,
    pub fish_caught: u64,
    pub total_casts: u64,
    pub successful_catches: u64,
    /// Percentage of casts that landed a fish
    pub catch_rate: f64,
    pub last_activity: String,
}

fn format_hms(total_seconds: i64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

fn field<T: DeserializeOwned>(value: &Value) -> Result<T, serde_json::Error> {
    T::deserialize(value)
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
