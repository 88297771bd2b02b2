use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use once_cell::sync::Lazy;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{EventBus, InboundMessage, LinkError, LinkEvent, SessionStats, StatusSnapshot};

/// Receiver for messages decoded by the transport
pub trait MessageSink: Send + Sync + 'static {
    fn handle(&self, message: InboundMessage);
}

type Handler = fn(&mut StatusSnapshot, &Map<String, Value>) -> Vec<LinkEvent>;

/// Message type tag -> snapshot handler
static HANDLERS: Lazy<HashMap<&'static str, Handler>> = Lazy::new(|| {
    let mut table: HashMap<&'static str, Handler> = HashMap::new();
    table.insert("status_update", on_status_update);
    table.insert("fish_caught", on_fish_caught);
    table.insert("session_data", on_session_data);
    table.insert("bot_state", on_bot_state);
    table.insert("detection_data", on_detection_data);
    table.insert("automation_status", on_automation_status);
    table.insert("cast_performed", on_cast_performed);
    table.insert("error", on_error);
    table
});

fn on_status_update(snapshot: &mut StatusSnapshot, data: &Map<String, Value>) -> Vec<LinkEvent> {
    let mut events = merge_fields(snapshot, data, "status_update");
    snapshot.rf4s_connected = true;
    events.push(LinkEvent::StatusUpdated(Box::new(snapshot.clone())));
    events
}

fn on_fish_caught(snapshot: &mut StatusSnapshot, data: &Map<String, Value>) -> Vec<LinkEvent> {
    snapshot.fish_caught += 1;
    snapshot.successful_catches += 1;
    let fish = data
        .get("fish_type")
        .and_then(Value::as_str)
        .unwrap_or("fish");
    snapshot.last_activity = format!("Caught {}", fish);
    vec![
        LinkEvent::FishCaught(data.clone()),
        LinkEvent::StatusUpdated(Box::new(snapshot.clone())),
    ]
}

fn on_session_data(snapshot: &mut StatusSnapshot, data: &Map<String, Value>) -> Vec<LinkEvent> {
    let mut events = merge_fields(snapshot, data, "session_data");
    events.push(LinkEvent::SessionData(data.clone()));
    events
}

fn on_bot_state(snapshot: &mut StatusSnapshot, data: &Map<String, Value>) -> Vec<LinkEvent> {
    let active = data.get("active").and_then(Value::as_bool).unwrap_or(false);
    snapshot.bot_active = active;
    vec![LinkEvent::BotStateChanged(active)]
}

fn on_detection_data(snapshot: &mut StatusSnapshot, data: &Map<String, Value>) -> Vec<LinkEvent> {
    merge_map(&mut snapshot.detection_settings, data);
    vec![LinkEvent::DetectionDataUpdated(data.clone())]
}

fn on_automation_status(
    snapshot: &mut StatusSnapshot,
    data: &Map<String, Value>,
) -> Vec<LinkEvent> {
    merge_map(&mut snapshot.automation_settings, data);
    vec![LinkEvent::AutomationStatusUpdated(data.clone())]
}

fn on_cast_performed(snapshot: &mut StatusSnapshot, _data: &Map<String, Value>) -> Vec<LinkEvent> {
    snapshot.total_casts += 1;
    snapshot.last_activity = "Cast performed".to_string();
    vec![LinkEvent::StatusUpdated(Box::new(snapshot.clone()))]
}

fn on_error(_snapshot: &mut StatusSnapshot, data: &Map<String, Value>) -> Vec<LinkEvent> {
    let message = data
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("Unknown bot error");
    vec![LinkEvent::Error(message.to_string())]
}

/// Merge `data` field by field; every rejected field becomes an `Error` event
fn merge_fields(
    snapshot: &mut StatusSnapshot,
    data: &Map<String, Value>,
    kind: &str,
) -> Vec<LinkEvent> {
    snapshot
        .merge(data)
        .into_iter()
        .map(|(field, source)| {
            let err = LinkError::SnapshotMerge {
                kind: kind.to_string(),
                field,
                source,
            };
            warn!(%err, "dropping field from bot message");
            LinkEvent::Error(err.to_string())
        })
        .collect()
}

pub(crate) fn merge_map(target: &mut Map<String, Value>, updates: &Map<String, Value>) {
    for (key, value) in updates {
        target.insert(key.clone(), value.clone());
    }
}

/// Owner of the status snapshot
#[derive(Clone)]
pub struct Reconciler {
    snapshot: Arc<Mutex<StatusSnapshot>>,
    bus: EventBus,
}

impl Reconciler {
    pub fn new(bus: EventBus) -> Self {
        Self {
            snapshot: Arc::new(Mutex::new(StatusSnapshot::new())),
            bus,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StatusSnapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one inbound message.
    ///
    /// Events go out after the snapshot lock is released.
    pub fn apply(&self, message: &InboundMessage) {
        let Some(handler) = HANDLERS.get(message.kind.as_str()) else {
            debug!(kind = %message.kind, "ignoring unknown message type");
            return;
        };

        let data = message.payload();
        let events = {
            let mut snapshot = self.lock();
            handler(&mut *snapshot, &data)
        };

        for event in events {
            self.bus.emit(event);
        }
    }

    /// Current snapshot with a freshly computed session time
    pub fn get_status(&self) -> StatusSnapshot {
        let mut snapshot = self.lock();
        snapshot.refresh_session_time(Utc::now());
        snapshot.clone()
    }

    /// Snapshot exactly as stored
    pub fn peek(&self) -> StatusSnapshot {
        self.lock().clone()
    }

    pub fn get_session_stats(&self) -> SessionStats {
        let mut snapshot = self.lock();
        snapshot.refresh_session_time(Utc::now());
        snapshot.stats()
    }

    /// Zero the counters and restart the session clock
    pub fn reset_session(&self) {
        let snapshot = {
            let mut snapshot = self.lock();
            snapshot.fish_caught = 0;
            snapshot.total_casts = 0;
            snapshot.successful_catches = 0;
            snapshot.session_start_time = Utc::now();
            snapshot.session_time = "00:00:00".to_string();
            snapshot.clone()
        };
        self.bus.emit(LinkEvent::StatusUpdated(Box::new(snapshot)));
    }

    /// Apply a local change ahead of bot confirmation
    pub fn update_locally<F>(&self, update: F)
    where
        F: FnOnce(&mut StatusSnapshot),
    {
        let snapshot = {
            let mut snapshot = self.lock();
            update(&mut *snapshot);
            snapshot.clone()
        };
        self.bus.emit(LinkEvent::StatusUpdated(Box::new(snapshot)));
    }

    pub fn detection_settings(&self) -> Map<String, Value> {
        self.lock().detection_settings.clone()
    }

    pub fn automation_settings(&self) -> Map<String, Value> {
        self.lock().automation_settings.clone()
    }
}

impl MessageSink for Reconciler {
    fn handle(&self, message: InboundMessage) {
        self.apply(&message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recording() -> (Reconciler, Arc<Mutex<Vec<LinkEvent>>>) {
        let bus = EventBus::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        bus.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
        (Reconciler::new(bus), events)
    }

    fn message(kind: &str, data: Value) -> InboundMessage {
        InboundMessage::new(kind, data)
    }

    #[test]
    fn test_fish_caught_increments_once() {
        let (reconciler, events) = recording();
        reconciler.apply(&message("cast_performed", json!({})));
        reconciler.apply(&message("fish_caught", json!({"fish_type": "Pike"})));

        let status = reconciler.peek();
        assert_eq!(status.fish_caught, 1);
        assert_eq!(status.successful_catches, 1);
        assert_eq!(status.total_casts, 1);
        assert!(status.successful_catches <= status.total_casts);
        assert_eq!(status.last_activity, "Caught Pike");

        let events = events.lock().unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, LinkEvent::FishCaught(data) if data["fish_type"] == "Pike")));
    }

    #[test]
    fn test_fish_caught_without_type() {
        let (reconciler, _) = recording();
        reconciler.apply(&message("fish_caught", json!({})));
        assert_eq!(reconciler.peek().last_activity, "Caught fish");
    }

    #[test]
    fn test_bot_state_and_settings() {
        let (reconciler, events) = recording();
        reconciler.apply(&message("bot_state", json!({"active": true})));
        reconciler.apply(&message("detection_data", json!({"sensitivity": 70})));
        reconciler.apply(&message("automation_status", json!({"enabled": true})));

        let status = reconciler.peek();
        assert!(status.bot_active);
        assert_eq!(status.detection_settings["sensitivity"], 70);
        assert_eq!(status.detection_settings["confidence_threshold"], 0.8);
        assert_eq!(status.automation_settings["enabled"], true);
        assert_eq!(status.automation_settings["auto_reel"], true);

        let events = events.lock().unwrap();
        assert_eq!(events[0], LinkEvent::BotStateChanged(true));
        assert!(matches!(events[1], LinkEvent::DetectionDataUpdated(_)));
        assert!(matches!(events[2], LinkEvent::AutomationStatusUpdated(_)));
    }

    #[test]
    fn test_status_update_merges_and_marks_connected() {
        let (reconciler, events) = recording();
        reconciler.apply(&message(
            "status_update",
            json!({"fishing_mode": "Spinning", "game_connected": true}),
        ));

        let status = reconciler.peek();
        assert_eq!(status.fishing_mode, "Spinning");
        assert!(status.game_connected);
        assert!(status.rf4s_connected);
        assert!(matches!(
            events.lock().unwrap().last(),
            Some(LinkEvent::StatusUpdated(s)) if s.fishing_mode == "Spinning"
        ));
    }

    #[test]
    fn test_session_data_forwarded_verbatim() {
        let (reconciler, events) = recording();
        let data = json!({"last_activity": "Waiting for bite", "zone": "Old Burg"});
        reconciler.apply(&message("session_data", data.clone()));

        let status = reconciler.peek();
        assert_eq!(status.last_activity, "Waiting for bite");
        assert_eq!(status.extra["zone"], "Old Burg");
        assert_eq!(
            *events.lock().unwrap(),
            vec![LinkEvent::SessionData(data.as_object().unwrap().clone())]
        );
    }

    #[test]
    fn test_error_message_leaves_snapshot() {
        let (reconciler, events) = recording();
        let before = reconciler.peek();
        reconciler.apply(&message("error", json!({"message": "Game window not found"})));

        assert_eq!(reconciler.peek(), before);
        assert_eq!(
            *events.lock().unwrap(),
            vec![LinkEvent::Error("Game window not found".to_string())]
        );
    }

    #[test]
    fn test_unknown_type_is_noop() {
        let (reconciler, events) = recording();
        let before = reconciler.get_status();
        reconciler.apply(&message("weather_report", json!({"bot_active": true})));

        assert_eq!(reconciler.peek(), before);
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_bad_field_reports_error() {
        let (reconciler, events) = recording();
        reconciler.apply(&message("status_update", json!({"total_casts": -3})));

        assert_eq!(reconciler.peek().total_casts, 0);
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], LinkEvent::Error(msg) if msg.contains("total_casts")));
        assert!(matches!(events[1], LinkEvent::StatusUpdated(_)));
    }

    #[test]
    fn test_mixed_status_update_keeps_good_fields() {
        let (reconciler, events) = recording();
        reconciler.apply(&message(
            "status_update",
            json!({"fishing_mode": "Bottom", "total_casts": 7, "last_activity": null}),
        ));

        let status = reconciler.peek();
        assert_eq!(status.fishing_mode, "Bottom");
        assert_eq!(status.total_casts, 7);
        assert_eq!(status.last_activity, "Idle");
        assert!(status.rf4s_connected);
        assert!(!events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, LinkEvent::Error(_))));

        reconciler.apply(&message(
            "session_data",
            json!({"fish_caught": "many", "successful_catches": 3}),
        ));
        let status = reconciler.peek();
        assert_eq!(status.fish_caught, 0);
        assert_eq!(status.successful_catches, 3);

        let events = events.lock().unwrap();
        let errors: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, LinkEvent::Error(_)))
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(matches!(events.last(), Some(LinkEvent::SessionData(_))));
    }

    #[test]
    fn test_reset_session() {
        let (reconciler, _) = recording();
        reconciler.apply(&message("detection_data", json!({"sensitivity": 10})));
        for _ in 0..3 {
            reconciler.apply(&message("cast_performed", json!({})));
        }
        reconciler.apply(&message("fish_caught", json!({})));

        reconciler.reset_session();
        let status = reconciler.get_status();
        assert_eq!(status.fish_caught, 0);
        assert_eq!(status.total_casts, 0);
        assert_eq!(status.successful_catches, 0);
        assert_eq!(status.session_time, "00:00:00");
        assert_eq!(status.detection_settings["sensitivity"], 10);
    }

    #[test]
    fn test_session_stats_catch_rate() {
        let (reconciler, _) = recording();
        assert_eq!(reconciler.get_session_stats().catch_rate, 0.0);

        for _ in 0..4 {
            reconciler.apply(&message("cast_performed", json!({})));
        }
        reconciler.apply(&message("fish_caught", json!({})));

        let stats = reconciler.get_session_stats();
        assert_eq!(stats.total_casts, 4);
        assert_eq!(stats.catch_rate, 25.0);
    }
}
