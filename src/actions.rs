use crossterm::event::KeyEvent;

use rf4s_link::link::LinkEvent;

/// Actions that can be dispatched through the application
#[derive(Debug, Clone)]
pub enum Action {
    /// A key was pressed
    KeyPress(KeyEvent),
    /// The bot link raised an event
    Link(LinkEvent),
    /// Request to quit the application
    Quit,
    /// Send start_fishing
    StartFishing,
    /// Send stop_fishing
    StopFishing,
    /// Send emergency_stop
    EmergencyStop,
    /// Switch the bot to another fishing mode
    SetFishingMode(String),
    /// Zero the session counters
    ResetSession,
    /// Start or stop the connection service
    ToggleConnection,
}
