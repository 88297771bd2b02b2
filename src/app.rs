use std::collections::VecDeque;

use anyhow::Result;
use chrono::Local;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame,
};
use serde_json::{Map, Value};

use crate::actions::Action;
use rf4s_link::link::{ConnectionState, LinkEvent, SessionStats, StatusSnapshot};

const FISHING_MODES: [&str; 4] = ["Float", "Bottom", "Spinning", "Match"];
const ACTIVITY_LIMIT: usize = 50;

/// Theme colors for the monitor
pub struct Theme {
    pub bg: Color,
    pub fg: Color,
    pub accent: Color,
    pub dim: Color,
    pub success: Color,
    pub warning: Color,
    pub error: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            bg: Color::Rgb(20, 26, 32),
            fg: Color::Rgb(220, 220, 220),
            accent: Color::Rgb(64, 170, 220), // lake blue
            dim: Color::Rgb(100, 100, 100),
            success: Color::Rgb(80, 200, 120),
            warning: Color::Rgb(255, 193, 7),
            error: Color::Rgb(220, 53, 69),
        }
    }
}

/// Main application state
pub struct App {
    /// Last snapshot received from the service
    pub status: StatusSnapshot,
    /// Derived session figures
    pub stats: SessionStats,
    /// Transport state
    pub connection: ConnectionState,
    /// Whether the connection service is running
    pub service_running: bool,
    /// Recent link events, newest first
    pub activity: VecDeque<String>,
    /// Current message to display (info or error)
    pub error_message: Option<String>,
    /// Theme
    pub theme: Theme,
    /// Pending action queue
    pub pending_actions: Vec<Action>,
}

impl App {
    pub fn new(status: StatusSnapshot, service_running: bool) -> Self {
        Self {
            stats: status.stats(),
            status,
            connection: ConnectionState::Disconnected,
            service_running,
            activity: VecDeque::new(),
            error_message: None,
            theme: Theme::default(),
            pending_actions: Vec::new(),
        }
    }

    /// Take pending actions (drains the queue)
    pub fn take_pending_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.pending_actions)
    }

    /// Replace the displayed status with a fresh read from the service
    pub fn refresh(&mut self, status: StatusSnapshot, connection: ConnectionState) {
        self.stats = status.stats();
        self.status = status;
        self.connection = connection;
    }

    /// Handle an action and return whether to quit
    pub fn handle_action(&mut self, action: Action) -> Result<bool> {
        match action {
            Action::KeyPress(key) => self.handle_key(key),
            Action::Link(event) => {
                self.apply_link_event(event);
                Ok(false)
            }
            Action::Quit => Ok(true),
            _ => Ok(false),
        }
    }

    fn apply_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Connected => {
                self.connection = ConnectionState::Connected;
                self.log("Connected to RF4S");
            }
            LinkEvent::Disconnected => {
                self.connection = ConnectionState::Disconnected;
                self.log("Disconnected from RF4S");
            }
            LinkEvent::Error(msg) => {
                self.log(format!("Error: {}", msg));
                self.error_message = Some(msg);
            }
            LinkEvent::StatusUpdated(status) => {
                self.stats = status.stats();
                self.status = *status;
            }
            LinkEvent::FishCaught(data) => {
                let fish = data
                    .get("fish_type")
                    .and_then(Value::as_str)
                    .unwrap_or("fish");
                self.log(format!("Caught {}", fish));
            }
            LinkEvent::SessionData(_) => {}
            LinkEvent::BotStateChanged(active) => {
                self.status.bot_active = active;
                self.log(if active { "Bot active" } else { "Bot idle" });
            }
            LinkEvent::DetectionDataUpdated(data) => {
                self.status.detection_settings.extend(data);
            }
            LinkEvent::AutomationStatusUpdated(data) => {
                self.status.automation_settings.extend(data);
            }
        }
    }

    fn log(&mut self, line: impl Into<String>) {
        let stamp = Local::now().format("%H:%M:%S");
        self.activity.push_front(format!("{} {}", stamp, line.into()));
        self.activity.truncate(ACTIVITY_LIMIT);
    }

    /// Record the outcome of a command sent to the bot
    pub fn command_result(&mut self, name: &str, sent: bool) {
        if sent {
            self.log(format!("Sent {}", name));
            self.error_message = None;
        } else {
            self.error_message = Some(format!("Not connected: {} not sent", name));
        }
    }

    fn next_fishing_mode(&self) -> String {
        let current = FISHING_MODES
            .iter()
            .position(|mode| *mode == self.status.fishing_mode);
        let next = match current {
            Some(i) => (i + 1) % FISHING_MODES.len(),
            None => 0,
        };
        FISHING_MODES[next].to_string()
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return Ok(true);
            }
            KeyCode::Char('s') => self.pending_actions.push(Action::StartFishing),
            KeyCode::Char('x') => self.pending_actions.push(Action::StopFishing),
            KeyCode::Char('e') | KeyCode::Esc => self.pending_actions.push(Action::EmergencyStop),
            KeyCode::Char('m') => {
                let mode = self.next_fishing_mode();
                self.pending_actions.push(Action::SetFishingMode(mode));
            }
            KeyCode::Char('r') => self.pending_actions.push(Action::ResetSession),
            KeyCode::Char('c') => self.pending_actions.push(Action::ToggleConnection),
            _ => {}
        }
        Ok(false)
    }

    pub fn render(&mut self, frame: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Header
                Constraint::Min(0),    // Main content
                Constraint::Length(3), // Footer/status
            ])
            .split(frame.area());

        self.render_header(frame, chunks[0]);
        self.render_main(frame, chunks[1]);
        self.render_footer(frame, chunks[2]);
    }

    fn connection_style(&self) -> (&'static str, Color) {
        match (self.service_running, self.connection) {
            (false, _) => ("○ Offline", self.theme.dim),
            (true, ConnectionState::Connected) => ("● Connected", self.theme.success),
            (true, ConnectionState::Connecting) => ("◌ Connecting", self.theme.warning),
            (true, ConnectionState::Disconnected) => ("✗ Disconnected", self.theme.error),
        }
    }

    fn render_header(&self, frame: &mut Frame, area: Rect) {
        let (label, color) = self.connection_style();
        let title = Paragraph::new(Line::from(vec![
            Span::styled(
                " RF4S Link ",
                Style::default()
                    .fg(self.theme.accent)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled("│ ", Style::default().fg(self.theme.dim)),
            Span::styled(label, Style::default().fg(color)),
        ]))
        .style(Style::default().bg(self.theme.bg))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(self.theme.dim)),
        );
        frame.render_widget(title, area);
    }

    fn render_main(&self, frame: &mut Frame, area: Rect) {
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage(45), // Bot + session
                Constraint::Percentage(55), // Settings + activity
            ])
            .split(area);

        let left = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(7), Constraint::Min(0)])
            .split(columns[0]);

        let right = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(9), Constraint::Min(0)])
            .split(columns[1]);

        self.render_bot_pane(frame, left[0]);
        self.render_session_pane(frame, left[1]);
        self.render_settings_pane(frame, right[0]);
        self.render_activity(frame, right[1]);
    }

    fn row<'a>(&self, label: &'a str, value: String, color: Color) -> Line<'a> {
        Line::from(vec![
            Span::styled(label, Style::default().fg(self.theme.dim)),
            Span::styled(value, Style::default().fg(color)),
        ])
    }

    fn panel<'a>(&self, title: &'a str) -> Block<'a> {
        Block::default()
            .title(title)
            .borders(Borders::ALL)
            .border_style(Style::default().fg(self.theme.dim))
    }

    fn render_bot_pane(&self, frame: &mut Frame, area: Rect) {
        let (state, color) = if self.status.bot_active {
            ("Fishing", self.theme.success)
        } else {
            ("Idle", self.theme.dim)
        };

        let content = vec![
            self.row("State: ", state.to_string(), color),
            self.row("Mode: ", self.status.fishing_mode.clone(), self.theme.fg),
            self.row(
                "Game: ",
                if self.status.game_connected { "detected" } else { "not detected" }.to_string(),
                self.theme.fg,
            ),
            self.row("Last: ", self.status.last_activity.clone(), self.theme.accent),
        ];

        frame.render_widget(Paragraph::new(content).block(self.panel(" Bot ")), area);
    }

    fn render_session_pane(&self, frame: &mut Frame, area: Rect) {
        let content = vec![
            self.row("Session: ", self.stats.session_time.clone(), self.theme.fg),
            self.row("Fish caught: ", self.stats.fish_caught.to_string(), self.theme.fg),
            self.row("Casts: ", self.stats.total_casts.to_string(), self.theme.fg),
            self.row(
                "Catch rate: ",
                format!("{:.1}%", self.stats.catch_rate),
                self.theme.success,
            ),
        ];

        frame.render_widget(Paragraph::new(content).block(self.panel(" Session ")), area);
    }

    fn render_settings_pane(&self, frame: &mut Frame, area: Rect) {
        let mut content = vec![Line::from(Span::styled(
            "Detection",
            Style::default()
                .fg(self.theme.accent)
                .add_modifier(Modifier::BOLD),
        ))];
        content.extend(self.settings_lines(&self.status.detection_settings));
        content.push(Line::from(Span::styled(
            "Automation",
            Style::default()
                .fg(self.theme.accent)
                .add_modifier(Modifier::BOLD),
        )));
        content.extend(self.settings_lines(&self.status.automation_settings));

        frame.render_widget(Paragraph::new(content).block(self.panel(" Settings ")), area);
    }

    fn settings_lines(&self, settings: &Map<String, Value>) -> Vec<Line<'static>> {
        settings
            .iter()
            .map(|(key, value)| {
                Line::from(vec![
                    Span::styled(format!("  {}: ", key), Style::default().fg(self.theme.dim)),
                    Span::styled(value.to_string(), Style::default().fg(self.theme.fg)),
                ])
            })
            .collect()
    }

    fn render_activity(&self, frame: &mut Frame, area: Rect) {
        let items: Vec<ListItem> = if self.activity.is_empty() {
            vec![ListItem::new(Line::from(Span::styled(
                "  No activity yet.",
                Style::default().fg(self.theme.dim),
            )))]
        } else {
            self.activity
                .iter()
                .map(|line| {
                    let color = if line.contains("Error") {
                        self.theme.error
                    } else {
                        self.theme.fg
                    };
                    ListItem::new(Line::from(Span::styled(
                        line.clone(),
                        Style::default().fg(color),
                    )))
                })
                .collect()
        };

        frame.render_widget(List::new(items).block(self.panel(" Activity ")), area);
    }

    fn render_footer(&self, frame: &mut Frame, area: Rect) {
        let help_text = " q: Quit │ s: Start │ x: Stop │ e: Emergency stop │ m: Mode │ r: Reset │ c: Connect ";

        let content = if let Some(ref msg) = self.error_message {
            Line::from(Span::styled(
                format!(" {} ", msg),
                Style::default().fg(self.theme.error),
            ))
        } else {
            Line::from(Span::styled(help_text, Style::default().fg(self.theme.dim)))
        };

        let footer = Paragraph::new(content).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(self.theme.dim)),
        );
        frame.render_widget(footer, area);
    }
}
