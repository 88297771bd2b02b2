use std::fs::OpenOptions;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyEventKind};
use tokio::sync::mpsc;

mod actions;
mod app;

use actions::Action;
use app::App;
use rf4s_link::config::Config;
use rf4s_link::link::BotService;

#[tokio::main]
async fn main() -> Result<()> {
    let (config, config_path) = Config::load_or_create()?;

    // Initialize logging; the terminal belongs to the UI, so log to a file
    let log_path = config_path.with_file_name("rf4s-link.log");
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed opening {}", log_path.display()))?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .init();
    tracing::info!(config = %config_path.display(), addr = %config.connection.address(), "starting rf4s-link");

    // Create event channel
    let (tx, mut rx) = mpsc::unbounded_channel::<Action>();

    let service = BotService::new(config.connection.clone());
    let link_tx = tx.clone();
    service.subscribe(move |event| {
        let _ = link_tx.send(Action::Link(event.clone()));
    });
    if config.connection.auto_connect {
        service.start();
    }

    // Initialize terminal
    let mut terminal = ratatui::init();

    // Spawn input handler
    let input_tx = tx.clone();
    tokio::spawn(async move {
        loop {
            if event::poll(Duration::from_millis(100)).unwrap_or(false) {
                if let Ok(Event::Key(key)) = event::read() {
                    if key.kind == KeyEventKind::Press {
                        let _ = input_tx.send(Action::KeyPress(key));
                    }
                }
            }
        }
    });

    // Create app state
    let mut app = App::new(service.get_current_status(), service.is_running());
    let mut refresh = tokio::time::interval(Duration::from_secs(1));

    // Main event loop
    let result = loop {
        // Render
        if let Err(e) = terminal.draw(|f| app.render(f)) {
            break Err(e.into());
        }

        // Process any pending actions from the app
        for pending_action in app.take_pending_actions() {
            match pending_action {
                Action::StartFishing => {
                    let sent = service.start_fishing();
                    app.command_result("start_fishing", sent);
                }
                Action::StopFishing => {
                    let sent = service.stop_fishing();
                    app.command_result("stop_fishing", sent);
                }
                Action::EmergencyStop => {
                    let sent = service.emergency_stop();
                    app.command_result("emergency_stop", sent);
                }
                Action::SetFishingMode(ref mode) => {
                    let sent = service.set_fishing_mode(mode);
                    app.command_result(&format!("set_fishing_mode {}", mode), sent);
                }
                Action::ResetSession => {
                    service.reset_session();
                    app.error_message = Some("Session reset".to_string());
                }
                Action::ToggleConnection => {
                    if service.is_running() {
                        service.stop().await;
                    } else {
                        service.start();
                    }
                    app.service_running = service.is_running();
                }
                _ => {}
            }
        }

        // Handle events from channel
        tokio::select! {
            Some(action) = rx.recv() => {
                match app.handle_action(action) {
                    Ok(should_quit) => {
                        if should_quit {
                            break Ok(());
                        }
                    }
                    Err(e) => {
                        break Err(e);
                    }
                }
            }
            _ = refresh.tick() => {
                app.refresh(service.get_current_status(), service.connection_state());
            }
        }
    };

    // Restore terminal
    ratatui::restore();
    service.stop().await;
    result
}
