//! Console UI
//!
//! Headless stand-in for a tray icon: prints notifications and status lines,
//! and reads commands from a line-based input (stdin in the daemon).

use std::io::BufRead;
use std::path::PathBuf;

use tokio::sync::mpsc;

use super::{UiCommand, UiEvent};
use crate::settings::{RuntimeSettings, Setting};

/// Parse a console line into a command
pub fn parse_command(line: &str) -> Option<UiCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "force-rescan" => Some(UiCommand::Toggle(Setting::ForceRescan)),
        "output-txt" => Some(UiCommand::Toggle(Setting::OutputText)),
        "notifications" => Some(UiCommand::Toggle(Setting::Notifications)),
        "run" => Some(UiCommand::RunNow),
        "exit" | "quit" => Some(UiCommand::Exit),
        _ => None,
    }
}

/// Console UI collaborator
pub struct ConsoleUi {
    settings_path: PathBuf,
    defaults: RuntimeSettings,
    notifications: bool,
    status: String,
}

impl ConsoleUi {
    pub fn new(settings_path: PathBuf, defaults: RuntimeSettings) -> Self {
        let notifications = RuntimeSettings::load_or(&settings_path, defaults)
            .unwrap_or(defaults)
            .notifications;
        Self {
            settings_path,
            defaults,
            notifications,
            status: "OCR starting...".to_string(),
        }
    }

    /// Current status line
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Show an event. Returns `true` when a notification was displayed.
    pub fn handle_event(&mut self, event: UiEvent) -> bool {
        match event {
            UiEvent::StatusChanged(status) => {
                println!("{}", status);
                self.status = status;
                false
            }
            UiEvent::Notify { message, urgent } => {
                if urgent || self.notifications {
                    println!("[OCR] {}", message);
                    true
                } else {
                    tracing::warn!("{}", message);
                    false
                }
            }
        }
    }

    /// Apply a command. Setting toggles are persisted here and never leave
    /// the console; only `RunNow` and `Exit` are handed back to the daemon.
    pub fn handle_command(&mut self, command: UiCommand) -> Option<UiCommand> {
        match command {
            UiCommand::Toggle(setting) => {
                self.toggle(setting);
                None
            }
            UiCommand::RunNow | UiCommand::Exit => Some(command),
        }
    }

    fn toggle(&mut self, setting: Setting) {
        let mut settings = match RuntimeSettings::load_or(&self.settings_path, self.defaults) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::error!("Cannot toggle {:?}: {}", setting, e);
                return;
            }
        };

        let enabled = settings.toggle(setting);
        if let Err(e) = settings.save(&self.settings_path) {
            tracing::error!("Failed to persist {:?}: {}", setting, e);
            return;
        }

        if setting == Setting::Notifications {
            self.notifications = enabled;
        }
        println!("{:?}: {}", setting, if enabled { "on" } else { "off" });
    }

    /// Drive the UI until the event channel closes
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<UiEvent>,
        mut lines: mpsc::UnboundedReceiver<String>,
        control: mpsc::UnboundedSender<UiCommand>,
    ) {
        let mut input_open = true;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        self.handle_event(event);
                    }
                    None => break,
                },
                line = lines.recv(), if input_open => match line {
                    Some(line) => match parse_command(&line) {
                        Some(command) => {
                            if let Some(forward) = self.handle_command(command) {
                                if control.send(forward).is_err() {
                                    break;
                                }
                            }
                        }
                        None if line.trim().is_empty() => {}
                        None => println!(
                            "Unknown command {:?} (force-rescan, output-txt, notifications, run, exit)",
                            line.trim()
                        ),
                    },
                    None => input_open = false,
                },
            }
        }

        tracing::debug!("Console UI stopped");
    }
}

/// Read stdin lines on a dedicated thread. A blocking read cannot be
/// cancelled, so it must stay off the runtime.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("console-input".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Console input closed: {}", e);
                        break;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!("Console input unavailable: {}", e);
    }
    rx
}
