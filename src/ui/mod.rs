//! UI messaging
//!
//! The pipeline never touches UI state directly. It emits [`UiEvent`]s
//! through a [`Notifier`]; the UI collaborator answers with [`UiCommand`]s.

mod console;

pub use console::{parse_command, spawn_stdin_reader, ConsoleUi};

use tokio::sync::mpsc;

use crate::settings::Setting;

/// Longest message a desktop notification can carry
pub const MAX_NOTIFICATION_LEN: usize = 255;

/// Events flowing from the pipeline to the UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    /// Status line changed (e.g. next scheduled run)
    StatusChanged(String),
    /// User-facing notification
    Notify { message: String, urgent: bool },
}

/// Commands flowing from the UI to the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiCommand {
    /// Flip a persisted setting
    Toggle(Setting),
    /// Start a run now
    RunNow,
    /// Shut the daemon down
    Exit,
}

/// Notification sink. Fire-and-forget: implementations must not block.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str, urgent: bool);

    /// Publish a new status line
    fn status(&self, _status: &str) {}
}

/// Notifier that only writes to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, message: &str, urgent: bool) {
        if urgent {
            tracing::warn!("{}", message);
        } else {
            tracing::info!("{}", message);
        }
    }

    fn status(&self, status: &str) {
        tracing::info!("{}", status);
    }
}

/// Notifier that forwards events to the UI task
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<UiEvent>,
}

impl ChannelNotifier {
    pub fn new(tx: mpsc::UnboundedSender<UiEvent>) -> Self {
        Self { tx }
    }

    fn send(&self, event: UiEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("UI task is gone, dropping event");
        }
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, message: &str, urgent: bool) {
        self.send(UiEvent::Notify {
            message: truncate_message(message),
            urgent,
        });
    }

    fn status(&self, status: &str) {
        self.send(UiEvent::StatusChanged(status.to_string()));
    }
}

/// Cut a message to the notification limit on a char boundary
pub fn truncate_message(message: &str) -> String {
    message.chars().take(MAX_NOTIFICATION_LEN).collect()
}
