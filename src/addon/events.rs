//! Notifications from the addon manager to the host.
//!
//! The manager never assumes who is listening: every subscriber gets its own
//! channel and disconnected subscribers are dropped on the next emit.

use std::sync::mpsc::{self, Receiver, Sender};

use serde::{Deserialize, Serialize};

/// Severity of a toast message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastLevel {
    Info,
    Success,
    Error,
}

/// Event emitted by the addon manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ManagerEvent {
    /// A record was added to the registry.
    Loaded { id: String },
    /// `start()` succeeded.
    Started { id: String },
    /// `stop()` succeeded.
    Stopped { id: String },
    /// A record was rebuilt in place.
    Reloaded { id: String },
    /// A record was removed.
    Unloaded { id: String },
    /// Host navigation, emitted before addons are notified.
    PageSwitch,
    /// User-facing message.
    Toast { level: ToastLevel, message: String },
}

/// Fan-out of [`ManagerEvent`]s to subscribers.
#[derive(Debug, Default)]
pub struct EventEmitter {
    subscribers: Vec<Sender<ManagerEvent>>,
}

impl EventEmitter {
    /// Creates an emitter with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber and returns its receiving end.
    pub fn subscribe(&mut self) -> Receiver<ManagerEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Sends an event to every live subscriber.
    pub fn emit(&mut self, event: ManagerEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Emits a toast.
    pub fn toast(&mut self, level: ToastLevel, message: impl Into<String>) {
        self.emit(ManagerEvent::Toast {
            level,
            message: message.into(),
        });
    }

    /// Number of live subscribers (as of the last emit).
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
