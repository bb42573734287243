use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;

use crate::error::{GovernorError, Result};
use crate::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    /// Display on, device in use
    Active,
    /// Display off
    Suspend,
}

impl FromStr for PowerEvent {
    type Err = GovernorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "active" | "resume" | "on" => Ok(Self::Active),
            "suspend" | "off" => Ok(Self::Suspend),
            other => Err(GovernorError::invalid("power event", other)),
        }
    }
}

pub type ClientId = u64;

/// Callbacks acknowledge every event; they cannot veto it.
pub type PowerCallback = Arc<dyn Fn(PowerEvent) + Send + Sync>;

/// Source of power-state transitions
pub trait PowerNotifier: Send + Sync {
    fn register(&self, callback: PowerCallback) -> Result<ClientId>;

    fn unregister(&self, client: ClientId);
}

/// In-process notifier that forwards state changes to its clients
#[derive(Default)]
pub struct StateNotifier {
    clients: Mutex<Vec<(ClientId, PowerCallback)>>,
    last: Mutex<Option<PowerEvent>>,
    next_id: AtomicU64,
}

impl StateNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every client. Repeating the current state is
    /// ignored; returns whether the event was delivered.
    pub fn notify(&self, event: PowerEvent) -> bool {
        {
            let mut last = lock(&self.last);
            if *last == Some(event) {
                return false;
            }
            *last = Some(event);
        }

        // callbacks may (un)register, so run them without the lock held
        let clients: Vec<PowerCallback> = lock(&self.clients)
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        debug!("power state {event:?} -> {} clients", clients.len());
        for callback in clients {
            callback(event);
        }
        true
    }

    pub fn clients(&self) -> usize {
        lock(&self.clients).len()
    }
}

impl PowerNotifier for StateNotifier {
    fn register(&self, callback: PowerCallback) -> Result<ClientId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.clients).push((id, callback));
        Ok(id)
    }

    fn unregister(&self, client: ClientId) {
        lock(&self.clients).retain(|(id, _)| *id != client);
    }
}
