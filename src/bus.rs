//! Named event bus and plugin registry — the collaborator boundary.
//!
//! The core emits `start` and `stop` lifecycle events and a `track` event
//! per admitted custom event.  Plugins install exactly once per name;
//! duplicate installation is a warning, and uninstall hooks run on explicit
//! removal and on core shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

pub type SubscriptionId = u64;
pub type EventCallback = dyn Fn(&serde_json::Value) + Send + Sync;

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct EventBus {
    handlers: Mutex<HashMap<String, Vec<(SubscriptionId, Arc<EventCallback>)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus::default()
    }

    pub fn on(&self, event: &str, callback: Arc<EventCallback>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.entry(event.to_owned()).or_default().push((id, callback));
        }
        id
    }

    /// Remove one subscription by id, or all subscriptions for the event
    /// when no id is given.
    pub fn off(&self, event: &str, id: Option<SubscriptionId>) {
        let Ok(mut handlers) = self.handlers.lock() else {
            return;
        };
        match (handlers.get_mut(event), id) {
            (Some(subs), Some(id)) => subs.retain(|(sub_id, _)| *sub_id != id),
            (Some(_), None) => {
                handlers.remove(event);
            }
            (None, _) => {}
        }
    }

    pub fn emit(&self, event: &str, data: &serde_json::Value) {
        let snapshot: Vec<Arc<EventCallback>> = match self.handlers.lock() {
            Ok(handlers) => handlers
                .get(event)
                .map(|subs| subs.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default(),
            Err(_) => return,
        };
        for callback in snapshot {
            callback(data);
        }
    }
}

// ---------------------------------------------------------------------------
// Plugins
// ---------------------------------------------------------------------------

pub type PluginHook = dyn Fn() + Send + Sync;

/// A plugin: installed exactly once per name.
pub struct Plugin {
    pub name: String,
    pub version: String,
    /// Runs once at installation, with the bus for subscriptions.
    pub install: Box<dyn Fn(&EventBus) + Send + Sync>,
    /// Runs on explicit removal and on core shutdown.
    pub uninstall: Option<Box<PluginHook>>,
}

struct InstalledPlugin {
    name: String,
    version: String,
    uninstall: Option<Box<PluginHook>>,
}

#[derive(Default)]
pub struct PluginRegistry {
    installed: Mutex<Vec<InstalledPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        PluginRegistry::default()
    }

    /// Install a plugin; a duplicate name is a warning and a no-op.
    pub fn install(&self, plugin: Plugin, bus: &EventBus) {
        {
            let installed = match self.installed.lock() {
                Ok(installed) => installed,
                Err(_) => return,
            };
            if installed.iter().any(|p| p.name == plugin.name) {
                warn!(name = %plugin.name, "plugin already installed");
                return;
            }
        }
        (plugin.install)(bus);
        if let Ok(mut installed) = self.installed.lock() {
            installed.push(InstalledPlugin {
                name: plugin.name,
                version: plugin.version,
                uninstall: plugin.uninstall,
            });
        }
    }

    /// Remove a plugin by name, running its uninstall hook.
    pub fn remove(&self, name: &str) {
        let entry = {
            let Ok(mut installed) = self.installed.lock() else {
                return;
            };
            match installed.iter().position(|p| p.name == name) {
                Some(idx) => installed.remove(idx),
                None => {
                    warn!(name, "plugin not installed");
                    return;
                }
            }
        };
        if let Some(uninstall) = entry.uninstall {
            uninstall();
        }
    }

    /// Uninstall everything, in reverse installation order.
    pub fn shutdown(&self) {
        let drained: Vec<InstalledPlugin> = match self.installed.lock() {
            Ok(mut installed) => installed.drain(..).collect(),
            Err(_) => return,
        };
        for plugin in drained.into_iter().rev() {
            if let Some(uninstall) = plugin.uninstall {
                uninstall();
            }
        }
    }

    pub fn installed_names(&self) -> Vec<(String, String)> {
        match self.installed.lock() {
            Ok(installed) => installed
                .iter()
                .map(|p| (p.name.clone(), p.version.clone()))
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}
