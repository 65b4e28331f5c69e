// SPDX-FileCopyrightText: © 2025 CommKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Preference services manager
//!
//! Bridges per-account preference changes to the preference handlers plugins
//! register. Plugins are expected to own at most one preference handler, so
//! traversal stops at the first handler that claims a key.

use crate::manager::PluginManager;
use crate::wrapper::NativePreferenceHandler;
use commkit_core::handler::PreferenceHandler;
use commkit_plugin_sdk_native::types::PREFERENCE_HANDLER_MANAGER;
use std::collections::HashMap;
use std::os::raw::c_void;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::error;

struct HandlerEntry {
    id: usize,
    raw: *mut c_void,
    handler: Arc<dyn PreferenceHandler>,
}

// SAFETY: `raw` is only used for pointer identity; the plugin manager keeps
// the owning plugin loaded while the entry exists.
unsafe impl Send for HandlerEntry {}

/// Bridges per-account preference changes to plugin preference handlers.
pub struct PreferenceServicesManager {
    handlers: Mutex<Vec<HandlerEntry>>,
}

impl PreferenceServicesManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { handlers: Mutex::new(Vec::new()) })
    }

    /// Expose this manager's component life-cycle callbacks under the
    /// `PreferenceHandlerManager` kind. The callbacks run under the plugin
    /// manager's component mutex, so registration cannot race a concurrent
    /// load or unload.
    pub fn register_components(self: &Arc<Self>, pm: &PluginManager) {
        let manager = Arc::clone(self);
        let take_ownership = move |data: *mut c_void| -> i32 {
            if data.is_null() {
                return -1;
            }
            // SAFETY: data is a CPreferenceHandler vtable routed through
            // manageComponent; ownership transfers to the wrapper.
            match unsafe { NativePreferenceHandler::from_raw(data.cast()) } {
                Ok(handler) => {
                    if let Ok(mut handlers) = manager.handlers.lock() {
                        handlers.push(HandlerEntry {
                            id: data as usize,
                            raw: data,
                            handler: Arc::new(handler),
                        });
                        0
                    } else {
                        -1
                    }
                },
                Err(e) => {
                    error!(error = %e, "Rejected preference handler");
                    -1
                },
            }
        };

        let manager = Arc::clone(self);
        let destroy = move |data: *mut c_void| -> i32 {
            if let Ok(mut handlers) = manager.handlers.lock() {
                if let Some(position) = handlers.iter().position(|entry| entry.raw == data) {
                    handlers.remove(position);
                }
            }
            0
        };

        pm.register_component_manager(PREFERENCE_HANDLER_MANAGER, take_ownership, destroy);
    }

    /// Handler ids, as strings, in registration order.
    pub fn handlers(&self) -> Vec<String> {
        self.handlers
            .lock()
            .map(|handlers| handlers.iter().map(|entry| entry.id.to_string()).collect())
            .unwrap_or_default()
    }

    /// Details of one handler; empty for unknown ids.
    pub fn handler_details(&self, handler_id: &str) -> HashMap<String, String> {
        let Ok(id) = handler_id.parse::<usize>() else {
            return HashMap::new();
        };
        let handler = self.handlers.lock().ok().and_then(|handlers| {
            handlers.iter().find(|entry| entry.id == id).map(|entry| Arc::clone(&entry.handler))
        });
        handler.map(|handler| handler.details()).unwrap_or_default()
    }

    /// Offer an account-scoped preference change to the plugin installed at
    /// `root_path`. Stops at the first handler claiming the key. Returns
    /// true when no handler applied the change, i.e. a reload is needed.
    pub fn set_preference(
        &self,
        key: &str,
        value: &str,
        root_path: &Path,
        account_id: &str,
    ) -> bool {
        let handlers = self.handlers_under(root_path);
        for handler in handlers {
            if handler.preference_map_has_key(key) {
                handler.set_preference_attribute(account_id, key, value);
                return false;
            }
        }
        true
    }

    /// Reset stored values of every handler under `root_path` for one
    /// account.
    pub fn reset_preferences(&self, root_path: &Path, account_id: &str) {
        for handler in self.handlers_under(root_path) {
            handler.reset_preference_attributes(account_id);
        }
    }

    fn handlers_under(&self, root_path: &Path) -> Vec<Arc<dyn PreferenceHandler>> {
        self.handlers
            .lock()
            .map(|handlers| {
                handlers
                    .iter()
                    .filter(|entry| Path::new(entry.handler.id()).starts_with(root_path))
                    .map(|entry| Arc::clone(&entry.handler))
                    .collect()
            })
            .unwrap_or_default()
    }
}
