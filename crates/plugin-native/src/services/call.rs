// SPDX-FileCopyrightText: © 2025 CommKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Call services manager
//!
//! Bridges per-call frame subjects with the call media handlers plugins
//! register. Subjects are tracked weakly per call id; handlers attach either
//! on user request (toggle) or automatically when their always-preference is
//! set, and reattach when a subject is recreated mid-call.

use crate::manager::PluginManager;
use crate::preferences::PreferenceStore;
use crate::wrapper::NativeCallMediaHandler;
use commkit_core::handler::{detail_flag, details, CallMediaHandler};
use commkit_core::subject::AvSubject;
use commkit_core::types::{StreamData, StreamType};
use commkit_plugin_sdk_native::types::CALL_MEDIA_HANDLER_MANAGER;
use std::collections::{BTreeSet, HashMap};
use std::os::raw::c_void;
use std::path::Path;
use std::sync::{Arc, Mutex, Weak};
use tracing::{error, warn};

/// Asks the call layer to restart the video RTP sender of a call, needed to
/// relink encoder and decoder when a video filter joins or leaves.
pub type SenderRestartHook = Box<dyn Fn(&str) + Send + Sync>;

struct HandlerEntry {
    /// Handler id exposed through the API; derived from the vtable address.
    id: usize,
    raw: *mut c_void,
    name: String,
    handler: Arc<dyn CallMediaHandler>,
}

// SAFETY: `raw` is only used for pointer identity; the pluginmanager keeps
// the owning plugin loaded while the entry exists.
unsafe impl Send for HandlerEntry {}

#[derive(Default)]
struct CallState {
    /// Handlers in registration order; notification follows this order.
    handlers: Vec<HandlerEntry>,
    /// Frame subjects in creation order, weakly held per call.
    subjects: Vec<(StreamData, Weak<AvSubject>)>,
    /// Per call id, the handlers the user (or the always-preference) turned on.
    toggled: HashMap<String, BTreeSet<usize>>,
}

/// Bridges per-call frame subjects with plugin call media handlers.
pub struct CallServicesManager {
    state: Mutex<CallState>,
    store: Arc<PreferenceStore>,
    restart_hook: Mutex<Option<SenderRestartHook>>,
}

impl CallServicesManager {
    pub fn new(store: Arc<PreferenceStore>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CallState::default()),
            store,
            restart_hook: Mutex::new(None),
        })
    }

    /// Install the hook invoked when a video handler toggles on a video
    /// stream. Not called on Android, where the sender relinks itself.
    pub fn set_sender_restart_hook(&self, hook: SenderRestartHook) {
        if let Ok(mut slot) = self.restart_hook.lock() {
            *slot = Some(hook);
        }
    }

    /// Expose this manager's component life-cycle callbacks to the plugin
    /// manager under the `CallMediaHandlerManager` kind.
    pub fn register_components(self: &Arc<Self>, pm: &PluginManager) {
        let manager = Arc::clone(self);
        let take_ownership = move |data: *mut c_void| -> i32 {
            if data.is_null() {
                return -1;
            }
            // SAFETY: data is a CCallMediaHandler vtable routed through
            // manageComponent; ownership transfers to the wrapper.
            match unsafe { NativeCallMediaHandler::from_raw(data.cast()) } {
                Ok(handler) => manager.add_handler(data, Arc::new(handler)),
                Err(e) => {
                    error!(error = %e, "Rejected call media handler");
                    -1
                },
            }
        };

        let manager = Arc::clone(self);
        let destroy = move |data: *mut c_void| -> i32 {
            manager.remove_handler(data);
            0
        };

        pm.register_component_manager(CALL_MEDIA_HANDLER_MANAGER, take_ownership, destroy);
    }

    fn add_handler(&self, raw: *mut c_void, handler: Arc<dyn CallMediaHandler>) -> i32 {
        let name = handler.details().get(details::NAME).cloned().unwrap_or_default();
        {
            let Ok(mut state) = self.state.lock() else { return -1 };
            if state.handlers.iter().any(|entry| entry.name == name) {
                error!(name = %name, "A call media handler with this name is already registered");
                return -1;
            }
            state.handlers.push(HandlerEntry {
                id: raw as usize,
                raw,
                name: name.clone(),
                handler: Arc::clone(&handler),
            });
        }

        // Every call media handler gets an always-preference so it can opt
        // into auto-activation on new calls.
        let data_path = handler.id().to_string();
        let root = Path::new(&data_path).parent().unwrap_or_else(|| Path::new(&data_path));
        if let Err(e) = self.store.ensure_always_preference(&name, root) {
            warn!(name = %name, error = %e, "Could not inject always-preference");
        }
        0
    }

    fn remove_handler(&self, raw: *mut c_void) {
        let removed = {
            let Ok(mut state) = self.state.lock() else { return };
            let Some(position) = state.handlers.iter().position(|entry| entry.raw == raw) else {
                return;
            };
            let entry = state.handlers.remove(position);

            // Detach from every call the handler is still active on.
            let CallState { subjects, toggled, .. } = &mut *state;
            for (data, subject) in subjects.iter() {
                let active = toggled
                    .get(&data.call_id)
                    .is_some_and(|handlers| handlers.contains(&entry.id));
                if active {
                    if let Some(subject) = subject.upgrade() {
                        entry.handler.detach(&subject);
                    }
                }
            }
            for handlers in toggled.values_mut() {
                handlers.remove(&entry.id);
            }
            entry
        };
        // Dropping the wrapper releases the plugin object; do it outside the
        // state lock.
        drop(removed);
    }

    /// Record a new frame subject and auto-attach handlers: those whose
    /// always-preference is set, and those already toggled on this call
    /// (reactivation after subject recreation).
    pub fn create_av_subject(&self, data: StreamData, subject: Weak<AvSubject>) {
        let candidates: Vec<(usize, String, String)> = {
            let Ok(mut state) = self.state.lock() else { return };
            state.subjects.push((data.clone(), subject));
            state
                .handlers
                .iter()
                .map(|entry| (entry.id, entry.name.clone(), entry.handler.id().to_string()))
                .collect()
        };

        for (id, name, data_path) in candidates {
            let root = Path::new(&data_path).parent().unwrap_or_else(|| Path::new(&data_path));
            if self.store.always_preference(root, &name) {
                self.toggle_by_id(id, &data.call_id, true);
            } else {
                let toggled = self
                    .state
                    .lock()
                    .map(|state| {
                        state
                            .toggled
                            .get(&data.call_id)
                            .is_some_and(|handlers| handlers.contains(&id))
                    })
                    .unwrap_or(false);
                if toggled {
                    self.toggle_by_id(id, &data.call_id, true);
                }
            }
        }
    }

    /// Drop every subject recorded for `call_id`.
    pub fn clear_av_subject(&self, call_id: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.subjects.retain(|(data, _)| data.call_id != call_id);
        }
    }

    /// Handler ids, as strings, in registration order.
    pub fn call_media_handlers(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|state| state.handlers.iter().map(|entry| entry.id.to_string()).collect())
            .unwrap_or_default()
    }

    /// Active handler ids for one call.
    pub fn call_media_handler_status(&self, call_id: &str) -> Vec<String> {
        self.state
            .lock()
            .map(|state| {
                state
                    .toggled
                    .get(call_id)
                    .map(|handlers| handlers.iter().map(ToString::to_string).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Details of one handler; empty for unknown ids.
    pub fn call_media_handler_details(&self, handler_id: &str) -> HashMap<String, String> {
        let Ok(id) = handler_id.parse::<usize>() else {
            return HashMap::new();
        };
        let handler = self.state.lock().ok().and_then(|state| {
            state
                .handlers
                .iter()
                .find(|entry| entry.id == id)
                .map(|entry| Arc::clone(&entry.handler))
        });
        handler.map(|handler| handler.details()).unwrap_or_default()
    }

    /// Toggle a handler on or off for one call. Unknown ids are a silent
    /// no-op.
    pub fn toggle_call_media_handler(&self, handler_id: &str, call_id: &str, on: bool) {
        let Ok(id) = handler_id.parse::<usize>() else {
            warn!(handler_id, "Malformed call media handler id");
            return;
        };
        self.toggle_by_id(id, call_id, on);
    }

    fn toggle_by_id(&self, handler_id: usize, call_id: &str, on: bool) {
        let mut restart_sender = false;
        {
            let Ok(mut state) = self.state.lock() else { return };
            let CallState { handlers, subjects, toggled } = &mut *state;
            let Some(entry) = handlers.iter().find(|entry| entry.id == handler_id) else {
                return;
            };
            let active = toggled.entry(call_id.to_string()).or_default();

            // Subjects are processed in insertion order; expired ones are
            // swept on the way.
            subjects.retain(|(data, subject)| {
                if data.call_id != call_id {
                    return true;
                }
                let Some(subject) = subject.upgrade() else {
                    return false;
                };
                if on {
                    entry.handler.notify_av_frame_subject(data, &subject);
                    if detail_flag(&entry.handler.details(), details::ATTACHED) {
                        active.insert(handler_id);
                    }
                } else {
                    entry.handler.detach(&subject);
                    active.remove(&handler_id);
                }
                if data.stream_type == StreamType::Video
                    && detail_flag(&entry.handler.details(), details::DATA_TYPE)
                {
                    restart_sender = true;
                }
                true
            });
        }

        // When a handler consumes hardware frames and converts them to main
        // memory, the sender must restart to unlink encoder and decoder;
        // deactivation restarts it again to relink them.
        #[cfg(not(target_os = "android"))]
        if restart_sender {
            if let Ok(hook) = self.restart_hook.lock() {
                if let Some(hook) = hook.as_ref() {
                    hook(call_id);
                }
            }
        }
        #[cfg(target_os = "android")]
        let _ = restart_sender;
    }

    /// Forward a preference change to every handler named in `scope`.
    /// Returns true when no handler could apply the change live, i.e. the
    /// plugin needs a reload for the change to take effect.
    pub fn set_preference(&self, key: &str, value: &str, scope: &str) -> bool {
        let handlers: Vec<Arc<dyn CallMediaHandler>> = {
            let Ok(state) = self.state.lock() else { return true };
            state
                .handlers
                .iter()
                .filter(|entry| scope.contains(entry.name.as_str()))
                .map(|entry| Arc::clone(&entry.handler))
                .collect()
        };

        let mut reload_needed = true;
        for handler in handlers {
            if handler.preference_map_has_key(key) {
                handler.set_preference_attribute(key, value);
                reload_needed = false;
            }
        }
        reload_needed
    }
}
