// SPDX-FileCopyrightText: © 2025 CommKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Chat services manager
//!
//! Bridges per-conversation message streams with the chat handlers plugins
//! register, and records user intent in persisted allow/deny lists so a
//! handler activated on a conversation reactivates on future messages even
//! across plugin reloads and host restarts.

use crate::manager::PluginManager;
use crate::preferences::PreferenceStore;
use crate::wrapper::NativeChatHandler;
use commkit_core::handler::{details, ChatHandler};
use commkit_core::subject::ChatSubject;
use commkit_core::types::{ChatMessage, ConversationKey};
use commkit_plugin_sdk_native::conversions;
use commkit_plugin_sdk_native::types::{CHAT_HANDLER_MANAGER, SERVICE_SEND_TEXT_MESSAGE};
use std::collections::{BTreeSet, HashMap};
use std::os::raw::c_void;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{error, warn};

/// Host messaging entry point behind the `sendTextMessage` service.
pub trait Messenger: Send + Sync {
    fn send_text_message(
        &self,
        account_id: &str,
        peer_id: &str,
        body: HashMap<String, String>,
        from_plugin: bool,
    );
}

struct HandlerEntry {
    id: usize,
    raw: *mut c_void,
    name: String,
    handler: Arc<dyn ChatHandler>,
}

// SAFETY: `raw` is only used for pointer identity; the plugin manager keeps
// the owning plugin loaded while the entry exists.
unsafe impl Send for HandlerEntry {}

#[derive(Default)]
struct ChatState {
    handlers: Vec<HandlerEntry>,
    toggled: HashMap<ConversationKey, BTreeSet<usize>>,
    subjects: HashMap<ConversationKey, Arc<ChatSubject>>,
    allow: HashMap<ConversationKey, BTreeSet<String>>,
    deny: HashMap<ConversationKey, BTreeSet<String>>,
}

/// Bridges per-conversation message streams with plugin chat handlers.
pub struct ChatServicesManager {
    state: Mutex<ChatState>,
    store: Arc<PreferenceStore>,
}

impl ChatServicesManager {
    pub fn new(store: Arc<PreferenceStore>) -> Arc<Self> {
        Arc::new(Self { state: Mutex::new(ChatState::default()), store })
    }

    /// Expose this manager's component life-cycle callbacks under the
    /// `ChatHandlerManager` kind.
    pub fn register_components(self: &Arc<Self>, pm: &PluginManager) {
        let manager = Arc::clone(self);
        let take_ownership = move |data: *mut c_void| -> i32 {
            if data.is_null() {
                return -1;
            }
            // SAFETY: data is a CChatHandler vtable routed through
            // manageComponent; ownership transfers to the wrapper.
            match unsafe { NativeChatHandler::from_raw(data.cast()) } {
                Ok(handler) => manager.add_handler(data, Arc::new(handler)),
                Err(e) => {
                    error!(error = %e, "Rejected chat handler");
                    -1
                },
            }
        };

        let manager = Arc::clone(self);
        let destroy = move |data: *mut c_void| -> i32 {
            manager.remove_handler(data);
            0
        };

        pm.register_component_manager(CHAT_HANDLER_MANAGER, take_ownership, destroy);
    }

    /// Register the `sendTextMessage` service plugins use to inject a
    /// message into a conversation as if the local user sent it.
    pub fn register_chat_service(pm: &PluginManager, messenger: Arc<dyn Messenger>) {
        pm.register_service(SERVICE_SEND_TEXT_MESSAGE, move |_caller, data| {
            if data.is_null() {
                return -1;
            }
            // SAFETY: the service contract makes data a *const CChatMessage
            // valid for the duration of the call.
            match unsafe { conversions::chat_message_from_c(data.cast()) } {
                Ok(message) => {
                    messenger.send_text_message(
                        &message.account_id,
                        &message.peer_id,
                        message.body,
                        true,
                    );
                    0
                },
                Err(e) => {
                    error!(error = %e, "sendTextMessage with malformed payload");
                    -1
                },
            }
        });
    }

    fn add_handler(&self, raw: *mut c_void, handler: Arc<dyn ChatHandler>) -> i32 {
        let handler_details = handler.details();
        let Some(name) = handler_details.get(details::NAME).cloned() else {
            error!("Chat handler without a name");
            return -1;
        };

        {
            let Ok(mut state) = self.state.lock() else { return -1 };
            if state.handlers.iter().any(|entry| entry.name == name) {
                error!(name = %name, "A chat handler with this name is already registered");
                return -1;
            }
            state.handlers.push(HandlerEntry {
                id: raw as usize,
                raw,
                name: name.clone(),
                handler: Arc::clone(&handler),
            });
        }

        // Every chat handler gets an always-preference so it can opt into
        // auto-activation on new conversations.
        let root = handler_root(handler.id());
        if let Err(e) = self.store.ensure_always_preference(&name, &root) {
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

            let ChatState { toggled, subjects, allow, deny, .. } = &mut *state;
            for (key, handlers) in toggled.iter_mut() {
                if handlers.remove(&entry.id) {
                    if let Some(subject) = subjects.get(key) {
                        entry.handler.detach(subject);
                    }
                }
            }
            // In-memory only: the persisted lists survive so the handler
            // reactivates when the plugin comes back.
            for names in allow.values_mut() {
                names.remove(&entry.name);
            }
            for names in deny.values_mut() {
                names.remove(&entry.name);
            }
            entry
        };
        drop(removed);
    }

    /// Entry point for every incoming or outgoing chat message. Messages
    /// originating from plugins are dropped to prevent loops. Handlers are
    /// attached according to `(always ∨ allow ∨ active) ∧ ¬deny`, then the
    /// message is published on the conversation subject.
    pub fn publish_message(&self, message: &mut ChatMessage) {
        if message.from_plugin {
            return;
        }
        let key = message.conversation();

        let Ok(mut state) = self.state.lock() else { return };
        let ChatState { handlers, toggled, subjects, allow, deny } = &mut *state;

        let mut lists_changed = false;
        for entry in handlers.iter() {
            let name = &entry.name;
            let root = handler_root(entry.handler.id());
            let always = self.store.always_preference(&root, name);
            let allowed = allow.get(&key).is_some_and(|names| names.contains(name));
            let denied = deny.get(&key).is_some_and(|names| names.contains(name));
            let active = toggled.get(&key).is_some_and(|ids| ids.contains(&entry.id));

            if (always || allowed || active) && !denied {
                let subject = subjects
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(ChatSubject::new()))
                    .clone();
                // The wrapper ignores repeated notifications for the same
                // subject, so this also reattaches handlers whose subject
                // was cleaned and lazily recreated.
                entry.handler.notify_chat_subject(&key, &subject);
                toggled.entry(key.clone()).or_default().insert(entry.id);
                if allow.entry(key.clone()).or_default().insert(name.clone()) {
                    lists_changed = true;
                }
            }
        }

        if lists_changed {
            self.persist_lists(allow, deny);
        }

        if let Some(subject) = subjects.get(&key) {
            subject.publish(message);
        }
    }

    /// Toggle a handler on or off for one conversation and persist the
    /// updated allow/deny lists. Unknown ids are a silent no-op.
    pub fn toggle_chat_handler(
        &self,
        handler_id: &str,
        account_id: &str,
        peer_id: &str,
        on: bool,
    ) {
        let Ok(id) = handler_id.parse::<usize>() else {
            warn!(handler_id, "Malformed chat handler id");
            return;
        };
        let key = ConversationKey::new(account_id, peer_id);

        let Ok(mut state) = self.state.lock() else { return };
        let ChatState { handlers, toggled, subjects, allow, deny } = &mut *state;
        let Some(entry) = handlers.iter().find(|entry| entry.id == id) else {
            return;
        };

        let subject =
            subjects.entry(key.clone()).or_insert_with(|| Arc::new(ChatSubject::new())).clone();

        if on {
            entry.handler.notify_chat_subject(&key, &subject);
            toggled.entry(key.clone()).or_default().insert(entry.id);
            allow.entry(key.clone()).or_default().insert(entry.name.clone());
            if let Some(names) = deny.get_mut(&key) {
                names.remove(&entry.name);
            }
        } else {
            entry.handler.detach(&subject);
            if let Some(ids) = toggled.get_mut(&key) {
                ids.remove(&entry.id);
            }
            if let Some(names) = allow.get_mut(&key) {
                names.remove(&entry.name);
            }
            deny.entry(key.clone()).or_default().insert(entry.name.clone());
        }

        self.persist_lists(allow, deny);
    }

    /// Drop conversation subjects for an account, or for one conversation
    /// when `peer_id` is given. Allow/deny lists outlive subjects.
    pub fn clean_chat_subjects(&self, account_id: &str, peer_id: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.subjects.retain(|key, _| {
                if peer_id.is_empty() {
                    key.account_id != account_id
                } else {
                    key.account_id != account_id || key.peer_id != peer_id
                }
            });
        }
    }

    /// Handler ids, as strings, in registration order.
    pub fn chat_handlers(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|state| state.handlers.iter().map(|entry| entry.id.to_string()).collect())
            .unwrap_or_default()
    }

    /// Ids of the handlers allow-listed on one conversation.
    pub fn chat_handler_status(&self, account_id: &str, peer_id: &str) -> Vec<String> {
        let key = ConversationKey::new(account_id, peer_id);
        self.state
            .lock()
            .map(|state| {
                state
                    .allow
                    .get(&key)
                    .map(|names| {
                        names
                            .iter()
                            .filter_map(|name| {
                                state
                                    .handlers
                                    .iter()
                                    .find(|entry| &entry.name == name)
                                    .map(|entry| entry.id.to_string())
                            })
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Details of one handler; empty for unknown ids.
    pub fn chat_handler_details(&self, handler_id: &str) -> HashMap<String, String> {
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

    /// Forward a preference change to every handler named in `scope`.
    /// Returns true when no handler could apply the change live.
    pub fn set_preference(&self, key: &str, value: &str, scope: &str) -> bool {
        let handlers: Vec<Arc<dyn ChatHandler>> = {
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

    /// Read the persisted allow/deny lists, typically once at startup.
    /// A missing store file yields empty lists.
    pub fn load_allow_deny_lists(&self) {
        let stored = self.store.load_chat_activations();
        let Ok(mut state) = self.state.lock() else { return };
        state.allow.clear();
        state.deny.clear();
        for (key, handlers) in stored {
            for (name, allowed) in handlers {
                let lists = if allowed { &mut state.allow } else { &mut state.deny };
                lists.entry(key.clone()).or_default().insert(name);
            }
        }
    }

    fn persist_lists(
        &self,
        allow: &HashMap<ConversationKey, BTreeSet<String>>,
        deny: &HashMap<ConversationKey, BTreeSet<String>>,
    ) {
        let mut combined: HashMap<ConversationKey, HashMap<String, bool>> = HashMap::new();
        for (key, names) in allow {
            let entry = combined.entry(key.clone()).or_default();
            for name in names {
                entry.insert(name.clone(), true);
            }
        }
        for (key, names) in deny {
            let entry = combined.entry(key.clone()).or_default();
            for name in names {
                entry.insert(name.clone(), false);
            }
        }
        if let Err(e) = self.store.save_chat_activations(&combined) {
            error!(error = %e, "Could not persist chat allow/deny lists");
        }
    }
}

/// Plugin installation root derived from a handler's data path.
fn handler_root(data_path: &str) -> std::path::PathBuf {
    Path::new(data_path).parent().map_or_else(|| Path::new(data_path).to_path_buf(), Path::to_path_buf)
}
