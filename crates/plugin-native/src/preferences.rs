// SPDX-FileCopyrightText: © 2025 CommKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Plugin preference store
//!
//! Reads the preference descriptors a plugin ships in
//! `data/preferences.json`, persists user-chosen values as a packed
//! MessagePack map per plugin (and optionally per account), and keeps the
//! chat handlers' allow/deny lists. Every file has its own mutex; writes
//! replace the whole file atomically via a temp-file rename.

use commkit_core::error::{CommKitError, Result};
use commkit_core::types::ConversationKey;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{error, warn};

/// Preference descriptor fields used by the subsystem itself.
pub mod descriptor {
    pub const KEY: &str = "key";
    pub const TYPE: &str = "type";
    pub const DEFAULT_VALUE: &str = "defaultValue";
    pub const TITLE: &str = "title";
    pub const SUMMARY: &str = "summary";
    /// Descriptor type whose default value resolves against the plugin root.
    pub const TYPE_PATH: &str = "Path";
    pub const TYPE_SWITCH: &str = "Switch";
}

/// Per-conversation record of handler activation intent. Maps handler name
/// to `true` (allow) or `false` (deny).
pub type ChatActivationMap = HashMap<ConversationKey, HashMap<String, bool>>;

#[derive(Serialize, Deserialize)]
struct StoredActivation {
    account_id: String,
    peer_id: String,
    handlers: HashMap<String, bool>,
}

/// Persistent store for plugin preferences and chat activation lists.
pub struct PreferenceStore {
    plugins_dir: PathBuf,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PreferenceStore {
    /// `data_dir` is the host's per-user data directory; plugins install
    /// under `<data_dir>/plugins/<name>/`.
    pub fn new(data_dir: &Path) -> Self {
        Self { plugins_dir: data_dir.join("plugins"), locks: Mutex::new(HashMap::new()) }
    }

    /// Directory all plugins install under.
    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    /// Path of a plugin's descriptor file.
    pub fn preferences_config_path(root_path: &Path) -> PathBuf {
        root_path.join("data").join("preferences.json")
    }

    /// Path of a plugin's packed value file, per account when given.
    pub fn values_path(root_path: &Path, account_id: Option<&str>) -> PathBuf {
        match account_id {
            None => root_path.join("preferences.msgpack"),
            Some(account_id) => root_path.join(format!("preferences_{account_id}.msgpack")),
        }
    }

    fn allow_deny_path(&self) -> PathBuf {
        self.plugins_dir.join("allowdeny.msgpack")
    }

    /// Parse the preference descriptors of the plugin installed at
    /// `root_path`. Entries without `key` and `type` are skipped, duplicate
    /// keys are dropped, `Path` defaults are resolved against the plugin
    /// root, and arrays are flattened by joining with commas. A missing or
    /// unparsable file yields no descriptors.
    pub fn preferences(&self, root_path: &Path) -> Vec<HashMap<String, String>> {
        let path = Self::preferences_config_path(root_path);
        let Some(bytes) = self.read_locked(&path) else {
            return Vec::new();
        };

        let root: serde_json::Value = match serde_json::from_slice(&bytes) {
            Ok(root) => root,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to parse preferences.json");
                return Vec::new();
            },
        };
        let Some(entries) = root.as_array() else {
            error!(path = %path.display(), "preferences.json is not an array");
            return Vec::new();
        };

        let mut seen_keys = HashSet::new();
        let mut preferences = Vec::new();
        for entry in entries {
            let Some(object) = entry.as_object() else { continue };
            let key = object.get(descriptor::KEY).and_then(serde_json::Value::as_str);
            let kind = object.get(descriptor::TYPE).and_then(serde_json::Value::as_str);
            let (Some(key), Some(kind)) = (key, kind) else {
                continue; // A preference needs at least a key and a type.
            };
            if !seen_keys.insert(key.to_string()) {
                continue;
            }

            let mut preference = HashMap::new();
            for (field, value) in object {
                match value {
                    serde_json::Value::String(s) => {
                        preference.insert(field.clone(), s.clone());
                    },
                    serde_json::Value::Array(_) => {
                        preference.insert(field.clone(), flatten_array(value));
                    },
                    _ => {},
                }
            }

            // A Path default is an incomplete path starting from the
            // plugin's installation root.
            if kind == descriptor::TYPE_PATH {
                if let Some(default) = preference.get_mut(descriptor::DEFAULT_VALUE) {
                    *default = root_path.join(default.as_str()).to_string_lossy().into_owned();
                }
            }

            preferences.push(preference);
        }
        preferences
    }

    /// Values the user changed away from the defaults. Missing or corrupt
    /// files fall back to the empty map.
    pub fn user_preferences_values(
        &self,
        root_path: &Path,
        account_id: Option<&str>,
    ) -> HashMap<String, String> {
        let path = Self::values_path(root_path, account_id);
        let Some(bytes) = self.read_locked(&path) else {
            return HashMap::new();
        };
        if bytes.is_empty() {
            return HashMap::new();
        }
        match rmp_serde::from_slice(&bytes) {
            Ok(values) => values,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Corrupt preference values file");
                HashMap::new()
            },
        }
    }

    /// Effective values: descriptor defaults overridden by the plugin value
    /// file, overridden by the per-account file when an account is given.
    pub fn preferences_values(
        &self,
        root_path: &Path,
        account_id: Option<&str>,
    ) -> HashMap<String, String> {
        let mut values = HashMap::new();
        for preference in self.preferences(root_path) {
            if let Some(key) = preference.get(descriptor::KEY) {
                values.insert(
                    key.clone(),
                    preference.get(descriptor::DEFAULT_VALUE).cloned().unwrap_or_default(),
                );
            }
        }
        for (key, value) in self.user_preferences_values(root_path, None) {
            values.insert(key, value);
        }
        if account_id.is_some() {
            for (key, value) in self.user_preferences_values(root_path, account_id) {
                values.insert(key, value);
            }
        }
        values
    }

    /// Replace the stored value map atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the file replacement fails; the
    /// previous file content is preserved in that case.
    pub fn save_user_preferences_values(
        &self,
        root_path: &Path,
        account_id: Option<&str>,
        values: &HashMap<String, String>,
    ) -> Result<()> {
        let bytes = rmp_serde::to_vec(values)
            .map_err(|e| CommKitError::Serialization(e.to_string()))?;
        self.write_locked(&Self::values_path(root_path, account_id), &bytes)
    }

    /// Reset stored values to the defaults by writing the empty map.
    ///
    /// # Errors
    ///
    /// See [`save_user_preferences_values`](Self::save_user_preferences_values).
    pub fn reset_preferences_values(
        &self,
        root_path: &Path,
        account_id: Option<&str>,
    ) -> Result<()> {
        self.save_user_preferences_values(root_path, account_id, &HashMap::new())
    }

    /// Ensure `preferences.json` carries the synthetic always-Switch for a
    /// handler, so the handler can auto-activate on every new call or
    /// conversation. Appends only when the key is absent.
    ///
    /// # Errors
    ///
    /// Returns an error when the descriptor file cannot be read or written.
    pub fn ensure_always_preference(&self, handler_name: &str, root_path: &Path) -> Result<()> {
        let path = Self::preferences_config_path(root_path);
        let always_key = format!("{handler_name}Always");

        let mut root: serde_json::Value = match self.read_locked(&path) {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| CommKitError::Serialization(e.to_string()))?,
            None => serde_json::Value::Array(Vec::new()),
        };
        let Some(entries) = root.as_array_mut() else {
            return Err(CommKitError::Configuration(format!(
                "{} is not an array",
                path.display()
            )));
        };

        let exists = entries.iter().any(|entry| {
            entry.get(descriptor::KEY).and_then(serde_json::Value::as_str) == Some(&always_key)
        });
        if exists {
            return Ok(());
        }

        entries.push(serde_json::json!({
            "key": always_key,
            "type": descriptor::TYPE_SWITCH,
            "defaultValue": "0",
            "title": format!("Automatically turn {handler_name} on"),
            "summary": format!("{handler_name} will take effect immediately"),
        }));

        let bytes = serde_json::to_vec_pretty(&root)
            .map_err(|e| CommKitError::Serialization(e.to_string()))?;
        self.write_locked(&path, &bytes)
    }

    /// True when the handler's always-Switch is set to `"1"`.
    pub fn always_preference(&self, root_path: &Path, handler_name: &str) -> bool {
        let always_key = format!("{handler_name}Always");
        let is_switch = self.preferences(root_path).iter().any(|preference| {
            preference.get(descriptor::KEY) == Some(&always_key)
                && preference.get(descriptor::TYPE).map(String::as_str)
                    == Some(descriptor::TYPE_SWITCH)
        });
        if !is_switch {
            return false;
        }
        self.preferences_values(root_path, None)
            .get(&always_key)
            .is_some_and(|value| value == "1")
    }

    /// Persist the chat handlers' allow/deny lists.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the file replacement fails.
    pub fn save_chat_activations(&self, activations: &ChatActivationMap) -> Result<()> {
        let stored: Vec<StoredActivation> = activations
            .iter()
            .map(|(key, handlers)| StoredActivation {
                account_id: key.account_id.clone(),
                peer_id: key.peer_id.clone(),
                handlers: handlers.clone(),
            })
            .collect();
        let bytes =
            rmp_serde::to_vec(&stored).map_err(|e| CommKitError::Serialization(e.to_string()))?;
        self.write_locked(&self.allow_deny_path(), &bytes)
    }

    /// Read the persisted allow/deny lists. A missing file yields empty
    /// lists, not an error.
    pub fn load_chat_activations(&self) -> ChatActivationMap {
        let path = self.allow_deny_path();
        let Some(bytes) = self.read_locked(&path) else {
            return ChatActivationMap::new();
        };
        if bytes.is_empty() {
            return ChatActivationMap::new();
        }
        let stored: Vec<StoredActivation> = match rmp_serde::from_slice(&bytes) {
            Ok(stored) => stored,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Corrupt allow/deny list file");
                return ChatActivationMap::new();
            },
        };
        stored
            .into_iter()
            .map(|entry| {
                (ConversationKey::new(entry.account_id, entry.peer_id), entry.handlers)
            })
            .collect()
    }

    fn file_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .map(|mut locks| Arc::clone(locks.entry(path.to_path_buf()).or_default()))
            .unwrap_or_default()
    }

    /// Read a whole file under its lock. The lock is taken around the I/O
    /// only.
    fn read_locked(&self, path: &Path) -> Option<Vec<u8>> {
        let lock = self.file_lock(path);
        let _guard = lock.lock();
        fs::read(path).ok()
    }

    /// Replace a file atomically under its lock: write a sibling temp file,
    /// then rename over the target.
    fn write_locked(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock = self.file_lock(path);
        let _guard = lock.lock();
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path).map_err(|e| {
            if let Err(cleanup) = fs::remove_file(&tmp) {
                warn!(path = %tmp.display(), error = %cleanup, "Stale temp file left behind");
            }
            CommKitError::Io(e)
        })
    }
}

/// Flattens a JSON array (possibly nested) into a comma separated string.
fn flatten_array(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(flatten_array)
            .filter(|item| !item.is_empty())
            .collect::<Vec<_>>()
            .join(","),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_and_root() -> (TempDir, PreferenceStore, PathBuf) {
        #[allow(clippy::unwrap_used)]
        let dir = TempDir::new().unwrap();
        let store = PreferenceStore::new(dir.path());
        let root = store.plugins_dir().join("green");
        #[allow(clippy::unwrap_used)]
        fs::create_dir_all(root.join("data")).unwrap();
        (dir, store, root)
    }

    fn write_descriptors(root: &Path, json: &str) {
        #[allow(clippy::unwrap_used)]
        fs::write(PreferenceStore::preferences_config_path(root), json).unwrap();
    }

    #[test]
    fn test_descriptor_parsing_rules() {
        let (_dir, store, root) = store_and_root();
        write_descriptors(
            &root,
            r#"[
                {"key": "color", "type": "List", "defaultValue": "green",
                 "entries": ["green", ["blue", "red"]]},
                {"key": "color", "type": "List", "defaultValue": "dup dropped"},
                {"key": "model", "type": "Path", "defaultValue": "model.onnx"},
                {"type": "Switch", "defaultValue": "no key, skipped"}
            ]"#,
        );

        let preferences = store.preferences(&root);
        assert_eq!(preferences.len(), 2);
        assert_eq!(preferences[0].get("entries").map(String::as_str), Some("green,blue,red"));
        let model_default = preferences[1].get("defaultValue").cloned().unwrap_or_default();
        assert_eq!(model_default, root.join("model.onnx").to_string_lossy());
    }

    #[test]
    fn test_missing_descriptor_file_yields_empty() {
        let (_dir, store, root) = store_and_root();
        assert!(store.preferences(&root).is_empty());
        assert!(store.preferences_values(&root, None).is_empty());
    }

    #[test]
    fn test_values_write_read_reset_round_trip() {
        let (_dir, store, root) = store_and_root();
        write_descriptors(&root, r#"[{"key": "color", "type": "List", "defaultValue": "green"}]"#);

        // Default until overridden.
        assert_eq!(store.preferences_values(&root, None).get("color").map(String::as_str), Some("green"));

        let mut values = HashMap::new();
        values.insert("color".to_string(), "blue".to_string());
        #[allow(clippy::unwrap_used)]
        store.save_user_preferences_values(&root, None, &values).unwrap();
        assert_eq!(store.preferences_values(&root, None).get("color").map(String::as_str), Some("blue"));

        // Reset restores the default.
        #[allow(clippy::unwrap_used)]
        store.reset_preferences_values(&root, None).unwrap();
        assert_eq!(store.preferences_values(&root, None).get("color").map(String::as_str), Some("green"));
    }

    #[test]
    fn test_account_values_override_plugin_values() {
        let (_dir, store, root) = store_and_root();
        write_descriptors(&root, r#"[{"key": "voice", "type": "List", "defaultValue": "off"}]"#);

        let mut plugin_values = HashMap::new();
        plugin_values.insert("voice".to_string(), "low".to_string());
        #[allow(clippy::unwrap_used)]
        store.save_user_preferences_values(&root, None, &plugin_values).unwrap();

        let mut account_values = HashMap::new();
        account_values.insert("voice".to_string(), "high".to_string());
        #[allow(clippy::unwrap_used)]
        store.save_user_preferences_values(&root, Some("acc1"), &account_values).unwrap();

        assert_eq!(store.preferences_values(&root, None).get("voice").map(String::as_str), Some("low"));
        assert_eq!(
            store.preferences_values(&root, Some("acc1")).get("voice").map(String::as_str),
            Some("high")
        );
    }

    #[test]
    fn test_always_preference_injection_and_lookup() {
        let (_dir, store, root) = store_and_root();
        write_descriptors(&root, "[]");

        #[allow(clippy::unwrap_used)]
        store.ensure_always_preference("Green", &root).unwrap();
        // Idempotent.
        #[allow(clippy::unwrap_used)]
        store.ensure_always_preference("Green", &root).unwrap();

        let preferences = store.preferences(&root);
        assert_eq!(preferences.len(), 1);
        assert_eq!(preferences[0].get("key").map(String::as_str), Some("GreenAlways"));
        assert_eq!(preferences[0].get("type").map(String::as_str), Some("Switch"));

        // Default is off.
        assert!(!store.always_preference(&root, "Green"));

        let mut values = HashMap::new();
        values.insert("GreenAlways".to_string(), "1".to_string());
        #[allow(clippy::unwrap_used)]
        store.save_user_preferences_values(&root, None, &values).unwrap();
        assert!(store.always_preference(&root, "Green"));
    }

    #[test]
    fn test_always_preference_missing_file_synthesizes_array() {
        let (_dir, store, root) = store_and_root();
        // No preferences.json at all: injection creates it.
        #[allow(clippy::unwrap_used)]
        store.ensure_always_preference("Echo", &root).unwrap();
        assert_eq!(store.preferences(&root).len(), 1);
    }

    #[test]
    fn test_chat_activations_round_trip() {
        let (_dir, store, _root) = store_and_root();

        // Missing file is empty, not an error.
        assert!(store.load_chat_activations().is_empty());

        let mut activations = ChatActivationMap::new();
        let mut handlers = HashMap::new();
        handlers.insert("AutoReply".to_string(), true);
        handlers.insert("Profanity".to_string(), false);
        activations.insert(ConversationKey::new("acc1", "bob"), handlers);

        #[allow(clippy::unwrap_used)]
        store.save_chat_activations(&activations).unwrap();
        let loaded = store.load_chat_activations();
        assert_eq!(loaded, activations);
    }
}
