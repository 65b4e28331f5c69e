// SPDX-FileCopyrightText: © 2025 CommKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Capability contracts implemented by plugin-supplied handlers.
//!
//! The services managers own handlers through these traits; the native
//! runtime adapts C vtables to them. Every handler is identified by the
//! data directory of the plugin that created it.

use crate::subject::{AvSubject, ChatSubject};
use crate::types::{ConversationKey, StreamData};
use std::collections::HashMap;
use std::sync::Arc;

/// Well-known keys of the details map returned by handlers.
pub mod details {
    /// Display name of the handler. Mandatory for every handler kind.
    pub const NAME: &str = "name";
    /// Path to the handler icon inside the plugin data directory.
    pub const ICON_PATH: &str = "iconPath";
    /// Installation root of the owning plugin.
    pub const PLUGIN_ID: &str = "pluginId";
    /// `"1"` while the handler is attached to at least one subject.
    pub const ATTACHED: &str = "attached";
    /// `"1"` for video handlers, `"0"` for audio handlers.
    pub const DATA_TYPE: &str = "dataType";
}

/// A handler observing and transforming live call media frames.
pub trait CallMediaHandler: Send + Sync {
    /// Data directory of the plugin that created this handler.
    fn id(&self) -> &str;

    /// Details map. Expected keys: `name`, `iconPath`, `pluginId`,
    /// `attached` and `dataType` (see [`details`]).
    fn details(&self) -> HashMap<String, String>;

    /// Offers a frame subject to the handler. The handler decides whether to
    /// process the stream; acceptance is reflected by the `attached` detail.
    fn notify_av_frame_subject(&self, data: &StreamData, subject: &Arc<AvSubject>);

    /// Detaches the handler from one subject.
    fn detach(&self, subject: &Arc<AvSubject>);

    /// Applies a preference change without reloading the plugin.
    fn set_preference_attribute(&self, key: &str, value: &str);

    /// True if `key` can be applied live through
    /// [`set_preference_attribute`](Self::set_preference_attribute).
    fn preference_map_has_key(&self, key: &str) -> bool;
}

/// A handler observing chat messages in conversations.
pub trait ChatHandler: Send + Sync {
    /// Data directory of the plugin that created this handler.
    fn id(&self) -> &str;

    /// Details map. The `name` key is mandatory.
    fn details(&self) -> HashMap<String, String>;

    /// Offers a conversation's message subject to the handler.
    fn notify_chat_subject(&self, conversation: &ConversationKey, subject: &Arc<ChatSubject>);

    /// Detaches the handler from one conversation subject.
    fn detach(&self, subject: &Arc<ChatSubject>);

    fn set_preference_attribute(&self, key: &str, value: &str);

    fn preference_map_has_key(&self, key: &str) -> bool;
}

/// A handler storing per-account preference values inside the plugin.
pub trait PreferenceHandler: Send + Sync {
    /// Data directory of the plugin that created this handler.
    fn id(&self) -> &str;

    fn details(&self) -> HashMap<String, String>;

    /// Stores an account-scoped preference value.
    fn set_preference_attribute(&self, account_id: &str, key: &str, value: &str);

    /// Clears every stored value for `account_id`.
    fn reset_preference_attributes(&self, account_id: &str);

    fn preference_map_has_key(&self, key: &str) -> bool;
}

/// Reads a boolean detail the way handlers encode them (`"1"`/`"0"`).
/// Missing keys default to true, matching handlers that predate the key.
pub fn detail_flag(details: &HashMap<String, String>, key: &str) -> bool {
    details.get(key).map_or(true, |v| v == "1" || v.eq_ignore_ascii_case("true"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_flag_parses_handler_booleans() {
        let mut details = HashMap::new();
        details.insert(details::ATTACHED.to_string(), "1".to_string());
        details.insert(details::DATA_TYPE.to_string(), "0".to_string());

        assert!(detail_flag(&details, details::ATTACHED));
        assert!(!detail_flag(&details, details::DATA_TYPE));
        // Missing key defaults to true.
        assert!(detail_flag(&details, "missing"));
    }
}
