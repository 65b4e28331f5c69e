// SPDX-FileCopyrightText: © 2025 CommKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Auto-reply plugin
//!
//! Answers the first incoming message of a conversation with a canned
//! response, injected back through the `sendTextMessage` host service.

use commkit_plugin_sdk_native::prelude::*;
use std::collections::{HashMap, HashSet};

struct AutoReply {
    host: HostApi,
    logger: Logger,
    reply: String,
    greeted: HashSet<(String, String)>,
}

impl ChatProcessor for AutoReply {
    fn details(&mut self) -> Vec<(String, String)> {
        vec![
            ("name".to_string(), "AutoReply".to_string()),
            ("iconPath".to_string(), "autoreply.svg".to_string()),
        ]
    }

    fn conversation_attached(&mut self, conversation: &ConversationKey) {
        plugin_debug!(self.logger, "Watching conversation with {}", conversation.peer_id);
    }

    fn on_message(&mut self, message: &ChatMessage) {
        // Never react to plugin traffic or to our own outgoing messages.
        if message.from_plugin || message.direction != MessageDirection::Incoming {
            return;
        }
        let conversation = (message.account_id.clone(), message.peer_id.clone());
        if !self.greeted.insert(conversation) {
            return;
        }

        let mut body = HashMap::new();
        body.insert("text/plain".to_string(), self.reply.clone());
        let rc = self.host.send_text_message(&message.account_id, &message.peer_id, body);
        if rc != 0 {
            plugin_warn!(self.logger, "Could not send auto-reply to {}", message.peer_id);
        }
    }

    fn conversation_detached(&mut self, conversation: &ConversationKey) {
        self.greeted
            .remove(&(conversation.account_id.clone(), conversation.peer_id.clone()));
    }

    fn set_preference(&mut self, key: &str, value: &str) {
        if key == "AutoReplyText" {
            self.reply = value.to_string();
        }
    }

    fn has_preference_key(&mut self, key: &str) -> bool {
        key == "AutoReplyText"
    }
}

struct AutoReplyPlugin;

impl NativePlugin for AutoReplyPlugin {
    fn init(host: &HostApi) -> Result<Self, String> {
        let logger = host.logger("autoreply");
        let reply = host
            .plugin_preferences()
            .get("AutoReplyText")
            .cloned()
            .unwrap_or_else(|| "I am away right now, I will get back to you.".to_string());
        host.manage_chat_processor(AutoReply {
            host: *host,
            logger,
            reply,
            greeted: HashSet::new(),
        })?;
        Ok(Self)
    }
}

native_plugin_entry!(AutoReplyPlugin);
