// SPDX-FileCopyrightText: © 2025 CommKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Core data types flowing between calls, conversations and plugin handlers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Media kind of a call stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamType {
    Audio,
    Video,
}

/// Direction of a call stream relative to the local peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamDirection {
    /// Received from the remote peer.
    Inbound,
    /// Captured locally and sent to the remote peer.
    Outbound,
}

/// Identifies a single audio or video stream within a call.
///
/// A call may carry several streams (one per direction and media kind);
/// each gets its own frame subject keyed by this descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamData {
    /// Identifier of the call this stream belongs to.
    pub call_id: String,
    pub direction: StreamDirection,
    pub stream_type: StreamType,
    /// URI of the remote peer.
    pub peer_id: String,
}

impl StreamData {
    pub fn new(
        call_id: impl Into<String>,
        direction: StreamDirection,
        stream_type: StreamType,
        peer_id: impl Into<String>,
    ) -> Self {
        Self { call_id: call_id.into(), direction, stream_type, peer_id: peer_id.into() }
    }
}

/// Raw audio frame, interleaved f32 samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

/// Raw video frame.
///
/// `data` is a packed pixel buffer; the layout is negotiated by the media
/// stack and opaque to the plugin subsystem, which only hands frames to
/// handlers for in-place processing.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// A media frame traveling through a call stream.
///
/// Handlers may mutate frames in place; they must not change the buffer
/// dimensions.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaFrame {
    Audio(AudioFrame),
    Video(VideoFrame),
}

impl MediaFrame {
    pub const fn stream_type(&self) -> StreamType {
        match self {
            Self::Audio(_) => StreamType::Audio,
            Self::Video(_) => StreamType::Video,
        }
    }
}

/// Direction of a chat message relative to the local account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageDirection {
    Incoming,
    Outgoing,
}

/// Identifies a conversation: one account talking to one peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationKey {
    pub account_id: String,
    pub peer_id: String,
}

impl ConversationKey {
    pub fn new(account_id: impl Into<String>, peer_id: impl Into<String>) -> Self {
        Self { account_id: account_id.into(), peer_id: peer_id.into() }
    }
}

/// A chat message traveling through a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub account_id: String,
    pub peer_id: String,
    pub direction: MessageDirection,
    /// MIME type to payload mapping.
    pub body: HashMap<String, String>,
    /// True if this message originated from plugin code. Such messages are
    /// never republished to handlers, which would otherwise loop.
    pub from_plugin: bool,
}

impl ChatMessage {
    pub fn new(
        account_id: impl Into<String>,
        peer_id: impl Into<String>,
        direction: MessageDirection,
        body: HashMap<String, String>,
        from_plugin: bool,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            peer_id: peer_id.into(),
            direction,
            body,
            from_plugin,
        }
    }

    pub fn conversation(&self) -> ConversationKey {
        ConversationKey::new(self.account_id.clone(), self.peer_id.clone())
    }
}
