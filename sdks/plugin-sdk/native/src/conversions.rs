// SPDX-FileCopyrightText: © 2025 CommKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Type conversions between C ABI types and Rust types
//!
//! These functions provide safe wrappers around unsafe FFI operations. The
//! `*Repr` structs own the C string storage backing the raw struct they
//! expose; the raw struct is valid for as long as its repr is alive.

use crate::types::{
    CChatMessage, CConversationKey, CDetailsList, CKeyValue, CMediaFrame, CMessageDirection,
    CStreamData, CStreamDirection, CStreamType,
};
use commkit_core::types::{
    ChatMessage, ConversationKey, MediaFrame, MessageDirection, StreamData, StreamDirection,
    StreamType,
};
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;

/// Convert a borrowed C string to an owned Rust string.
///
/// # Errors
///
/// Returns an error if the pointer is null or the bytes are not valid UTF-8.
///
/// # Safety
///
/// `ptr` must be null or point to a null-terminated string valid for the
/// duration of this call.
pub unsafe fn c_str_to_string(ptr: *const c_char) -> Result<String, String> {
    if ptr.is_null() {
        return Err("Null string pointer".to_string());
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map(ToString::to_string)
        .map_err(|e| format!("Invalid UTF-8 in C string: {e}"))
}

/// Convert Rust StreamType to C
pub const fn stream_type_to_c(st: StreamType) -> CStreamType {
    match st {
        StreamType::Audio => CStreamType::Audio,
        StreamType::Video => CStreamType::Video,
    }
}

/// Convert C stream type to Rust
pub const fn stream_type_from_c(cst: CStreamType) -> StreamType {
    match cst {
        CStreamType::Audio => StreamType::Audio,
        CStreamType::Video => StreamType::Video,
    }
}

/// Convert Rust StreamDirection to C
pub const fn stream_direction_to_c(sd: StreamDirection) -> CStreamDirection {
    match sd {
        StreamDirection::Inbound => CStreamDirection::Inbound,
        StreamDirection::Outbound => CStreamDirection::Outbound,
    }
}

/// Convert C stream direction to Rust
pub const fn stream_direction_from_c(csd: CStreamDirection) -> StreamDirection {
    match csd {
        CStreamDirection::Inbound => StreamDirection::Inbound,
        CStreamDirection::Outbound => StreamDirection::Outbound,
    }
}

/// Convert Rust MessageDirection to C
pub const fn message_direction_to_c(md: MessageDirection) -> CMessageDirection {
    match md {
        MessageDirection::Incoming => CMessageDirection::Incoming,
        MessageDirection::Outgoing => CMessageDirection::Outgoing,
    }
}

/// Convert C message direction to Rust
pub const fn message_direction_from_c(cmd: CMessageDirection) -> MessageDirection {
    match cmd {
        CMessageDirection::Incoming => MessageDirection::Incoming,
        CMessageDirection::Outgoing => MessageDirection::Outgoing,
    }
}

/// Owns the string storage behind a [`CStreamData`].
pub struct CStreamDataRepr {
    pub raw: CStreamData,
    _call_id: CString,
    _peer_id: CString,
}

// SAFETY: the raw pointers point into the CStrings owned by this struct,
// which are immutable and live as long as the repr.
unsafe impl Send for CStreamDataRepr {}
unsafe impl Sync for CStreamDataRepr {}

/// Build a C view of a stream descriptor.
///
/// # Errors
///
/// Returns an error if an identifier contains an interior NUL byte.
pub fn stream_data_to_c(data: &StreamData) -> Result<CStreamDataRepr, String> {
    let call_id =
        CString::new(data.call_id.as_str()).map_err(|e| format!("Invalid call id: {e}"))?;
    let peer_id =
        CString::new(data.peer_id.as_str()).map_err(|e| format!("Invalid peer id: {e}"))?;
    Ok(CStreamDataRepr {
        raw: CStreamData {
            call_id: call_id.as_ptr(),
            peer_id: peer_id.as_ptr(),
            direction: stream_direction_to_c(data.direction),
            stream_type: stream_type_to_c(data.stream_type),
        },
        _call_id: call_id,
        _peer_id: peer_id,
    })
}

/// Read a stream descriptor received over the ABI.
///
/// # Errors
///
/// Returns an error on null pointers or invalid UTF-8.
///
/// # Safety
///
/// `raw` must be null or point to a valid `CStreamData` whose string fields
/// are valid for the duration of this call.
pub unsafe fn stream_data_from_c(raw: *const CStreamData) -> Result<StreamData, String> {
    if raw.is_null() {
        return Err("Null stream data".to_string());
    }
    let data = &*raw;
    Ok(StreamData {
        call_id: c_str_to_string(data.call_id)?,
        peer_id: c_str_to_string(data.peer_id)?,
        direction: stream_direction_from_c(data.direction),
        stream_type: stream_type_from_c(data.stream_type),
    })
}

/// Owns the string storage behind a [`CConversationKey`].
pub struct CConversationKeyRepr {
    pub raw: CConversationKey,
    _account_id: CString,
    _peer_id: CString,
}

// SAFETY: see CStreamDataRepr.
unsafe impl Send for CConversationKeyRepr {}
unsafe impl Sync for CConversationKeyRepr {}

/// Build a C view of a conversation key.
///
/// # Errors
///
/// Returns an error if an identifier contains an interior NUL byte.
pub fn conversation_key_to_c(key: &ConversationKey) -> Result<CConversationKeyRepr, String> {
    let account_id =
        CString::new(key.account_id.as_str()).map_err(|e| format!("Invalid account id: {e}"))?;
    let peer_id =
        CString::new(key.peer_id.as_str()).map_err(|e| format!("Invalid peer id: {e}"))?;
    Ok(CConversationKeyRepr {
        raw: CConversationKey { account_id: account_id.as_ptr(), peer_id: peer_id.as_ptr() },
        _account_id: account_id,
        _peer_id: peer_id,
    })
}

/// Read a conversation key received over the ABI.
///
/// # Errors
///
/// Returns an error on null pointers or invalid UTF-8.
///
/// # Safety
///
/// `raw` must be null or point to a valid `CConversationKey` whose string
/// fields are valid for the duration of this call.
pub unsafe fn conversation_key_from_c(
    raw: *const CConversationKey,
) -> Result<ConversationKey, String> {
    if raw.is_null() {
        return Err("Null conversation key".to_string());
    }
    let key = &*raw;
    Ok(ConversationKey {
        account_id: c_str_to_string(key.account_id)?,
        peer_id: c_str_to_string(key.peer_id)?,
    })
}

/// Owns the string storage behind a [`CChatMessage`].
pub struct CChatMessageRepr {
    pub raw: CChatMessage,
    _strings: Vec<CString>,
    _pairs: Vec<CKeyValue>,
}

// SAFETY: see CStreamDataRepr.
unsafe impl Send for CChatMessageRepr {}
unsafe impl Sync for CChatMessageRepr {}

/// Build a C view of a chat message.
///
/// # Errors
///
/// Returns an error if any field contains an interior NUL byte.
pub fn chat_message_to_c(message: &ChatMessage) -> Result<CChatMessageRepr, String> {
    let mut strings = Vec::with_capacity(2 + message.body.len() * 2);
    let account_id = CString::new(message.account_id.as_str())
        .map_err(|e| format!("Invalid account id: {e}"))?;
    let peer_id =
        CString::new(message.peer_id.as_str()).map_err(|e| format!("Invalid peer id: {e}"))?;

    let mut pairs = Vec::with_capacity(message.body.len());
    for (key, value) in &message.body {
        let key = CString::new(key.as_str()).map_err(|e| format!("Invalid body key: {e}"))?;
        let value = CString::new(value.as_str()).map_err(|e| format!("Invalid body value: {e}"))?;
        pairs.push(CKeyValue { key: key.as_ptr(), value: value.as_ptr() });
        strings.push(key);
        strings.push(value);
    }

    let raw = CChatMessage {
        account_id: account_id.as_ptr(),
        peer_id: peer_id.as_ptr(),
        direction: message_direction_to_c(message.direction),
        from_plugin: message.from_plugin,
        body: pairs.as_ptr(),
        body_count: pairs.len(),
    };
    strings.push(account_id);
    strings.push(peer_id);

    Ok(CChatMessageRepr { raw, _strings: strings, _pairs: pairs })
}

/// Read a chat message received over the ABI.
///
/// # Errors
///
/// Returns an error on null pointers or invalid UTF-8.
///
/// # Safety
///
/// `raw` must be null or point to a valid `CChatMessage` whose string and
/// body pointers are valid for the duration of this call.
pub unsafe fn chat_message_from_c(raw: *const CChatMessage) -> Result<ChatMessage, String> {
    if raw.is_null() {
        return Err("Null chat message".to_string());
    }
    let message = &*raw;

    let mut body = HashMap::with_capacity(message.body_count);
    if !message.body.is_null() {
        for pair in std::slice::from_raw_parts(message.body, message.body_count) {
            body.insert(c_str_to_string(pair.key)?, c_str_to_string(pair.value)?);
        }
    }

    Ok(ChatMessage {
        account_id: c_str_to_string(message.account_id)?,
        peer_id: c_str_to_string(message.peer_id)?,
        direction: message_direction_from_c(message.direction),
        body,
        from_plugin: message.from_plugin,
    })
}

/// Read a borrowed details list into an owned map.
///
/// # Errors
///
/// Returns an error if an entry is not valid UTF-8.
///
/// # Safety
///
/// `list` must describe `count` valid `CKeyValue` entries, each pointing to
/// null-terminated strings valid for the duration of this call.
pub unsafe fn details_from_c(list: CDetailsList) -> Result<HashMap<String, String>, String> {
    let mut details = HashMap::with_capacity(list.count);
    if list.entries.is_null() {
        return Ok(details);
    }
    for entry in std::slice::from_raw_parts(list.entries, list.count) {
        details.insert(c_str_to_string(entry.key)?, c_str_to_string(entry.value)?);
    }
    Ok(details)
}

/// Build a C view over a media frame for in-place processing.
///
/// The returned struct borrows the frame's buffers; it must not outlive
/// `frame`, and `frame` must not be touched while the view is in use.
pub fn media_frame_to_c(frame: &mut MediaFrame) -> CMediaFrame {
    match frame {
        MediaFrame::Audio(audio) => CMediaFrame {
            stream_type: CStreamType::Audio,
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            width: 0,
            height: 0,
            samples: audio.samples.as_mut_ptr(),
            sample_count: audio.samples.len(),
            data: std::ptr::null_mut(),
            data_len: 0,
        },
        MediaFrame::Video(video) => CMediaFrame {
            stream_type: CStreamType::Video,
            sample_rate: 0,
            channels: 0,
            width: video.width,
            height: video.height,
            samples: std::ptr::null_mut(),
            sample_count: 0,
            data: video.data.as_mut_ptr(),
            data_len: video.data.len(),
        },
    }
}

/// A mutable, typed view over a [`CMediaFrame`], exposed to plugin code.
pub enum FrameViewMut<'a> {
    Audio { sample_rate: u32, channels: u16, samples: &'a mut [f32] },
    Video { width: u32, height: u32, data: &'a mut [u8] },
}

impl FrameViewMut<'_> {
    /// Wrap a raw frame received over the ABI.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame or its payload pointer is null.
    ///
    /// # Safety
    ///
    /// `raw` must be null or point to a valid `CMediaFrame` whose payload
    /// buffer stays valid and unaliased for the lifetime of the view.
    pub unsafe fn from_raw<'a>(raw: *mut CMediaFrame) -> Result<FrameViewMut<'a>, String> {
        if raw.is_null() {
            return Err("Null media frame".to_string());
        }
        let frame = &mut *raw;
        match frame.stream_type {
            CStreamType::Audio => {
                if frame.samples.is_null() {
                    return Err("Audio frame missing samples".to_string());
                }
                Ok(FrameViewMut::Audio {
                    sample_rate: frame.sample_rate,
                    channels: frame.channels,
                    samples: std::slice::from_raw_parts_mut(frame.samples, frame.sample_count),
                })
            },
            CStreamType::Video => {
                if frame.data.is_null() {
                    return Err("Video frame missing data".to_string());
                }
                Ok(FrameViewMut::Video {
                    width: frame.width,
                    height: frame.height,
                    data: std::slice::from_raw_parts_mut(frame.data, frame.data_len),
                })
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commkit_core::types::AudioFrame;

    #[test]
    fn test_stream_data_round_trip() {
        let data = StreamData::new("c1", StreamDirection::Inbound, StreamType::Video, "alice");
        #[allow(clippy::unwrap_used)]
        let repr = stream_data_to_c(&data).unwrap();
        // SAFETY: repr owns the storage behind the raw struct.
        #[allow(clippy::unwrap_used)]
        let back = unsafe { stream_data_from_c(&raw const repr.raw) }.unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_chat_message_round_trip() {
        let mut body = HashMap::new();
        body.insert("text/plain".to_string(), "hello".to_string());
        let message = ChatMessage::new("acc1", "bob", MessageDirection::Incoming, body, false);
        #[allow(clippy::unwrap_used)]
        let repr = chat_message_to_c(&message).unwrap();
        // SAFETY: repr owns the storage behind the raw struct.
        #[allow(clippy::unwrap_used)]
        let back = unsafe { chat_message_from_c(&raw const repr.raw) }.unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn test_media_frame_view_mutates_in_place() {
        let mut frame = MediaFrame::Audio(AudioFrame {
            sample_rate: 16_000,
            channels: 1,
            samples: vec![0.25, -0.25],
        });
        let mut c_frame = media_frame_to_c(&mut frame);
        // SAFETY: c_frame borrows from `frame`, which outlives the view.
        #[allow(clippy::unwrap_used)]
        let view = unsafe { FrameViewMut::from_raw(&raw mut c_frame) }.unwrap();
        if let FrameViewMut::Audio { samples, .. } = view {
            samples.iter_mut().for_each(|s| *s = 0.0);
        }
        assert_eq!(
            frame,
            MediaFrame::Audio(AudioFrame { sample_rate: 16_000, channels: 1, samples: vec![0.0, 0.0] })
        );
    }

    #[test]
    fn test_null_pointers_are_rejected() {
        // SAFETY: null is explicitly handled.
        unsafe {
            assert!(c_str_to_string(std::ptr::null()).is_err());
            assert!(stream_data_from_c(std::ptr::null()).is_err());
            assert!(chat_message_from_c(std::ptr::null()).is_err());
        }
    }
}
