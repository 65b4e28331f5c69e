// SPDX-FileCopyrightText: © 2025 CommKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Ergonomic handler traits and the C vtable shims behind them.
//!
//! Plugin authors implement [`CallMediaProcessor`], [`ChatProcessor`] or
//! [`PreferenceProcessor`] in plain Rust; the `*_into_raw` functions box the
//! implementation together with a C vtable the host can take ownership of
//! through `manageComponent`. Every shim catches panics so they never unwind
//! across the ABI.

use crate::conversions::{self, FrameViewMut};
use crate::types::{
    CCallMediaHandler, CChatHandler, CChatMessage, CConversationKey, CDetailsList, CKeyValue,
    CMediaFrame, CPreferenceHandler, CStreamData,
};
use commkit_core::types::{ChatMessage, ConversationKey, StreamData};
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};
use std::panic::catch_unwind;
use std::sync::Mutex;

/// A processor observing and transforming live call media frames.
///
/// The host serializes calls per handler; `&mut self` is safe.
pub trait CallMediaProcessor: Send + 'static {
    /// Display details. `name` is mandatory; `attached` and `dataType`
    /// should reflect the processor's state (`"1"`/`"0"`).
    fn details(&mut self) -> Vec<(String, String)>;

    /// Asked once per new stream; return false to decline it.
    fn wants_stream(&mut self, stream: &StreamData) -> bool {
        let _ = stream;
        true
    }

    /// Processes one frame in place.
    fn process_frame(&mut self, stream: &StreamData, frame: FrameViewMut<'_>);

    /// The host detached this stream; release any per-stream state.
    fn stream_detached(&mut self, _stream: &StreamData) {}

    fn set_preference(&mut self, _key: &str, _value: &str) {}

    fn has_preference_key(&mut self, _key: &str) -> bool {
        false
    }
}

/// A processor observing chat messages.
pub trait ChatProcessor: Send + 'static {
    /// Display details. `name` is mandatory.
    fn details(&mut self) -> Vec<(String, String)>;

    fn conversation_attached(&mut self, _conversation: &ConversationKey) {}

    fn on_message(&mut self, message: &ChatMessage);

    fn conversation_detached(&mut self, _conversation: &ConversationKey) {}

    fn set_preference(&mut self, _key: &str, _value: &str) {}

    fn has_preference_key(&mut self, _key: &str) -> bool {
        false
    }
}

/// A processor storing per-account preference values.
pub trait PreferenceProcessor: Send + 'static {
    fn details(&mut self) -> Vec<(String, String)>;

    fn set_account_preference(&mut self, account_id: &str, key: &str, value: &str);

    fn reset_account_preferences(&mut self, account_id: &str);

    fn has_preference_key(&mut self, key: &str) -> bool;
}

/// Backing storage for a borrowed details list. Rebuilt on every
/// `get_details` call; pointers stay valid until the next call.
#[derive(Default)]
struct DetailsStorage {
    strings: Vec<CString>,
    pairs: Vec<CKeyValue>,
}

impl DetailsStorage {
    fn rebuild(&mut self, items: &[(String, String)]) -> CDetailsList {
        self.strings.clear();
        self.pairs.clear();
        for (key, value) in items {
            let (Ok(key), Ok(value)) = (CString::new(key.as_str()), CString::new(value.as_str()))
            else {
                continue; // Skip entries with interior NUL bytes
            };
            self.pairs.push(CKeyValue { key: key.as_ptr(), value: value.as_ptr() });
            self.strings.push(key);
            self.strings.push(value);
        }
        CDetailsList { entries: self.pairs.as_ptr(), count: self.pairs.len() }
    }
}

/// Appends the `pluginId` detail when the processor didn't provide one.
fn ensure_plugin_id(items: &mut Vec<(String, String)>, data_path: &CStr) {
    if items.iter().any(|(key, _)| key == "pluginId") {
        return;
    }
    if let Ok(path) = data_path.to_str() {
        items.push(("pluginId".to_string(), path.to_string()));
    }
}

// ---------------------------------------------------------------------------
// Call media handler shim
// ---------------------------------------------------------------------------

/// One allocation carrying the vtable (first field, so the vtable pointer is
/// the object pointer), the identity string and the processor instance.
#[repr(C)]
struct CallHandlerObject<P> {
    vtable: CCallMediaHandler,
    data_path: CString,
    details: Mutex<DetailsStorage>,
    instance: Mutex<P>,
}

extern "C-unwind" fn call_get_details<P: CallMediaProcessor>(handle: *mut c_void) -> CDetailsList {
    catch_unwind(|| {
        // SAFETY: handle points to the CallHandlerObject<P> built by
        // call_media_into_raw and owned by the host.
        let object = unsafe { &*handle.cast::<CallHandlerObject<P>>() };
        let mut items = object.instance.lock().map(|mut p| p.details()).unwrap_or_default();
        ensure_plugin_id(&mut items, &object.data_path);
        object
            .details
            .lock()
            .map(|mut storage| storage.rebuild(&items))
            .unwrap_or_else(|_| CDetailsList::empty())
    })
    .unwrap_or_else(|_| CDetailsList::empty())
}

extern "C-unwind" fn call_wants_stream<P: CallMediaProcessor>(
    handle: *mut c_void,
    stream: *const CStreamData,
) -> bool {
    catch_unwind(|| {
        // SAFETY: see call_get_details.
        let object = unsafe { &*handle.cast::<CallHandlerObject<P>>() };
        // SAFETY: the host keeps the stream descriptor alive for this call.
        let Ok(stream) = (unsafe { conversions::stream_data_from_c(stream) }) else {
            return false;
        };
        object.instance.lock().map(|mut p| p.wants_stream(&stream)).unwrap_or(false)
    })
    .unwrap_or(false)
}

extern "C-unwind" fn call_process_frame<P: CallMediaProcessor>(
    handle: *mut c_void,
    stream: *const CStreamData,
    frame: *mut CMediaFrame,
) {
    let _ = catch_unwind(|| {
        // SAFETY: see call_get_details.
        let object = unsafe { &*handle.cast::<CallHandlerObject<P>>() };
        // SAFETY: the host keeps both pointers alive for this call.
        let Ok(stream) = (unsafe { conversions::stream_data_from_c(stream) }) else { return };
        let Ok(view) = (unsafe { FrameViewMut::from_raw(frame) }) else { return };
        if let Ok(mut instance) = object.instance.lock() {
            instance.process_frame(&stream, view);
        }
    });
}

extern "C-unwind" fn call_stream_detached<P: CallMediaProcessor>(
    handle: *mut c_void,
    stream: *const CStreamData,
) {
    let _ = catch_unwind(|| {
        // SAFETY: see call_get_details.
        let object = unsafe { &*handle.cast::<CallHandlerObject<P>>() };
        // SAFETY: the host keeps the stream descriptor alive for this call.
        let Ok(stream) = (unsafe { conversions::stream_data_from_c(stream) }) else { return };
        if let Ok(mut instance) = object.instance.lock() {
            instance.stream_detached(&stream);
        }
    });
}

extern "C-unwind" fn call_set_preference<P: CallMediaProcessor>(
    handle: *mut c_void,
    key: *const c_char,
    value: *const c_char,
) {
    let _ = catch_unwind(|| {
        // SAFETY: see call_get_details.
        let object = unsafe { &*handle.cast::<CallHandlerObject<P>>() };
        // SAFETY: the host keeps both strings alive for this call.
        let (Ok(key), Ok(value)) =
            (unsafe { conversions::c_str_to_string(key) }, unsafe {
                conversions::c_str_to_string(value)
            })
        else {
            return;
        };
        if let Ok(mut instance) = object.instance.lock() {
            instance.set_preference(&key, &value);
        }
    });
}

extern "C-unwind" fn call_has_preference<P: CallMediaProcessor>(
    handle: *mut c_void,
    key: *const c_char,
) -> bool {
    catch_unwind(|| {
        // SAFETY: see call_get_details.
        let object = unsafe { &*handle.cast::<CallHandlerObject<P>>() };
        // SAFETY: the host keeps the string alive for this call.
        let Ok(key) = (unsafe { conversions::c_str_to_string(key) }) else {
            return false;
        };
        object.instance.lock().map(|mut p| p.has_preference_key(&key)).unwrap_or(false)
    })
    .unwrap_or(false)
}

extern "C-unwind" fn call_destroy<P: CallMediaProcessor>(vtable: *mut CCallMediaHandler) {
    if vtable.is_null() {
        return;
    }
    let _ = catch_unwind(|| {
        // SAFETY: the vtable is the first field of the CallHandlerObject<P>
        // allocated by call_media_into_raw; destroy is called exactly once.
        drop(unsafe { Box::from_raw(vtable.cast::<CallHandlerObject<P>>()) });
    });
}

/// Boxes a call media processor behind a C vtable.
///
/// The returned pointer is meant to be handed to the host through
/// `manageComponent`; the host releases it through the vtable's `destroy`.
///
/// # Errors
///
/// Returns an error if `data_path` contains an interior NUL byte.
pub fn call_media_into_raw<P: CallMediaProcessor>(
    processor: P,
    data_path: &str,
) -> Result<*mut CCallMediaHandler, String> {
    let data_path = CString::new(data_path).map_err(|e| format!("Invalid data path: {e}"))?;
    let object = Box::new(CallHandlerObject {
        vtable: CCallMediaHandler {
            handle: std::ptr::null_mut(),
            data_path: std::ptr::null(),
            get_details: call_get_details::<P>,
            wants_stream: call_wants_stream::<P>,
            process_frame: call_process_frame::<P>,
            stream_detached: call_stream_detached::<P>,
            set_preference_attribute: call_set_preference::<P>,
            preference_map_has_key: call_has_preference::<P>,
            destroy: call_destroy::<P>,
        },
        data_path,
        details: Mutex::new(DetailsStorage::default()),
        instance: Mutex::new(processor),
    });
    let object = Box::into_raw(object);
    // SAFETY: object was just allocated; wiring the self pointers before the
    // host ever sees the vtable.
    unsafe {
        (*object).vtable.handle = object.cast::<c_void>();
        (*object).vtable.data_path = (*object).data_path.as_ptr();
    }
    Ok(object.cast::<CCallMediaHandler>())
}

// ---------------------------------------------------------------------------
// Chat handler shim
// ---------------------------------------------------------------------------

#[repr(C)]
struct ChatHandlerObject<P> {
    vtable: CChatHandler,
    data_path: CString,
    details: Mutex<DetailsStorage>,
    instance: Mutex<P>,
}

extern "C-unwind" fn chat_get_details<P: ChatProcessor>(handle: *mut c_void) -> CDetailsList {
    catch_unwind(|| {
        // SAFETY: handle points to the ChatHandlerObject<P> built by
        // chat_into_raw and owned by the host.
        let object = unsafe { &*handle.cast::<ChatHandlerObject<P>>() };
        let mut items = object.instance.lock().map(|mut p| p.details()).unwrap_or_default();
        ensure_plugin_id(&mut items, &object.data_path);
        object
            .details
            .lock()
            .map(|mut storage| storage.rebuild(&items))
            .unwrap_or_else(|_| CDetailsList::empty())
    })
    .unwrap_or_else(|_| CDetailsList::empty())
}

extern "C-unwind" fn chat_conversation_attached<P: ChatProcessor>(
    handle: *mut c_void,
    conversation: *const CConversationKey,
) {
    let _ = catch_unwind(|| {
        // SAFETY: see chat_get_details.
        let object = unsafe { &*handle.cast::<ChatHandlerObject<P>>() };
        // SAFETY: the host keeps the key alive for this call.
        let Ok(conversation) = (unsafe { conversions::conversation_key_from_c(conversation) })
        else {
            return;
        };
        if let Ok(mut instance) = object.instance.lock() {
            instance.conversation_attached(&conversation);
        }
    });
}

extern "C-unwind" fn chat_process_message<P: ChatProcessor>(
    handle: *mut c_void,
    message: *const CChatMessage,
) {
    let _ = catch_unwind(|| {
        // SAFETY: see chat_get_details.
        let object = unsafe { &*handle.cast::<ChatHandlerObject<P>>() };
        // SAFETY: the host keeps the message alive for this call.
        let Ok(message) = (unsafe { conversions::chat_message_from_c(message) }) else { return };
        if let Ok(mut instance) = object.instance.lock() {
            instance.on_message(&message);
        }
    });
}

extern "C-unwind" fn chat_conversation_detached<P: ChatProcessor>(
    handle: *mut c_void,
    conversation: *const CConversationKey,
) {
    let _ = catch_unwind(|| {
        // SAFETY: see chat_get_details.
        let object = unsafe { &*handle.cast::<ChatHandlerObject<P>>() };
        // SAFETY: the host keeps the key alive for this call.
        let Ok(conversation) = (unsafe { conversions::conversation_key_from_c(conversation) })
        else {
            return;
        };
        if let Ok(mut instance) = object.instance.lock() {
            instance.conversation_detached(&conversation);
        }
    });
}

extern "C-unwind" fn chat_set_preference<P: ChatProcessor>(
    handle: *mut c_void,
    key: *const c_char,
    value: *const c_char,
) {
    let _ = catch_unwind(|| {
        // SAFETY: see chat_get_details.
        let object = unsafe { &*handle.cast::<ChatHandlerObject<P>>() };
        // SAFETY: the host keeps both strings alive for this call.
        let (Ok(key), Ok(value)) =
            (unsafe { conversions::c_str_to_string(key) }, unsafe {
                conversions::c_str_to_string(value)
            })
        else {
            return;
        };
        if let Ok(mut instance) = object.instance.lock() {
            instance.set_preference(&key, &value);
        }
    });
}

extern "C-unwind" fn chat_has_preference<P: ChatProcessor>(
    handle: *mut c_void,
    key: *const c_char,
) -> bool {
    catch_unwind(|| {
        // SAFETY: see chat_get_details.
        let object = unsafe { &*handle.cast::<ChatHandlerObject<P>>() };
        // SAFETY: the host keeps the string alive for this call.
        let Ok(key) = (unsafe { conversions::c_str_to_string(key) }) else {
            return false;
        };
        object.instance.lock().map(|mut p| p.has_preference_key(&key)).unwrap_or(false)
    })
    .unwrap_or(false)
}

extern "C-unwind" fn chat_destroy<P: ChatProcessor>(vtable: *mut CChatHandler) {
    if vtable.is_null() {
        return;
    }
    let _ = catch_unwind(|| {
        // SAFETY: the vtable is the first field of the ChatHandlerObject<P>
        // allocated by chat_into_raw; destroy is called exactly once.
        drop(unsafe { Box::from_raw(vtable.cast::<ChatHandlerObject<P>>()) });
    });
}

/// Boxes a chat processor behind a C vtable. See [`call_media_into_raw`]
/// for the ownership contract.
///
/// # Errors
///
/// Returns an error if `data_path` contains an interior NUL byte.
pub fn chat_into_raw<P: ChatProcessor>(
    processor: P,
    data_path: &str,
) -> Result<*mut CChatHandler, String> {
    let data_path = CString::new(data_path).map_err(|e| format!("Invalid data path: {e}"))?;
    let object = Box::new(ChatHandlerObject {
        vtable: CChatHandler {
            handle: std::ptr::null_mut(),
            data_path: std::ptr::null(),
            get_details: chat_get_details::<P>,
            conversation_attached: chat_conversation_attached::<P>,
            process_message: chat_process_message::<P>,
            conversation_detached: chat_conversation_detached::<P>,
            set_preference_attribute: chat_set_preference::<P>,
            preference_map_has_key: chat_has_preference::<P>,
            destroy: chat_destroy::<P>,
        },
        data_path,
        details: Mutex::new(DetailsStorage::default()),
        instance: Mutex::new(processor),
    });
    let object = Box::into_raw(object);
    // SAFETY: object was just allocated; wiring the self pointers before the
    // host ever sees the vtable.
    unsafe {
        (*object).vtable.handle = object.cast::<c_void>();
        (*object).vtable.data_path = (*object).data_path.as_ptr();
    }
    Ok(object.cast::<CChatHandler>())
}

// ---------------------------------------------------------------------------
// Preference handler shim
// ---------------------------------------------------------------------------

#[repr(C)]
struct PreferenceHandlerObject<P> {
    vtable: CPreferenceHandler,
    data_path: CString,
    details: Mutex<DetailsStorage>,
    instance: Mutex<P>,
}

extern "C-unwind" fn pref_get_details<P: PreferenceProcessor>(handle: *mut c_void) -> CDetailsList {
    catch_unwind(|| {
        // SAFETY: handle points to the PreferenceHandlerObject<P> built by
        // preference_into_raw and owned by the host.
        let object = unsafe { &*handle.cast::<PreferenceHandlerObject<P>>() };
        let mut items = object.instance.lock().map(|mut p| p.details()).unwrap_or_default();
        ensure_plugin_id(&mut items, &object.data_path);
        object
            .details
            .lock()
            .map(|mut storage| storage.rebuild(&items))
            .unwrap_or_else(|_| CDetailsList::empty())
    })
    .unwrap_or_else(|_| CDetailsList::empty())
}

extern "C-unwind" fn pref_set_attribute<P: PreferenceProcessor>(
    handle: *mut c_void,
    account_id: *const c_char,
    key: *const c_char,
    value: *const c_char,
) {
    let _ = catch_unwind(|| {
        // SAFETY: see pref_get_details.
        let object = unsafe { &*handle.cast::<PreferenceHandlerObject<P>>() };
        // SAFETY: the host keeps the strings alive for this call.
        let (Ok(account_id), Ok(key), Ok(value)) = (
            unsafe { conversions::c_str_to_string(account_id) },
            unsafe { conversions::c_str_to_string(key) },
            unsafe { conversions::c_str_to_string(value) },
        ) else {
            return;
        };
        if let Ok(mut instance) = object.instance.lock() {
            instance.set_account_preference(&account_id, &key, &value);
        }
    });
}

extern "C-unwind" fn pref_reset_attributes<P: PreferenceProcessor>(
    handle: *mut c_void,
    account_id: *const c_char,
) {
    let _ = catch_unwind(|| {
        // SAFETY: see pref_get_details.
        let object = unsafe { &*handle.cast::<PreferenceHandlerObject<P>>() };
        // SAFETY: the host keeps the string alive for this call.
        let Ok(account_id) = (unsafe { conversions::c_str_to_string(account_id) }) else {
            return;
        };
        if let Ok(mut instance) = object.instance.lock() {
            instance.reset_account_preferences(&account_id);
        }
    });
}

extern "C-unwind" fn pref_has_key<P: PreferenceProcessor>(
    handle: *mut c_void,
    key: *const c_char,
) -> bool {
    catch_unwind(|| {
        // SAFETY: see pref_get_details.
        let object = unsafe { &*handle.cast::<PreferenceHandlerObject<P>>() };
        // SAFETY: the host keeps the string alive for this call.
        let Ok(key) = (unsafe { conversions::c_str_to_string(key) }) else {
            return false;
        };
        object.instance.lock().map(|mut p| p.has_preference_key(&key)).unwrap_or(false)
    })
    .unwrap_or(false)
}

extern "C-unwind" fn pref_destroy<P: PreferenceProcessor>(vtable: *mut CPreferenceHandler) {
    if vtable.is_null() {
        return;
    }
    let _ = catch_unwind(|| {
        // SAFETY: the vtable is the first field of the
        // PreferenceHandlerObject<P> allocated by preference_into_raw;
        // destroy is called exactly once.
        drop(unsafe { Box::from_raw(vtable.cast::<PreferenceHandlerObject<P>>()) });
    });
}

/// Boxes a preference processor behind a C vtable. See
/// [`call_media_into_raw`] for the ownership contract.
///
/// # Errors
///
/// Returns an error if `data_path` contains an interior NUL byte.
pub fn preference_into_raw<P: PreferenceProcessor>(
    processor: P,
    data_path: &str,
) -> Result<*mut CPreferenceHandler, String> {
    let data_path = CString::new(data_path).map_err(|e| format!("Invalid data path: {e}"))?;
    let object = Box::new(PreferenceHandlerObject {
        vtable: CPreferenceHandler {
            handle: std::ptr::null_mut(),
            data_path: std::ptr::null(),
            get_details: pref_get_details::<P>,
            set_preference_attribute: pref_set_attribute::<P>,
            reset_preference_attributes: pref_reset_attributes::<P>,
            preference_map_has_key: pref_has_key::<P>,
            destroy: pref_destroy::<P>,
        },
        data_path,
        details: Mutex::new(DetailsStorage::default()),
        instance: Mutex::new(processor),
    });
    let object = Box::into_raw(object);
    // SAFETY: object was just allocated; wiring the self pointers before the
    // host ever sees the vtable.
    unsafe {
        (*object).vtable.handle = object.cast::<c_void>();
        (*object).vtable.data_path = (*object).data_path.as_ptr();
    }
    Ok(object.cast::<CPreferenceHandler>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use commkit_core::types::{StreamDirection, StreamType};

    struct Gain {
        applied: f32,
    }

    impl CallMediaProcessor for Gain {
        fn details(&mut self) -> Vec<(String, String)> {
            vec![("name".to_string(), "Gain".to_string())]
        }

        fn process_frame(&mut self, _stream: &StreamData, frame: FrameViewMut<'_>) {
            if let FrameViewMut::Audio { samples, .. } = frame {
                for sample in samples {
                    *sample *= self.applied;
                }
            }
        }
    }

    #[test]
    fn test_call_vtable_round_trip() {
        #[allow(clippy::unwrap_used)]
        let raw = call_media_into_raw(Gain { applied: 0.5 }, "/plugins/gain/data").unwrap();
        // SAFETY: raw was just created and is not shared yet.
        let vtable = unsafe { &*raw };

        let details = (vtable.get_details)(vtable.handle);
        // SAFETY: the shim keeps the storage alive until the next call.
        #[allow(clippy::unwrap_used)]
        let details = unsafe { conversions::details_from_c(details) }.unwrap();
        assert_eq!(details.get("name").map(String::as_str), Some("Gain"));
        // pluginId is synthesized from the data path when absent.
        assert_eq!(details.get("pluginId").map(String::as_str), Some("/plugins/gain/data"));

        let stream = StreamData::new("c1", StreamDirection::Inbound, StreamType::Audio, "alice");
        #[allow(clippy::unwrap_used)]
        let stream_repr = conversions::stream_data_to_c(&stream).unwrap();
        assert!((vtable.wants_stream)(vtable.handle, &raw const stream_repr.raw));

        let mut frame = commkit_core::types::MediaFrame::Audio(commkit_core::types::AudioFrame {
            sample_rate: 8_000,
            channels: 1,
            samples: vec![1.0, -1.0],
        });
        let mut c_frame = conversions::media_frame_to_c(&mut frame);
        (vtable.process_frame)(vtable.handle, &raw const stream_repr.raw, &raw mut c_frame);
        assert_eq!(
            frame,
            commkit_core::types::MediaFrame::Audio(commkit_core::types::AudioFrame {
                sample_rate: 8_000,
                channels: 1,
                samples: vec![0.5, -0.5],
            })
        );

        (vtable.destroy)(raw);
    }
}
