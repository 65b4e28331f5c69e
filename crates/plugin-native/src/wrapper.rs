// SPDX-FileCopyrightText: © 2025 CommKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Native handler wrappers
//!
//! Adapters implementing the host's handler traits over the C vtables that
//! plugins hand to `manageComponent`. Subjects never cross the ABI: each
//! wrapper subscribes a small forwarder to the subject and relays events to
//! the plugin's flat entry points.

use commkit_core::handler::{CallMediaHandler, ChatHandler, PreferenceHandler};
use commkit_core::subject::{AvSubject, ChatSubject, Observer};
use commkit_core::types::{ChatMessage, ConversationKey, MediaFrame, StreamData};
use commkit_plugin_sdk_native::conversions::{
    self, CConversationKeyRepr, CStreamDataRepr,
};
use commkit_plugin_sdk_native::types::{
    CCallMediaHandler, CChatHandler, CChatMessage, CMediaFrame, CPreferenceHandler, CStreamData,
};
use std::collections::HashMap;
use std::ffi::CString;
use std::os::raw::c_void;
use std::sync::{Arc, Mutex, Weak};
use tracing::warn;

/// Subscribes to a frame subject on behalf of a plugin handler.
struct FrameForwarder {
    handle: *mut c_void,
    process_frame: extern "C-unwind" fn(*mut c_void, *const CStreamData, *mut CMediaFrame),
    stream: CStreamDataRepr,
}

// SAFETY: handle and process_frame belong to a plugin kept loaded for as
// long as the owning wrapper (and thus this forwarder) exists; the handler
// contract requires thread-safe entry points.
unsafe impl Send for FrameForwarder {}
unsafe impl Sync for FrameForwarder {}

impl Observer<MediaFrame> for FrameForwarder {
    fn on_event(&self, frame: &mut MediaFrame) {
        let mut c_frame = conversions::media_frame_to_c(frame);
        (self.process_frame)(self.handle, &raw const self.stream.raw, &raw mut c_frame);
    }
}

struct FrameSubscription {
    subject: Weak<AvSubject>,
    forwarder: Arc<FrameForwarder>,
}

/// [`CallMediaHandler`] over a plugin-provided [`CCallMediaHandler`] vtable.
///
/// Owns the vtable allocation; dropping the wrapper detaches every live
/// subscription and releases the plugin object through the vtable's destroy.
pub struct NativeCallMediaHandler {
    raw: *mut CCallMediaHandler,
    id: String,
    subscriptions: Mutex<Vec<FrameSubscription>>,
}

// SAFETY: the vtable allocation is owned by this wrapper and stays valid
// until drop; concurrent access is serialized by the services manager.
unsafe impl Send for NativeCallMediaHandler {}
unsafe impl Sync for NativeCallMediaHandler {}

impl NativeCallMediaHandler {
    /// Take ownership of a vtable received through `manageComponent`.
    ///
    /// # Errors
    ///
    /// Returns an error on a null pointer. The pointer is consumed either
    /// way once a wrapper exists.
    ///
    /// # Safety
    ///
    /// `raw` must be a valid, exclusively owned `CCallMediaHandler`
    /// allocation following the SDK ownership contract.
    pub unsafe fn from_raw(raw: *mut CCallMediaHandler) -> Result<Self, String> {
        if raw.is_null() {
            return Err("Null call media handler".to_string());
        }
        let id = c_str_or_default((*raw).data_path);
        Ok(Self { raw, id, subscriptions: Mutex::new(Vec::new()) })
    }

    /// The raw vtable pointer, used to match destroy requests.
    pub fn raw_ptr(&self) -> *mut c_void {
        self.raw.cast::<c_void>()
    }
}

impl CallMediaHandler for NativeCallMediaHandler {
    fn id(&self) -> &str {
        &self.id
    }

    fn details(&self) -> HashMap<String, String> {
        // SAFETY: the vtable is valid until drop. The returned list is
        // borrowed until the next vtable call, so it is copied immediately.
        unsafe {
            let list = ((*self.raw).get_details)((*self.raw).handle);
            conversions::details_from_c(list).unwrap_or_default()
        }
    }

    fn notify_av_frame_subject(&self, data: &StreamData, subject: &Arc<AvSubject>) {
        let Ok(stream) = conversions::stream_data_to_c(data) else {
            warn!(handler = %self.id, "Stream descriptor not representable");
            return;
        };

        // SAFETY: the vtable is valid until drop; stream outlives the call.
        let wants =
            unsafe { ((*self.raw).wants_stream)((*self.raw).handle, &raw const stream.raw) };
        if !wants {
            return;
        }

        let Ok(mut subscriptions) = self.subscriptions.lock() else { return };
        let key = Arc::downgrade(subject);
        if subscriptions.iter().any(|s| s.subject.ptr_eq(&key)) {
            return;
        }

        // SAFETY: the vtable is valid until drop.
        let forwarder = Arc::new(FrameForwarder {
            handle: unsafe { (*self.raw).handle },
            process_frame: unsafe { (*self.raw).process_frame },
            stream,
        });
        subject.attach(Arc::downgrade(&forwarder) as Weak<dyn Observer<MediaFrame>>);
        subscriptions.push(FrameSubscription { subject: key, forwarder });
    }

    fn detach(&self, subject: &Arc<AvSubject>) {
        let Ok(mut subscriptions) = self.subscriptions.lock() else { return };
        let key = Arc::downgrade(subject);
        subscriptions.retain(|subscription| {
            if !subscription.subject.ptr_eq(&key) {
                return true;
            }
            let weak = Arc::downgrade(&subscription.forwarder) as Weak<dyn Observer<MediaFrame>>;
            subject.detach(&weak);
            // SAFETY: the vtable is valid until drop; the descriptor lives in
            // the forwarder for the duration of the call.
            unsafe {
                ((*self.raw).stream_detached)(
                    (*self.raw).handle,
                    &raw const subscription.forwarder.stream.raw,
                );
            }
            false
        });
    }

    fn set_preference_attribute(&self, key: &str, value: &str) {
        let (Ok(key), Ok(value)) = (CString::new(key), CString::new(value)) else {
            return;
        };
        // SAFETY: the vtable is valid until drop; strings outlive the call.
        unsafe {
            ((*self.raw).set_preference_attribute)(
                (*self.raw).handle,
                key.as_ptr(),
                value.as_ptr(),
            );
        }
    }

    fn preference_map_has_key(&self, key: &str) -> bool {
        let Ok(key) = CString::new(key) else {
            return false;
        };
        // SAFETY: the vtable is valid until drop; the string outlives the call.
        unsafe { ((*self.raw).preference_map_has_key)((*self.raw).handle, key.as_ptr()) }
    }
}

impl Drop for NativeCallMediaHandler {
    fn drop(&mut self) {
        if let Ok(subscriptions) = self.subscriptions.lock() {
            for subscription in subscriptions.iter() {
                if let Some(subject) = subscription.subject.upgrade() {
                    let weak =
                        Arc::downgrade(&subscription.forwarder) as Weak<dyn Observer<MediaFrame>>;
                    subject.detach(&weak);
                }
            }
        }
        // SAFETY: the wrapper exclusively owns the vtable; destroy releases
        // the plugin object and the vtable allocation exactly once.
        unsafe { ((*self.raw).destroy)(self.raw) };
    }
}

/// Subscribes to a conversation subject on behalf of a plugin handler.
struct MessageForwarder {
    handle: *mut c_void,
    process_message: extern "C-unwind" fn(*mut c_void, *const CChatMessage),
    conversation: CConversationKeyRepr,
}

// SAFETY: see FrameForwarder.
unsafe impl Send for MessageForwarder {}
unsafe impl Sync for MessageForwarder {}

impl Observer<ChatMessage> for MessageForwarder {
    fn on_event(&self, message: &mut ChatMessage) {
        let Ok(repr) = conversions::chat_message_to_c(message) else {
            warn!("Chat message not representable over the ABI");
            return;
        };
        (self.process_message)(self.handle, &raw const repr.raw);
    }
}

struct MessageSubscription {
    subject: Weak<ChatSubject>,
    forwarder: Arc<MessageForwarder>,
}

/// [`ChatHandler`] over a plugin-provided [`CChatHandler`] vtable.
pub struct NativeChatHandler {
    raw: *mut CChatHandler,
    id: String,
    subscriptions: Mutex<Vec<MessageSubscription>>,
}

// SAFETY: see NativeCallMediaHandler.
unsafe impl Send for NativeChatHandler {}
unsafe impl Sync for NativeChatHandler {}

impl NativeChatHandler {
    /// Take ownership of a vtable received through `manageComponent`.
    ///
    /// # Errors
    ///
    /// Returns an error on a null pointer.
    ///
    /// # Safety
    ///
    /// `raw` must be a valid, exclusively owned `CChatHandler` allocation
    /// following the SDK ownership contract.
    pub unsafe fn from_raw(raw: *mut CChatHandler) -> Result<Self, String> {
        if raw.is_null() {
            return Err("Null chat handler".to_string());
        }
        let id = c_str_or_default((*raw).data_path);
        Ok(Self { raw, id, subscriptions: Mutex::new(Vec::new()) })
    }

    pub fn raw_ptr(&self) -> *mut c_void {
        self.raw.cast::<c_void>()
    }
}

impl ChatHandler for NativeChatHandler {
    fn id(&self) -> &str {
        &self.id
    }

    fn details(&self) -> HashMap<String, String> {
        // SAFETY: see NativeCallMediaHandler::details.
        unsafe {
            let list = ((*self.raw).get_details)((*self.raw).handle);
            conversions::details_from_c(list).unwrap_or_default()
        }
    }

    fn notify_chat_subject(&self, conversation: &ConversationKey, subject: &Arc<ChatSubject>) {
        let Ok(key_repr) = conversions::conversation_key_to_c(conversation) else {
            warn!(handler = %self.id, "Conversation key not representable");
            return;
        };

        let Ok(mut subscriptions) = self.subscriptions.lock() else { return };
        let key = Arc::downgrade(subject);
        if subscriptions.iter().any(|s| s.subject.ptr_eq(&key)) {
            return;
        }

        // SAFETY: the vtable is valid until drop; the key outlives the call.
        unsafe {
            ((*self.raw).conversation_attached)((*self.raw).handle, &raw const key_repr.raw);
        }

        // SAFETY: the vtable is valid until drop.
        let forwarder = Arc::new(MessageForwarder {
            handle: unsafe { (*self.raw).handle },
            process_message: unsafe { (*self.raw).process_message },
            conversation: key_repr,
        });
        subject.attach(Arc::downgrade(&forwarder) as Weak<dyn Observer<ChatMessage>>);
        subscriptions.push(MessageSubscription { subject: key, forwarder });
    }

    fn detach(&self, subject: &Arc<ChatSubject>) {
        let Ok(mut subscriptions) = self.subscriptions.lock() else { return };
        let key = Arc::downgrade(subject);
        subscriptions.retain(|subscription| {
            if !subscription.subject.ptr_eq(&key) {
                return true;
            }
            let weak = Arc::downgrade(&subscription.forwarder) as Weak<dyn Observer<ChatMessage>>;
            subject.detach(&weak);
            // SAFETY: the vtable is valid until drop; the key lives in the
            // forwarder for the duration of the call.
            unsafe {
                ((*self.raw).conversation_detached)(
                    (*self.raw).handle,
                    &raw const subscription.forwarder.conversation.raw,
                );
            }
            false
        });
    }

    fn set_preference_attribute(&self, key: &str, value: &str) {
        let (Ok(key), Ok(value)) = (CString::new(key), CString::new(value)) else {
            return;
        };
        // SAFETY: the vtable is valid until drop; strings outlive the call.
        unsafe {
            ((*self.raw).set_preference_attribute)(
                (*self.raw).handle,
                key.as_ptr(),
                value.as_ptr(),
            );
        }
    }

    fn preference_map_has_key(&self, key: &str) -> bool {
        let Ok(key) = CString::new(key) else {
            return false;
        };
        // SAFETY: the vtable is valid until drop; the string outlives the call.
        unsafe { ((*self.raw).preference_map_has_key)((*self.raw).handle, key.as_ptr()) }
    }
}

impl Drop for NativeChatHandler {
    fn drop(&mut self) {
        if let Ok(subscriptions) = self.subscriptions.lock() {
            for subscription in subscriptions.iter() {
                if let Some(subject) = subscription.subject.upgrade() {
                    let weak =
                        Arc::downgrade(&subscription.forwarder) as Weak<dyn Observer<ChatMessage>>;
                    subject.detach(&weak);
                }
            }
        }
        // SAFETY: see NativeCallMediaHandler::drop.
        unsafe { ((*self.raw).destroy)(self.raw) };
    }
}

/// [`PreferenceHandler`] over a plugin-provided [`CPreferenceHandler`] vtable.
pub struct NativePreferenceHandler {
    raw: *mut CPreferenceHandler,
    id: String,
}

// SAFETY: see NativeCallMediaHandler.
unsafe impl Send for NativePreferenceHandler {}
unsafe impl Sync for NativePreferenceHandler {}

impl NativePreferenceHandler {
    /// Take ownership of a vtable received through `manageComponent`.
    ///
    /// # Errors
    ///
    /// Returns an error on a null pointer.
    ///
    /// # Safety
    ///
    /// `raw` must be a valid, exclusively owned `CPreferenceHandler`
    /// allocation following the SDK ownership contract.
    pub unsafe fn from_raw(raw: *mut CPreferenceHandler) -> Result<Self, String> {
        if raw.is_null() {
            return Err("Null preference handler".to_string());
        }
        let id = c_str_or_default((*raw).data_path);
        Ok(Self { raw, id })
    }

    pub fn raw_ptr(&self) -> *mut c_void {
        self.raw.cast::<c_void>()
    }
}

impl PreferenceHandler for NativePreferenceHandler {
    fn id(&self) -> &str {
        &self.id
    }

    fn details(&self) -> HashMap<String, String> {
        // SAFETY: see NativeCallMediaHandler::details.
        unsafe {
            let list = ((*self.raw).get_details)((*self.raw).handle);
            conversions::details_from_c(list).unwrap_or_default()
        }
    }

    fn set_preference_attribute(&self, account_id: &str, key: &str, value: &str) {
        let (Ok(account_id), Ok(key), Ok(value)) =
            (CString::new(account_id), CString::new(key), CString::new(value))
        else {
            return;
        };
        // SAFETY: the vtable is valid until drop; strings outlive the call.
        unsafe {
            ((*self.raw).set_preference_attribute)(
                (*self.raw).handle,
                account_id.as_ptr(),
                key.as_ptr(),
                value.as_ptr(),
            );
        }
    }

    fn reset_preference_attributes(&self, account_id: &str) {
        let Ok(account_id) = CString::new(account_id) else {
            return;
        };
        // SAFETY: the vtable is valid until drop; the string outlives the call.
        unsafe {
            ((*self.raw).reset_preference_attributes)((*self.raw).handle, account_id.as_ptr());
        }
    }

    fn preference_map_has_key(&self, key: &str) -> bool {
        let Ok(key) = CString::new(key) else {
            return false;
        };
        // SAFETY: the vtable is valid until drop; the string outlives the call.
        unsafe { ((*self.raw).preference_map_has_key)((*self.raw).handle, key.as_ptr()) }
    }
}

impl Drop for NativePreferenceHandler {
    fn drop(&mut self) {
        // SAFETY: see NativeCallMediaHandler::drop.
        unsafe { ((*self.raw).destroy)(self.raw) };
    }
}

/// # Safety
///
/// `ptr` must be null or a valid null-terminated string.
unsafe fn c_str_or_default(ptr: *const std::os::raw::c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    conversions::c_str_to_string(ptr).unwrap_or_default()
}
