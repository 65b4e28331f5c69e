// SPDX-FileCopyrightText: © 2025 CommKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! C ABI types for native plugins
//!
//! These types define the stable binary interface between the host and native plugins.
//! The layout of these structs must remain stable across versions.

use std::os::raw::{c_char, c_void};

/// ABI version number. A plugin whose ABI differs from the host's is never loaded.
pub const PLUGIN_ABI_VERSION: u32 = 1;

/// API version number. Reflects changes in the services managers and in
/// [`CPluginApi`]. Hosts accept plugins compiled against an older API;
/// plugins must refuse hosts older than the API they were compiled against.
pub const PLUGIN_API_VERSION: u32 = 2;

/// Symbol name of the plugin entry point, resolved after `dlopen`.
pub const PLUGIN_INIT_SYMBOL: &[u8] = b"commkit_plugin_init\0";

/// Component kind routed to the call services manager.
pub const CALL_MEDIA_HANDLER_MANAGER: &str = "CallMediaHandlerManager";
/// Component kind routed to the chat services manager.
pub const CHAT_HANDLER_MANAGER: &str = "ChatHandlerManager";
/// Component kind routed to the preference services manager.
pub const PREFERENCE_HANDLER_MANAGER: &str = "PreferenceHandlerManager";

/// Injects a message into a conversation as if the local user sent it.
/// Data: `*const CChatMessage`.
pub const SERVICE_SEND_TEXT_MESSAGE: &str = "sendTextMessage";
/// Fills the caller's effective preference values. Data: `*const CMapOut`.
pub const SERVICE_GET_PLUGIN_PREFERENCES: &str = "getPluginPreferences";
/// Writes the caller's installed data directory. Data: `*const CStringOut`.
pub const SERVICE_GET_PLUGIN_DATA_PATH: &str = "getPluginDataPath";
/// Routes a plugin log record into the host's tracing output.
/// Data: `*const CLogEntry`.
pub const SERVICE_LOG: &str = "log";

/// ABI and API version pair exchanged at init.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CPluginVersion {
    pub abi: u32,
    pub api: u32,
}

/// Host entry point exposed to plugins.
///
/// `name` is a null-terminated string selecting the operation; `data` points
/// to an operation-specific payload. Returns 0 on success, negative on
/// failure. Host-side panics never cross this boundary.
pub type CPluginFunc = extern "C" fn(*const CPluginApi, *const c_char, *mut c_void) -> i32;

/// The API table handed to a plugin's init function.
///
/// `context` is owned by the host and identifies the calling plugin; plugins
/// must pass the table back unmodified when invoking the function pointers.
#[repr(C)]
pub struct CPluginApi {
    /// Structure version, always the first field.
    pub version: CPluginVersion,
    /// Opaque host-owned pointer identifying the plugin.
    pub context: *mut c_void,

    pub register_object_factory: CPluginFunc,
    pub invoke_service: CPluginFunc,
    pub manage_component: CPluginFunc,
}

/// Plugin teardown function, returned by init.
pub type CPluginExitFn = extern "C-unwind" fn();

/// Plugin entry point. Returns the exit function, or `None` when
/// initialization failed (the host then closes the library).
pub type CPluginInitFn = extern "C-unwind" fn(*const CPluginApi) -> Option<CPluginExitFn>;

/// Parameters handed to an object factory's create function.
#[repr(C)]
pub struct CObjectParams {
    pub api: *const CPluginApi,
    /// Type tag the host is asking the factory to instantiate.
    pub kind: *const c_char,
}

/// Instantiates an opaque object of the requested type, or returns null.
pub type CObjectCreateFn = extern "C-unwind" fn(*mut CObjectParams, *mut c_void) -> *mut c_void;
/// Destroys an object previously returned by the paired create function.
pub type CObjectDestroyFn = extern "C-unwind" fn(*mut c_void, *mut c_void);

/// A plugin-provided object factory, registered against a type tag.
///
/// Registering the tag `"*"` declares a wildcard factory consulted when no
/// exact factory accepts a type.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct CObjectFactory {
    pub version: CPluginVersion,
    /// Closure passed back to `create` and `destroy`.
    pub closure: *mut c_void,
    pub create: Option<CObjectCreateFn>,
    pub destroy: Option<CObjectDestroyFn>,
}

/// A key/value pair of borrowed, null-terminated strings.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct CKeyValue {
    pub key: *const c_char,
    pub value: *const c_char,
}

/// A borrowed list of key/value pairs.
///
/// # Ownership
///
/// The entries are **borrowed** from the callee and remain valid only until
/// the next call through the same vtable. Callers must copy them immediately.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct CDetailsList {
    pub entries: *const CKeyValue,
    pub count: usize,
}

impl CDetailsList {
    pub const fn empty() -> Self {
        Self { entries: std::ptr::null(), count: 0 }
    }
}

/// Stream direction relative to the local peer.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CStreamDirection {
    Inbound = 0,
    Outbound = 1,
}

/// Media kind of a stream or frame.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CStreamType {
    Audio = 0,
    Video = 1,
}

/// Identifies a stream within a call.
#[repr(C)]
pub struct CStreamData {
    pub call_id: *const c_char,
    pub peer_id: *const c_char,
    pub direction: CStreamDirection,
    pub stream_type: CStreamType,
}

/// A mutable view over a media frame crossing the ABI.
///
/// For audio frames `samples`/`sample_count` are set and the video fields are
/// zero; for video frames `data`/`data_len` are set. Plugins may rewrite the
/// buffer contents in place but must not change any dimension.
#[repr(C)]
pub struct CMediaFrame {
    pub stream_type: CStreamType,
    pub sample_rate: u32,
    pub channels: u16,
    pub width: u32,
    pub height: u32,
    pub samples: *mut f32,
    pub sample_count: usize,
    pub data: *mut u8,
    pub data_len: usize,
}

/// Message direction relative to the local account.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CMessageDirection {
    Incoming = 0,
    Outgoing = 1,
}

/// Identifies a conversation: one account talking to one peer.
#[repr(C)]
pub struct CConversationKey {
    pub account_id: *const c_char,
    pub peer_id: *const c_char,
}

/// A chat message crossing the ABI. The body is a borrowed key/value list.
#[repr(C)]
pub struct CChatMessage {
    pub account_id: *const c_char,
    pub peer_id: *const c_char,
    pub direction: CMessageDirection,
    /// True if the message originated from plugin code.
    pub from_plugin: bool,
    pub body: *const CKeyValue,
    pub body_count: usize,
}

/// Vtable of a call media handler, handed to the host through
/// `manageComponent("CallMediaHandlerManager", ..)`.
///
/// # Ownership
///
/// The host takes ownership of the allocation on `manageComponent` — whether
/// or not registration succeeds — and releases it through `destroy`, which
/// must free both the instance behind `handle` and the vtable itself.
#[repr(C)]
pub struct CCallMediaHandler {
    /// Opaque handler instance, passed as first argument to every entry.
    pub handle: *mut c_void,
    /// Data directory of the owning plugin; doubles as the handler identity.
    pub data_path: *const c_char,

    pub get_details: extern "C-unwind" fn(*mut c_void) -> CDetailsList,
    /// Asked once per new stream; returning false declines the stream.
    pub wants_stream: extern "C-unwind" fn(*mut c_void, *const CStreamData) -> bool,
    pub process_frame: extern "C-unwind" fn(*mut c_void, *const CStreamData, *mut CMediaFrame),
    pub stream_detached: extern "C-unwind" fn(*mut c_void, *const CStreamData),
    pub set_preference_attribute: extern "C-unwind" fn(*mut c_void, *const c_char, *const c_char),
    pub preference_map_has_key: extern "C-unwind" fn(*mut c_void, *const c_char) -> bool,
    pub destroy: extern "C-unwind" fn(*mut CCallMediaHandler),
}

/// Vtable of a chat handler (`manageComponent("ChatHandlerManager", ..)`).
/// Ownership follows [`CCallMediaHandler`].
#[repr(C)]
pub struct CChatHandler {
    pub handle: *mut c_void,
    pub data_path: *const c_char,

    pub get_details: extern "C-unwind" fn(*mut c_void) -> CDetailsList,
    pub conversation_attached: extern "C-unwind" fn(*mut c_void, *const CConversationKey),
    pub process_message: extern "C-unwind" fn(*mut c_void, *const CChatMessage),
    pub conversation_detached: extern "C-unwind" fn(*mut c_void, *const CConversationKey),
    pub set_preference_attribute: extern "C-unwind" fn(*mut c_void, *const c_char, *const c_char),
    pub preference_map_has_key: extern "C-unwind" fn(*mut c_void, *const c_char) -> bool,
    pub destroy: extern "C-unwind" fn(*mut CChatHandler),
}

/// Vtable of a preference handler
/// (`manageComponent("PreferenceHandlerManager", ..)`).
/// Ownership follows [`CCallMediaHandler`].
#[repr(C)]
pub struct CPreferenceHandler {
    pub handle: *mut c_void,
    pub data_path: *const c_char,

    pub get_details: extern "C-unwind" fn(*mut c_void) -> CDetailsList,
    /// `(handle, account_id, key, value)`
    pub set_preference_attribute:
        extern "C-unwind" fn(*mut c_void, *const c_char, *const c_char, *const c_char),
    pub reset_preference_attributes: extern "C-unwind" fn(*mut c_void, *const c_char),
    pub preference_map_has_key: extern "C-unwind" fn(*mut c_void, *const c_char) -> bool,
    pub destroy: extern "C-unwind" fn(*mut CPreferenceHandler),
}

/// Log level for plugin logging.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CLogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

/// A log record routed through the `log` host service.
#[repr(C)]
pub struct CLogEntry {
    pub level: CLogLevel,
    /// Module path originating the record (e.g. `watermark_plugin::overlay`).
    pub target: *const c_char,
    pub message: *const c_char,
}

/// Inserts one key/value pair into a caller-owned map.
pub type CMapInsertFn = extern "C-unwind" fn(*mut c_void, *const c_char, *const c_char);

/// Output collector for map-valued services (`getPluginPreferences`).
#[repr(C)]
pub struct CMapOut {
    pub insert: CMapInsertFn,
    pub user_data: *mut c_void,
}

/// Writes one string into a caller-owned slot.
pub type CStringWriteFn = extern "C-unwind" fn(*mut c_void, *const c_char);

/// Output collector for string-valued services (`getPluginDataPath`).
#[repr(C)]
pub struct CStringOut {
    pub write: CStringWriteFn,
    pub user_data: *mut c_void,
}
