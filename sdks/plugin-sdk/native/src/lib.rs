// SPDX-FileCopyrightText: © 2025 CommKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! CommKit Native Plugin SDK
//!
//! This SDK provides an ergonomic Rust interface for writing native plugins that use
//! a stable C ABI. While the interface feels like pure Rust, under the hood it generates
//! C-compatible exports for maximum binary compatibility.
//!
//! # Example
//!
//! ```no_run
//! use commkit_plugin_sdk_native::prelude::*;
//!
//! struct Mute;
//!
//! impl CallMediaProcessor for Mute {
//!     fn details(&mut self) -> Vec<(String, String)> {
//!         vec![
//!             ("name".to_string(), "Mute".to_string()),
//!             ("dataType".to_string(), "0".to_string()),
//!             ("attached".to_string(), "1".to_string()),
//!         ]
//!     }
//!
//!     fn process_frame(&mut self, _stream: &StreamData, frame: FrameViewMut<'_>) {
//!         if let FrameViewMut::Audio { samples, .. } = frame {
//!             samples.iter_mut().for_each(|s| *s = 0.0);
//!         }
//!     }
//! }
//!
//! struct MutePlugin;
//!
//! impl NativePlugin for MutePlugin {
//!     fn init(host: &HostApi) -> Result<Self, String> {
//!         host.manage_call_media_processor(Mute)?;
//!         Ok(Self)
//!     }
//! }
//!
//! native_plugin_entry!(MutePlugin);
//! ```

pub mod conversions;
pub mod handlers;
pub mod logger;
pub mod types;

use conversions::c_str_to_string;
use logger::Logger;
use std::collections::HashMap;
use std::ffi::CString;
use std::os::raw::{c_char, c_void};
use types::{
    CMapOut, CObjectFactory, CPluginApi, CPluginVersion, CStringOut, CALL_MEDIA_HANDLER_MANAGER,
    CHAT_HANDLER_MANAGER, PREFERENCE_HANDLER_MANAGER, SERVICE_GET_PLUGIN_DATA_PATH,
    SERVICE_GET_PLUGIN_PREFERENCES, SERVICE_SEND_TEXT_MESSAGE,
};

pub use commkit_core;
pub use handlers::{CallMediaProcessor, ChatProcessor, PreferenceProcessor};
pub use types::*;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::conversions::FrameViewMut;
    pub use crate::handlers::{CallMediaProcessor, ChatProcessor, PreferenceProcessor};
    pub use crate::logger::Logger;
    pub use crate::types::{CLogLevel, CPluginVersion};
    pub use crate::{
        native_plugin_entry, plugin_debug, plugin_error, plugin_info, plugin_log, plugin_trace,
        plugin_warn, HostApi, NativePlugin,
    };
    pub use commkit_core::types::{
        AudioFrame, ChatMessage, ConversationKey, MediaFrame, MessageDirection, StreamData,
        StreamDirection, StreamType, VideoFrame,
    };
}

/// Safe wrapper around the host API table handed to a plugin at init.
///
/// Copyable; every method forwards through the table's function pointers.
#[derive(Clone, Copy)]
pub struct HostApi {
    raw: *const CPluginApi,
}

// SAFETY: the API table is owned by the host and stays valid for the plugin's
// lifetime; all entry points are thread-safe on the host side.
unsafe impl Send for HostApi {}
unsafe impl Sync for HostApi {}

impl HostApi {
    /// Wrap the raw table received by the init function.
    ///
    /// # Errors
    ///
    /// Returns an error if `raw` is null.
    ///
    /// # Safety
    ///
    /// `raw` must be the table passed by the host to the plugin's init
    /// function, valid for the plugin's lifetime.
    pub unsafe fn from_raw(raw: *const CPluginApi) -> Result<Self, String> {
        if raw.is_null() {
            return Err("Null plugin API table".to_string());
        }
        Ok(Self { raw })
    }

    /// The host's ABI/API version pair.
    pub fn version(&self) -> CPluginVersion {
        // SAFETY: raw is valid per from_raw's contract.
        unsafe { (*self.raw).version }
    }

    /// Invoke a named host service. Returns the service's value, or −1 on
    /// lookup miss or host-side failure.
    pub fn invoke_service(&self, name: &str, data: *mut c_void) -> i32 {
        let Ok(name) = CString::new(name) else {
            return -1;
        };
        // SAFETY: raw is valid per from_raw's contract.
        unsafe { ((*self.raw).invoke_service)(self.raw, name.as_ptr(), data) }
    }

    /// Register an object factory for a type tag (`"*"` for wildcard).
    pub fn register_object_factory(&self, kind: &str, factory: &CObjectFactory) -> i32 {
        let Ok(kind) = CString::new(kind) else {
            return -1;
        };
        let mut factory = *factory;
        // SAFETY: raw is valid per from_raw's contract; the host copies the
        // factory struct before returning.
        unsafe {
            ((*self.raw).register_object_factory)(
                self.raw,
                kind.as_ptr(),
                (&raw mut factory).cast::<c_void>(),
            )
        }
    }

    fn manage_component(&self, kind: &str, data: *mut c_void) -> Result<(), String> {
        let kind_cstr = CString::new(kind).map_err(|e| format!("Invalid component kind: {e}"))?;
        // SAFETY: raw is valid per from_raw's contract. The host takes
        // ownership of `data` whether or not registration succeeds.
        let rc = unsafe { ((*self.raw).manage_component)(self.raw, kind_cstr.as_ptr(), data) };
        if rc == 0 {
            Ok(())
        } else {
            Err(format!("manageComponent({kind}) failed with {rc}"))
        }
    }

    /// Hand a call media processor to the host.
    ///
    /// # Errors
    ///
    /// Returns an error if the host rejects the component (duplicate display
    /// name, unknown kind). The processor is consumed either way.
    pub fn manage_call_media_processor<P: CallMediaProcessor>(
        &self,
        processor: P,
    ) -> Result<(), String> {
        let data_path = self.data_path().unwrap_or_default();
        let raw = handlers::call_media_into_raw(processor, &data_path)?;
        self.manage_component(CALL_MEDIA_HANDLER_MANAGER, raw.cast::<c_void>())
    }

    /// Hand a chat processor to the host.
    ///
    /// # Errors
    ///
    /// See [`manage_call_media_processor`](Self::manage_call_media_processor).
    pub fn manage_chat_processor<P: ChatProcessor>(&self, processor: P) -> Result<(), String> {
        let data_path = self.data_path().unwrap_or_default();
        let raw = handlers::chat_into_raw(processor, &data_path)?;
        self.manage_component(CHAT_HANDLER_MANAGER, raw.cast::<c_void>())
    }

    /// Hand a preference processor to the host.
    ///
    /// # Errors
    ///
    /// See [`manage_call_media_processor`](Self::manage_call_media_processor).
    pub fn manage_preference_processor<P: PreferenceProcessor>(
        &self,
        processor: P,
    ) -> Result<(), String> {
        let data_path = self.data_path().unwrap_or_default();
        let raw = handlers::preference_into_raw(processor, &data_path)?;
        self.manage_component(PREFERENCE_HANDLER_MANAGER, raw.cast::<c_void>())
    }

    /// Effective preference values of this plugin, defaults merged with
    /// user overrides.
    pub fn plugin_preferences(&self) -> HashMap<String, String> {
        extern "C-unwind" fn collect(user_data: *mut c_void, key: *const c_char, value: *const c_char) {
            // SAFETY: user_data points at the map on the caller's stack for
            // the duration of the service call.
            let map = unsafe { &mut *user_data.cast::<HashMap<String, String>>() };
            // SAFETY: the host passes valid, null-terminated strings.
            if let (Ok(key), Ok(value)) =
                (unsafe { c_str_to_string(key) }, unsafe { c_str_to_string(value) })
            {
                map.insert(key, value);
            }
        }

        let mut map = HashMap::new();
        let mut out = CMapOut { insert: collect, user_data: (&raw mut map).cast::<c_void>() };
        self.invoke_service(SERVICE_GET_PLUGIN_PREFERENCES, (&raw mut out).cast::<c_void>());
        map
    }

    /// Installed data directory of this plugin.
    pub fn data_path(&self) -> Option<String> {
        extern "C-unwind" fn write(user_data: *mut c_void, value: *const c_char) {
            // SAFETY: user_data points at the slot on the caller's stack for
            // the duration of the service call.
            let slot = unsafe { &mut *user_data.cast::<Option<String>>() };
            // SAFETY: the host passes a valid, null-terminated string.
            if let Ok(value) = unsafe { c_str_to_string(value) } {
                *slot = Some(value);
            }
        }

        let mut slot: Option<String> = None;
        let mut out = CStringOut { write, user_data: (&raw mut slot).cast::<c_void>() };
        self.invoke_service(SERVICE_GET_PLUGIN_DATA_PATH, (&raw mut out).cast::<c_void>());
        slot
    }

    /// Inject a message into a conversation as if the local user sent it.
    pub fn send_text_message(
        &self,
        account_id: &str,
        peer_id: &str,
        body: HashMap<String, String>,
    ) -> i32 {
        let message = commkit_core::types::ChatMessage::new(
            account_id,
            peer_id,
            commkit_core::types::MessageDirection::Outgoing,
            body,
            true,
        );
        let Ok(mut repr) = conversions::chat_message_to_c(&message) else {
            return -1;
        };
        self.invoke_service(SERVICE_SEND_TEXT_MESSAGE, (&raw mut repr.raw).cast::<c_void>())
    }

    /// A logger routing records to the host's tracing output.
    pub fn logger(&self, target: &str) -> Logger {
        Logger::new(self.raw, target)
    }
}

/// Trait that plugin authors implement.
///
/// `init` runs inside the host's load sequence; register handlers and
/// factories there through the [`HostApi`]. The instance lives until the
/// host calls the exit function, which drops it after `shutdown`.
pub trait NativePlugin: Sized + Send + 'static {
    /// Create the plugin and register its components with the host.
    ///
    /// # Errors
    ///
    /// Returns an error if initialization fails; the host then closes the
    /// library.
    fn init(host: &HostApi) -> Result<Self, String>;

    /// Called right before the instance is dropped on unload (optional).
    fn shutdown(&mut self) {}
}

/// Macro to generate the C ABI entry point for a plugin
///
/// This macro should be called once per plugin with the type that implements
/// `NativePlugin`. It exports `commkit_plugin_init`, which rejects hosts
/// with a different ABI or an API older than the one this SDK was built
/// against, and returns the plugin's exit function on success.
///
/// # Example
/// ```no_run
/// # use commkit_plugin_sdk_native::prelude::*;
/// # struct MyPlugin;
/// # impl NativePlugin for MyPlugin {
/// #     fn init(_: &HostApi) -> Result<Self, String> { Ok(Self) }
/// # }
/// native_plugin_entry!(MyPlugin);
/// ```
#[macro_export]
macro_rules! native_plugin_entry {
    ($plugin_type:ty) => {
        static __PLUGIN_INSTANCE: std::sync::Mutex<Option<$plugin_type>> =
            std::sync::Mutex::new(None);

        #[no_mangle]
        pub extern "C-unwind" fn commkit_plugin_init(
            api: *const $crate::types::CPluginApi,
        ) -> Option<$crate::types::CPluginExitFn> {
            // SAFETY: the host passes its API table, valid for the plugin's
            // lifetime.
            let host = unsafe { $crate::HostApi::from_raw(api) }.ok()?;

            let version = host.version();
            if version.abi != $crate::types::PLUGIN_ABI_VERSION {
                return None;
            }
            // Refuse hosts older than the API this plugin was compiled for.
            if version.api < $crate::types::PLUGIN_API_VERSION {
                return None;
            }

            let result = std::panic::catch_unwind(|| {
                <$plugin_type as $crate::NativePlugin>::init(&host)
            });
            match result {
                Ok(Ok(instance)) => {
                    *__PLUGIN_INSTANCE.lock().ok()? = Some(instance);
                    Some(__commkit_plugin_exit as $crate::types::CPluginExitFn)
                }
                _ => None,
            }
        }

        extern "C-unwind" fn __commkit_plugin_exit() {
            let _ = std::panic::catch_unwind(|| {
                if let Ok(mut slot) = __PLUGIN_INSTANCE.lock() {
                    if let Some(mut instance) = slot.take() {
                        $crate::NativePlugin::shutdown(&mut instance);
                    }
                }
            });
        }
    };
}
