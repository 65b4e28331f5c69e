// SPDX-FileCopyrightText: © 2025 CommKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Logging utilities for native plugins
//!
//! Provides a logger that routes log records to the host's `log` service,
//! where they are re-emitted through the host's tracing output.

use crate::types::{CLogEntry, CLogLevel, CPluginApi, SERVICE_LOG};
use std::ffi::CString;

/// Logger for sending log records to the host
#[derive(Clone)]
pub struct Logger {
    api: *const CPluginApi,
    target: String,
}

// SAFETY: the API table is owned by the host and stays valid for the plugin's
// lifetime; invoke_service is thread-safe on the host side.
unsafe impl Send for Logger {}
unsafe impl Sync for Logger {}

impl Logger {
    /// Create a new logger emitting records under `target`.
    pub fn new(api: *const CPluginApi, target: &str) -> Self {
        Self { api, target: target.to_string() }
    }

    /// Log a message at the given level
    pub fn log(&self, level: CLogLevel, message: &str) {
        if self.api.is_null() {
            return;
        }

        let Ok(target_cstr) = CString::new(self.target.as_str()) else {
            return; // Silently ignore if target has null bytes
        };
        let Ok(message_cstr) = CString::new(message) else {
            return; // Silently ignore if message has null bytes
        };
        let Ok(service) = CString::new(SERVICE_LOG) else {
            return;
        };

        let mut entry =
            CLogEntry { level, target: target_cstr.as_ptr(), message: message_cstr.as_ptr() };

        // SAFETY: self.api is a valid host API table for the plugin lifetime;
        // the entry and its strings outlive the call.
        unsafe {
            ((*self.api).invoke_service)(
                self.api,
                service.as_ptr(),
                (&raw mut entry).cast::<std::os::raw::c_void>(),
            );
        }
    }

    /// Log a trace message
    pub fn trace(&self, message: &str) {
        self.log(CLogLevel::Trace, message);
    }

    /// Log a debug message
    pub fn debug(&self, message: &str) {
        self.log(CLogLevel::Debug, message);
    }

    /// Log an info message
    pub fn info(&self, message: &str) {
        self.log(CLogLevel::Info, message);
    }

    /// Log a warning message
    pub fn warn(&self, message: &str) {
        self.log(CLogLevel::Warn, message);
    }

    /// Log an error message
    pub fn error(&self, message: &str) {
        self.log(CLogLevel::Error, message);
    }
}

/// Helper macro to format tracing-style field syntax into a simple string
#[doc(hidden)]
#[macro_export]
macro_rules! __format_fields {
    // Base case: just a format string
    ($fmt:literal) => {
        format!($fmt)
    };
    // Base case: format string with args
    ($fmt:literal, $($args:expr),+ $(,)?) => {
        format!($fmt, $($args),+)
    };
    // Field with % formatting (display) followed by more fields: field = %value, ...rest
    ($field:ident = %$value:expr, $($rest:tt)+) => {{
        let prefix = format!("{} = {}", stringify!($field), $value);
        let suffix = $crate::__format_fields!($($rest)+);
        if suffix.is_empty() {
            prefix
        } else {
            format!("{}, {}", prefix, suffix)
        }
    }};
    // Field with % formatting (display) - last field
    ($field:ident = %$value:expr) => {
        format!("{} = {}", stringify!($field), $value)
    };
    // Field with ? formatting (debug) followed by more fields: field = ?value, ...rest
    ($field:ident = ?$value:expr, $($rest:tt)+) => {{
        let prefix = format!("{} = {:?}", stringify!($field), $value);
        let suffix = $crate::__format_fields!($($rest)+);
        if suffix.is_empty() {
            prefix
        } else {
            format!("{}, {}", prefix, suffix)
        }
    }};
    // Field with ? formatting (debug) - last field
    ($field:ident = ?$value:expr) => {
        format!("{} = {:?}", stringify!($field), $value)
    };
    // Field without formatting followed by more fields: field = value, ...rest
    ($field:ident = $value:expr, $($rest:tt)+) => {{
        let prefix = format!("{} = {:?}", stringify!($field), $value);
        let suffix = $crate::__format_fields!($($rest)+);
        if suffix.is_empty() {
            prefix
        } else {
            format!("{}, {}", prefix, suffix)
        }
    }};
    // Field without formatting - last field
    ($field:ident = $value:expr) => {
        format!("{} = {:?}", stringify!($field), $value)
    };
}

/// Helper macros for logging with tracing-style field syntax support
#[macro_export]
macro_rules! plugin_log {
    ($logger:expr, $level:expr, $($arg:tt)*) => {
        $logger.log($level, &$crate::__format_fields!($($arg)*))
    };
}

#[macro_export]
macro_rules! plugin_trace {
    ($logger:expr, $($arg:tt)*) => {
        $logger.trace(&$crate::__format_fields!($($arg)*))
    };
}

#[macro_export]
macro_rules! plugin_debug {
    ($logger:expr, $($arg:tt)*) => {
        $logger.debug(&$crate::__format_fields!($($arg)*))
    };
}

#[macro_export]
macro_rules! plugin_info {
    ($logger:expr, $($arg:tt)*) => {
        $logger.info(&$crate::__format_fields!($($arg)*))
    };
}

#[macro_export]
macro_rules! plugin_warn {
    ($logger:expr, $($arg:tt)*) => {
        $logger.warn(&$crate::__format_fields!($($arg)*))
    };
}

#[macro_export]
macro_rules! plugin_error {
    ($logger:expr, $($arg:tt)*) => {
        $logger.error(&$crate::__format_fields!($($arg)*))
    };
}
