// SPDX-FileCopyrightText: © 2025 CommKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Dynamic library loader
//!
//! Turns a filesystem path into an owned library handle and the plugin's
//! init entry point. The library is opened with immediate relocation and
//! process-global symbol visibility so plugin dependencies resolve against
//! already-loaded symbols.

use anyhow::{anyhow, Result};
use commkit_plugin_sdk_native::types::{CPluginInitFn, PLUGIN_INIT_SYMBOL};
use libloading::Library;
use std::path::{Path, PathBuf};
use tracing::info;

/// An opened plugin library.
///
/// The handle is owned: dropping the value closes the library. Statically
/// linked plugins carry no handle at all.
#[derive(Debug)]
pub struct DylibPlugin {
    library: Option<Library>,
    path: PathBuf,
}

impl DylibPlugin {
    /// Open the shared library at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is empty or the platform loader fails;
    /// the message carries the path and the loader diagnostic. No partially
    /// constructed value is ever returned.
    pub fn load(path: &Path) -> Result<Self> {
        if path.as_os_str().is_empty() {
            return Err(anyhow!("Empty plugin path"));
        }

        info!(?path, "Loading native plugin");

        #[cfg(unix)]
        // SAFETY: Loading a dynamic library is inherently unsafe as we're executing code
        // from an external source. The plugin is trusted code (verified by the user/admin).
        let library = unsafe {
            use libloading::os::unix::{Library as UnixLibrary, RTLD_GLOBAL, RTLD_NOW};
            // RTLD_GLOBAL: plugins ship companion shared objects (codecs,
            // model runtimes) that resolve symbols against already-loaded
            // plugin libraries, so symbols must enter the global namespace.
            UnixLibrary::open(Some(path), RTLD_NOW | RTLD_GLOBAL).map(Library::from).map_err(
                |e| {
                    let path_display = path.display();
                    anyhow!("Failed to load library '{path_display}': {e}")
                },
            )?
        };

        #[cfg(not(unix))]
        // SAFETY: see above.
        let library = unsafe {
            Library::new(path).map_err(|e| {
                let path_display = path.display();
                anyhow!("Failed to load library '{path_display}': {e}")
            })?
        };

        Ok(Self { library: Some(library), path: path.to_path_buf() })
    }

    /// A handle for a plugin whose init function is linked into the host.
    pub(crate) fn linked(path: &Path) -> Self {
        Self { library: None, path: path.to_path_buf() }
    }

    /// Path this plugin was loaded from. Identifies the plugin process-wide.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve a symbol, `None` if the library is closed or the symbol is
    /// absent.
    ///
    /// # Safety
    ///
    /// `T` must match the symbol's actual type in the library.
    pub unsafe fn symbol<T>(&self, name: &[u8]) -> Option<libloading::Symbol<'_, T>> {
        self.library.as_ref()?.get::<T>(name).ok()
    }

    /// Resolve the plugin entry point, `None` if the library is closed or
    /// does not export the symbol.
    pub fn init_fn(&self) -> Option<CPluginInitFn> {
        // SAFETY: the symbol signature is fixed by the plugin entry contract;
        // plugins built with native_plugin_entry! uphold it. The returned
        // function pointer stays valid while the library is open.
        unsafe { self.symbol::<CPluginInitFn>(PLUGIN_INIT_SYMBOL).map(|symbol| *symbol) }
    }

    /// Close the library. The second call is a no-op reporting failure.
    ///
    /// # Errors
    ///
    /// Returns an error if the library was already closed (or never opened,
    /// for linked plugins) or the platform close failed.
    pub fn unload(&mut self) -> Result<()> {
        match self.library.take() {
            Some(library) => library
                .close()
                .map_err(|e| anyhow!("Failed to close library '{}': {e}", self.path.display())),
            None => Err(anyhow!("Library '{}' already closed", self.path.display())),
        }
    }
}
