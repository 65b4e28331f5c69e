// SPDX-FileCopyrightText: © 2025 CommKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Native Plugin Runtime for CommKit
//!
//! This crate provides the host-side runtime for loading and executing native plugins
//! that use the C ABI interface:
//!
//! - [`loader`]: shared-library handling (open, symbol resolution, close)
//! - [`manager`]: plugin life cycle, service routing, object factories
//! - [`wrapper`]: host-side adapters over plugin handler vtables
//! - [`services`]: the call, chat and preference services managers
//! - [`preferences`]: per-plugin preference storage and allow/deny lists
//! - [`installer`]: `.jpl` package installation and the client facade
//!
//! The host wires one [`manager::PluginManager`] together with one of each
//! services manager; services managers register their component life-cycle
//! callbacks with the manager, which routes the handlers plugins create at
//! init time to whichever manager owns their kind.
//!
//! ```no_run
//! use commkit_plugin_native::installer::PluginInstaller;
//! use commkit_plugin_native::manager::PluginManager;
//! use commkit_plugin_native::preferences::PreferenceStore;
//! use commkit_plugin_native::services::{
//!     CallServicesManager, ChatServicesManager, PreferenceServicesManager,
//! };
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let store = Arc::new(PreferenceStore::new(Path::new("/home/user/.local/share/commkit")));
//! let pm = PluginManager::new();
//! let call_sm = CallServicesManager::new(Arc::clone(&store));
//! let chat_sm = ChatServicesManager::new(Arc::clone(&store));
//! let pref_sm = PreferenceServicesManager::new();
//! call_sm.register_components(&pm);
//! chat_sm.register_components(&pm);
//! pref_sm.register_components(&pm);
//!
//! let installer = PluginInstaller::new(
//!     Arc::clone(&pm),
//!     Arc::clone(&store),
//!     Arc::clone(&call_sm),
//!     Arc::clone(&chat_sm),
//!     Arc::clone(&pref_sm),
//! );
//! installer.register_services();
//! ```

pub mod installer;
pub mod loader;
pub mod manager;
pub mod preferences;
pub mod services;
pub mod wrapper;

pub use installer::{InstallStatus, Manifest, PluginInstaller};
pub use loader::DylibPlugin;
pub use manager::{PluginManager, PluginObject};
pub use preferences::PreferenceStore;
pub use services::{CallServicesManager, ChatServicesManager, Messenger, PreferenceServicesManager};
