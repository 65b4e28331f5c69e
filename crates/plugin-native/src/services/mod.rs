// SPDX-FileCopyrightText: © 2025 CommKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Services managers mediating between host pipelines and plugin handlers.

pub mod call;
pub mod chat;
pub mod preference;

pub use call::{CallServicesManager, SenderRestartHook};
pub use chat::{ChatServicesManager, Messenger};
pub use preference::PreferenceServicesManager;
