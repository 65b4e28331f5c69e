// SPDX-FileCopyrightText: © 2025 CommKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Plugin package installer
//!
//! Installs `.jpl` plugin packages (zip archives) into the per-user plugin
//! directory, compares package versions against what is installed, and
//! fronts the plugin manager with root-path based load/unload plus the
//! preference facade the client surfaces expose.
//!
//! A package root carries `manifest.json`, a `data/` directory and one
//! directory per target ABI, each holding the plugin's shared library. Only
//! the entries matching the host's ABI are extracted, with the ABI prefix
//! stripped so the library lands beside the manifest.

use crate::manager::PluginManager;
use crate::preferences::{descriptor, PreferenceStore};
use crate::services::{CallServicesManager, ChatServicesManager, PreferenceServicesManager};
use anyhow::{anyhow, bail, Context, Result};
use commkit_plugin_sdk_native::conversions::c_str_to_string;
use commkit_plugin_sdk_native::types::{
    CLogEntry, CLogLevel, CMapOut, CStringOut, SERVICE_GET_PLUGIN_DATA_PATH,
    SERVICE_GET_PLUGIN_PREFERENCES, SERVICE_LOG,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::ffi::CString;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

#[cfg(windows)]
const LIB_PREFIX: &str = "";
#[cfg(windows)]
const LIB_SUFFIX: &str = ".dll";
#[cfg(not(windows))]
const LIB_PREFIX: &str = "lib";
#[cfg(not(windows))]
const LIB_SUFFIX: &str = ".so";

/// ABI tag selecting the shared-library directory inside a plugin package.
pub const fn platform_abi() -> &'static str {
    if cfg!(target_os = "windows") {
        "x64-windows"
    } else if cfg!(target_os = "android") {
        if cfg!(target_arch = "aarch64") {
            "arm64-v8a"
        } else if cfg!(target_arch = "arm") {
            "armeabi-v7a"
        } else {
            "x86_64"
        }
    } else if cfg!(target_arch = "aarch64") {
        "arm64-v8a"
    } else if cfg!(target_arch = "x86_64") {
        "x86_64-linux-gnu"
    } else if cfg!(target_arch = "x86") {
        "x86-linux-gnu"
    } else {
        "unknown"
    }
}

/// Parsed `manifest.json` of a plugin package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_icon_path", rename = "iconPath")]
    pub icon_path: String,
}

fn default_icon_path() -> String {
    "icon.png".to_string()
}

/// Parse and validate a manifest.
///
/// # Errors
///
/// Returns an error if the JSON is malformed or `name`/`version` are empty.
pub fn parse_manifest(bytes: &[u8]) -> Result<Manifest> {
    let manifest: Manifest =
        serde_json::from_slice(bytes).context("failed to parse the plugin manifest file")?;
    if manifest.name.is_empty() || manifest.version.is_empty() {
        bail!("plugin manifest file: bad format");
    }
    Ok(manifest)
}

/// Outcome of [`PluginInstaller::install`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStatus {
    /// The package was extracted (fresh install, upgrade, or forced).
    Installed,
    /// The same version is already installed.
    AlreadyInstalled,
    /// The installed version is newer than the package.
    OlderVersion,
}

impl InstallStatus {
    /// Numeric code surfaced to clients: 0 installed, 100 already
    /// installed, 200 package older than installed.
    pub const fn code(self) -> i32 {
        match self {
            Self::Installed => 0,
            Self::AlreadyInstalled => 100,
            Self::OlderVersion => 200,
        }
    }
}

/// Dotted-numeric version ordering, falling back to a lexicographic compare
/// for strings semver cannot parse.
fn compare_versions(a: &str, b: &str) -> Ordering {
    match (semver::Version::parse(a), semver::Version::parse(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

fn is_shared_object(name: &str) -> bool {
    name.ends_with(".so")
        || name.contains(".so.")
        || name.ends_with(".dll")
        || name.ends_with(".lib")
}

/// Decide whether an archive entry is extracted and where it lands,
/// relative to the install root. Accepted entries: `manifest.json`,
/// anything under `data/`, and shared objects under the host ABI directory
/// (the ABI prefix is stripped).
fn entry_destination(relative: &Path) -> Option<PathBuf> {
    if relative == Path::new("manifest.json") {
        return Some(relative.to_path_buf());
    }

    let mut components = relative.components();
    let first = components.next()?.as_os_str().to_str()?;
    let rest = components.as_path();

    if first == "data" && !rest.as_os_str().is_empty() {
        return Some(relative.to_path_buf());
    }
    if first == platform_abi() && rest.components().count() == 1 {
        let file_name = rest.to_str()?;
        if is_shared_object(file_name) {
            return Some(rest.to_path_buf());
        }
    }
    None
}

/// Read and validate `manifest.json` out of a package without extracting.
///
/// # Errors
///
/// Returns an error if the archive cannot be opened, lacks a manifest, or
/// the manifest is invalid.
pub fn read_manifest_from_archive(jpl_path: &Path) -> Result<Manifest> {
    let file = fs::File::open(jpl_path)
        .with_context(|| format!("cannot open plugin package '{}'", jpl_path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("cannot read plugin package '{}'", jpl_path.display()))?;
    let mut entry =
        archive.by_name("manifest.json").context("manifest.json missing from package")?;
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes)?;
    parse_manifest(&bytes)
}

fn extract_archive(jpl_path: &Path, destination: &Path) -> Result<()> {
    let file = fs::File::open(jpl_path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!(entry = %entry.name(), "Skipping archive entry with unsafe path");
            continue;
        };
        let Some(target) = entry_destination(&relative) else {
            continue;
        };
        let target = destination.join(target);
        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;
    }
    Ok(())
}

/// Installs plugin packages and fronts the plugin manager with root-path
/// based operations. This is the object client surfaces talk to.
pub struct PluginInstaller {
    pm: Arc<PluginManager>,
    store: Arc<PreferenceStore>,
    call_sm: Arc<CallServicesManager>,
    chat_sm: Arc<ChatServicesManager>,
    pref_sm: Arc<PreferenceServicesManager>,
    details_cache: Mutex<HashMap<PathBuf, HashMap<String, String>>>,
}

impl PluginInstaller {
    pub fn new(
        pm: Arc<PluginManager>,
        store: Arc<PreferenceStore>,
        call_sm: Arc<CallServicesManager>,
        chat_sm: Arc<ChatServicesManager>,
        pref_sm: Arc<PreferenceServicesManager>,
    ) -> Self {
        Self { pm, store, call_sm, chat_sm, pref_sm, details_cache: Mutex::new(HashMap::new()) }
    }

    fn manifest_path(root_path: &Path) -> PathBuf {
        root_path.join("manifest.json")
    }

    fn parse_manifest_file(path: &Path) -> Result<Manifest> {
        let bytes = fs::read(path)
            .with_context(|| format!("cannot read manifest '{}'", path.display()))?;
        parse_manifest(&bytes)
    }

    /// Manifest-derived details of an installed plugin, with the icon path
    /// made absolute and the shared-object path computed. Cached per root;
    /// empty for plugins without a valid manifest.
    pub fn plugin_details(&self, root_path: &Path) -> HashMap<String, String> {
        if let Ok(cache) = self.details_cache.lock() {
            if let Some(details) = cache.get(root_path) {
                return details.clone();
            }
        }

        let Ok(manifest) = Self::parse_manifest_file(&Self::manifest_path(root_path)) else {
            return HashMap::new();
        };

        let mut details = HashMap::new();
        details.insert(
            "iconPath".to_string(),
            root_path.join("data").join(&manifest.icon_path).to_string_lossy().into_owned(),
        );
        details.insert(
            "soPath".to_string(),
            root_path
                .join(format!("{LIB_PREFIX}{}{LIB_SUFFIX}", manifest.name))
                .to_string_lossy()
                .into_owned(),
        );
        details.insert("name".to_string(), manifest.name);
        details.insert("version".to_string(), manifest.version);
        details.insert("description".to_string(), manifest.description);

        if let Ok(mut cache) = self.details_cache.lock() {
            cache.insert(root_path.to_path_buf(), details.clone());
        }
        details
    }

    /// True when a valid manifest sits at `root_path`.
    pub fn is_plugin_installed(&self, root_path: &Path) -> bool {
        Self::parse_manifest_file(&Self::manifest_path(root_path)).is_ok()
    }

    /// Roots of every installed plugin.
    pub fn installed_plugins(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(self.store.plugins_dir()) else {
            return Vec::new();
        };
        entries
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| self.is_plugin_installed(path))
            .collect()
    }

    /// Install a `.jpl` package.
    ///
    /// An existing install of the same name is replaced when `force` is set
    /// or the package version is newer; otherwise the comparison decides the
    /// status (same version or older package). After a successful extraction
    /// the plugin is loaded; a load failure (e.g. the package carried no
    /// library for this ABI) does not fail the install.
    ///
    /// # Errors
    ///
    /// Returns an error if the package cannot be read, its manifest is
    /// invalid, or extraction fails (the destination is removed in that
    /// case).
    pub fn install(&self, jpl_path: &Path, force: bool) -> Result<InstallStatus> {
        if !jpl_path.is_file() {
            bail!("plugin package '{}' is not a file", jpl_path.display());
        }
        let manifest = read_manifest_from_archive(jpl_path)?;
        let destination = self.store.plugins_dir().join(&manifest.name);

        let installed = Self::parse_manifest_file(&Self::manifest_path(&destination)).ok();
        if let Some(installed) = installed {
            if force {
                self.uninstall(&destination)?;
            } else {
                match compare_versions(&manifest.version, &installed.version) {
                    Ordering::Greater => self.uninstall(&destination)?,
                    Ordering::Equal => return Ok(InstallStatus::AlreadyInstalled),
                    Ordering::Less => return Ok(InstallStatus::OlderVersion),
                }
            }
        }

        if let Err(e) = extract_archive(jpl_path, &destination) {
            if let Err(cleanup) = fs::remove_dir_all(&destination) {
                warn!(path = %destination.display(), error = %cleanup, "Could not clean up after failed extraction");
            }
            return Err(e.context(format!("extraction of '{}' failed", jpl_path.display())));
        }

        info!(name = %manifest.name, version = %manifest.version, "Installed plugin package");

        if let Err(e) = self.load_plugin(&destination) {
            warn!(path = %destination.display(), error = %e, "Installed plugin could not be loaded");
        }
        Ok(InstallStatus::Installed)
    }

    /// Remove an installed plugin, unloading it first when needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the plugin is not installed, cannot be unloaded,
    /// or the directory removal fails.
    pub fn uninstall(&self, root_path: &Path) -> Result<()> {
        if !self.is_plugin_installed(root_path) {
            bail!("plugin at '{}' is not installed", root_path.display());
        }
        if self.pm.is_plugin_loaded(root_path) {
            info!(path = %root_path.display(), "Unloading plugin before uninstall");
            self.unload_plugin(root_path)
                .context("could not unload, not performing uninstall")?;
        }
        if let Ok(mut cache) = self.details_cache.lock() {
            cache.remove(root_path);
        }
        fs::remove_dir_all(root_path)?;
        Ok(())
    }

    /// Load the plugin installed at `root_path` through its shared object.
    ///
    /// # Errors
    ///
    /// Returns an error if no library exists for this platform or the load
    /// fails.
    pub fn load_plugin(&self, root_path: &Path) -> Result<()> {
        let so_path = self
            .plugin_details(root_path)
            .remove("soPath")
            .ok_or_else(|| anyhow!("plugin at '{}' has no manifest", root_path.display()))?;
        let so_path = PathBuf::from(so_path);
        if !so_path.is_file() {
            bail!("plugin at '{}': missing shared library", root_path.display());
        }
        self.pm.load(&so_path)
    }

    /// Unload the plugin installed at `root_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the plugin has no manifest or the unload fails.
    pub fn unload_plugin(&self, root_path: &Path) -> Result<()> {
        let so_path = self
            .plugin_details(root_path)
            .remove("soPath")
            .ok_or_else(|| anyhow!("plugin at '{}' has no manifest", root_path.display()))?;
        self.pm.unload(Path::new(&so_path))
    }

    /// Roots of every loaded plugin.
    pub fn loaded_plugins(&self) -> Vec<PathBuf> {
        self.pm
            .loaded_plugins()
            .into_iter()
            .filter_map(|so_path| so_path.parent().map(Path::to_path_buf))
            .collect()
    }

    /// Preference descriptors of an installed plugin.
    pub fn plugin_preferences(&self, root_path: &Path) -> Vec<HashMap<String, String>> {
        self.store.preferences(root_path)
    }

    /// Effective preference values, per account when given.
    pub fn plugin_preferences_values(
        &self,
        root_path: &Path,
        account_id: Option<&str>,
    ) -> HashMap<String, String> {
        self.store.preferences_values(root_path, account_id)
    }

    /// Apply and persist a preference change.
    ///
    /// The change is first offered to the live handlers of the plugin; when
    /// none can apply it and the plugin is loaded, the plugin is reloaded
    /// around the write so it starts with the new value. Returns false when
    /// persisting failed (the in-memory handlers keep the new value for the
    /// session either way).
    pub fn set_plugin_preference(
        &self,
        root_path: &Path,
        key: &str,
        value: &str,
        account_id: Option<&str>,
    ) -> bool {
        let preferences = self.store.preferences(root_path);
        let matched = preferences.iter().find(|p| {
            p.get(descriptor::KEY).map(String::as_str) == Some(key)
        });

        let mut reload_needed = self.pm.is_plugin_loaded(root_path);
        if let Some(preference) = matched {
            let scope = preference.get("scope").cloned().unwrap_or_default();
            reload_needed = reload_needed && self.call_sm.set_preference(key, value, &scope);
            reload_needed = reload_needed && self.chat_sm.set_preference(key, value, &scope);
            if let Some(account_id) = account_id {
                reload_needed = reload_needed
                    && self.pref_sm.set_preference(key, value, root_path, account_id);
            }
        }

        if reload_needed {
            if let Err(e) = self.unload_plugin(root_path) {
                warn!(error = %e, "Could not unload plugin for preference change");
            }
        }

        let mut persisted = true;
        if self.store.preferences_values(root_path, account_id).contains_key(key) {
            let mut user_values = self.store.user_preferences_values(root_path, account_id);
            user_values.insert(key.to_string(), value.to_string());
            if let Err(e) =
                self.store.save_user_preferences_values(root_path, account_id, &user_values)
            {
                error!(error = %e, "Could not persist preference change");
                persisted = false;
            }
        }

        if reload_needed {
            if let Err(e) = self.load_plugin(root_path) {
                warn!(error = %e, "Could not reload plugin after preference change");
            }
        }
        persisted
    }

    /// Reset preference values to the defaults, per account when given.
    /// A loaded plugin is reloaded around the reset.
    pub fn reset_plugin_preferences_values(
        &self,
        root_path: &Path,
        account_id: Option<&str>,
    ) -> bool {
        let loaded = self.pm.is_plugin_loaded(root_path);
        if loaded {
            if let Err(e) = self.unload_plugin(root_path) {
                warn!(error = %e, "Could not unload plugin for preference reset");
            }
        }

        if let Some(account_id) = account_id {
            self.pref_sm.reset_preferences(root_path, account_id);
        }
        let status = self.store.reset_preferences_values(root_path, account_id).is_ok();

        if loaded {
            if let Err(e) = self.load_plugin(root_path) {
                warn!(error = %e, "Could not reload plugin after preference reset");
            }
        }
        status
    }

    /// Register the host services plugins reach through `invokeService`:
    /// `getPluginPreferences`, `getPluginDataPath` and `log`.
    pub fn register_services(&self) {
        let store = Arc::clone(&self.store);
        self.pm.register_service(SERVICE_GET_PLUGIN_PREFERENCES, move |caller, data| {
            if data.is_null() {
                return -1;
            }
            // SAFETY: the service contract makes data a *const CMapOut valid
            // for the duration of the call.
            let out = unsafe { &*data.cast::<CMapOut>() };
            let root = caller.parent().unwrap_or(caller);
            for (key, value) in store.preferences_values(root, None) {
                let (Ok(key), Ok(value)) = (CString::new(key), CString::new(value)) else {
                    continue;
                };
                (out.insert)(out.user_data, key.as_ptr(), value.as_ptr());
            }
            0
        });

        self.pm.register_service(SERVICE_GET_PLUGIN_DATA_PATH, move |caller, data| {
            if data.is_null() {
                return -1;
            }
            // SAFETY: the service contract makes data a *const CStringOut
            // valid for the duration of the call.
            let out = unsafe { &*data.cast::<CStringOut>() };
            let data_path = caller.parent().unwrap_or(caller).join("data");
            let Ok(data_path) = CString::new(data_path.to_string_lossy().into_owned()) else {
                return -1;
            };
            (out.write)(out.user_data, data_path.as_ptr());
            0
        });

        self.pm.register_service(SERVICE_LOG, |_caller, data| {
            if data.is_null() {
                return -1;
            }
            // SAFETY: the service contract makes data a *const CLogEntry
            // valid for the duration of the call.
            let entry = unsafe { &*data.cast::<CLogEntry>() };
            // SAFETY: both strings are valid for the duration of the call.
            let target = unsafe { c_str_to_string(entry.target) }
                .unwrap_or_else(|_| "plugin".to_string());
            let message = unsafe { c_str_to_string(entry.message) }.unwrap_or_default();
            match entry.level {
                CLogLevel::Trace => {
                    tracing::event!(tracing::Level::TRACE, target = %target, "{}", message);
                },
                CLogLevel::Debug => {
                    tracing::event!(tracing::Level::DEBUG, target = %target, "{}", message);
                },
                CLogLevel::Info => {
                    tracing::event!(tracing::Level::INFO, target = %target, "{}", message);
                },
                CLogLevel::Warn => {
                    tracing::event!(tracing::Level::WARN, target = %target, "{}", message);
                },
                CLogLevel::Error => {
                    tracing::event!(tracing::Level::ERROR, target = %target, "{}", message);
                },
            }
            0
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_requires_name_and_version() {
        let manifest =
            parse_manifest(br#"{"name": "green", "version": "1.0.0"}"#).expect("valid manifest");
        assert_eq!(manifest.name, "green");
        assert_eq!(manifest.version, "1.0.0");
        assert_eq!(manifest.icon_path, "icon.png");
        assert_eq!(manifest.description, "");

        assert!(parse_manifest(br#"{"name": "green"}"#).is_err());
        assert!(parse_manifest(br#"{"version": "1.0.0"}"#).is_err());
        assert!(parse_manifest(b"not json").is_err());
    }

    #[test]
    fn test_manifest_round_trip() {
        let manifest = Manifest {
            name: "blue".to_string(),
            version: "1.2.3".to_string(),
            description: "paints frames blue".to_string(),
            icon_path: "blue.svg".to_string(),
        };
        #[allow(clippy::unwrap_used)]
        let json = serde_json::to_vec(&manifest).unwrap();
        let parsed = parse_manifest(&json).expect("own output must parse");
        assert_eq!(parsed.name, manifest.name);
        assert_eq!(parsed.version, manifest.version);
        assert_eq!(parsed.icon_path, manifest.icon_path);
    }

    #[test]
    fn test_version_ordering() {
        assert_eq!(compare_versions("1.1.0", "1.0.0"), Ordering::Greater);
        assert_eq!(compare_versions("1.0.0", "1.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("0.9.0", "1.0.0"), Ordering::Less);
        // Two-digit components order numerically, not lexically.
        assert_eq!(compare_versions("1.10.0", "1.9.0"), Ordering::Greater);
        // Non-semver strings fall back to a lexicographic compare.
        assert_eq!(compare_versions("2024.1", "2023.9"), Ordering::Greater);
    }

    #[test]
    fn test_entry_destination_filter() {
        assert_eq!(
            entry_destination(Path::new("manifest.json")),
            Some(PathBuf::from("manifest.json"))
        );
        assert_eq!(
            entry_destination(Path::new("data/preferences.json")),
            Some(PathBuf::from("data/preferences.json"))
        );
        assert_eq!(
            entry_destination(Path::new("data/icons/icon.png")),
            Some(PathBuf::from("data/icons/icon.png"))
        );

        // ABI prefix is stripped for the matching platform.
        let tagged = format!("{}/libgreen{LIB_SUFFIX}", platform_abi());
        assert_eq!(
            entry_destination(Path::new(&tagged)),
            Some(PathBuf::from(format!("libgreen{LIB_SUFFIX}")))
        );

        // Foreign ABI directories and stray files are skipped.
        assert_eq!(entry_destination(Path::new("some-other-abi/libgreen.so")), None);
        assert_eq!(entry_destination(Path::new("README.md")), None);
        assert_eq!(entry_destination(Path::new("data")), None);
    }
}
