// SPDX-FileCopyrightText: © 2025 CommKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Plugin manager
//!
//! Orchestrates plugin loading, initialization, service routing and unload:
//! opens the library, hands the plugin its API table, routes the components
//! it registers to the owning services manager, and tears everything down in
//! the reverse order on unload (components, then exit, then close).
//!
//! Every function pointer exposed to plugins is a thunk that catches panics
//! and converts them to the documented sentinel. Plugin-implemented entry
//! points use the `C-unwind` ABI, so a misbehaving plugin unwinds into the
//! nearest host-side catch instead of aborting the process.

use crate::loader::DylibPlugin;
use anyhow::{anyhow, bail, Result};
use commkit_plugin_sdk_native::conversions::c_str_to_string;
use commkit_plugin_sdk_native::types::{
    CObjectFactory, CObjectParams, CPluginApi, CPluginExitFn, CPluginInitFn, CPluginVersion,
    PLUGIN_ABI_VERSION, PLUGIN_API_VERSION,
};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::ffi::CString;
use std::os::raw::{c_char, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// A host-side service callable by plugins through `invokeService`.
/// Receives the calling plugin's library path and the opaque payload.
pub type ServiceFn = Arc<dyn Fn(&Path, *mut c_void) -> i32 + Send + Sync>;

/// Component life-cycle callback. Invoked with the manager's component
/// tables locked; must not call back into the [`PluginManager`].
pub type ComponentFn = Box<dyn Fn(*mut c_void) -> i32 + Send + Sync>;

/// Registration and destruction callbacks of one component kind.
struct ComponentLifecycle {
    take_ownership: ComponentFn,
    destroy: ComponentFn,
}

/// Host-side state of one loaded plugin. Boxed so the address handed to the
/// plugin as `api.context` stays stable for the plugin's lifetime.
struct PluginInstance {
    dylib: DylibPlugin,
    api: CPluginApi,
    manager: *const PluginManager,
}

struct LoadedPlugin {
    instance: Box<PluginInstance>,
    exit_fn: Option<CPluginExitFn>,
    loaded: bool,
}

// SAFETY: the raw pointers (api.context self-pointer, manager back-pointer)
// are only dereferenced by API thunks while the plugin is loaded; the tables
// holding LoadedPlugin are guarded by a mutex.
unsafe impl Send for LoadedPlugin {}

#[derive(Default)]
struct ComponentTables {
    lifecycles: HashMap<String, ComponentLifecycle>,
    /// Per plugin path, the (kind, pointer) pairs it produced.
    components: HashMap<PathBuf, Vec<(String, *mut c_void)>>,
}

// SAFETY: component pointers originate from plugin libraries that stay
// loaded while referenced; access is serialized by the surrounding mutex.
unsafe impl Send for ComponentTables {}

#[derive(Default)]
struct FactoryTables {
    exact: HashMap<String, CObjectFactory>,
    wildcard: Vec<CObjectFactory>,
}

// SAFETY: factory closures originate from plugin libraries that stay loaded
// while referenced; access is serialized by the surrounding mutex.
unsafe impl Send for FactoryTables {}

/// An opaque object created through a plugin object factory. Dropping it
/// invokes the factory's destroy function.
pub struct PluginObject {
    object: *mut c_void,
    factory: CObjectFactory,
}

// SAFETY: the object and closure belong to a plugin library kept loaded by
// the manager; the factory contract requires thread-safe objects.
unsafe impl Send for PluginObject {}

impl PluginObject {
    pub const fn as_ptr(&self) -> *mut c_void {
        self.object
    }
}

impl Drop for PluginObject {
    fn drop(&mut self) {
        if let Some(destroy) = self.factory.destroy {
            let closure = self.factory.closure;
            let object = self.object;
            if catch_unwind(AssertUnwindSafe(|| destroy(object, closure))).is_err() {
                error!("Object factory destroy panicked");
            }
        }
    }
}

/// This struct manages plugin (un)loading. That covers:
/// (1) plugin library (un)loading;
/// (2) calling the plugin init/exit functions;
/// (3) handler registration and destruction, and;
/// (4) service registration.
pub struct PluginManager {
    /// API table template used when the host itself instantiates factory
    /// objects; its context stays null.
    host_api: CPluginApi,
    /// Loaded plugins in insertion order, so teardown can run in reverse.
    plugins: Mutex<IndexMap<PathBuf, LoadedPlugin>>,
    components: Mutex<ComponentTables>,
    factories: Mutex<FactoryTables>,
    services: Mutex<HashMap<String, ServiceFn>>,
}

// SAFETY: host_api.context is always null; every other raw pointer lives in
// mutex-guarded tables. Thunks only read the manager through plugins that
// the manager keeps alive.
unsafe impl Send for PluginManager {}
unsafe impl Sync for PluginManager {}

impl PluginManager {
    /// Create the manager. Returned behind `Arc` because loaded plugins keep
    /// a back-pointer to it for the duration of their lifetime.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            host_api: CPluginApi {
                version: CPluginVersion { abi: PLUGIN_ABI_VERSION, api: PLUGIN_API_VERSION },
                context: std::ptr::null_mut(),
                register_object_factory: register_object_factory_thunk,
                invoke_service: invoke_service_thunk,
                manage_component: manage_component_thunk,
            },
            plugins: Mutex::new(IndexMap::new()),
            components: Mutex::new(ComponentTables::default()),
            factories: Mutex::new(FactoryTables::default()),
            services: Mutex::new(HashMap::new()),
        })
    }

    /// Load the plugin library at `path` and run its init function.
    ///
    /// Loading a path that is already loaded unloads the previous instance
    /// first, so the final state equals a fresh load.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is empty, the library cannot be opened,
    /// the init symbol is missing, or init fails. A failed load leaves no
    /// partially registered state behind.
    pub fn load(self: &Arc<Self>, path: &Path) -> Result<()> {
        if path.as_os_str().is_empty() {
            bail!("Empty plugin path");
        }
        if self.is_loaded(path) {
            self.unload(path)?;
        }

        let dylib = DylibPlugin::load(path)?;
        let init_fn = dylib
            .init_fn()
            .ok_or_else(|| anyhow!("Plugin '{}': no init symbol", path.display()))?;

        self.register_plugin(dylib, init_fn)
    }

    /// Register a plugin whose init function is linked into the host
    /// instead of resolved from a shared library. `path` still identifies
    /// the plugin process-wide.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is empty or init fails.
    pub fn load_linked(self: &Arc<Self>, path: &Path, init_fn: CPluginInitFn) -> Result<()> {
        if path.as_os_str().is_empty() {
            bail!("Empty plugin path");
        }
        if self.is_loaded(path) {
            self.unload(path)?;
        }
        self.register_plugin(DylibPlugin::linked(path), init_fn)
    }

    fn register_plugin(self: &Arc<Self>, dylib: DylibPlugin, init_fn: CPluginInitFn) -> Result<()> {
        let path = dylib.path().to_path_buf();

        let mut instance = Box::new(PluginInstance {
            dylib,
            api: CPluginApi {
                version: CPluginVersion { abi: PLUGIN_ABI_VERSION, api: PLUGIN_API_VERSION },
                context: std::ptr::null_mut(),
                register_object_factory: register_object_factory_thunk,
                invoke_service: invoke_service_thunk,
                manage_component: manage_component_thunk,
            },
            manager: Arc::as_ptr(self),
        });
        // The context identifies the calling plugin on every plugin-to-host
        // call. The box gives it a stable address before init runs.
        instance.api.context = std::ptr::addr_of_mut!(*instance).cast::<c_void>();

        let api_ptr: *const CPluginApi = &raw const instance.api;
        let exit_fn = catch_unwind(AssertUnwindSafe(|| init_fn(api_ptr))).unwrap_or_else(|_| {
            error!(?path, "Plugin init panicked");
            None
        });

        let Some(exit_fn) = exit_fn else {
            // Roll back whatever the plugin registered before bailing out.
            self.destroy_plugin_components(&path);
            return Err(anyhow!("Plugin '{}': init failed", path.display()));
        };

        if let Ok(mut plugins) = self.plugins.lock() {
            plugins.insert(
                path.clone(),
                LoadedPlugin { instance, exit_fn: Some(exit_fn), loaded: true },
            );
        }

        info!(?path, "Successfully loaded native plugin");
        Ok(())
    }

    /// Unload the plugin at `path`: destroy its components, call its exit
    /// function, close the library and erase all bookkeeping. Failures along
    /// the way are logged and the teardown proceeds; resources are never
    /// leaked for a plugin the host has decided to remove.
    ///
    /// # Errors
    ///
    /// Currently infallible for unknown paths (a no-op); returns `Result`
    /// for parity with [`load`](Self::load).
    pub fn unload(&self, path: &Path) -> Result<()> {
        self.destroy_plugin_components(path);

        let removed = self.plugins.lock().ok().and_then(|mut plugins| plugins.shift_remove(path));
        let Some(mut plugin) = removed else {
            return Ok(());
        };

        if let Some(exit_fn) = plugin.exit_fn.take() {
            if catch_unwind(|| exit_fn()).is_err() {
                error!(?path, "Exception caught during plugin exit");
            }
        }

        if let Err(e) = plugin.instance.dylib.unload() {
            // Linked plugins have no library to close.
            debug!(?path, error = %e, "Plugin library not closed");
        }

        info!(?path, "Unloaded native plugin");
        Ok(())
    }

    /// Paths of all loaded plugins, in load order.
    pub fn loaded_plugins(&self) -> Vec<PathBuf> {
        self.plugins
            .lock()
            .map(|plugins| {
                plugins
                    .iter()
                    .filter(|(_, plugin)| plugin.loaded)
                    .map(|(path, _)| path.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// True if a loaded plugin's library lives under `root_path`.
    pub fn is_plugin_loaded(&self, root_path: &Path) -> bool {
        self.plugins
            .lock()
            .map(|plugins| {
                plugins.iter().any(|(path, plugin)| plugin.loaded && path.starts_with(root_path))
            })
            .unwrap_or(false)
    }

    fn is_loaded(&self, path: &Path) -> bool {
        self.plugins.lock().map(|plugins| plugins.contains_key(path)).unwrap_or(false)
    }

    /// Register a named host service callable by plugins. Duplicate names
    /// overwrite the previous service.
    pub fn register_service<F>(&self, name: &str, func: F)
    where
        F: Fn(&Path, *mut c_void) -> i32 + Send + Sync + 'static,
    {
        if let Ok(mut services) = self.services.lock() {
            services.insert(name.to_string(), Arc::new(func));
        }
    }

    /// Remove a named service. Unknown names are ignored.
    pub fn unregister_service(&self, name: &str) {
        if let Ok(mut services) = self.services.lock() {
            services.remove(name);
        }
    }

    /// Invoke a named service on behalf of the plugin at `caller`.
    /// Returns the service's value, −1 on lookup miss, and −1 when the
    /// service panics (panics never cross back into plugin code).
    pub fn invoke_service(&self, caller: &Path, name: &str, data: *mut c_void) -> i32 {
        let func = self.services.lock().ok().and_then(|services| services.get(name).cloned());
        let Some(func) = func else {
            error!(name, "Service not found");
            return -1;
        };

        catch_unwind(AssertUnwindSafe(|| func(caller, data))).unwrap_or_else(|_| {
            error!(name, "Service panicked");
            -1
        })
    }

    /// Register the life-cycle callbacks of one component kind. Duplicate
    /// kinds overwrite.
    pub fn register_component_manager<T, D>(&self, kind: &str, take_ownership: T, destroy: D)
    where
        T: Fn(*mut c_void) -> i32 + Send + Sync + 'static,
        D: Fn(*mut c_void) -> i32 + Send + Sync + 'static,
    {
        if let Ok(mut tables) = self.components.lock() {
            tables.lifecycles.insert(
                kind.to_string(),
                ComponentLifecycle {
                    take_ownership: Box::new(take_ownership),
                    destroy: Box::new(destroy),
                },
            );
        }
    }

    /// Route a component produced by the plugin at `caller` to the owning
    /// services manager. On success the pair is recorded so unload can
    /// destroy it.
    fn manage_component(&self, caller: &Path, kind: &str, data: *mut c_void) -> i32 {
        let Ok(mut tables) = self.components.lock() else {
            return -1;
        };
        let ComponentTables { lifecycles, components } = &mut *tables;
        let Some(lifecycle) = lifecycles.get(kind) else {
            error!(kind, "Component lifecycle manager not found");
            return -1;
        };

        let result =
            catch_unwind(AssertUnwindSafe(|| (lifecycle.take_ownership)(data))).unwrap_or_else(
                |_| {
                    error!(kind, "Component registration panicked");
                    -1
                },
            );
        if result == 0 {
            components.entry(caller.to_path_buf()).or_default().push((kind.to_string(), data));
        }
        result
    }

    /// Destroy every component recorded for `path`, giving services managers
    /// the chance to detach handlers from live subjects before the plugin
    /// code vanishes.
    fn destroy_plugin_components(&self, path: &Path) {
        let Ok(mut tables) = self.components.lock() else {
            return;
        };
        let ComponentTables { lifecycles, components } = &mut *tables;
        let Some(list) = components.remove(path) else {
            return;
        };

        for (kind, pointer) in list {
            let Some(lifecycle) = lifecycles.get(&kind) else {
                warn!(kind = %kind, "No lifecycle manager to destroy component");
                continue;
            };
            if catch_unwind(AssertUnwindSafe(|| (lifecycle.destroy)(pointer))).is_err() {
                error!(kind = %kind, "Component destruction panicked");
            }
        }
    }

    /// Register a plugin object factory against a type tag (`"*"` declares
    /// a wildcard factory).
    ///
    /// # Errors
    ///
    /// Returns an error if the factory lacks create/destroy, its ABI differs
    /// from the host's, its API is older than the host's, or the exact tag
    /// is already taken.
    pub fn register_object_factory(&self, kind: &str, factory: &CObjectFactory) -> Result<()> {
        if kind.is_empty() {
            bail!("Empty object factory type");
        }
        if factory.create.is_none() || factory.destroy.is_none() {
            bail!("Object factory for '{kind}' is missing create or destroy");
        }
        // Strict compatibility on ABI
        if factory.version.abi != PLUGIN_ABI_VERSION {
            bail!(
                "Object factory for '{kind}': ABI mismatch (factory {}, host {})",
                factory.version.abi,
                PLUGIN_ABI_VERSION
            );
        }
        // Backward compatibility on API
        if factory.version.api < PLUGIN_API_VERSION {
            bail!(
                "Object factory for '{kind}': API too old (factory {}, host {})",
                factory.version.api,
                PLUGIN_API_VERSION
            );
        }

        let Ok(mut factories) = self.factories.lock() else {
            bail!("Factory registry unavailable");
        };

        if kind == "*" {
            factories.wildcard.push(*factory);
            return Ok(());
        }

        if factories.exact.contains_key(kind) {
            bail!("Duplicate object factory for type '{kind}'");
        }
        factories.exact.insert(kind.to_string(), *factory);
        Ok(())
    }

    /// Instantiate an object of `kind` through the registered factories.
    ///
    /// Exact factories are consulted first; wildcard factories only when no
    /// exact factory produced an object. A wildcard factory that creates an
    /// object is promoted to an exact match for that type (and stays in the
    /// wildcard list for other types). Asking for `"*"` is rejected.
    pub fn create_object(&self, kind: &str) -> Option<PluginObject> {
        if kind == "*" {
            return None;
        }

        let (exact, wildcard) = {
            let factories = self.factories.lock().ok()?;
            (factories.exact.get(kind).copied(), factories.wildcard.clone())
        };

        let kind_cstr = CString::new(kind).ok()?;
        let mut params =
            CObjectParams { api: &raw const self.host_api, kind: kind_cstr.as_ptr() };

        if let Some(factory) = exact {
            if let Some(object) = call_factory_create(&factory, &mut params) {
                return Some(PluginObject { object, factory });
            }
        }

        for factory in wildcard {
            let Some(object) = call_factory_create(&factory, &mut params) else {
                continue;
            };
            if let Err(e) = self.register_object_factory(kind, &factory) {
                error!(kind, error = %e, "Failed to promote wildcard factory");
                drop(PluginObject { object, factory });
                return None;
            }
            return Some(PluginObject { object, factory });
        }

        None
    }
}

impl Drop for PluginManager {
    fn drop(&mut self) {
        // Teardown in reverse-insertion order.
        let paths: Vec<PathBuf> = self
            .plugins
            .lock()
            .map(|plugins| plugins.keys().rev().cloned().collect())
            .unwrap_or_default();
        for path in paths {
            if let Err(e) = self.unload(&path) {
                error!(?path, error = %e, "Failed to unload plugin during teardown");
            }
        }
    }
}

fn call_factory_create(factory: &CObjectFactory, params: &mut CObjectParams) -> Option<*mut c_void> {
    let create = factory.create?;
    let closure = factory.closure;
    let params_ptr: *mut CObjectParams = params;
    let object = catch_unwind(AssertUnwindSafe(|| create(params_ptr, closure)))
        .unwrap_or_else(|_| {
            error!("Object factory create panicked");
            std::ptr::null_mut()
        });
    if object.is_null() {
        None
    } else {
        Some(object)
    }
}

/// Resolve the manager and the calling plugin's path out of an API table.
///
/// # Safety
///
/// `api` must be an API table handed out by [`PluginManager::register_plugin`]
/// whose plugin is still loaded.
unsafe fn manager_from_api<'a>(api: *const CPluginApi) -> Option<(&'a PluginManager, PathBuf)> {
    if api.is_null() {
        return None;
    }
    let context = (*api).context;
    if context.is_null() {
        return None;
    }
    let instance = &*context.cast::<PluginInstance>();
    if instance.manager.is_null() {
        return None;
    }
    Some((&*instance.manager, instance.dylib.path().to_path_buf()))
}

// Implements CPluginApi.register_object_factory. Must be C accessible.
extern "C" fn register_object_factory_thunk(
    api: *const CPluginApi,
    kind: *const c_char,
    data: *mut c_void,
) -> i32 {
    catch_unwind(|| {
        // SAFETY: api was handed to the plugin at init and outlives it.
        let Some((manager, _path)) = (unsafe { manager_from_api(api) }) else {
            error!("registerObjectFactory called with null plugin API");
            return -1;
        };
        if data.is_null() {
            error!("registerObjectFactory called with null factory data");
            return -1;
        }
        // SAFETY: the plugin passes a CObjectFactory per the ABI contract;
        // the struct is copied before this call returns.
        let factory = unsafe { &*data.cast::<CObjectFactory>() };
        // SAFETY: kind is a null-terminated string valid for this call.
        let Ok(kind) = (unsafe { c_str_to_string(kind) }) else {
            return -1;
        };
        match manager.register_object_factory(&kind, factory) {
            Ok(()) => 0,
            Err(e) => {
                error!(kind = %kind, error = %e, "Object factory rejected");
                -1
            },
        }
    })
    .unwrap_or(-1)
}

// Implements CPluginApi.invoke_service. Must be C accessible.
extern "C" fn invoke_service_thunk(
    api: *const CPluginApi,
    name: *const c_char,
    data: *mut c_void,
) -> i32 {
    catch_unwind(|| {
        // SAFETY: api was handed to the plugin at init and outlives it.
        let Some((manager, path)) = (unsafe { manager_from_api(api) }) else {
            error!("invokeService called with null plugin API");
            return -1;
        };
        // SAFETY: name is a null-terminated string valid for this call.
        let Ok(name) = (unsafe { c_str_to_string(name) }) else {
            return -1;
        };
        manager.invoke_service(&path, &name, data)
    })
    .unwrap_or(-1)
}

// Implements CPluginApi.manage_component. Must be C accessible.
extern "C" fn manage_component_thunk(
    api: *const CPluginApi,
    kind: *const c_char,
    data: *mut c_void,
) -> i32 {
    catch_unwind(|| {
        // SAFETY: api was handed to the plugin at init and outlives it.
        let Some((manager, path)) = (unsafe { manager_from_api(api) }) else {
            error!("manageComponent called with null plugin API");
            return -1;
        };
        // SAFETY: kind is a null-terminated string valid for this call.
        let Ok(kind) = (unsafe { c_str_to_string(kind) }) else {
            return -1;
        };
        manager.manage_component(&path, &kind, data)
    })
    .unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use commkit_plugin_sdk_native::types::CObjectCreateFn;
    use std::sync::atomic::{AtomicUsize, Ordering};

    extern "C-unwind" fn create_ok(_params: *mut CObjectParams, closure: *mut c_void) -> *mut c_void {
        // Hand back the closure pointer so tests can recognize the factory.
        closure
    }

    extern "C-unwind" fn create_null(_params: *mut CObjectParams, _closure: *mut c_void) -> *mut c_void {
        std::ptr::null_mut()
    }

    extern "C-unwind" fn create_panics(
        _params: *mut CObjectParams,
        _closure: *mut c_void,
    ) -> *mut c_void {
        panic!("factory create blew up");
    }

    extern "C-unwind" fn destroy_noop(_object: *mut c_void, _closure: *mut c_void) {}

    fn factory(create: CObjectCreateFn, closure: *mut c_void) -> CObjectFactory {
        CObjectFactory {
            version: CPluginVersion { abi: PLUGIN_ABI_VERSION, api: PLUGIN_API_VERSION },
            closure,
            create: Some(create),
            destroy: Some(destroy_noop),
        }
    }

    #[test]
    fn test_factory_validation() {
        let pm = PluginManager::new();

        // Missing callbacks
        let mut bad = factory(create_ok, std::ptr::null_mut());
        bad.create = None;
        assert!(pm.register_object_factory("a", &bad).is_err());

        // ABI mismatch
        let mut bad = factory(create_ok, std::ptr::null_mut());
        bad.version.abi += 1;
        assert!(pm.register_object_factory("a", &bad).is_err());

        // API older than the host's
        let mut bad = factory(create_ok, std::ptr::null_mut());
        bad.version.api = PLUGIN_API_VERSION - 1;
        assert!(pm.register_object_factory("a", &bad).is_err());

        // Valid, then duplicate exact
        assert!(pm.register_object_factory("a", &factory(create_ok, std::ptr::null_mut())).is_ok());
        assert!(pm
            .register_object_factory("a", &factory(create_ok, std::ptr::null_mut()))
            .is_err());

        // Wildcards may pile up
        assert!(pm.register_object_factory("*", &factory(create_ok, std::ptr::null_mut())).is_ok());
        assert!(pm.register_object_factory("*", &factory(create_ok, std::ptr::null_mut())).is_ok());
    }

    #[test]
    fn test_create_object_prefers_exact_match() {
        let pm = PluginManager::new();
        let exact_tag = 1usize as *mut c_void;
        let wildcard_tag = 2usize as *mut c_void;
        #[allow(clippy::unwrap_used)]
        pm.register_object_factory("frame", &factory(create_ok, exact_tag)).unwrap();
        #[allow(clippy::unwrap_used)]
        pm.register_object_factory("*", &factory(create_ok, wildcard_tag)).unwrap();

        let object = pm.create_object("frame").expect("exact factory must create");
        assert_eq!(object.as_ptr(), exact_tag);
    }

    #[test]
    fn test_wildcard_promotion() {
        let pm = PluginManager::new();
        let wildcard_tag = 7usize as *mut c_void;
        #[allow(clippy::unwrap_used)]
        pm.register_object_factory("*", &factory(create_ok, wildcard_tag)).unwrap();

        let object = pm.create_object("codec").expect("wildcard must create");
        assert_eq!(object.as_ptr(), wildcard_tag);

        // Promoted: registering the exact type now fails as duplicate.
        assert!(pm
            .register_object_factory("codec", &factory(create_ok, std::ptr::null_mut()))
            .is_err());

        // The wildcard registration keeps serving other types.
        assert!(pm.create_object("other").is_some());
    }

    #[test]
    fn test_create_object_rejects_wildcard_type() {
        let pm = PluginManager::new();
        #[allow(clippy::unwrap_used)]
        pm.register_object_factory("*", &factory(create_ok, std::ptr::null_mut())).unwrap();
        assert!(pm.create_object("*").is_none());
    }

    #[test]
    fn test_factory_panic_is_contained() {
        let pm = PluginManager::new();
        #[allow(clippy::unwrap_used)]
        pm.register_object_factory("boom", &factory(create_panics, std::ptr::null_mut())).unwrap();
        // Registration succeeded; creation fails without crashing the host.
        assert!(pm.create_object("boom").is_none());
    }

    #[test]
    fn test_create_object_null_result() {
        let pm = PluginManager::new();
        #[allow(clippy::unwrap_used)]
        pm.register_object_factory("empty", &factory(create_null, std::ptr::null_mut())).unwrap();
        assert!(pm.create_object("empty").is_none());
    }

    #[test]
    fn test_services_are_invoked_with_caller_path() {
        let pm = PluginManager::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in_service = Arc::clone(&hits);
        pm.register_service("ping", move |caller, _data| {
            assert_eq!(caller, Path::new("/plugins/p/libp.so"));
            hits_in_service.fetch_add(1, Ordering::SeqCst);
            42
        });

        let caller = PathBuf::from("/plugins/p/libp.so");
        assert_eq!(pm.invoke_service(&caller, "ping", std::ptr::null_mut()), 42);
        assert_eq!(pm.invoke_service(&caller, "missing", std::ptr::null_mut()), -1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        pm.unregister_service("ping");
        assert_eq!(pm.invoke_service(&caller, "ping", std::ptr::null_mut()), -1);
    }

    #[test]
    fn test_service_panic_becomes_minus_one() {
        let pm = PluginManager::new();
        pm.register_service("explode", |_caller, _data| panic!("service failure"));
        assert_eq!(pm.invoke_service(Path::new("/p"), "explode", std::ptr::null_mut()), -1);
    }

    #[test]
    fn test_load_empty_path_fails() {
        let pm = PluginManager::new();
        let err = pm.load(Path::new("")).expect_err("empty path must fail");
        assert!(err.to_string().contains("Empty plugin path"));
    }

    #[test]
    fn test_load_missing_library_fails_descriptively() {
        let pm = PluginManager::new();
        let err = pm
            .load(Path::new("/nonexistent/libnothing.so"))
            .expect_err("missing library must fail");
        assert!(err.to_string().contains("libnothing.so"));
        assert!(pm.loaded_plugins().is_empty());
    }
}
