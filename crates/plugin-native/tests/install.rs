// SPDX-FileCopyrightText: © 2025 CommKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Installer tests over generated `.jpl` packages.

use commkit_plugin_native::installer::{
    platform_abi, read_manifest_from_archive, InstallStatus, PluginInstaller,
};
use commkit_plugin_native::manager::PluginManager;
use commkit_plugin_native::preferences::PreferenceStore;
use commkit_plugin_native::services::{
    CallServicesManager, ChatServicesManager, PreferenceServicesManager,
};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

struct Fixture {
    _dir: TempDir,
    packages: PathBuf,
    store: Arc<PreferenceStore>,
    installer: PluginInstaller,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let packages = dir.path().join("packages");
        fs::create_dir_all(&packages).expect("package dir");

        let store = Arc::new(PreferenceStore::new(dir.path()));
        let pm = PluginManager::new();
        let call_sm = CallServicesManager::new(Arc::clone(&store));
        let chat_sm = ChatServicesManager::new(Arc::clone(&store));
        let pref_sm = PreferenceServicesManager::new();
        call_sm.register_components(&pm);
        chat_sm.register_components(&pm);
        pref_sm.register_components(&pm);

        let installer =
            PluginInstaller::new(pm, Arc::clone(&store), call_sm, chat_sm, pref_sm);
        Self { _dir: dir, packages, store, installer }
    }

    /// Write a `.jpl` package. `with_library` controls whether a shared
    /// object for the host ABI is included.
    fn make_jpl(&self, name: &str, version: &str, with_library: bool) -> PathBuf {
        let path = self.packages.join(format!("{name}-{version}.jpl"));
        let file = fs::File::create(&path).expect("package file");
        let mut archive = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();

        archive.start_file("manifest.json", options).expect("manifest entry");
        archive
            .write_all(
                format!(r#"{{"name": "{name}", "version": "{version}", "description": "test plugin"}}"#)
                    .as_bytes(),
            )
            .expect("manifest body");

        archive.start_file("data/preferences.json", options).expect("preferences entry");
        archive
            .write_all(br#"[{"key": "color", "type": "List", "defaultValue": "green"}]"#)
            .expect("preferences body");

        archive.start_file("data/icon.png", options).expect("icon entry");
        archive.write_all(&[0x89, 0x50, 0x4E, 0x47]).expect("icon body");

        if with_library {
            let library = format!("{}/lib{name}.so", platform_abi());
            archive.start_file(library, options).expect("library entry");
            archive.write_all(b"\x7fELF not a real library").expect("library body");
        }

        // Entries from foreign platforms must be filtered out.
        archive.start_file(format!("fake-abi/lib{name}.so"), options).expect("foreign entry");
        archive.write_all(b"wrong platform").expect("foreign body");

        archive.finish().expect("finish package");
        path
    }

    fn install_root(&self, name: &str) -> PathBuf {
        self.store.plugins_dir().join(name)
    }
}

#[test]
fn test_install_version_comparison() {
    let fixture = Fixture::new();
    let root = fixture.install_root("blue");

    // Fresh install.
    let package = fixture.make_jpl("blue", "1.0.0", true);
    let status = fixture.installer.install(&package, false).expect("fresh install");
    assert_eq!(status, InstallStatus::Installed);
    assert_eq!(status.code(), 0);
    assert!(root.join("manifest.json").is_file());
    assert!(root.join("data").join("preferences.json").is_file());
    assert!(root.join("libblue.so").is_file());
    // The foreign ABI library never lands.
    assert!(!root.join("fake-abi").exists());

    // Same version again.
    let status = fixture.installer.install(&package, false).expect("same version");
    assert_eq!(status, InstallStatus::AlreadyInstalled);
    assert_eq!(status.code(), 100);

    // Older package.
    let old_package = fixture.make_jpl("blue", "0.9.0", true);
    let status = fixture.installer.install(&old_package, false).expect("older package");
    assert_eq!(status, InstallStatus::OlderVersion);
    assert_eq!(status.code(), 200);
    let details = fixture.installer.plugin_details(&root);
    assert_eq!(details.get("version").map(String::as_str), Some("1.0.0"));

    // Newer package replaces the directory.
    let new_package = fixture.make_jpl("blue", "1.1.0", true);
    let status = fixture.installer.install(&new_package, false).expect("upgrade");
    assert_eq!(status, InstallStatus::Installed);
    let details = fixture.installer.plugin_details(&root);
    assert_eq!(details.get("version").map(String::as_str), Some("1.1.0"));

    // Force reinstalls an older version.
    let status = fixture.installer.install(&old_package, true).expect("forced install");
    assert_eq!(status, InstallStatus::Installed);
    let details = fixture.installer.plugin_details(&root);
    assert_eq!(details.get("version").map(String::as_str), Some("0.9.0"));
}

#[test]
fn test_install_then_uninstall_leaves_nothing() {
    let fixture = Fixture::new();
    let root = fixture.install_root("green");

    let package = fixture.make_jpl("green", "1.0.0", true);
    fixture.installer.install(&package, false).expect("install");
    assert!(fixture.installer.is_plugin_installed(&root));
    assert_eq!(fixture.installer.installed_plugins(), vec![root.clone()]);

    fixture.installer.uninstall(&root).expect("uninstall");
    assert!(!root.exists());
    assert!(fixture.installer.installed_plugins().is_empty());

    // Uninstalling again is an error, not a crash.
    assert!(fixture.installer.uninstall(&root).is_err());
}

#[test]
fn test_package_without_matching_abi() {
    let fixture = Fixture::new();
    let root = fixture.install_root("noarch");

    let package = fixture.make_jpl("noarch", "1.0.0", false);
    let status = fixture.installer.install(&package, false).expect("install without library");
    assert_eq!(status, InstallStatus::Installed);

    // Only manifest.json and data/ were extracted.
    assert!(root.join("manifest.json").is_file());
    assert!(root.join("data").is_dir());
    assert!(!root.join("libnoarch.so").exists());

    // Loading it later fails with a missing-library diagnostic.
    let err = fixture.installer.load_plugin(&root).expect_err("load must fail");
    assert!(err.to_string().contains("missing shared library"));
}

#[test]
fn test_manifest_read_from_archive_matches_extracted() {
    let fixture = Fixture::new();
    let package = fixture.make_jpl("teal", "2.3.4", true);

    let from_archive = read_manifest_from_archive(&package).expect("archive manifest");
    assert_eq!(from_archive.name, "teal");
    assert_eq!(from_archive.version, "2.3.4");
    assert_eq!(from_archive.icon_path, "icon.png");

    fixture.installer.install(&package, false).expect("install");
    let root = fixture.install_root("teal");
    let details = fixture.installer.plugin_details(&root);
    assert_eq!(details.get("name").map(String::as_str), Some("teal"));
    assert_eq!(details.get("version").map(String::as_str), Some("2.3.4"));
    assert_eq!(
        details.get("iconPath").map(String::as_str),
        Some(root.join("data").join("icon.png").to_string_lossy().as_ref())
    );
    assert_eq!(
        details.get("soPath").map(String::as_str),
        Some(root.join("libteal.so").to_string_lossy().as_ref())
    );
}

#[test]
fn test_install_rejects_garbage() {
    let fixture = Fixture::new();

    // Not a file at all.
    assert!(fixture.installer.install(Path::new("/nonexistent.jpl"), false).is_err());

    // A file that is not an archive.
    let bogus = fixture.packages.join("bogus.jpl");
    fs::write(&bogus, b"not a zip").expect("bogus package");
    assert!(fixture.installer.install(&bogus, false).is_err());

    // An archive without a manifest.
    let empty = fixture.packages.join("empty.jpl");
    let file = fs::File::create(&empty).expect("empty package");
    let mut archive = zip::ZipWriter::new(file);
    archive
        .start_file("data/readme.txt", SimpleFileOptions::default())
        .expect("entry");
    archive.write_all(b"nothing here").expect("body");
    archive.finish().expect("finish");
    assert!(fixture.installer.install(&empty, false).is_err());
}
