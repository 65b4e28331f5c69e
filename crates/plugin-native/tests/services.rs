// SPDX-FileCopyrightText: © 2025 CommKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! End-to-end tests of the plugin manager and services managers.
//!
//! The plugins here are linked into the test binary and registered through
//! [`PluginManager::load_linked`], so the whole path — init, API thunks,
//! `manageComponent` routing, subjects, preferences — runs exactly as it
//! does for a dynamically loaded plugin, minus the `dlopen` itself.
//!
//! The plugins record what they observe in statics, so tests touching the
//! same plugin serialize on a shared lock and reset the recorders first.

use commkit_core::subject::AvSubject;
use commkit_core::types::{
    AudioFrame, ChatMessage, MediaFrame, MessageDirection, StreamData, StreamDirection,
    StreamType, VideoFrame,
};
use commkit_plugin_native::installer::PluginInstaller;
use commkit_plugin_native::manager::PluginManager;
use commkit_plugin_native::preferences::PreferenceStore;
use commkit_plugin_native::services::{
    CallServicesManager, ChatServicesManager, Messenger, PreferenceServicesManager,
};
use commkit_plugin_sdk_native::conversions::FrameViewMut;
use commkit_plugin_sdk_native::prelude::*;
use commkit_plugin_sdk_native::types::{CPluginApi, CPluginExitFn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

static TEST_LOCK: Mutex<()> = Mutex::new(());

/// Everything a test needs: a wired subsystem over a temp data dir.
struct Fixture {
    _dir: TempDir,
    store: Arc<PreferenceStore>,
    pm: Arc<PluginManager>,
    call_sm: Arc<CallServicesManager>,
    chat_sm: Arc<ChatServicesManager>,
    pref_sm: Arc<PreferenceServicesManager>,
    installer: PluginInstaller,
    restarts: Arc<AtomicUsize>,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let (store, pm, call_sm, chat_sm, pref_sm, installer, restarts) =
            build_subsystem(dir.path());
        Self { _dir: dir, store, pm, call_sm, chat_sm, pref_sm, installer, restarts }
    }

    fn plugin_so(&self, name: &str) -> PathBuf {
        self.store.plugins_dir().join(name).join(format!("lib{name}.so"))
    }

    fn plugin_root(&self, name: &str) -> PathBuf {
        self.store.plugins_dir().join(name)
    }
}

#[allow(clippy::type_complexity)]
fn build_subsystem(
    data_dir: &Path,
) -> (
    Arc<PreferenceStore>,
    Arc<PluginManager>,
    Arc<CallServicesManager>,
    Arc<ChatServicesManager>,
    Arc<PreferenceServicesManager>,
    PluginInstaller,
    Arc<AtomicUsize>,
) {
    let store = Arc::new(PreferenceStore::new(data_dir));
    let pm = PluginManager::new();
    let call_sm = CallServicesManager::new(Arc::clone(&store));
    let chat_sm = ChatServicesManager::new(Arc::clone(&store));
    let pref_sm = PreferenceServicesManager::new();
    call_sm.register_components(&pm);
    chat_sm.register_components(&pm);
    pref_sm.register_components(&pm);
    chat_sm.load_allow_deny_lists();

    let restarts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&restarts);
    call_sm.set_sender_restart_hook(Box::new(move |_call_id| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let installer = PluginInstaller::new(
        Arc::clone(&pm),
        Arc::clone(&store),
        Arc::clone(&call_sm),
        Arc::clone(&chat_sm),
        Arc::clone(&pref_sm),
    );
    installer.register_services();

    (store, pm, call_sm, chat_sm, pref_sm, installer, restarts)
}

// ---------------------------------------------------------------------------
// The "green" plugin: one video call media handler that inverts pixels.
// ---------------------------------------------------------------------------

static GREEN_FRAMES: AtomicUsize = AtomicUsize::new(0);
static GREEN_EVENTS: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

fn green_events() -> Vec<&'static str> {
    GREEN_EVENTS.lock().expect("events lock").clone()
}

fn reset_green() {
    GREEN_FRAMES.store(0, Ordering::SeqCst);
    GREEN_EVENTS.lock().expect("events lock").clear();
}

struct GreenFilter {
    attached: bool,
}

impl CallMediaProcessor for GreenFilter {
    fn details(&mut self) -> Vec<(String, String)> {
        vec![
            ("name".to_string(), "GreenFilter".to_string()),
            ("iconPath".to_string(), "icon.png".to_string()),
            ("attached".to_string(), if self.attached { "1" } else { "0" }.to_string()),
            ("dataType".to_string(), "1".to_string()),
        ]
    }

    fn wants_stream(&mut self, stream: &StreamData) -> bool {
        if stream.stream_type != StreamType::Video {
            return false;
        }
        self.attached = true;
        true
    }

    fn process_frame(&mut self, _stream: &StreamData, frame: FrameViewMut<'_>) {
        GREEN_FRAMES.fetch_add(1, Ordering::SeqCst);
        if let FrameViewMut::Video { data, .. } = frame {
            for byte in data {
                *byte = !*byte;
            }
        }
    }

    fn stream_detached(&mut self, _stream: &StreamData) {
        self.attached = false;
        GREEN_EVENTS.lock().expect("events lock").push("detach");
    }
}

struct GreenPlugin;

impl NativePlugin for GreenPlugin {
    fn init(host: &HostApi) -> Result<Self, String> {
        host.manage_call_media_processor(GreenFilter { attached: false })?;
        Ok(Self)
    }
}

extern "C-unwind" fn green_init(api: *const CPluginApi) -> Option<CPluginExitFn> {
    // SAFETY: the manager passes its API table, valid for the plugin's life.
    let host = unsafe { HostApi::from_raw(api) }.ok()?;
    match GreenPlugin::init(&host) {
        Ok(_) => Some(green_exit),
        Err(_) => None,
    }
}

extern "C-unwind" fn green_exit() {
    GREEN_EVENTS.lock().expect("events lock").push("exit");
}

fn video_frame() -> MediaFrame {
    MediaFrame::Video(VideoFrame { width: 2, height: 2, data: vec![0x00; 16] })
}

#[test]
fn test_load_toggle_and_unload_call_media_handler() {
    let _guard = TEST_LOCK.lock().expect("test lock");
    reset_green();

    let fixture = Fixture::new();
    let so_path = fixture.plugin_so("green");
    fixture.pm.load_linked(&so_path, green_init).expect("load green");
    assert_eq!(fixture.pm.loaded_plugins(), vec![so_path.clone()]);

    // Registration injected the always-Switch with default "0".
    let root = fixture.plugin_root("green");
    let preferences = fixture.store.preferences(&root);
    assert!(preferences
        .iter()
        .any(|p| p.get("key").map(String::as_str) == Some("GreenFilterAlways")));

    let handlers = fixture.call_sm.call_media_handlers();
    assert_eq!(handlers.len(), 1);
    let handler_id = handlers[0].clone();
    let details = fixture.call_sm.call_media_handler_details(&handler_id);
    assert_eq!(details.get("name").map(String::as_str), Some("GreenFilter"));

    // A new subject does not auto-attach: always is "0" and nothing was
    // toggled on this call yet.
    let subject = Arc::new(AvSubject::new());
    let stream = StreamData::new("c1", StreamDirection::Inbound, StreamType::Video, "alice");
    fixture.call_sm.create_av_subject(stream, Arc::downgrade(&subject));
    assert!(fixture.call_sm.call_media_handler_status("c1").is_empty());

    let mut frame = video_frame();
    subject.publish(&mut frame);
    assert_eq!(GREEN_FRAMES.load(Ordering::SeqCst), 0);

    // Toggle on: the handler attaches, the active set updates, and the
    // video sender restarts exactly once.
    fixture.call_sm.toggle_call_media_handler(&handler_id, "c1", true);
    assert_eq!(fixture.call_sm.call_media_handler_status("c1"), vec![handler_id.clone()]);
    assert_eq!(fixture.restarts.load(Ordering::SeqCst), 1);

    let mut frame = video_frame();
    subject.publish(&mut frame);
    assert_eq!(GREEN_FRAMES.load(Ordering::SeqCst), 1);
    assert_eq!(frame, MediaFrame::Video(VideoFrame { width: 2, height: 2, data: vec![0xFF; 16] }));

    // Toggling off restores the prior active set.
    fixture.call_sm.toggle_call_media_handler(&handler_id, "c1", false);
    assert!(fixture.call_sm.call_media_handler_status("c1").is_empty());
    assert_eq!(green_events(), vec!["detach"]);

    // Toggle back on, then unload: the handler detaches before exit runs,
    // and nothing is left behind in any services manager.
    fixture.call_sm.toggle_call_media_handler(&handler_id, "c1", true);
    reset_green();
    fixture.pm.unload(&so_path).expect("unload green");

    assert_eq!(green_events(), vec!["detach", "exit"]);
    assert!(fixture.pm.loaded_plugins().is_empty());
    assert!(fixture.call_sm.call_media_handlers().is_empty());
    assert!(fixture.call_sm.call_media_handler_status("c1").is_empty());

    let mut frame = video_frame();
    subject.publish(&mut frame);
    assert_eq!(GREEN_FRAMES.load(Ordering::SeqCst), 0);

    // Reloading after unload behaves like a fresh load.
    fixture.pm.load_linked(&so_path, green_init).expect("reload green");
    assert_eq!(fixture.pm.loaded_plugins(), vec![so_path]);
    assert_eq!(fixture.call_sm.call_media_handlers().len(), 1);
}

#[test]
fn test_always_preference_auto_attaches_on_new_subject() {
    let _guard = TEST_LOCK.lock().expect("test lock");
    reset_green();

    let fixture = Fixture::new();
    let so_path = fixture.plugin_so("green");
    fixture.pm.load_linked(&so_path, green_init).expect("load green");

    // Flip the synthesized always-Switch to "1".
    let root = fixture.plugin_root("green");
    let mut values = HashMap::new();
    values.insert("GreenFilterAlways".to_string(), "1".to_string());
    fixture.store.save_user_preferences_values(&root, None, &values).expect("save values");

    let subject = Arc::new(AvSubject::new());
    let stream = StreamData::new("c2", StreamDirection::Inbound, StreamType::Video, "alice");
    fixture.call_sm.create_av_subject(stream, Arc::downgrade(&subject));

    // Attached without any explicit toggle.
    let handlers = fixture.call_sm.call_media_handlers();
    assert_eq!(fixture.call_sm.call_media_handler_status("c2"), handlers);

    let mut frame = video_frame();
    subject.publish(&mut frame);
    assert_eq!(GREEN_FRAMES.load(Ordering::SeqCst), 1);
}

#[test]
fn test_audio_stream_is_declined_by_video_handler() {
    let _guard = TEST_LOCK.lock().expect("test lock");
    reset_green();

    let fixture = Fixture::new();
    let so_path = fixture.plugin_so("green");
    fixture.pm.load_linked(&so_path, green_init).expect("load green");
    let handler_id = fixture.call_sm.call_media_handlers().remove(0);

    let subject = Arc::new(AvSubject::new());
    let stream = StreamData::new("c3", StreamDirection::Outbound, StreamType::Audio, "bob");
    fixture.call_sm.create_av_subject(stream, Arc::downgrade(&subject));
    fixture.call_sm.toggle_call_media_handler(&handler_id, "c3", true);

    // The handler declined the stream, so it never attached.
    assert!(fixture.call_sm.call_media_handler_status("c3").is_empty());
    let mut frame = MediaFrame::Audio(AudioFrame {
        sample_rate: 48_000,
        channels: 1,
        samples: vec![0.5; 480],
    });
    subject.publish(&mut frame);
    assert_eq!(GREEN_FRAMES.load(Ordering::SeqCst), 0);
}

#[test]
fn test_expired_subjects_are_swept_and_cleared() {
    let _guard = TEST_LOCK.lock().expect("test lock");
    reset_green();

    let fixture = Fixture::new();
    let so_path = fixture.plugin_so("green");
    fixture.pm.load_linked(&so_path, green_init).expect("load green");
    let handler_id = fixture.call_sm.call_media_handlers().remove(0);

    {
        let subject = Arc::new(AvSubject::new());
        let stream = StreamData::new("c4", StreamDirection::Inbound, StreamType::Video, "alice");
        fixture.call_sm.create_av_subject(stream, Arc::downgrade(&subject));
        // Subject dies with this scope.
    }
    // Toggling over an expired subject is a no-op, not an error.
    fixture.call_sm.toggle_call_media_handler(&handler_id, "c4", true);
    assert!(fixture.call_sm.call_media_handler_status("c4").is_empty());

    fixture.call_sm.clear_av_subject("c4");
}

// ---------------------------------------------------------------------------
// The "blue" plugin: one chat handler counting the messages it sees.
// ---------------------------------------------------------------------------

static BLUE_MESSAGES: AtomicUsize = AtomicUsize::new(0);

struct AutoReply;

impl ChatProcessor for AutoReply {
    fn details(&mut self) -> Vec<(String, String)> {
        vec![("name".to_string(), "AutoReply".to_string())]
    }

    fn on_message(&mut self, message: &ChatMessage) {
        if !message.from_plugin {
            BLUE_MESSAGES.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct BluePlugin;

impl NativePlugin for BluePlugin {
    fn init(host: &HostApi) -> Result<Self, String> {
        host.manage_chat_processor(AutoReply)?;
        Ok(Self)
    }
}

extern "C-unwind" fn blue_init(api: *const CPluginApi) -> Option<CPluginExitFn> {
    // SAFETY: the manager passes its API table, valid for the plugin's life.
    let host = unsafe { HostApi::from_raw(api) }.ok()?;
    match BluePlugin::init(&host) {
        Ok(_) => Some(blue_exit),
        Err(_) => None,
    }
}

extern "C-unwind" fn blue_exit() {}

fn incoming(account_id: &str, peer_id: &str) -> ChatMessage {
    let mut body = HashMap::new();
    body.insert("text/plain".to_string(), "hello".to_string());
    ChatMessage::new(account_id, peer_id, MessageDirection::Incoming, body, false)
}

#[test]
fn test_chat_allow_list_survives_restart() {
    let _guard = TEST_LOCK.lock().expect("test lock");
    BLUE_MESSAGES.store(0, Ordering::SeqCst);

    let dir = TempDir::new().expect("temp dir");
    let so_path = dir.path().join("plugins").join("blue").join("libblue.so");

    // First host run: toggle the handler on for one conversation.
    {
        let (_store, pm, _call_sm, chat_sm, _pref_sm, _installer, _restarts) =
            build_subsystem(dir.path());
        pm.load_linked(&so_path, blue_init).expect("load blue");

        let handler_id = chat_sm.chat_handlers().remove(0);
        chat_sm.toggle_chat_handler(&handler_id, "acc1", "bob", true);
        assert_eq!(chat_sm.chat_handler_status("acc1", "bob"), vec![handler_id]);

        let mut message = incoming("acc1", "bob");
        chat_sm.publish_message(&mut message);
        assert_eq!(BLUE_MESSAGES.load(Ordering::SeqCst), 1);

        // Plugin-originated messages never reach handlers.
        let mut looped = incoming("acc1", "bob");
        looped.from_plugin = true;
        chat_sm.publish_message(&mut looped);
        assert_eq!(BLUE_MESSAGES.load(Ordering::SeqCst), 1);
    }

    // Second host run over the same data dir: the allow list is read back
    // and the handler reattaches on the next message without user action.
    {
        let (_store, pm, _call_sm, chat_sm, _pref_sm, _installer, _restarts) =
            build_subsystem(dir.path());
        pm.load_linked(&so_path, blue_init).expect("reload blue");

        BLUE_MESSAGES.store(0, Ordering::SeqCst);
        let mut message = incoming("acc1", "bob");
        chat_sm.publish_message(&mut message);
        assert_eq!(BLUE_MESSAGES.load(Ordering::SeqCst), 1);

        // Other conversations stay untouched.
        let mut other = incoming("acc1", "carol");
        chat_sm.publish_message(&mut other);
        assert_eq!(BLUE_MESSAGES.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn test_chat_deny_list_blocks_always_handler() {
    let _guard = TEST_LOCK.lock().expect("test lock");
    BLUE_MESSAGES.store(0, Ordering::SeqCst);

    let fixture = Fixture::new();
    let so_path = fixture.plugin_so("blue");
    fixture.pm.load_linked(&so_path, blue_init).expect("load blue");
    let handler_id = fixture.chat_sm.chat_handlers().remove(0);

    // Toggling off records the name in the deny list.
    fixture.chat_sm.toggle_chat_handler(&handler_id, "acc1", "bob", false);

    // Even with the always-preference set, the deny entry wins.
    let root = fixture.plugin_root("blue");
    let mut values = HashMap::new();
    values.insert("AutoReplyAlways".to_string(), "1".to_string());
    fixture.store.save_user_preferences_values(&root, None, &values).expect("save values");

    let mut message = incoming("acc1", "bob");
    fixture.chat_sm.publish_message(&mut message);
    assert_eq!(BLUE_MESSAGES.load(Ordering::SeqCst), 0);

    // The same handler auto-attaches on a conversation without the deny.
    let mut message = incoming("acc1", "carol");
    fixture.chat_sm.publish_message(&mut message);
    assert_eq!(BLUE_MESSAGES.load(Ordering::SeqCst), 1);
}

#[test]
fn test_send_text_message_service_reaches_messenger() {
    let _guard = TEST_LOCK.lock().expect("test lock");

    #[derive(Default)]
    struct RecordingMessenger {
        sent: Mutex<Vec<(String, String, bool)>>,
    }

    impl Messenger for RecordingMessenger {
        fn send_text_message(
            &self,
            account_id: &str,
            peer_id: &str,
            _body: HashMap<String, String>,
            from_plugin: bool,
        ) {
            self.sent.lock().expect("sent lock").push((
                account_id.to_string(),
                peer_id.to_string(),
                from_plugin,
            ));
        }
    }

    let fixture = Fixture::new();
    let messenger = Arc::new(RecordingMessenger::default());
    ChatServicesManager::register_chat_service(
        &fixture.pm,
        Arc::clone(&messenger) as Arc<dyn Messenger>,
    );

    // Invoke the service the way a plugin would.
    let message = incoming("acc1", "bob");
    let mut repr =
        commkit_plugin_sdk_native::conversions::chat_message_to_c(&message).expect("repr");
    let rc = fixture.pm.invoke_service(
        Path::new("/plugins/blue/libblue.so"),
        "sendTextMessage",
        (&raw mut repr.raw).cast(),
    );
    assert_eq!(rc, 0);
    assert_eq!(
        messenger.sent.lock().expect("sent lock").as_slice(),
        &[("acc1".to_string(), "bob".to_string(), true)]
    );
}

#[test]
fn test_clean_chat_subjects_keeps_allow_lists() {
    let _guard = TEST_LOCK.lock().expect("test lock");
    BLUE_MESSAGES.store(0, Ordering::SeqCst);

    let fixture = Fixture::new();
    let so_path = fixture.plugin_so("blue");
    fixture.pm.load_linked(&so_path, blue_init).expect("load blue");
    let handler_id = fixture.chat_sm.chat_handlers().remove(0);

    fixture.chat_sm.toggle_chat_handler(&handler_id, "acc1", "bob", true);
    fixture.chat_sm.clean_chat_subjects("acc1", "");

    // Subjects are gone but the allow list still names the handler.
    assert_eq!(fixture.chat_sm.chat_handler_status("acc1", "bob"), vec![handler_id]);

    let mut message = incoming("acc1", "bob");
    fixture.chat_sm.publish_message(&mut message);
    assert_eq!(BLUE_MESSAGES.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// The "prefs" plugin: one preference handler storing per-account values.
// ---------------------------------------------------------------------------

static PREF_VALUES: Mutex<Vec<(String, String, String)>> = Mutex::new(Vec::new());
static PREF_RESETS: AtomicUsize = AtomicUsize::new(0);

struct AccountPrefs;

impl PreferenceProcessor for AccountPrefs {
    fn details(&mut self) -> Vec<(String, String)> {
        vec![("name".to_string(), "AccountPrefs".to_string())]
    }

    fn set_account_preference(&mut self, account_id: &str, key: &str, value: &str) {
        PREF_VALUES.lock().expect("values lock").push((
            account_id.to_string(),
            key.to_string(),
            value.to_string(),
        ));
    }

    fn reset_account_preferences(&mut self, _account_id: &str) {
        PREF_RESETS.fetch_add(1, Ordering::SeqCst);
    }

    fn has_preference_key(&mut self, key: &str) -> bool {
        key == "voice"
    }
}

struct PrefsPlugin;

impl NativePlugin for PrefsPlugin {
    fn init(host: &HostApi) -> Result<Self, String> {
        host.manage_preference_processor(AccountPrefs)?;
        Ok(Self)
    }
}

extern "C-unwind" fn prefs_init(api: *const CPluginApi) -> Option<CPluginExitFn> {
    // SAFETY: the manager passes its API table, valid for the plugin's life.
    let host = unsafe { HostApi::from_raw(api) }.ok()?;
    match PrefsPlugin::init(&host) {
        Ok(_) => Some(prefs_exit),
        Err(_) => None,
    }
}

extern "C-unwind" fn prefs_exit() {}

#[test]
fn test_preference_handler_receives_account_changes() {
    let _guard = TEST_LOCK.lock().expect("test lock");
    PREF_VALUES.lock().expect("values lock").clear();
    PREF_RESETS.store(0, Ordering::SeqCst);

    let fixture = Fixture::new();
    let so_path = fixture.plugin_so("prefs");
    let root = fixture.plugin_root("prefs");
    fixture.pm.load_linked(&so_path, prefs_init).expect("load prefs");

    assert_eq!(fixture.pref_sm.handlers().len(), 1);
    let handler_id = fixture.pref_sm.handlers().remove(0);
    assert_eq!(
        fixture.pref_sm.handler_details(&handler_id).get("name").map(String::as_str),
        Some("AccountPrefs")
    );

    // A claimed key is applied live; no reload needed.
    assert!(!fixture.pref_sm.set_preference("voice", "on", &root, "acc1"));
    assert_eq!(
        PREF_VALUES.lock().expect("values lock").as_slice(),
        &[("acc1".to_string(), "voice".to_string(), "on".to_string())]
    );

    // Unclaimed keys request a reload.
    assert!(fixture.pref_sm.set_preference("theme", "dark", &root, "acc1"));

    fixture.pref_sm.reset_preferences(&root, "acc1");
    assert_eq!(PREF_RESETS.load(Ordering::SeqCst), 1);

    // Unload removes the handler.
    fixture.pm.unload(&so_path).expect("unload prefs");
    assert!(fixture.pref_sm.handlers().is_empty());
}

#[test]
fn test_plugin_data_path_and_preferences_services() {
    let _guard = TEST_LOCK.lock().expect("test lock");

    struct Probe;

    static PROBED_PATH: Mutex<Option<String>> = Mutex::new(None);
    static PROBED_PREFS: Mutex<Option<HashMap<String, String>>> = Mutex::new(None);

    impl NativePlugin for Probe {
        fn init(host: &HostApi) -> Result<Self, String> {
            *PROBED_PATH.lock().expect("path lock") = host.data_path();
            *PROBED_PREFS.lock().expect("prefs lock") = Some(host.plugin_preferences());
            Ok(Self)
        }
    }

    extern "C-unwind" fn probe_init(api: *const CPluginApi) -> Option<CPluginExitFn> {
        // SAFETY: the manager passes its API table, valid for the plugin's life.
        let host = unsafe { HostApi::from_raw(api) }.ok()?;
        match Probe::init(&host) {
            Ok(_) => Some(probe_exit),
            Err(_) => None,
        }
    }

    extern "C-unwind" fn probe_exit() {}

    let fixture = Fixture::new();
    let root = fixture.plugin_root("probe");
    std::fs::create_dir_all(root.join("data")).expect("plugin dirs");
    std::fs::write(
        root.join("data").join("preferences.json"),
        r#"[{"key": "color", "type": "List", "defaultValue": "green"}]"#,
    )
    .expect("write descriptors");

    let so_path = fixture.plugin_so("probe");
    fixture.pm.load_linked(&so_path, probe_init).expect("load probe");

    assert_eq!(
        PROBED_PATH.lock().expect("path lock").clone(),
        Some(root.join("data").to_string_lossy().into_owned())
    );
    let prefs = PROBED_PREFS.lock().expect("prefs lock").clone().expect("prefs probed");
    assert_eq!(prefs.get("color").map(String::as_str), Some("green"));

    // Installer facade persists and the plugin sees the merged value.
    assert!(fixture.installer.set_plugin_preference(&root, "color", "blue", None));
    assert_eq!(
        fixture
            .installer
            .plugin_preferences_values(&root, None)
            .get("color")
            .map(String::as_str),
        Some("blue")
    );
}

#[test]
fn test_duplicate_handler_name_is_rejected() {
    let _guard = TEST_LOCK.lock().expect("test lock");
    BLUE_MESSAGES.store(0, Ordering::SeqCst);

    let fixture = Fixture::new();
    fixture.pm.load_linked(&fixture.plugin_so("blue"), blue_init).expect("load blue");
    // A second plugin exposing the same display name fails its init because
    // manageComponent refuses the duplicate.
    assert!(fixture.pm.load_linked(&fixture.plugin_so("blue2"), blue_init).is_err());
    assert_eq!(fixture.chat_sm.chat_handlers().len(), 1);
}
