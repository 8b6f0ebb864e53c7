/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! End-to-end scenarios over the public API: the admin workflow against a
//! durable store, and a full page session worth of open triggers.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;

use galleryshell::app::{AdminIntent, GalleryApp};
use galleryshell::persistence::{
    KeyValueStore, KeyValueStoreRef, MemoryStore, MirroredStore, RedbStore,
};
use galleryshell::rotation::{
    ACTIVE_INDICES_KEY, ALL_KEYS, AdRotationStore, DEFAULT_AD_LINKS, LINKS_KEY, OpenTrigger,
};
use galleryshell::tabs::{PromptBoard, PromptBoardRef, TabHandle, TabOpener};

struct RecordingOpener {
    calls: Mutex<Vec<String>>,
    blocked: bool,
}

impl RecordingOpener {
    fn new(blocked: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            blocked,
        })
    }
}

impl TabOpener for RecordingOpener {
    fn open(&self, url: &str) -> Option<TabHandle> {
        let mut calls = self.calls.lock();
        calls.push(url.to_string());
        if self.blocked {
            None
        } else {
            Some(TabHandle(calls.len() as u64))
        }
    }
}

#[test]
fn scenarios_binary_smoke_runs() {
    assert!(!galleryshell::VERSION.is_empty());
}

#[test]
fn admin_workflow_survives_reopening_the_durable_store() {
    let dir = TempDir::new().unwrap();

    {
        let backend: KeyValueStoreRef =
            Arc::new(RedbStore::open(dir.path().to_path_buf()).unwrap());
        let mut app = GalleryApp::new(backend, RecordingOpener::new(false));

        // First run seeds the defaults, all active.
        assert_eq!(app.store.links(), DEFAULT_AD_LINKS);
        assert_eq!(app.store.active_indices(), [0, 1, 2, 3]);

        app.handle_intent(AdminIntent::AddLink {
            url: "ads.example/fifth".to_string(),
        })
        .unwrap();
        app.handle_intent(AdminIntent::ToggleActive { index: 1 }).unwrap();
        app.handle_intent(AdminIntent::SetFrequency {
            every: Duration::from_secs(12),
        })
        .unwrap();
    }

    // A later session sees the same state through the same pipeline.
    let backend: KeyValueStoreRef = Arc::new(RedbStore::open(dir.path().to_path_buf()).unwrap());
    let mut app = GalleryApp::new(backend, RecordingOpener::new(false));
    assert_eq!(app.store.links().len(), 5);
    assert_eq!(app.store.links()[4], "https://ads.example/fifth");
    assert_eq!(app.store.active_indices(), [0, 2, 3]);
    assert_eq!(app.store.frequency(), Duration::from_secs(12));

    let resolved = app.store.resolve_active_links();
    assert_eq!(resolved.len(), 3);
    assert!(!resolved.contains(&DEFAULT_AD_LINKS[1].to_string()));
}

#[test]
fn selection_scenario_from_the_admin_panel() {
    // L = [a,b,c,d], A = {0,1,2,3}; deactivate 1; remove 0; resolve -> [c,d].
    let backend: KeyValueStoreRef = Arc::new(MemoryStore::new());
    backend
        .set(
            LINKS_KEY,
            r#"["https://a","https://b","https://c","https://d"]"#,
        )
        .unwrap();

    let mut app = GalleryApp::new(backend, RecordingOpener::new(false));
    app.handle_intent(AdminIntent::ToggleActive { index: 1 }).unwrap();
    app.handle_intent(AdminIntent::RemoveLink { index: 0 }).unwrap();

    assert_eq!(
        app.store.resolve_active_links(),
        vec!["https://c".to_string(), "https://d".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn page_load_opens_the_active_batch_in_order() {
    let backend: KeyValueStoreRef = Arc::new(MemoryStore::new());
    let opener = RecordingOpener::new(false);
    let prompts: PromptBoardRef = Arc::new(PromptBoard::new(Duration::from_secs(5)));
    let mut store = AdRotationStore::open(backend, opener.clone(), Arc::clone(&prompts));

    let report = store.open_active_links(OpenTrigger::PageLoad).await;
    assert_eq!(report.attempts.len(), 4);
    assert_eq!(report.opened(), 4);
    assert_eq!(
        opener.calls.lock().as_slice(),
        DEFAULT_AD_LINKS
            .iter()
            .map(|url| url.to_string())
            .collect::<Vec<_>>()
            .as_slice()
    );
    assert!(prompts.is_empty());
}

#[tokio::test(start_paused = true)]
async fn blocked_session_degrades_to_manual_prompts() {
    let backend: KeyValueStoreRef = Arc::new(MemoryStore::new());
    backend
        .set(LINKS_KEY, r#"["https://a","https://b"]"#)
        .unwrap();
    let opener = RecordingOpener::new(true);
    let prompts: PromptBoardRef = Arc::new(PromptBoard::new(Duration::from_secs(5)));
    let mut store = AdRotationStore::open(backend, opener.clone(), Arc::clone(&prompts));

    let report = store.open_active_links(OpenTrigger::TimerTick).await;
    assert_eq!(report.blocked(), 2);
    assert_eq!(
        prompts.active(),
        vec!["https://a".to_string(), "https://b".to_string()]
    );

    // The user clicks one prompt; the retry goes back through the opener.
    prompts.open_manually("https://a", opener.as_ref());
    assert_eq!(prompts.active(), vec!["https://b".to_string()]);
    assert_eq!(opener.calls.lock().len(), 3);
}

#[test]
fn cold_start_hydrates_settings_from_the_mirror() {
    let local: KeyValueStoreRef = Arc::new(MemoryStore::new());
    let remote: KeyValueStoreRef = Arc::new(MemoryStore::new());
    remote
        .set(LINKS_KEY, r#"["https://mirrored.example/only"]"#)
        .unwrap();
    remote.set(ACTIVE_INDICES_KEY, "[0]").unwrap();

    let mirrored: KeyValueStoreRef = {
        let store = MirroredStore::new(Arc::clone(&local), remote);
        store.hydrate(&ALL_KEYS);
        Arc::new(store)
    };

    let mut app = GalleryApp::new(mirrored, RecordingOpener::new(false));
    assert_eq!(app.store.links(), ["https://mirrored.example/only"]);
    assert_eq!(
        app.store.resolve_active_links(),
        vec!["https://mirrored.example/only".to_string()]
    );
}
