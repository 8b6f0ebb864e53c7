/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Application state management for the gallery site engine.
//!
//! [`GalleryApp`] is the one explicitly constructed session object: it owns
//! the rotation store, the image library, the prompt board, and the
//! rotation timer, with the persistence backend and tab-opening surface
//! injected at construction. Admin operations arrive as [`AdminIntent`]
//! values and flow through `handle_intent`, so there is exactly one
//! mutation path instead of per-call-site fallback chains.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, info};
use tokio::time::sleep;

use crate::gallery::ImageLibrary;
use crate::persistence::KeyValueStoreRef;
use crate::rotation::scheduler::RotationScheduler;
use crate::rotation::{AdRotationStore, OpenReport, OpenTrigger};
use crate::tabs::{PROMPT_TIMEOUT, PromptBoard, PromptBoardRef, TabOpener};

/// How long an image URL probe may take before it is abandoned.
const IMAGE_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
/// Grace delay before the initial page-load batch fires.
const INITIAL_OPEN_DELAY: Duration = Duration::from_secs(1);

/// Admin operations on the link set and the image collection.
#[derive(Debug, Clone, PartialEq)]
pub enum AdminIntent {
    AddLink { url: String },
    RemoveLink { index: usize },
    ToggleActive { index: usize },
    ActivateAll,
    ResetDefaults,
    SetFrequency { every: Duration },
    AddImageUrl { url: String },
    AddImageFile { path: PathBuf, alt: Option<String> },
    RemoveImage { id: String },
}

/// Console-side events feeding the page session loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Interaction,
    Shutdown,
}

pub struct GalleryApp {
    pub store: AdRotationStore,
    pub images: ImageLibrary,
    prompts: PromptBoardRef,
    scheduler: RotationScheduler,
    triggers_tx: Sender<OpenTrigger>,
    triggers_rx: Receiver<OpenTrigger>,
}

impl GalleryApp {
    pub fn new(backend: KeyValueStoreRef, opener: Arc<dyn TabOpener>) -> Self {
        let prompts: PromptBoardRef = Arc::new(PromptBoard::new(PROMPT_TIMEOUT));
        let store = AdRotationStore::open(
            Arc::clone(&backend),
            opener,
            Arc::clone(&prompts),
        );
        let images = ImageLibrary::open(backend);
        let (triggers_tx, triggers_rx) = crossbeam_channel::unbounded();
        Self {
            store,
            images,
            prompts,
            scheduler: RotationScheduler::new(),
            triggers_tx,
            triggers_rx,
        }
    }

    pub fn prompts(&self) -> &PromptBoardRef {
        &self.prompts
    }

    /// Apply an admin operation. Returns a user-facing confirmation, or the
    /// validation failure as a message.
    pub fn handle_intent(&mut self, intent: AdminIntent) -> Result<String, String> {
        match intent {
            AdminIntent::AddLink { url } => {
                let index = self.store.add_link(&url).map_err(|e| e.to_string())?;
                Ok(format!(
                    "Ad link added successfully! ({} at index {index})",
                    self.store.links()[index]
                ))
            },
            AdminIntent::RemoveLink { index } => {
                let removed = self.store.remove_link(index).map_err(|e| e.to_string())?;
                Ok(format!("Removed ad link {removed}"))
            },
            AdminIntent::ToggleActive { index } => {
                let now_active = !self.store.is_active(index);
                self.store
                    .set_active(index, now_active)
                    .map_err(|e| e.to_string())?;
                Ok(format!(
                    "Active links saved successfully! ({} active)",
                    self.store.active_indices().len()
                ))
            },
            AdminIntent::ActivateAll => {
                self.store.activate_all();
                Ok("All links activated successfully!".to_string())
            },
            AdminIntent::ResetDefaults => {
                self.store.reset_to_defaults();
                Ok("Reset complete! All 4 default links are now active.".to_string())
            },
            AdminIntent::SetFrequency { every } => {
                self.store.set_frequency(every).map_err(|e| e.to_string())?;
                if self.scheduler.is_running() {
                    self.start_rotation();
                }
                Ok("Ad settings saved successfully!".to_string())
            },
            AdminIntent::AddImageUrl { url } => {
                let image = self
                    .images
                    .add_from_url(&url, IMAGE_PROBE_TIMEOUT)
                    .map_err(|e| e.to_string())?;
                Ok(format!("Image added successfully! (id {})", image.id))
            },
            AdminIntent::AddImageFile { path, alt } => {
                let bytes = std::fs::read(&path)
                    .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
                let image = self
                    .images
                    .add_from_bytes(&bytes, alt)
                    .map_err(|e| e.to_string())?;
                Ok(format!("Image added successfully! (id {})", image.id))
            },
            AdminIntent::RemoveImage { id } => {
                let removed = self.images.remove(&id).map_err(|e| e.to_string())?;
                Ok(format!("Removed image {}", removed.id))
            },
        }
    }

    /// Start (or restart) the rotation timer at the store's current
    /// frequency. Must run within a tokio runtime.
    pub fn start_rotation(&mut self) {
        self.scheduler
            .start(self.store.frequency(), self.triggers_tx.clone());
    }

    /// Drive one page session: the initial page-load batch, timer ticks,
    /// console interactions, and a final page-unload open on shutdown.
    pub async fn run(&mut self, input_rx: Receiver<InputEvent>) {
        self.start_rotation();
        info!(
            "Page session started: {} link(s), {} active, rotating every {}s",
            self.store.links().len(),
            self.store.active_indices().len(),
            self.store.frequency().as_secs()
        );

        sleep(INITIAL_OPEN_DELAY).await;
        let report = self.store.open_active_links(OpenTrigger::PageLoad).await;
        log_report(OpenTrigger::PageLoad, &report);

        let triggers_rx = self.triggers_rx.clone();
        loop {
            let trigger = crossbeam_channel::select! {
                recv(triggers_rx) -> msg => match msg {
                    Ok(trigger) => trigger,
                    Err(_) => break,
                },
                recv(input_rx) -> msg => match msg {
                    Ok(InputEvent::Interaction) => OpenTrigger::UserInteraction,
                    Ok(InputEvent::Shutdown) | Err(_) => break,
                },
            };
            let report = self.store.open_active_links(trigger).await;
            log_report(trigger, &report);
        }

        let report = self.store.open_active_links(OpenTrigger::PageUnload).await;
        log_report(OpenTrigger::PageUnload, &report);
        self.scheduler.stop();
        info!("Page session ended");
    }
}

fn log_report(trigger: OpenTrigger, report: &OpenReport) {
    if report.attempts.is_empty() {
        debug!("{trigger:?}: no ads opened");
    } else {
        info!(
            "{trigger:?}: opened {}, blocked {}",
            report.opened(),
            report.blocked()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;
    use crate::rotation::{DEFAULT_AD_LINKS, MIN_FREQUENCY};
    use crate::tabs::TabHandle;
    use std::io::Write;
    use tempfile::NamedTempFile;

    struct NullOpener;

    impl TabOpener for NullOpener {
        fn open(&self, _url: &str) -> Option<TabHandle> {
            Some(TabHandle(0))
        }
    }

    fn test_app() -> GalleryApp {
        GalleryApp::new(Arc::new(MemoryStore::new()), Arc::new(NullOpener))
    }

    #[test]
    fn test_link_intents_flow_through_the_store() {
        let mut app = test_app();
        app.handle_intent(AdminIntent::AddLink {
            url: "ads.example/new".to_string(),
        })
        .unwrap();
        assert_eq!(app.store.links().len(), 5);
        assert_eq!(app.store.links()[4], "https://ads.example/new");

        app.handle_intent(AdminIntent::ToggleActive { index: 4 }).unwrap();
        assert!(app.store.is_active(4));
        app.handle_intent(AdminIntent::ToggleActive { index: 4 }).unwrap();
        assert!(!app.store.is_active(4));

        app.handle_intent(AdminIntent::RemoveLink { index: 4 }).unwrap();
        assert_eq!(app.store.links(), DEFAULT_AD_LINKS);
    }

    #[test]
    fn test_invalid_intents_surface_messages() {
        let mut app = test_app();
        assert!(app
            .handle_intent(AdminIntent::AddLink {
                url: "  ".to_string()
            })
            .is_err());
        assert!(app
            .handle_intent(AdminIntent::RemoveLink { index: 42 })
            .is_err());
        assert!(app
            .handle_intent(AdminIntent::SetFrequency {
                every: Duration::from_secs(1)
            })
            .is_err());
    }

    #[test]
    fn test_reset_defaults_intent() {
        let mut app = test_app();
        app.handle_intent(AdminIntent::AddLink {
            url: "https://ads.example/extra".to_string(),
        })
        .unwrap();
        let message = app.handle_intent(AdminIntent::ResetDefaults).unwrap();
        assert!(message.starts_with("Reset complete"));
        assert_eq!(app.store.links(), DEFAULT_AD_LINKS);
        assert_eq!(app.store.active_indices(), [0, 1, 2, 3]);
    }

    #[test]
    fn test_set_frequency_intent_updates_store() {
        let mut app = test_app();
        app.handle_intent(AdminIntent::SetFrequency {
            every: MIN_FREQUENCY,
        })
        .unwrap();
        assert_eq!(app.store.frequency(), MIN_FREQUENCY);
    }

    #[test]
    fn test_image_file_intents() {
        let mut app = test_app();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[
            0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0, 0, 0, 0, 0,
        ])
        .unwrap();

        app.handle_intent(AdminIntent::AddImageFile {
            path: file.path().to_path_buf(),
            alt: None,
        })
        .unwrap();
        assert_eq!(app.images.images().len(), 1);

        let id = app.images.images()[0].id.clone();
        app.handle_intent(AdminIntent::RemoveImage { id }).unwrap();
        assert!(app.images.images().is_empty());

        assert!(app
            .handle_intent(AdminIntent::RemoveImage {
                id: "missing".to_string()
            })
            .is_err());
    }
}
