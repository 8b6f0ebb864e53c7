/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Tab-opening surface and the blocked-popup fallback affordance.
//!
//! [`TabOpener`] is the contract for opening a URL in a new browsing
//! context: `open` returns a handle on success and `None` when the open was
//! blocked or otherwise failed. Blocked opens degrade to a manual-click
//! prompt posted on the [`PromptBoard`], which auto-dismisses entries after
//! a fixed timeout.

use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use log::{info, warn};
use parking_lot::Mutex;

/// How long a blocked-popup prompt stays up before dismissing itself.
pub const PROMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Opaque handle for a successfully opened tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TabHandle(pub u64);

/// The ability to open a URL in a new browsing context.
///
/// `None` from `open` signals the open was blocked; callers must degrade
/// gracefully rather than treat it as fatal.
pub trait TabOpener: Send + Sync {
    fn open(&self, url: &str) -> Option<TabHandle>;
}

/// Opens URLs through the platform URL handler.
#[derive(Default)]
pub struct SystemTabOpener {
    next_id: AtomicU64,
}

impl SystemTabOpener {
    pub fn new() -> Self {
        Self::default()
    }

    fn launcher(url: &str) -> Command {
        #[cfg(target_os = "macos")]
        {
            let mut command = Command::new("open");
            command.arg(url);
            command
        }
        #[cfg(target_os = "windows")]
        {
            let mut command = Command::new("cmd");
            command.args(["/C", "start", "", url]);
            command
        }
        #[cfg(all(unix, not(target_os = "macos")))]
        {
            let mut command = Command::new("xdg-open");
            command.arg(url);
            command
        }
    }
}

impl TabOpener for SystemTabOpener {
    fn open(&self, url: &str) -> Option<TabHandle> {
        let mut command = Self::launcher(url);
        command.stdout(Stdio::null()).stderr(Stdio::null());
        match command.spawn() {
            Ok(_) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                Some(TabHandle(id))
            },
            Err(e) => {
                warn!("Failed to open '{url}' in a browser tab: {e}");
                None
            },
        }
    }
}

struct ManualOpenPrompt {
    url: String,
    posted_at: Instant,
}

/// Transient manual-open prompts for blocked popups.
///
/// Each entry offers the user a click-to-open fallback for one URL and
/// removes itself after the configured timeout even if never clicked.
/// Expired entries are purged on every read.
pub struct PromptBoard {
    timeout: Duration,
    entries: Mutex<Vec<ManualOpenPrompt>>,
}

impl PromptBoard {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Post a manual-open prompt for a URL whose automatic open was blocked.
    pub fn offer(&self, url: &str) {
        info!("Popup blocked for '{url}', offering manual open");
        self.entries.lock().push(ManualOpenPrompt {
            url: url.to_string(),
            posted_at: Instant::now(),
        });
    }

    /// URLs with a live prompt, oldest first.
    pub fn active(&self) -> Vec<String> {
        let mut entries = self.entries.lock();
        let timeout = self.timeout;
        entries.retain(|prompt| prompt.posted_at.elapsed() < timeout);
        entries.iter().map(|prompt| prompt.url.clone()).collect()
    }

    /// Remove the prompt for `url` without opening it. Returns whether a
    /// prompt was present.
    pub fn dismiss(&self, url: &str) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|prompt| prompt.url != url);
        entries.len() != before
    }

    /// The user clicked a prompt: retry the open and drop the prompt.
    pub fn open_manually(&self, url: &str, opener: &dyn TabOpener) -> Option<TabHandle> {
        self.dismiss(url);
        opener.open(url)
    }

    pub fn is_empty(&self) -> bool {
        self.active().is_empty()
    }
}

pub type PromptBoardRef = Arc<PromptBoard>;
