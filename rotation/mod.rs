/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Active-ad-link selection and rotation engine.
//!
//! [`AdRotationStore`] owns the canonical link list, the active subset, and
//! the rotation frequency. Every read re-validates the persisted selection
//! against the current link list and self-heals stale state before using it;
//! every mutation writes through to the persistence backend after the
//! in-memory state has been updated. Backend failures are absorbed and
//! converted into default state, never surfaced to callers.

pub mod scheduler;

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use rand::Rng;
use tokio::time::sleep;
use url::Url;

use crate::persistence::KeyValueStoreRef;
use crate::tabs::{PromptBoardRef, TabOpener};

/// Storage key for the ordered link list (JSON array of strings).
pub const LINKS_KEY: &str = "ad_links";
/// Storage key for the active selection (JSON array of indices).
pub const ACTIVE_INDICES_KEY: &str = "active_ad_indices";
/// Storage key for the rotation frequency (stringified milliseconds).
pub const FREQUENCY_KEY: &str = "ad_frequency";
/// Legacy storage key: most recently opened index (stringified).
pub const LAST_OPENED_KEY: &str = "last_opened_ad_index";

/// Every persisted key the engine owns, for cold-start hydration.
pub const ALL_KEYS: [&str; 4] = [
    LINKS_KEY,
    ACTIVE_INDICES_KEY,
    FREQUENCY_KEY,
    LAST_OPENED_KEY,
];

/// Seed list used whenever the backend has no (or corrupt) link data.
pub const DEFAULT_AD_LINKS: [&str; 4] = [
    "https://www.effectiveratecpm.com/mfq9ehgs?key=5dda470b0999d934423e0757a8bee5bd",
    "https://www.effectiveratecpm.com/e67zqkjez?key=484c1ee09f1c2d8f11be73db86366292",
    "https://twirlparchextent.com/aunqn6y7?key=2544222cbbb184f6bae6bf257ce5aee0",
    "https://twirlparchextent.com/c6h6a353ae?key=80e516207c54406eec743e68c14e4103",
];

/// Lower bound on the rotation frequency.
pub const MIN_FREQUENCY: Duration = Duration::from_secs(5);
/// Frequency used when nothing valid is persisted.
pub const DEFAULT_FREQUENCY: Duration = Duration::from_secs(30);
/// Odds that a user interaction triggers an ad open.
pub const DEFAULT_INTERACTION_ODDS: f64 = 0.10;

/// Upper bound on opens issued by one batch trigger.
const MAX_BATCH_OPENS: usize = 4;
/// Delay between successive opens within one batch.
const OPEN_STAGGER: Duration = Duration::from_millis(300);

/// What caused an open attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenTrigger {
    PageLoad,
    TimerTick,
    UserInteraction,
    PageUnload,
}

/// Whether newly added links join the active selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivationPolicy {
    /// New links stay inactive until toggled on.
    #[default]
    InactiveUntilEnabled,
    /// New links are activated as they are added.
    ActiveImmediately,
}

/// Errors raised for caller-supplied invalid arguments. Backend failures
/// never surface here.
#[derive(Debug)]
pub enum RotationError {
    Validation(String),
    IndexOutOfRange { index: usize, len: usize },
}

impl std::fmt::Display for RotationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RotationError::Validation(e) => write!(f, "Validation error: {e}"),
            RotationError::IndexOutOfRange { index, len } => {
                write!(f, "Index {index} out of range for {len} link(s)")
            },
        }
    }
}

/// Result of one open attempt within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Opened,
    Blocked,
}

/// What a trigger actually did.
#[derive(Debug, Default)]
pub struct OpenReport {
    pub attempts: Vec<(String, OpenOutcome)>,
}

impl OpenReport {
    pub fn opened(&self) -> usize {
        self.attempts
            .iter()
            .filter(|(_, outcome)| *outcome == OpenOutcome::Opened)
            .count()
    }

    pub fn blocked(&self) -> usize {
        self.attempts.len() - self.opened()
    }
}

/// The rotation engine. One instance per page session, with the
/// persistence backend and the tab-opening surface injected.
pub struct AdRotationStore {
    backend: KeyValueStoreRef,
    opener: Arc<dyn TabOpener>,
    prompts: PromptBoardRef,
    links: Vec<String>,
    active: Vec<usize>,
    frequency: Duration,
    last_opened: Option<usize>,
    activation_policy: ActivationPolicy,
    interaction_odds: f64,
}

impl AdRotationStore {
    /// Build the store from whatever the backend holds, seeding the default
    /// link list when nothing (or nothing readable) is persisted. Never
    /// fails: backend errors degrade to defaults.
    pub fn open(
        backend: KeyValueStoreRef,
        opener: Arc<dyn TabOpener>,
        prompts: PromptBoardRef,
    ) -> Self {
        let mut store = Self {
            backend,
            opener,
            prompts,
            links: Vec::new(),
            active: Vec::new(),
            frequency: DEFAULT_FREQUENCY,
            last_opened: None,
            activation_policy: ActivationPolicy::default(),
            interaction_odds: DEFAULT_INTERACTION_ODDS,
        };
        store.reload();
        store
    }

    pub fn links(&self) -> &[String] {
        &self.links
    }

    /// Active indices, ascending.
    pub fn active_indices(&self) -> &[usize] {
        &self.active
    }

    pub fn is_active(&self, index: usize) -> bool {
        self.active.contains(&index)
    }

    pub fn frequency(&self) -> Duration {
        self.frequency
    }

    pub fn activation_policy(&self) -> ActivationPolicy {
        self.activation_policy
    }

    pub fn set_activation_policy(&mut self, policy: ActivationPolicy) {
        self.activation_policy = policy;
    }

    pub fn interaction_odds(&self) -> f64 {
        self.interaction_odds
    }

    pub fn set_interaction_odds(&mut self, odds: f64) {
        self.interaction_odds = odds.clamp(0.0, 1.0);
    }

    /// Most recently opened index, clamped to current bounds. Legacy
    /// consumers only.
    pub fn last_opened_index(&self) -> Option<usize> {
        if self.links.is_empty() {
            return None;
        }
        self.last_opened.map(|index| index.min(self.links.len() - 1))
    }

    /// Append a link, auto-prefixing `https://` when the input has no
    /// recognized scheme. Duplicates are permitted. Returns the new index.
    pub fn add_link(&mut self, raw: &str) -> Result<usize, RotationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(RotationError::Validation(
                "Link must not be empty".to_string(),
            ));
        }
        let url = normalize_link_url(trimmed)?;

        let index = self.links.len();
        self.links.push(url);
        self.persist_links();

        if self.activation_policy == ActivationPolicy::ActiveImmediately {
            self.active.push(index);
            self.canonicalize_selection();
            self.persist_selection();
        }
        Ok(index)
    }

    /// Delete the link at `index`, shifting the active selection so it keeps
    /// tracking the same URLs. If the selection empties while links remain,
    /// the wrapped successor of the removed entry (`index % new_len`) is
    /// activated. Returns the removed URL.
    pub fn remove_link(&mut self, index: usize) -> Result<String, RotationError> {
        if index >= self.links.len() {
            return Err(RotationError::IndexOutOfRange {
                index,
                len: self.links.len(),
            });
        }
        let removed = self.links.remove(index);

        self.active.retain(|&active_index| active_index != index);
        for active_index in &mut self.active {
            if *active_index > index {
                *active_index -= 1;
            }
        }
        if self.active.is_empty() && !self.links.is_empty() {
            self.active.push(index % self.links.len());
        }
        self.canonicalize_selection();

        self.persist_links();
        self.persist_selection();
        self.mirror_legacy_index();
        Ok(removed)
    }

    /// Toggle membership of `index` in the active selection. Deactivating
    /// the sole active index force-activates `(index + 1) % len` instead of
    /// allowing an empty selection.
    pub fn set_active(&mut self, index: usize, active: bool) -> Result<(), RotationError> {
        if index >= self.links.len() {
            return Err(RotationError::IndexOutOfRange {
                index,
                len: self.links.len(),
            });
        }
        if active {
            if !self.active.contains(&index) {
                self.active.push(index);
            }
        } else {
            self.active.retain(|&active_index| active_index != index);
            if self.active.is_empty() && !self.links.is_empty() {
                let replacement = (index + 1) % self.links.len();
                self.active.push(replacement);
                debug!("Deactivated the last active link, activating {replacement} instead");
            }
        }
        self.canonicalize_selection();
        self.persist_selection();
        self.mirror_legacy_index();
        Ok(())
    }

    /// Activate every link. Idempotent.
    pub fn activate_all(&mut self) {
        self.active = (0..self.links.len()).collect();
        self.persist_selection();
        self.mirror_legacy_index();
    }

    /// Overwrite everything with the built-in seed list, all active.
    pub fn reset_to_defaults(&mut self) {
        self.links = DEFAULT_AD_LINKS.iter().map(|url| url.to_string()).collect();
        self.persist_links();
        self.activate_all();
        info!("Ad links reset to the {} defaults", self.links.len());
    }

    /// The ordered URLs currently eligible to open. Re-reads the backend,
    /// repairs stale selections, and persists the repaired state, so every
    /// consumer goes through one resolution pipeline.
    pub fn resolve_active_links(&mut self) -> Vec<String> {
        self.reload();
        self.active
            .iter()
            .map(|&index| self.links[index].clone())
            .collect()
    }

    /// Set the rotation frequency. Rejects anything below the 5 second
    /// minimum; persists as stringified milliseconds.
    pub fn set_frequency(&mut self, every: Duration) -> Result<(), RotationError> {
        if every < MIN_FREQUENCY {
            return Err(RotationError::Validation(format!(
                "Rotation frequency must be at least {} seconds",
                MIN_FREQUENCY.as_secs()
            )));
        }
        self.frequency = every;
        self.persist_frequency();
        Ok(())
    }

    /// Open ads for a page-lifecycle trigger.
    ///
    /// - `PageLoad` / `TimerTick`: open every active link, capped at 4,
    ///   ascending index order, with a fixed stagger between opens.
    /// - `UserInteraction`: probabilistic gate, then one random active link.
    /// - `PageUnload`: one random link from the full list, fire-and-forget;
    ///   the outcome is not inspected and no fallback prompt is posted.
    ///
    /// Blocked opens on the other triggers degrade to a manual-open prompt.
    pub async fn open_active_links(&mut self, trigger: OpenTrigger) -> OpenReport {
        match trigger {
            OpenTrigger::PageLoad | OpenTrigger::TimerTick => self.open_batch().await,
            OpenTrigger::UserInteraction => self.open_on_interaction(),
            OpenTrigger::PageUnload => self.open_on_unload(),
        }
    }

    async fn open_batch(&mut self) -> OpenReport {
        let urls = self.resolve_active_links();
        let batch = urls.len().min(MAX_BATCH_OPENS);
        debug!("Opening {batch} of {} active ad link(s)", urls.len());

        let mut report = OpenReport::default();
        for (slot, url) in urls.into_iter().take(MAX_BATCH_OPENS).enumerate() {
            if slot > 0 {
                sleep(OPEN_STAGGER).await;
            }
            let outcome = self.open_one(&url, true);
            report.attempts.push((url, outcome));
        }
        report
    }

    fn open_on_interaction(&mut self) -> OpenReport {
        let mut report = OpenReport::default();
        if rand::thread_rng().gen_range(0.0..1.0) >= self.interaction_odds {
            return report;
        }
        let urls = self.resolve_active_links();
        if urls.is_empty() {
            return report;
        }
        let pick = rand::thread_rng().gen_range(0..urls.len());
        let url = urls[pick].clone();
        let outcome = self.open_one(&url, true);
        report.attempts.push((url, outcome));
        report
    }

    fn open_on_unload(&mut self) -> OpenReport {
        let mut report = OpenReport::default();
        if self.links.is_empty() {
            return report;
        }
        let pick = rand::thread_rng().gen_range(0..self.links.len());
        let url = self.links[pick].clone();
        let outcome = self.open_one(&url, false);
        report.attempts.push((url, outcome));
        report
    }

    /// Issue one open attempt, recording the legacy last-opened index first.
    /// `with_fallback` controls whether a blocked open posts a manual-open
    /// prompt.
    fn open_one(&mut self, url: &str, with_fallback: bool) -> OpenOutcome {
        if let Some(index) = self.links.iter().position(|link| link == url) {
            self.last_opened = Some(index);
            if let Err(e) = self.backend.set(LAST_OPENED_KEY, &index.to_string()) {
                warn!("Failed to persist last opened index: {e}");
            }
        }
        match self.opener.open(url) {
            Some(_) => OpenOutcome::Opened,
            None => {
                if with_fallback {
                    self.prompts.offer(url);
                }
                OpenOutcome::Blocked
            },
        }
    }

    /// Re-read every persisted value and repair whatever is stale. This is
    /// the single resolution pipeline every read path goes through.
    fn reload(&mut self) {
        let seeded = self.load_links();
        self.load_selection(seeded);
        self.load_frequency();
        self.load_last_opened();
    }

    fn load_links(&mut self) -> bool {
        match self.backend.get(LINKS_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<String>>(&raw) {
                Ok(links) => {
                    self.links = links;
                    return false;
                },
                Err(e) => warn!("Stored ad links are corrupt, reseeding defaults: {e}"),
            },
            Ok(None) => info!("No stored ad links, seeding defaults"),
            Err(e) => warn!("Failed to read ad links, seeding defaults: {e}"),
        }
        self.links = DEFAULT_AD_LINKS.iter().map(|url| url.to_string()).collect();
        self.persist_links();
        true
    }

    fn load_selection(&mut self, activate_all: bool) {
        if activate_all {
            self.active = (0..self.links.len()).collect();
            self.persist_selection();
            return;
        }
        let stored = match self.backend.get(ACTIVE_INDICES_KEY) {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Failed to read active indices, activating all: {e}");
                None
            },
        };
        let parsed = stored
            .as_deref()
            .and_then(|raw| match serde_json::from_str::<Vec<i64>>(raw) {
                Ok(indices) => Some(indices),
                Err(e) => {
                    warn!("Stored active indices are corrupt, activating all: {e}");
                    None
                },
            });

        self.active = match parsed {
            Some(indices) => indices
                .into_iter()
                .filter(|&index| index >= 0 && (index as usize) < self.links.len())
                .map(|index| index as usize)
                .collect(),
            None => (0..self.links.len()).collect(),
        };
        if self.active.is_empty() && !self.links.is_empty() {
            self.active = (0..self.links.len()).collect();
        }
        self.canonicalize_selection();

        // Self-heal: persist the repaired selection when it differs from
        // what the backend holds.
        let canonical = encode_indices(&self.active);
        if stored.as_deref() != Some(canonical.as_str()) {
            self.persist_selection();
        }
    }

    fn load_frequency(&mut self) {
        match self.backend.get(FREQUENCY_KEY) {
            Ok(Some(raw)) => match raw.trim().parse::<u64>() {
                Ok(millis) if Duration::from_millis(millis) >= MIN_FREQUENCY => {
                    self.frequency = Duration::from_millis(millis);
                },
                _ => {
                    warn!("Stored rotation frequency '{raw}' is invalid, using default");
                    self.frequency = DEFAULT_FREQUENCY;
                },
            },
            Ok(None) => {
                self.frequency = DEFAULT_FREQUENCY;
                self.persist_frequency();
            },
            Err(e) => {
                warn!("Failed to read rotation frequency, using default: {e}");
                self.frequency = DEFAULT_FREQUENCY;
            },
        }
    }

    fn load_last_opened(&mut self) {
        self.last_opened = match self.backend.get(LAST_OPENED_KEY) {
            Ok(Some(raw)) => raw.trim().parse::<usize>().ok(),
            Ok(None) => None,
            Err(_) => None,
        };
    }

    fn canonicalize_selection(&mut self) {
        self.active.sort_unstable();
        self.active.dedup();
    }

    fn persist_links(&self) {
        match serde_json::to_string(&self.links) {
            Ok(raw) => {
                if let Err(e) = self.backend.set(LINKS_KEY, &raw) {
                    warn!("Failed to persist ad links: {e}");
                }
            },
            Err(e) => warn!("Failed to serialize ad links: {e}"),
        }
    }

    fn persist_selection(&self) {
        let raw = encode_indices(&self.active);
        if let Err(e) = self.backend.set(ACTIVE_INDICES_KEY, &raw) {
            warn!("Failed to persist active indices: {e}");
        }
    }

    fn persist_frequency(&self) {
        let millis = self.frequency.as_millis().to_string();
        if let Err(e) = self.backend.set(FREQUENCY_KEY, &millis) {
            warn!("Failed to persist rotation frequency: {e}");
        }
    }

    /// Legacy mirror kept for backward-compatible consumers: the first
    /// active index doubles as the last-displayed index after selection
    /// changes.
    fn mirror_legacy_index(&mut self) {
        let Some(&first) = self.active.first() else {
            return;
        };
        self.last_opened = Some(first);
        if let Err(e) = self.backend.set(LAST_OPENED_KEY, &first.to_string()) {
            warn!("Failed to persist last opened index: {e}");
        }
    }
}

fn encode_indices(indices: &[usize]) -> String {
    serde_json::to_string(indices).unwrap_or_else(|_| "[]".to_string())
}

/// Keep URLs with a recognized scheme-and-host shape as-is; everything else
/// gets the secure-scheme prefix and must then parse.
fn normalize_link_url(raw: &str) -> Result<String, RotationError> {
    if let Ok(url) = Url::parse(raw)
        && url.has_host()
    {
        return Ok(raw.to_string());
    }
    let candidate = format!("https://{raw}");
    match Url::parse(&candidate) {
        Ok(url) if url.has_host() => Ok(candidate),
        _ => Err(RotationError::Validation(format!(
            "'{raw}' is not a valid link URL"
        ))),
    }
}
