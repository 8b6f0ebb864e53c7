/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Headless engine for a static image-gallery site: the ad-link rotation
//! store, the admin-managed image library, and the key-value persistence
//! they share.
//!
//! The library deliberately knows nothing about HTML or HTTP serving; the
//! browser surface is abstracted behind [`tabs::TabOpener`] and the storage
//! surface behind [`persistence::KeyValueStore`], both injected into the
//! session object ([`app::GalleryApp`]).

pub mod app;
pub mod gallery;
pub mod persistence;
pub mod prefs;
pub mod rotation;
pub mod tabs;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install the process-wide tracing subscriber. `filter` takes env-filter
/// directives and falls back to `RUST_LOG`, then to `info`.
pub fn init_tracing(filter: Option<&str>) {
    use tracing_subscriber::EnvFilter;

    let filter = match filter {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
