/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The photo collection managed through the admin surface.
//!
//! Images are lightweight records (source URL or data URL, id, created-at
//! stamp) persisted as one JSON value under the `images` key. URL intake
//! goes through [`probe::probe_image_url`] so only reachable image
//! resources are accepted; file intake is converted to a base64 data URL.

pub mod probe;

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use crate::persistence::KeyValueStoreRef;

/// Storage key for the image collection (JSON array of records).
pub const IMAGES_KEY: &str = "images";

/// One gallery image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryImage {
    pub id: String,
    pub src: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
    pub created_at: String,
}

/// Errors from image intake. Backend failures are absorbed, not raised.
#[derive(Debug)]
pub enum GalleryError {
    Validation(String),
    Probe(String),
    UnknownImage(String),
}

impl std::fmt::Display for GalleryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GalleryError::Validation(e) => write!(f, "Validation error: {e}"),
            GalleryError::Probe(e) => write!(f, "Probe error: {e}"),
            GalleryError::UnknownImage(id) => write!(f, "No image with id '{id}'"),
        }
    }
}

/// Ordered, de-duplicated image collection with write-through persistence.
pub struct ImageLibrary {
    backend: KeyValueStoreRef,
    images: Vec<GalleryImage>,
}

impl ImageLibrary {
    /// Load the collection from the backend. Missing or corrupt data yields
    /// an empty library.
    pub fn open(backend: KeyValueStoreRef) -> Self {
        let mut library = Self {
            backend,
            images: Vec::new(),
        };
        library.reload();
        library
    }

    /// Insertion-ordered view of the collection.
    pub fn images(&self) -> &[GalleryImage] {
        &self.images
    }

    /// Re-read the collection, picking up writes from other sessions.
    pub fn reload(&mut self) {
        self.images = match self.backend.get(IMAGES_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<GalleryImage>>(&raw) {
                Ok(images) => images,
                Err(e) => {
                    warn!("Stored images are corrupt, starting empty: {e}");
                    Vec::new()
                },
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Failed to read stored images, starting empty: {e}");
                Vec::new()
            },
        };
    }

    /// Add an image by URL. The URL must carry an explicit http(s) scheme
    /// and must probe as an image within `probe_timeout`.
    pub fn add_from_url(
        &mut self,
        url: &str,
        probe_timeout: Duration,
    ) -> Result<&GalleryImage, GalleryError> {
        let url = url.trim();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(GalleryError::Validation(
                "Image URL must start with http:// or https://".to_string(),
            ));
        }
        probe::probe_image_url(url, probe_timeout)?;
        self.insert(url.to_string(), None)
    }

    /// Add an image from raw file bytes, stored inline as a base64 data URL.
    /// The bytes must sniff as a known image format.
    pub fn add_from_bytes(
        &mut self,
        bytes: &[u8],
        alt: Option<String>,
    ) -> Result<&GalleryImage, GalleryError> {
        let Some(kind) = infer::get(bytes) else {
            return Err(GalleryError::Validation(
                "File does not look like an image".to_string(),
            ));
        };
        if kind.matcher_type() != infer::MatcherType::Image {
            return Err(GalleryError::Validation(format!(
                "File has type '{}', not an image",
                kind.mime_type()
            )));
        }
        let src = format!("data:{};base64,{}", kind.mime_type(), BASE64.encode(bytes));
        self.insert(src, alt)
    }

    /// Remove an image by id. Returns the removed record.
    pub fn remove(&mut self, id: &str) -> Result<GalleryImage, GalleryError> {
        let Some(position) = self.images.iter().position(|image| image.id == id) else {
            return Err(GalleryError::UnknownImage(id.to_string()));
        };
        let removed = self.images.remove(position);
        self.persist();
        Ok(removed)
    }

    fn insert(
        &mut self,
        src: String,
        alt: Option<String>,
    ) -> Result<&GalleryImage, GalleryError> {
        if self.images.iter().any(|image| image.src == src) {
            return Err(GalleryError::Validation(
                "Image is already in the gallery".to_string(),
            ));
        }
        let image = GalleryImage {
            id: Uuid::new_v4().to_string(),
            src,
            alt,
            created_at: rfc3339_now(),
        };
        info!("Added gallery image {}", image.id);
        self.images.push(image);
        self.persist();
        Ok(&self.images[self.images.len() - 1])
    }

    fn persist(&self) {
        match serde_json::to_string(&self.images) {
            Ok(raw) => {
                if let Err(e) = self.backend.set(IMAGES_KEY, &raw) {
                    warn!("Failed to persist images: {e}");
                }
            },
            Err(e) => warn!("Failed to serialize images: {e}"),
        }
    }
}

fn rfc3339_now() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::new())
}
