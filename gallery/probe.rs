/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Reachability probe for image URLs.
//!
//! Before a URL joins the gallery it must answer within an explicit timeout
//! and either declare an `image/*` content type or sniff as a known image
//! format from its leading bytes.

use std::io::Read;
use std::time::Duration;

use log::debug;
use reqwest::header::CONTENT_TYPE;

use super::GalleryError;

/// How much of the body is fetched for sniffing.
const SNIFF_LIMIT: u64 = 512;

/// What a successful probe learned about the resource.
#[derive(Debug, Clone)]
pub struct ProbedImage {
    pub content_type: Option<String>,
    pub sniffed_mime: Option<String>,
}

/// Fetch the head of `url` and decide whether it is an image. The whole
/// request is bounded by `timeout`; any failure is a [`GalleryError::Probe`].
pub fn probe_image_url(url: &str, timeout: Duration) -> Result<ProbedImage, GalleryError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| GalleryError::Probe(format!("{e}")))?;

    let response = client
        .get(url)
        .send()
        .map_err(|e| GalleryError::Probe(format!("Request failed: {e}")))?;
    if !response.status().is_success() {
        return Err(GalleryError::Probe(format!(
            "Unexpected status {}",
            response.status()
        )));
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());

    let mut head = Vec::new();
    response
        .take(SNIFF_LIMIT)
        .read_to_end(&mut head)
        .map_err(|e| GalleryError::Probe(format!("Read failed: {e}")))?;

    let sniffed_mime = infer::get(&head)
        .filter(|kind| kind.matcher_type() == infer::MatcherType::Image)
        .map(|kind| kind.mime_type().to_string());
    let declared_image = content_type
        .as_deref()
        .is_some_and(|value| value.starts_with("image/"));

    if sniffed_mime.is_none() && !declared_image {
        return Err(GalleryError::Probe(
            "URL does not point at an image".to_string(),
        ));
    }

    debug!(
        "Probed '{url}': content-type {:?}, sniffed {:?}",
        content_type, sniffed_mime
    );
    Ok(ProbedImage {
        content_type,
        sniffed_mime,
    })
}
