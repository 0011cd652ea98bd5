//! Imagery discovery and image download.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::client::Client;
use crate::error::{ApiError, Error, Result};
use crate::http::ApiRequest;
use crate::util::sanitize_file_component;

const DISCOVERY_PATH: &str = "/imagery/v3/discovery/rank/location";
const DEFAULT_RADIUS_METERS: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

/// Captures ranked for a location. Produced in a single round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageryResult {
    pub location: Location,
    pub captures: Vec<Value>,
    /// Full discovery response; `Null` when the service returned nothing.
    pub raw: Value,
}

impl ImageryResult {
    pub fn is_empty(&self) -> bool {
        self.captures.is_empty() && self.raw.is_null()
    }
}

/// Image bytes as served, with a file extension matching their content type.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub bytes: Vec<u8>,
    pub extension: &'static str,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageDownloadSummary {
    pub referenced: usize,
    pub saved: Vec<PathBuf>,
    /// References that had no token or whose download failed.
    pub skipped: Vec<String>,
}

fn discovery_body(lat: f64, lon: f64, radius: u32) -> Value {
    let feature = json!({
        "type": "Feature",
        "geometry": { "type": "Point", "coordinates": [lon, lat] },
        "properties": null,
    });
    json!({
        "center": {
            "point": {
                "geojson": {
                    "value": feature.to_string(),
                    "epsg": "EPSG:4326",
                }
            },
            "radius_in_meters": radius,
        }
    })
}

fn image_extension(content_type: Option<&str>) -> &'static str {
    match content_type {
        Some(ct) if ct.contains("jpeg") => ".jpg",
        _ => ".png",
    }
}

impl Client {
    /// Ranked captures within 50 m of a point.
    pub fn discover_imagery(&self, lat: f64, lon: f64) -> Result<ImageryResult> {
        self.discover_imagery_within(lat, lon, DEFAULT_RADIUS_METERS)
    }

    /// Like [`discover_imagery`](Self::discover_imagery) with an explicit radius,
    /// capped at what the environment allows. Anything but HTTP 200 yields an
    /// empty result.
    pub fn discover_imagery_within(
        &self,
        lat: f64,
        lon: f64,
        radius: u32,
    ) -> Result<ImageryResult> {
        self.validate_coordinates(lat, lon)?;

        let radius = match self.settings.environment.max_discovery_radius() {
            Some(max) if radius > max => {
                tracing::warn!("radius {radius} m exceeds the {max} m limit; using {max} m");
                max
            }
            _ => radius,
        };

        let location = Location { lat, lon };
        let request = ApiRequest::post(DISCOVERY_PATH)
            .imagery()
            .json(discovery_body(lat, lon, radius));
        let resp = self.execute(&request)?;

        let raw = match (resp.status, resp.json_value()) {
            (200, Some(v)) => v,
            (status, _) => {
                tracing::warn!("no imagery data for ({lat}, {lon}) (HTTP {status})");
                return Ok(ImageryResult {
                    location,
                    captures: Vec::new(),
                    raw: Value::Null,
                });
            }
        };

        let captures = raw
            .get("captures")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        tracing::info!("found {} capture(s) for ({lat}, {lon})", captures.len());

        Ok(ImageryResult {
            location,
            captures,
            raw,
        })
    }

    pub fn fetch_image(&self, image_token: &str) -> Result<Image> {
        let request = ApiRequest::get(format!("/property/v2/image/{image_token}"))
            .imagery()
            .accept("image/png");
        let resp = self.execute(&request)?;

        if resp.status != 200 {
            let url = self.gateway.url_for(&request);
            return Err(ApiError::unexpected(&url, resp.status, &resp.body, 200).into());
        }

        Ok(Image {
            extension: image_extension(resp.content_type.as_deref()),
            bytes: resp.body,
        })
    }

    /// Downloads every image a property result references into `dir`.
    ///
    /// References are resolved through `imagery[ref].image_token` and saved as
    /// `{ref}_{first 8 chars of token}{ext}`. Unresolved references and failed
    /// downloads are skipped; authentication failures abort.
    pub fn download_property_images(
        &self,
        payload: &Value,
        dir: &Path,
    ) -> Result<ImageDownloadSummary> {
        let references: Vec<&str> = payload
            .pointer("/property_images/image_references")
            .and_then(Value::as_array)
            .map(|refs| refs.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut summary = ImageDownloadSummary {
            referenced: references.len(),
            ..Default::default()
        };
        tracing::info!("found {} image reference(s)", references.len());
        if references.is_empty() {
            return Ok(summary);
        }

        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

        for (i, reference) in references.iter().enumerate() {
            let Some(token) = payload
                .get("imagery")
                .and_then(|m| m.get(*reference))
                .and_then(|info| info.get("image_token"))
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
            else {
                tracing::warn!("no image token for {reference}");
                summary.skipped.push(reference.to_string());
                continue;
            };

            tracing::info!(
                "downloading image {}/{}: {reference}",
                i + 1,
                references.len()
            );
            let image = match self.fetch_image(token) {
                Ok(image) => image,
                Err(e @ Error::Auth(_)) => return Err(e),
                Err(e) => {
                    tracing::error!("failed to download {reference}: {e}");
                    summary.skipped.push(reference.to_string());
                    continue;
                }
            };

            let prefix: String = token.chars().take(8).collect();
            let path = dir.join(format!(
                "{}_{}{}",
                sanitize_file_component(reference),
                sanitize_file_component(&prefix),
                image.extension
            ));
            fs::write(&path, &image.bytes).map_err(|e| Error::io(&path, e))?;
            tracing::info!("saved {}", path.display());
            summary.saved.push(path);
        }

        tracing::info!(
            "downloaded {}/{} image(s) to {}",
            summary.saved.len(),
            summary.referenced,
            dir.display()
        );
        Ok(summary)
    }
}
