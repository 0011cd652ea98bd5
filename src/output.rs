//! Files written next to a run: submitted requests, results, summaries and the
//! report list as CSV.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use time::macros::format_description;

use crate::error::{Error, Result};
use crate::property::PropertyRequest;
use crate::util::sanitize_file_component;

/// Writes pretty-printed JSON, creating parent directories.
pub fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| Error::io(path, e.into()))?;
    fs::write(path, bytes).map_err(|e| Error::io(path, e))?;

    tracing::info!("saved {}", path.display());
    Ok(())
}

/// `{prefix}_{YYYYmmdd_HHMMSS}.{ext}`
pub fn timestamped_filename(prefix: &str, ext: &str, now: OffsetDateTime) -> String {
    let stamp = now
        .format(format_description!(
            "[year][month][day]_[hour][minute][second]"
        ))
        .unwrap_or_else(|_| now.unix_timestamp().to_string());
    format!("{prefix}_{stamp}.{}", ext.trim_start_matches('.'))
}

/// Saves `requests` to a timestamped file in `dir` and returns its path.
pub fn save_requests(
    dir: &Path,
    requests: &[PropertyRequest],
    now: OffsetDateTime,
) -> Result<PathBuf> {
    let path = dir.join(timestamped_filename(
        "eagleview_property_data_requests",
        "json",
        now,
    ));
    save_json(&path, requests)?;
    Ok(path)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SavedRequests {
    Many(Vec<PropertyRequest>),
    One(PropertyRequest),
}

/// Reads every `*.json` file in `dir` whose name contains "request".
///
/// Files that do not hold requests are skipped with a warning. A missing
/// directory yields an empty list.
pub fn load_requests(dir: &Path) -> Result<Vec<PropertyRequest>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::io(dir, e)),
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension().is_some_and(|ext| ext == "json")
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.contains("request"))
        })
        .collect();
    paths.sort();

    let mut requests = Vec::new();
    for path in paths {
        let bytes = fs::read(&path).map_err(|e| Error::io(&path, e))?;
        match serde_json::from_slice::<SavedRequests>(&bytes) {
            Ok(SavedRequests::Many(many)) => requests.extend(many),
            Ok(SavedRequests::One(one)) => requests.push(one),
            Err(e) => tracing::warn!("skipping {}: {e}", path.display()),
        }
    }

    tracing::info!("loaded {} request(s) from {}", requests.len(), dir.display());
    Ok(requests)
}

/// Writes `property_data_result_{id}.json` for each request that has a payload.
pub fn save_results(dir: &Path, requests: &[PropertyRequest]) -> Result<Vec<PathBuf>> {
    let mut saved = Vec::new();
    for request in requests {
        let Some(payload) = request.payload() else {
            continue;
        };
        let path = dir.join(format!(
            "property_data_result_{}.json",
            sanitize_file_component(request.request_id())
        ));
        save_json(&path, payload)?;
        saved.push(path);
    }
    Ok(saved)
}

fn csv_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Writes one row per report to `eagleview_reports_client_credentials_{stamp}.csv`.
///
/// The header is the sorted union of every report's keys; nested values are
/// written as JSON text. Nothing is written for an empty list.
pub fn save_reports_csv(
    dir: &Path,
    reports: &[Value],
    now: OffsetDateTime,
) -> Result<Option<PathBuf>> {
    if reports.is_empty() {
        return Ok(None);
    }

    let columns: BTreeSet<&str> = reports
        .iter()
        .filter_map(Value::as_object)
        .flat_map(|report| report.keys().map(String::as_str))
        .collect();

    fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    let path = dir.join(timestamped_filename(
        "eagleview_reports_client_credentials",
        "csv",
        now,
    ));
    let csv_error = |e: csv::Error| Error::io(&path, e.into());

    let mut writer = csv::Writer::from_path(&path).map_err(csv_error)?;
    writer.write_record(&columns).map_err(csv_error)?;
    for report in reports {
        let row = columns.iter().map(|c| csv_cell(report.get(*c)));
        writer.write_record(row).map_err(csv_error)?;
    }
    writer.flush().map_err(|e| Error::io(&path, e))?;

    tracing::info!("reports saved to CSV: {}", path.display());
    Ok(Some(path))
}
