//! Customer reports: listing, details, file links and bulk download.

use std::fs;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::client::Client;
use crate::error::{ApiError, Error, Result};
use crate::http::ApiRequest;
use crate::output::{save_json, save_reports_csv, timestamped_filename};
use crate::util::{append_query, extension_for_content_type, sanitize_file_component};

const PAGE_SIZE: usize = 100;

/// One entry of a report's `Links` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileLink {
    #[serde(rename = "Link", default)]
    pub link: Option<String>,
    #[serde(rename = "FileType", default)]
    pub file_type: Option<String>,
    #[serde(rename = "ExpireTimestamp", default)]
    pub expire_timestamp: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadedFile {
    pub report_id: String,
    pub file_type: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// `Id` or `ReportId` of a report entry, as a string.
pub fn report_id(report: &Value) -> Option<String> {
    match report.get("Id").or_else(|| report.get("ReportId"))? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn reports_filter() -> Value {
    json!({
        "productsToFiterBy": [],
        "statusesToFilterBy": "",
        "sortBy": "",
        "sortAscending": true,
        "subStatusToFilterBy": "",
        "fieldsToFilterBy": [],
        "textToFilterBy": "",
        "referenceId": "",
        "emailCC": "",
        "fromDate": "",
        "toDate": "",
    })
}

fn first_element(v: Value) -> Value {
    match v {
        Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        other => other,
    }
}

fn fallback_extension(file_type: &str) -> &'static str {
    match file_type {
        "PDF" => "pdf",
        "ZIP" => "zip",
        _ => "dat",
    }
}

impl Client {
    /// Every report on the account, following pagination. A non-200 page stops
    /// the walk and returns what was gathered so far.
    pub fn list_reports(&self) -> Result<Vec<Value>> {
        let mut reports = Vec::new();
        let count = PAGE_SIZE.to_string();

        for page in 1usize.. {
            let page_str = page.to_string();
            let path = append_query(
                "/v3/Report/GetReports",
                &[("page", page_str.as_str()), ("count", count.as_str())],
            );
            let resp = self.execute(&ApiRequest::post(path).json(reports_filter()))?;
            if resp.status != 200 {
                tracing::warn!("reports endpoint returned HTTP {} on page {page}", resp.status);
                break;
            }

            let Some(Value::Array(pages)) = resp.json_value() else {
                break;
            };
            let Some(first) = pages.into_iter().next() else {
                break;
            };

            let total = first
                .get("TotalOfReports")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize;
            let page_len = match first.get("ReportList") {
                Some(Value::Array(list)) => {
                    reports.extend(list.iter().cloned());
                    list.len()
                }
                Some(Value::Null) | None => 0,
                Some(single) => {
                    reports.push(single.clone());
                    1
                }
            };

            tracing::debug!("page {page}: {page_len} report(s), {} of {total}", reports.len());
            if reports.len() >= total || page_len < PAGE_SIZE {
                break;
            }
        }

        tracing::info!("found {} report(s)", reports.len());
        Ok(reports)
    }

    /// Details of one report, or `None` when the service does not return them.
    pub fn report_detail(&self, report_id: &str) -> Result<Option<Value>> {
        let path = append_query("/v3/Report/GetReport", &[("reportId", report_id)]);
        let resp = self.execute(&ApiRequest::get(path))?;
        if resp.status != 200 {
            tracing::warn!("no detail for report {report_id} (HTTP {})", resp.status);
            return Ok(None);
        }
        Ok(resp.json_value().map(first_element))
    }

    pub fn report_file_links(&self, report_id: &str) -> Result<Vec<FileLink>> {
        let resp = self.execute(&ApiRequest::get(format!(
            "/v3/Report/{report_id}/file-links"
        )))?;
        if resp.status != 200 {
            tracing::warn!("no file links for report {report_id} (HTTP {})", resp.status);
            return Ok(Vec::new());
        }

        let links = resp
            .json_value()
            .map(first_element)
            .and_then(|v| v.get("Links").cloned())
            .and_then(|links| serde_json::from_value(links).ok())
            .unwrap_or_default();
        Ok(links)
    }

    /// Raw bytes of one report file; empty when the service has none.
    pub fn download_report_file(
        &self,
        report_id: &str,
        file_type: &str,
        file_format: &str,
    ) -> Result<Vec<u8>> {
        let path = append_query(
            "/v1/File/GetReportFile",
            &[
                ("reportId", report_id),
                ("fileType", file_type),
                ("fileFormat", file_format),
            ],
        );
        let resp = self.execute(&ApiRequest::get(path).accept("*/*"))?;
        if resp.status != 200 {
            tracing::warn!(
                "report file {file_type}/{file_format} for {report_id} unavailable (HTTP {})",
                resp.status
            );
            return Ok(Vec::new());
        }
        Ok(resp.body)
    }

    /// Fetches an absolute download link and writes it to `target`.
    pub fn download_link(&self, url: &str, target: &Path) -> Result<u64> {
        let (bytes, _) = self.fetch_link(url)?;
        write_file(target, &bytes)
    }

    fn fetch_link(&self, url: &str) -> Result<(Vec<u8>, Option<String>)> {
        let resp = self.execute(&ApiRequest::get(url).accept("*/*"))?;
        if resp.status != 200 {
            return Err(ApiError::unexpected(url, resp.status, &resp.body, 200).into());
        }
        Ok((resp.body, resp.content_type))
    }

    /// Writes `url` to `{stem}{ext}` with the extension picked from the content type.
    fn save_link(
        &self,
        url: &str,
        dir: &Path,
        stem: &str,
        fallback: &str,
    ) -> Result<(PathBuf, u64)> {
        let (bytes, content_type) = self.fetch_link(url)?;
        let ext = extension_for_content_type(content_type.as_deref(), fallback);
        let path = dir.join(format!("{stem}{ext}"));
        let size = write_file(&path, &bytes)?;
        Ok((path, size))
    }

    /// Downloads the detail JSON, the main PDF and every linked file of each
    /// report into `dir`, then writes a timestamped summary next to them.
    ///
    /// Failures of a single report are logged and skipped; authentication
    /// failures abort.
    pub fn download_reports(&self, dir: &Path) -> Result<Vec<DownloadedFile>> {
        let reports = self.list_reports()?;
        if reports.is_empty() {
            tracing::info!("no reports found for this account");
            return Ok(Vec::new());
        }
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        if let Err(e) = save_reports_csv(dir, &reports, self.clock.now()) {
            tracing::error!("could not save the report list as CSV: {e}");
        }

        let pb = if self.progress {
            let pb = ProgressBar::new(reports.len() as u64);
            pb.set_style(
                ProgressStyle::with_template("{spinner:.green} [{wide_bar}] {pos}/{len} {msg}")
                    .map(|s| s.progress_chars("=>-"))
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            Some(pb)
        } else {
            None
        };

        let mut downloaded = Vec::new();
        for (i, report) in reports.iter().enumerate() {
            if let Some(pb) = &pb {
                pb.set_position(i as u64);
            }
            let Some(id) = report_id(report) else {
                tracing::warn!("skipping report at index {i}: no report id");
                continue;
            };
            if let Some(pb) = &pb {
                pb.set_message(format!("report {id}"));
            }

            match self.download_report(&id, dir) {
                Ok(files) => downloaded.extend(files),
                Err(e @ Error::Auth(_)) => return Err(e),
                Err(e) => tracing::warn!("failed to process report {id}: {e}"),
            }
        }
        if let Some(pb) = &pb {
            pb.finish_and_clear();
        }

        let summary = dir.join(timestamped_filename(
            "downloaded_reports_summary",
            "json",
            self.clock.now(),
        ));
        save_json(&summary, &downloaded)?;
        tracing::info!(
            "downloaded {} file(s) for {} report(s); summary at {}",
            downloaded.len(),
            reports.len(),
            summary.display()
        );
        Ok(downloaded)
    }

    fn download_report(&self, id: &str, dir: &Path) -> Result<Vec<DownloadedFile>> {
        let safe_id = sanitize_file_component(id);
        let mut files = Vec::new();

        let Some(detail) = self.report_detail(id)? else {
            return Ok(files);
        };
        save_json(&dir.join(format!("report_{safe_id}_detail.json")), &detail)?;

        if let Some(link) = detail.get("ReportDownloadLink").and_then(Value::as_str) {
            match self.save_link(link, dir, &format!("report_{safe_id}"), "pdf") {
                Ok((path, size_bytes)) => files.push(DownloadedFile {
                    report_id: id.to_string(),
                    file_type: "PDF".into(),
                    path,
                    size_bytes,
                }),
                Err(e @ Error::Auth(_)) => return Err(e),
                Err(e) => tracing::warn!("could not download PDF for report {id}: {e}"),
            }
        }

        for (j, file_link) in self.report_file_links(id)?.into_iter().enumerate() {
            let (Some(link), Some(file_type)) = (file_link.link, file_link.file_type) else {
                tracing::warn!("invalid file link #{} for report {id}", j + 1);
                continue;
            };
            let stem = format!(
                "report_{safe_id}_file_{}_{}",
                j + 1,
                sanitize_file_component(&file_type)
            );
            match self.save_link(&link, dir, &stem, fallback_extension(&file_type)) {
                Ok((path, size_bytes)) => files.push(DownloadedFile {
                    report_id: id.to_string(),
                    file_type,
                    path,
                    size_bytes,
                }),
                Err(e @ Error::Auth(_)) => return Err(e),
                Err(e) => tracing::warn!("could not download {file_type} for report {id}: {e}"),
            }
        }

        Ok(files)
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<u64> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    fs::write(path, bytes).map_err(|e| Error::io(path, e))?;
    tracing::info!("saved {}", path.display());
    Ok(bytes.len() as u64)
}
