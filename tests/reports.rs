mod common;

use std::sync::Arc;

use eagleview::{HttpResponse, ManualClock};
use serde_json::{Value, json};

use common::{ScriptedTransport, client};

fn page(total: usize, ids: std::ops::Range<usize>) -> Value {
    let list: Vec<Value> = ids.map(|id| json!({"Id": id})).collect();
    json!([{"TotalOfReports": total, "ReportList": list}])
}

#[test]
fn listing_follows_pages_until_the_total_is_reached() {
    let transport = ScriptedTransport::new();
    transport
        .push_json(200, page(150, 0..100))
        .push_json(200, page(150, 100..150));
    let clock = Arc::new(ManualClock::default());
    let client = client(&transport, &clock);

    let reports = client.list_reports().expect("reports");

    let api = transport.api_requests();
    assert_eq!(reports.len(), 150);
    assert_eq!(api.len(), 2);
    assert!(api[0].url.ends_with("/v3/Report/GetReports?page=1&count=100"));
    assert!(api[1].url.ends_with("/v3/Report/GetReports?page=2&count=100"));
}

#[test]
fn listing_stops_on_an_error_page() {
    let transport = ScriptedTransport::new();
    transport.push_json(200, page(300, 0..100)).push_status(404);
    let clock = Arc::new(ManualClock::default());
    let client = client(&transport, &clock);

    assert_eq!(client.list_reports().expect("reports").len(), 100);
}

#[test]
fn bulk_download_writes_detail_pdf_and_linked_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = ScriptedTransport::new();
    transport
        .push_json(
            200,
            json!([{"TotalOfReports": 2, "ReportList": [{"Id": 7}, {"ReportId": "8"}]}]),
        )
        // report 7
        .push_json(200, json!([{"ReportId": 7, "ReportDownloadLink": "https://files.test/7.pdf"}]))
        .push(HttpResponse::new(200, "%PDF-1.7").with_content_type("application/pdf"))
        .push_json(
            200,
            json!({"Links": [
                {"Link": "https://files.test/7.xml", "FileType": "XML"},
                {"FileType": "ZIP"},
            ]}),
        )
        .push(HttpResponse::new(200, "<xml/>"))
        // report 8 has no details
        .push_status(404);
    let clock = Arc::new(ManualClock::default());
    let client = client(&transport, &clock);

    let files = client.download_reports(dir.path()).expect("download");

    assert_eq!(files.len(), 2);
    assert!(files[0].path.ends_with("report_7.pdf"));
    assert_eq!(files[0].size_bytes, 8);
    assert!(files[1].path.ends_with("report_7_file_1_XML.dat"));
    assert_eq!(files[1].file_type, "XML");
    assert!(dir.path().join("report_7_detail.json").exists());
    assert!(!dir.path().join("report_8_detail.json").exists());

    let names: Vec<String> = std::fs::read_dir(dir.path())
        .expect("read dir")
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    let count = |prefix: &str| names.iter().filter(|n| n.starts_with(prefix)).count();
    assert_eq!(count("downloaded_reports_summary_"), 1);
    assert_eq!(count("eagleview_reports_client_credentials_"), 1);
}

#[test]
fn no_reports_means_nothing_written() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = ScriptedTransport::new();
    transport.push_json(200, json!([{"TotalOfReports": 0, "ReportList": null}]));
    let clock = Arc::new(ManualClock::default());
    let client = client(&transport, &clock);

    let files = client
        .download_reports(&dir.path().join("reports"))
        .expect("download");

    assert!(files.is_empty());
    assert!(!dir.path().join("reports").exists());
}

#[test]
fn report_file_query_and_missing_file() {
    let transport = ScriptedTransport::new();
    transport
        .push(HttpResponse::new(200, "PK\x03\x04"))
        .push_status(404);
    let clock = Arc::new(ManualClock::default());
    let client = client(&transport, &clock);

    let bytes = client
        .download_report_file("77", "Roof Report", "PDF")
        .expect("file");
    let missing = client
        .download_report_file("78", "Roof Report", "PDF")
        .expect("missing file");

    assert_eq!(bytes, b"PK\x03\x04".to_vec());
    assert!(missing.is_empty());
    let api = transport.api_requests();
    assert!(api[0]
        .url
        .ends_with("/v1/File/GetReportFile?reportId=77&fileType=Roof+Report&fileFormat=PDF"));
    assert_eq!(api[0].header_value("accept"), Some("*/*"));
}

#[test]
fn absolute_links_are_downloaded_to_the_target() {
    let dir = tempfile::tempdir().expect("tempdir");
    let target = dir.path().join("nested").join("file.bin");
    let transport = ScriptedTransport::new();
    transport.push(HttpResponse::new(200, "payload")).push_status(404);
    let clock = Arc::new(ManualClock::default());
    let client = client(&transport, &clock);

    let size = client
        .download_link("https://files.test/a", &target)
        .expect("download");
    let err = client
        .download_link("https://files.test/b", &dir.path().join("b.bin"))
        .expect_err("404 link");

    assert_eq!(size, 7);
    assert_eq!(std::fs::read_to_string(&target).expect("read"), "payload");
    assert_eq!(err.status(), Some(404));
    assert_eq!(transport.api_requests()[0].url, "https://files.test/a");
}
