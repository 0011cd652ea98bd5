use anyhow::Result;
use eagleview::logging::{self, LogFormat};
use eagleview::{Client, PropertyTarget, RequestStatus, Settings, output};
use time::OffsetDateTime;

fn main() -> Result<()> {
    // Submits a few sandbox properties, polls their results and downloads the
    // referenced images. Configure credentials via env vars or `eagleview.yaml`.
    let settings = Settings::load(None)?;
    let format = std::env::var("EAGLEVIEW_LOG_FORMAT")
        .unwrap_or_default()
        .parse::<LogFormat>()?;
    logging::init(&settings.log_level, format);

    let out = settings.output_dir.clone();
    let client = Client::new(settings)?;

    let targets = [
        PropertyTarget::coordinates(41.25, -95.99),
        PropertyTarget::coordinates(41.2490, -95.9880),
        PropertyTarget::address("3102 Farnam St, Omaha, NE 68131"),
    ];
    let mut requests: Vec<_> = client
        .submit_many(&targets)
        .into_iter()
        .filter_map(|item| item.outcome.ok())
        .collect();
    output::save_requests(&out, &requests, OffsetDateTime::now_utc())?;

    client.fetch_results(&mut requests)?;
    output::save_results(&out.join("results"), &requests)?;

    for request in &requests {
        println!("{}: {:?}", request.request_id(), request.status());
        if request.status() != RequestStatus::Complete {
            continue;
        }
        if let Some(payload) = request.payload() {
            let dir = out.join("images").join(request.request_id());
            let summary = client.download_property_images(payload, &dir)?;
            println!("  saved {}/{} image(s)", summary.saved.len(), summary.referenced);
        }
    }
    Ok(())
}
