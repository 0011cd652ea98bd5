use anyhow::Result;
use eagleview::logging::{self, LogFormat};
use eagleview::{Client, Settings};

fn main() -> Result<()> {
    // Lists the imagery captures around a sandbox point and saves the first
    // capture image that carries a token.
    let settings = Settings::load(None)?;
    logging::init(&settings.log_level, LogFormat::Pretty);

    let out = settings.output_dir.join("imagery");
    let client = Client::new(settings)?;

    let result = client.discover_imagery(41.25, -95.99)?;
    println!(
        "{} capture(s) at ({}, {})",
        result.captures.len(),
        result.location.lat,
        result.location.lon
    );
    if result.is_empty() {
        return Ok(());
    }
    eagleview::output::save_json(&out.join("discovery.json"), &result.raw)?;

    let token = result
        .captures
        .iter()
        .find_map(|c| c.get("image_token").and_then(|t| t.as_str()));
    if let Some(token) = token {
        let image = client.fetch_image(token)?;
        let path = out.join(format!("capture{}", image.extension));
        std::fs::write(&path, &image.bytes)?;
        println!("saved {}", path.display());
    }
    Ok(())
}
