use anyhow::Result;
use eagleview::logging::{self, LogFormat};
use eagleview::{Client, Settings};

fn main() -> Result<()> {
    // Downloads every report on the account, with details and linked files.
    let settings = Settings::load(None)?;
    logging::init(&settings.log_level, LogFormat::Pretty);

    let dir = settings.output_dir.join("reports");
    let client = Client::new(settings)?;

    let files = client.download_reports(&dir)?;
    let bytes: u64 = files.iter().map(|f| f.size_bytes).sum();
    println!("downloaded {} file(s), {bytes} bytes, into {}", files.len(), dir.display());
    Ok(())
}
