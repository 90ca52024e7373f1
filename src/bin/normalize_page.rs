use anyhow::{Context, Result};
use std::fs;
use std::time::Duration;

use page_monitor::config::{validate_url, EffectiveConfig, FetchBackend, Settings};
use page_monitor::fetch::{create_client, Fetcher, HttpFetcher};
use page_monitor::normalize;

const USAGE: &str = "usage: normalize_page <url|file> [--render-anchors]";

#[tokio::main]
async fn main() -> Result<()> {
    let mut source = None;
    let mut render_anchor_tag_content = false;

    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--render-anchors" => render_anchor_tag_content = true,
            "-h" | "--help" => {
                println!("{}", USAGE);
                return Ok(());
            }
            _ => source = Some(arg),
        }
    }

    let source = source.context(USAGE)?;

    let raw = if validate_url(&source).is_ok() {
        let settings = Settings::default();
        let client = create_client(&settings.user_agent, Duration::from_secs(30))?;
        HttpFetcher::new(client, 1)
            .fetch(&source, FetchBackend::HtmlRequests)
            .await
            .with_context(|| format!("Failed to fetch {}", source))?
    } else {
        fs::read(&source).with_context(|| format!("Failed to read {}", source))?
    };

    let config = EffectiveConfig {
        render_anchor_tag_content,
        ..EffectiveConfig::default()
    };

    let text = normalize(&raw, &config);
    println!("{}", text);
    eprintln!("fingerprint: {}", text.fingerprint());

    Ok(())
}
