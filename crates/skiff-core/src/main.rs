use std::collections::HashSet;
use std::path::PathBuf;

use clap::Parser;
use skiff_core::{Config, DownloadCenter, DownloadState};

/// Download files into the configured downloads directory.
#[derive(Parser, Debug)]
#[command(name = "skiff", version, about = "Download files safely")]
struct Args {
    /// JSON config file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// URLs to download
    #[arg(required = true)]
    urls: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    skiff_core::init_logging();

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let center = DownloadCenter::new(config)?;
    let mut events = center.subscribe();

    let mut waiting = HashSet::new();
    let mut failures = 0usize;
    for url in &args.urls {
        match center.download_url(url).await {
            Ok(id) => {
                waiting.insert(id);
            }
            Err(e) => {
                tracing::error!(url = %url, error = %e, "Could not start download");
                failures += 1;
            }
        }
    }

    while !waiting.is_empty() {
        let Some(event) = events.recv().await else {
            break;
        };
        if !waiting.remove(&event.id()) {
            continue;
        }

        let download = event.download;
        match (download.state(), download.stored_path()) {
            (DownloadState::Completed, Some(path)) => println!("{}", path.display()),
            _ => {
                failures += 1;
                eprintln!(
                    "{}: {}",
                    download.filename(),
                    download
                        .error()
                        .map(|e| e.message.as_str())
                        .unwrap_or("failed")
                );
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} download(s) failed", args.urls.len());
    }

    Ok(())
}
