use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::{ApiError, ApiResult};
use crate::regions::Region;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct DownloadStats {
    pub downloaded: usize,
    pub existing: usize,
    pub failed: usize,
}

impl DownloadStats {
    pub fn print(&self) {
        println!(
            "Downloaded {} PDFs ({} already present, {} failed).",
            self.downloaded, self.existing, self.failed
        );
    }
}

pub fn pdf_path(dir: &Path, region: &Region) -> PathBuf {
    dir.join(format!("{}.pdf", region.file_stem()))
}

async fn fetch_pdf(client: &Client, url: &str) -> ApiResult<Vec<u8>> {
    let resp = client.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(ApiError::Status {
            status: status.as_u16(),
            body: String::new(),
        });
    }
    Ok(resp.bytes().await?.to_vec())
}

/// Fetch each region's PDF into `dir`. Failures are logged and skipped;
/// only filesystem errors abort the run.
pub async fn run_download(
    regions: &[Region],
    dir: &Path,
    delay: Duration,
    skip_existing: bool,
) -> Result<DownloadStats> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let client = Client::new();
    let pb = ProgressBar::new(regions.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );
    let mut stats = DownloadStats::default();
    let mut first_request = true;

    for region in regions {
        pb.inc(1);
        let path = pdf_path(dir, region);
        if skip_existing && path.exists() {
            stats.existing += 1;
            continue;
        }

        if !first_request {
            tokio::time::sleep(delay).await;
        }
        first_request = false;

        let url = region.pdf_url();
        pb.set_message(region.file_stem());
        debug!("Downloading {}", url);
        match fetch_pdf(&client, &url).await {
            Ok(bytes) => {
                std::fs::write(&path, &bytes)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                debug!("Saved {} ({} bytes)", path.display(), bytes.len());
                stats.downloaded += 1;
            }
            Err(e) => {
                warn!("Skipping {}: {}", region.file_stem(), e);
                stats.failed += 1;
            }
        }
    }

    pb.finish_and_clear();
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_named_after_region() {
        let r = Region::from_stem("montreal_06");
        assert_eq!(pdf_path(Path::new("data/pdfs"), &r), PathBuf::from("data/pdfs/montreal_06.pdf"));
    }

    #[tokio::test]
    async fn existing_files_are_not_fetched_again() {
        let dir = tempfile::tempdir().unwrap();
        let regions = vec![Region::from_stem("laval_13"), Region::from_stem("estrie_05")];
        for r in &regions {
            std::fs::write(pdf_path(dir.path(), r), b"%PDF-1.4").unwrap();
        }

        let stats = run_download(&regions, dir.path(), Duration::ZERO, true).await.unwrap();
        assert_eq!(stats, DownloadStats { downloaded: 0, existing: 2, failed: 0 });
    }
}
