//! Parallel range downloads into a single file.

use crate::client::{check_size, Fetcher};
use crate::decode::{is_gzip, ResponseBody};
use crate::error::FetchError;
use crate::partition::{partition, Block};
use crate::types::{FetchOutcome, Resource};
use reqwest::header::{HeaderMap, CONTENT_RANGE};
use reqwest::StatusCode;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// What the range probe decided.
#[derive(Debug)]
pub(crate) enum Probe {
    /// The probe response itself was written to the destination.
    HandledDirectly { bytes: u64 },
    /// The server honours ranges and the resource is worth splitting.
    Partitioned {
        content_length: u64,
        blocks: Vec<Block>,
    },
}

impl Fetcher {
    /// Downloads a resource into `path` using up to `workers` parallel range
    /// requests.
    ///
    /// The resource is first probed with `Range: bytes=0-`:
    ///
    /// 1. A `200` means the server ignores ranges; that response is written
    ///    as-is and nothing else is requested.
    /// 2. A `206` for a small, gzip-encoded or unknown-length resource is
    ///    likewise written directly. In both cases an existing file is
    ///    truncated first.
    /// 3. Otherwise the resource is split into blocks and every block is
    ///    fetched by its own task writing into its own region of the file.
    ///
    /// All workers are awaited before returning. If any of them fails, the
    /// partially written file is removed and the failure of the lowest
    /// block index is returned. Dropping the returned future aborts every
    /// in-flight worker and removes the pre-sized file as well; a file
    /// written directly from the probe response is left as far as it got.
    ///
    /// With fewer than two workers this is [`Fetcher::fetch_to_file`].
    ///
    /// # Example
    ///
    /// ```no_run
    /// use rangefetch::{Fetcher, FetcherConfig, Resource};
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let fetcher = Fetcher::new(FetcherConfig::default())?;
    /// let resource = Resource::new("https://example.com/big.bin").with_size_limit(30 << 20);
    /// fetcher.fetch_to_file_parallel(&resource, "big.bin", 4).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn fetch_to_file_parallel(
        &self,
        resource: &Resource,
        path: impl AsRef<Path>,
        workers: usize,
    ) -> Result<FetchOutcome, FetchError> {
        let path = path.as_ref();
        if workers < 2 {
            return self.fetch_to_file(resource, path).await;
        }

        let bytes = match self.probe(resource, path, workers).await? {
            Probe::HandledDirectly { bytes } => bytes,
            Probe::Partitioned {
                content_length,
                blocks,
            } => {
                self.dispatch(resource, path, content_length, blocks).await?;
                content_length
            }
        };

        Ok(FetchOutcome::WrittenToFile {
            path: path.to_path_buf(),
            bytes,
        })
    }

    /// [`Fetcher::fetch_to_file_parallel`] with the configured
    /// [`FetcherConfig::worker_count`](crate::FetcherConfig::worker_count).
    pub async fn download(
        &self,
        resource: &Resource,
        path: impl AsRef<Path>,
    ) -> Result<FetchOutcome, FetchError> {
        self.fetch_to_file_parallel(resource, path, self.config().worker_count)
            .await
    }

    async fn probe(&self, resource: &Resource, path: &Path, workers: usize) -> Result<Probe, FetchError> {
        let response = self.send(&resource.with_range("bytes=0-")?).await?;
        let status = response.status();
        let limit = self.limit_for(resource);

        if !status.is_success() {
            warn!("Range probe for {} failed: HTTP {}", resource.url(), status);
            return Err(FetchError::ServerError(status));
        }

        match status {
            StatusCode::OK => {
                info!(
                    "{} does not support ranges, downloading as a single stream",
                    resource.url()
                );
                check_size(limit, response.content_length())?;
                let body = ResponseBody::new(response, limit).await?;
                let bytes = self.write_body_to_file(body, path, true).await?;
                Ok(Probe::HandledDirectly { bytes })
            }
            StatusCode::PARTIAL_CONTENT => {
                let total = total_length(response.headers(), response.content_length());
                check_size(limit, total)?;

                // Ranges over a gzip body address compressed bytes; those
                // must go through the decoder in one piece.
                let splittable = total.filter(|_| !is_gzip(response.headers()));
                if let Some(content_length) = splittable {
                    let blocks = partition(content_length, workers, &self.config().partition);
                    if blocks.len() > 1 {
                        debug!(
                            "Split {} ({} bytes) into {} blocks",
                            resource.url(),
                            content_length,
                            blocks.len()
                        );
                        return Ok(Probe::Partitioned {
                            content_length,
                            blocks,
                        });
                    }
                }

                debug!("Writing probe response for {} directly", resource.url());
                let body = ResponseBody::new(response, limit).await?;
                let bytes = self.write_body_to_file(body, path, true).await?;
                Ok(Probe::HandledDirectly { bytes })
            }
            other => {
                warn!("Range probe for {} returned unexpected {}", resource.url(), other);
                Err(FetchError::ServerError(other))
            }
        }
    }

    async fn dispatch(
        &self,
        resource: &Resource,
        path: &Path,
        content_length: u64,
        blocks: Vec<Block>,
    ) -> Result<(), FetchError> {
        prepare_destination(path, content_length).await?;
        let mut partial = PartialFile::new(path);
        info!(
            "Downloading {} bytes from {} with {} workers",
            content_length,
            resource.url(),
            blocks.len()
        );

        let mut workers = JoinSet::new();
        for block in blocks {
            let fetcher = self.clone();
            let resource = resource.clone();
            let path = path.to_path_buf();
            workers.spawn(async move {
                let index = block.index;
                (index, fetcher.download_block(&resource, &path, block).await)
            });
        }

        // Lowest failing block index wins, independent of completion order.
        let mut failure: Option<(usize, FetchError)> = None;
        while let Some(joined) = workers.join_next().await {
            let (index, e) = match joined {
                Ok((_, Ok(block))) => {
                    debug!("Block {} done ({} bytes)", block.index, block.downloaded);
                    continue;
                }
                Ok((index, Err(e))) => (index, e),
                Err(e) => (usize::MAX, FetchError::WorkerFailed(e.to_string())),
            };
            error!("Block {} of {} failed: {}", index, resource.url(), e);
            if failure.as_ref().map_or(true, |(first, _)| index < *first) {
                failure = Some((index, e));
            }
        }

        if let Some((_, e)) = failure {
            return Err(e);
        }
        partial.keep();
        Ok(())
    }

    async fn download_block(
        &self,
        resource: &Resource,
        path: &Path,
        mut block: Block,
    ) -> Result<Block, FetchError> {
        let mut file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .await?;
        file.seek(SeekFrom::Start(block.begin)).await?;
        let mut writer = BufWriter::with_capacity(self.config().write_buffer_size, file);

        let mut response = self
            .send(&resource.with_range(&block.range_header())?)
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::ServerError(status));
        }
        let aligned = if status == StatusCode::PARTIAL_CONTENT {
            range_start(response.headers()).map_or(true, |start| start == block.begin)
        } else {
            block.begin == 0
        };
        // A 206 for some other range would land at the wrong offset.
        if !aligned {
            return Err(FetchError::RangeIgnored { index: block.index });
        }

        while block.remaining() > 0 {
            let Some(chunk) = response.chunk().await? else {
                break;
            };
            // Never write past the block end, whatever the server sends.
            let take = (chunk.len() as u64).min(block.remaining()) as usize;
            writer.write_all(&chunk[..take]).await?;
            block.downloaded += take as u64;
            self.report_progress(take as u64);
        }
        writer.flush().await?;

        if block.remaining() > 0 {
            return Err(FetchError::ShortBlock {
                index: block.index,
                expected: block.len(),
                received: block.downloaded,
            });
        }
        Ok(block)
    }
}

/// Creates (or truncates) the destination and sizes it for every block.
async fn prepare_destination(path: &Path, content_length: u64) -> Result<(), FetchError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .await?;
    file.set_len(content_length).await?;
    Ok(())
}

/// A pre-sized destination that is removed unless the download completes.
///
/// Declared before the worker set in `dispatch`, so on drop the workers are
/// aborted first.
struct PartialFile {
    path: PathBuf,
    keep: bool,
}

impl PartialFile {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            keep: false,
        }
    }

    fn keep(&mut self) {
        self.keep = true;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.keep {
            debug!("Removing partial download {}", self.path.display());
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// First byte position of a `Content-Range: bytes a-b/total` header.
fn range_start(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().strip_prefix("bytes"))
        .and_then(|v| v.trim_start().split_once('-'))
        .and_then(|(start, _)| start.trim().parse().ok())
}

/// Total resource length of a 206 response: the `Content-Range` total when
/// known, else the declared `Content-Length`.
fn total_length(headers: &HeaderMap, content_length: Option<u64>) -> Option<u64> {
    headers
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.rsplit_once('/'))
        .and_then(|(_, total)| total.trim().parse().ok())
        .or(content_length)
}
