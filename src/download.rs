//! Single-stream fetch path.

use crate::client::{check_size, Fetcher};
use crate::decode::ResponseBody;
use crate::error::FetchError;
use crate::types::{FetchOutcome, FetchedBytes, Resource};
use serde::de::DeserializeOwned;
use std::path::Path;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

impl Fetcher {
    /// Sends one GET and returns the decoded body stream.
    ///
    /// If a size ceiling is in force and the server declares a larger body,
    /// the response is closed without reading it and `OverSize` is returned.
    /// Non-2xx statuses are not treated as errors here; check
    /// [`ResponseBody::status`].
    pub async fn fetch_body(&self, resource: &Resource) -> Result<ResponseBody, FetchError> {
        let response = self.send(resource).await?;
        let limit = self.limit_for(resource);

        if let Err(e) = check_size(limit, response.content_length()) {
            warn!("Refusing {}: {}", resource.url(), e);
            return Err(e);
        }
        ResponseBody::new(response, limit).await
    }

    /// Fetches a resource into memory.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use rangefetch::{Fetcher, Resource};
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let fetched = Fetcher::shared()?
    ///     .fetch_bytes(&Resource::new("https://example.com/a.png").with_size_limit(1 << 20))
    ///     .await?;
    /// println!("{} bytes of {:?}", fetched.data.len(), fetched.content_type);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn fetch_bytes(&self, resource: &Resource) -> Result<FetchedBytes, FetchError> {
        let body = self.fetch_body(resource).await?;
        let status = body.status();
        let content_type = body.content_type().map(str::to_string);
        let data = body.bytes().await?;

        debug!("Fetched {} bytes from {}", data.len(), resource.url());
        Ok(FetchedBytes {
            status,
            data,
            content_type,
        })
    }

    /// Fetches a resource and parses it as JSON.
    ///
    /// Use `serde_json::Value` for an untyped document.
    pub async fn fetch_json<T: DeserializeOwned>(&self, resource: &Resource) -> Result<T, FetchError> {
        let body = self.fetch_body(resource).await?;
        let data = body.bytes().await?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Streams a resource into the file at `path`.
    ///
    /// The file is created if absent and written from offset 0; an existing
    /// file is not truncated first.
    pub async fn fetch_to_file(
        &self,
        resource: &Resource,
        path: impl AsRef<Path>,
    ) -> Result<FetchOutcome, FetchError> {
        let path = path.as_ref();
        let body = self.fetch_body(resource).await?;
        let bytes = self.write_body_to_file(body, path, false).await?;

        Ok(FetchOutcome::WrittenToFile {
            path: path.to_path_buf(),
            bytes,
        })
    }

    /// Drains `body` into `path`.
    ///
    /// With `truncate` the file is emptied first and the result holds exactly
    /// the body. On failure the file is removed again unless it existed
    /// before and was left untruncated.
    pub(crate) async fn write_body_to_file(
        &self,
        mut body: ResponseBody,
        path: &Path,
        truncate: bool,
    ) -> Result<u64, FetchError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let existed = !truncate && tokio::fs::try_exists(path).await.unwrap_or(false);

        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(truncate)
            .open(path)
            .await?;
        let mut writer = BufWriter::with_capacity(self.config().write_buffer_size, file);

        match self.copy_body(&mut body, &mut writer).await {
            Ok(written) => {
                debug!("Wrote {} bytes to {}", written, path.display());
                Ok(written)
            }
            Err(e) => {
                drop(writer);
                if !existed {
                    let _ = tokio::fs::remove_file(path).await;
                }
                Err(e)
            }
        }
    }

    async fn copy_body<W: AsyncWrite + Unpin>(
        &self,
        body: &mut ResponseBody,
        writer: &mut W,
    ) -> Result<u64, FetchError> {
        let mut written = 0u64;
        while let Some(chunk) = body.chunk().await? {
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
            self.report_progress(chunk.len() as u64);
        }
        writer.flush().await?;
        Ok(written)
    }
}
