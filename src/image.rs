//! Fetching chat images for embedding in outbound requests.

use crate::client::Fetcher;
use crate::error::FetchError;
use crate::types::{Resource, IMAGE_SIZE_LIMIT};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use tracing::debug;

/// MIME type assumed when the server does not name an image type.
const FALLBACK_MIME: &str = "image/jpeg";

/// An image body ready to be inlined into an AI-backend request.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    /// Raw image bytes.
    pub data: Bytes,
    /// The response `Content-Type`, if any.
    pub content_type: Option<String>,
}

impl FetchedImage {
    /// The image MIME type, without parameters.
    ///
    /// Falls back to `image/jpeg` when the server sent none or a non-image
    /// type (some CDNs answer `application/octet-stream`).
    pub fn mime_type(&self) -> &str {
        self.content_type
            .as_deref()
            .map(|ct| ct.split(';').next().unwrap_or(ct).trim())
            .filter(|ct| ct.starts_with("image/"))
            .unwrap_or(FALLBACK_MIME)
    }

    /// Standard base64 of the image bytes.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }

    /// A `data:` URL embedding the image.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type(), self.to_base64())
    }
}

impl Fetcher {
    /// Fetches an image under the 30 MiB embedding ceiling.
    ///
    /// Unlike [`Fetcher::fetch_bytes`], a non-2xx status is an error: an
    /// error page is never worth embedding.
    pub async fn fetch_image(&self, url: &str) -> Result<FetchedImage, FetchError> {
        let resource = Resource::new(url).with_size_limit(IMAGE_SIZE_LIMIT);
        let fetched = self.fetch_bytes(&resource).await?;
        if !fetched.status.is_success() {
            return Err(FetchError::ServerError(fetched.status));
        }

        debug!(
            "Fetched image {} ({} bytes, {:?})",
            url,
            fetched.data.len(),
            fetched.content_type
        );
        Ok(FetchedImage {
            data: fetched.data,
            content_type: fetched.content_type,
        })
    }
}
