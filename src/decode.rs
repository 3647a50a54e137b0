//! Response bodies with transparent gzip decoding.

use crate::error::FetchError;
use bytes::Bytes;
use flate2::write::GzDecoder;
use reqwest::header::{HeaderMap, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{Response, StatusCode};
use std::io::Write;

/// Returns `true` if the headers declare a gzip content encoding.
pub(crate) fn is_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("gzip"))
        .unwrap_or(false)
}

/// A response body that yields decoded bytes.
///
/// When the response is gzip-encoded the raw chunks are fed through a
/// streaming decoder; consumers only ever see the plain payload. The body
/// owns the network response, so dropping it releases both the decoder and
/// the connection.
///
/// A size ceiling, if given, is also enforced against the decoded bytes as
/// they arrive, catching bodies that declared no length or a false one.
pub struct ResponseBody {
    response: Response,
    status: StatusCode,
    content_type: Option<String>,
    declared: Option<u64>,
    decoder: Option<GzDecoder<Vec<u8>>>,
    /// Any encoded byte has reached the decoder.
    fed: bool,
    finished: bool,
    limit: Option<u64>,
    delivered: u64,
}

impl ResponseBody {
    /// Wraps `response`, setting up decompression when needed.
    ///
    /// For gzip bodies the first raw chunk is decoded eagerly so that a
    /// malformed header fails here. On failure the response is dropped
    /// before the error is returned.
    pub(crate) async fn new(response: Response, limit: Option<u64>) -> Result<Self, FetchError> {
        let headers = response.headers();
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let decoder = is_gzip(headers).then(|| GzDecoder::new(Vec::new()));

        let mut body = Self {
            status: response.status(),
            declared: response.content_length(),
            response,
            content_type,
            decoder,
            fed: false,
            finished: false,
            limit,
            delivered: 0,
        };
        if body.decoder.is_some() {
            body.feed().await?;
        }
        Ok(body)
    }

    /// The response status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The `Content-Type` of the decoded payload.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// The length the server declared on the wire, if any.
    pub fn declared_length(&self) -> Option<u64> {
        self.declared
    }

    /// Whether the body is being decompressed.
    pub fn is_decoding(&self) -> bool {
        self.decoder.is_some()
    }

    /// Returns the next chunk of decoded bytes, or `None` at end of body.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, FetchError> {
        let next = if self.decoder.is_some() {
            self.next_decoded().await?
        } else {
            self.response.chunk().await?
        };

        if let Some(ref chunk) = next {
            self.delivered += chunk.len() as u64;
            if let Some(limit) = self.limit {
                if self.delivered > limit {
                    return Err(FetchError::OverSize {
                        limit,
                        declared: self.declared,
                    });
                }
            }
        }
        Ok(next)
    }

    /// Reads the remaining body into memory.
    pub async fn bytes(mut self) -> Result<Bytes, FetchError> {
        let mut buf = Vec::with_capacity(self.declared.unwrap_or(0).min(1 << 20) as usize);
        while let Some(chunk) = self.chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(Bytes::from(buf))
    }

    async fn next_decoded(&mut self) -> Result<Option<Bytes>, FetchError> {
        loop {
            if let Some(out) = self.take_decoded() {
                return Ok(Some(out));
            }
            if self.finished {
                return Ok(None);
            }
            self.feed().await?;
        }
    }

    /// Pushes one raw chunk (or end of stream) into the decoder.
    async fn feed(&mut self) -> Result<(), FetchError> {
        let raw = self.response.chunk().await?;
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(());
        };
        match raw {
            Some(raw) => {
                self.fed |= !raw.is_empty();
                decoder
                    .write_all(&raw)
                    .map_err(FetchError::DecompressError)?;
            }
            // An empty body under `Content-Encoding: gzip` (204, HEAD-like
            // replies) decodes to nothing rather than a truncated stream.
            None if !self.fed => self.finished = true,
            None => {
                decoder.try_finish().map_err(FetchError::DecompressError)?;
                self.finished = true;
            }
        }
        Ok(())
    }

    fn take_decoded(&mut self) -> Option<Bytes> {
        let out = self.decoder.as_mut()?.get_mut();
        if out.is_empty() {
            None
        } else {
            Some(Bytes::from(std::mem::take(out)))
        }
    }
}
