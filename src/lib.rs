//! rangefetch - size-capped HTTP fetching with parallel range downloads
//!
//! This library retrieves remote resources (chat images, mostly) over one
//! shared HTTP client, refuses bodies larger than a configured ceiling, and
//! decodes gzip bodies transparently. Large files can be downloaded by
//! several workers at once, each fetching its own byte range straight into
//! its own region of the destination file.
//!
//! # Features
//!
//! - **Size Ceiling**: Oversized responses are refused before any byte is read
//! - **Transparent Gzip**: Consumers only ever see decoded bytes
//! - **Range Downloads**: Parallel workers when the server answers `206`
//! - **Safe Fallback**: Servers that ignore ranges are read as one stream
//! - **Image Embedding**: Base64 and `data:` URL helpers for AI backends
//!
//! # Example
//!
//! ```no_run
//! use rangefetch::{Fetcher, Resource};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let fetcher = Fetcher::shared()?;
//!
//! let image = fetcher.fetch_image("https://example.com/cat.jpg").await?;
//! println!("{}", &image.to_data_url()[..32]);
//!
//! let resource = Resource::new("https://example.com/big.bin");
//! fetcher.fetch_to_file_parallel(&resource, "big.bin", 4).await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod decode;
mod download;
mod error;
mod image;
mod orchestrator;
mod partition;
mod types;

pub use client::Fetcher;
pub use decode::ResponseBody;
pub use error::FetchError;
pub use image::FetchedImage;
pub use partition::{partition, Block};
pub use types::{
    FetchOutcome, FetchedBytes, FetcherConfig, PartitionPolicy, Resource, DEFAULT_USER_AGENT,
    IMAGE_SIZE_LIMIT,
};
