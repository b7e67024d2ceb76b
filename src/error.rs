use thiserror::Error;

/// Failures produced while turning a candidate into a usable image.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The candidate is neither a URL string nor an image handle.
    #[error("{0}")]
    InvalidImage(String),

    /// The fetcher does not know how to retrieve this URL.
    #[error("unsupported image url: {0}")]
    Unsupported(String),

    /// A `data:` URL was malformed or not base64 encoded.
    #[error("malformed data url: {0}")]
    DataUrl(String),

    /// A pending handle was abandoned before it became ready.
    #[error("image {0} never finished loading")]
    NeverReady(String),

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The bytes could not be decoded as an image.
    #[error(transparent)]
    Decode(#[from] image::ImageError),

    /// Background decode task panicked or was cancelled.
    #[error("decode task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
