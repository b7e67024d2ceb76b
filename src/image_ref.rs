use std::fmt;
use std::sync::Arc;

use design_model::ImageSize;
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;
use tokio::sync::watch;

use crate::error::LoadError;

/// Decoded RGBA8 pixels.
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Bitmap {
    pub fn size(&self) -> ImageSize {
        ImageSize {
            width: self.width,
            height: self.height,
        }
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

struct HandleShared {
    src: Option<String>,
    name: Mutex<Option<String>>,
    bitmap: watch::Receiver<Option<Arc<Bitmap>>>,
}

/// A resolved (or resolving) image. Clones share the same underlying record,
/// so identity is by reference, not by pixel content.
#[derive(Clone)]
pub struct ImageHandle {
    shared: Arc<HandleShared>,
}

/// Fulfils a handle created with [`ImageHandle::pending`]. Dropping it
/// without calling [`complete`](Self::complete) fails every waiter.
pub struct ImageCompleter {
    tx: watch::Sender<Option<Arc<Bitmap>>>,
}

impl ImageCompleter {
    pub fn complete(self, bitmap: Bitmap) {
        self.tx.send_replace(Some(Arc::new(bitmap)));
    }
}

impl ImageHandle {
    pub fn ready(src: Option<String>, bitmap: Bitmap) -> Self {
        let (_tx, rx) = watch::channel(Some(Arc::new(bitmap)));
        Self::from_parts(src, rx)
    }

    pub fn pending(src: Option<String>) -> (Self, ImageCompleter) {
        let (tx, rx) = watch::channel(None);
        (Self::from_parts(src, rx), ImageCompleter { tx })
    }

    fn from_parts(src: Option<String>, bitmap: watch::Receiver<Option<Arc<Bitmap>>>) -> Self {
        Self {
            shared: Arc::new(HandleShared {
                src,
                name: Mutex::new(None),
                bitmap,
            }),
        }
    }

    pub fn with_name(self, name: impl Into<String>) -> Self {
        self.set_name(name);
        self
    }

    pub fn src(&self) -> Option<&str> {
        self.shared.src.as_deref()
    }

    pub fn name(&self) -> Option<String> {
        self.shared.name.lock().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.shared.name.lock() = Some(name.into());
    }

    pub fn is_complete(&self) -> bool {
        self.shared.bitmap.borrow().is_some()
    }

    pub fn bitmap(&self) -> Option<Arc<Bitmap>> {
        self.shared.bitmap.borrow().clone()
    }

    pub fn size(&self) -> Option<ImageSize> {
        self.shared.bitmap.borrow().as_ref().map(|b| b.size())
    }

    /// Waits for the one-shot readiness signal. Returns immediately for
    /// handles that are already complete.
    pub async fn wait_ready(&self) -> Result<Arc<Bitmap>, LoadError> {
        if let Some(bitmap) = self.bitmap() {
            return Ok(bitmap);
        }
        let mut rx = self.shared.bitmap.clone();
        let ready = rx.wait_for(Option::is_some).await;
        match ready {
            Ok(value) => (*value).clone().ok_or_else(|| self.never_ready()),
            Err(_) => Err(self.never_ready()),
        }
    }

    fn never_ready(&self) -> LoadError {
        LoadError::NeverReady(self.identity().to_string())
    }

    pub fn identity(&self) -> ImageIdentity {
        match self.src() {
            Some(src) => ImageIdentity::Url(src.to_string()),
            None => ImageIdentity::Handle(Arc::as_ptr(&self.shared) as usize),
        }
    }

    pub fn ptr_eq(&self, other: &ImageHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl fmt::Debug for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageHandle")
            .field("src", &self.shared.src)
            .field("name", &self.name())
            .field("complete", &self.is_complete())
            .finish()
    }
}

/// Dedup identity of an image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImageIdentity {
    Url(String),
    Handle(usize),
    Opaque(String),
}

impl fmt::Display for ImageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageIdentity::Url(url) => f.write_str(url),
            ImageIdentity::Handle(addr) => write!(f, "<handle {addr:#x}>"),
            ImageIdentity::Opaque(raw) => write!(f, "<invalid {raw}>"),
        }
    }
}

/// A value proposed as the next active image.
#[derive(Debug, Clone)]
pub enum Candidate {
    Url(String),
    Handle(ImageHandle),
    Invalid(JsonValue),
}

impl Candidate {
    pub fn is_blank(&self) -> bool {
        self.identity().is_none()
    }
}

impl From<&str> for Candidate {
    fn from(url: &str) -> Self {
        Candidate::Url(url.to_string())
    }
}

impl From<String> for Candidate {
    fn from(url: String) -> Self {
        Candidate::Url(url)
    }
}

impl From<ImageHandle> for Candidate {
    fn from(handle: ImageHandle) -> Self {
        Candidate::Handle(handle)
    }
}

impl<'de> Deserialize<'de> for Candidate {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawCandidate {
            Url(String),
            Other(JsonValue),
        }

        Ok(match RawCandidate::deserialize(deserializer)? {
            RawCandidate::Url(url) => Candidate::Url(url),
            RawCandidate::Other(value) => Candidate::Invalid(value),
        })
    }
}

/// Anything that can be compared by image identity.
pub trait ImageRef {
    /// `None` for empty references (blank URL, `null`).
    fn identity(&self) -> Option<ImageIdentity>;
}

impl ImageRef for Candidate {
    fn identity(&self) -> Option<ImageIdentity> {
        match self {
            Candidate::Url(url) if url.is_empty() => None,
            Candidate::Url(url) => Some(ImageIdentity::Url(url.clone())),
            Candidate::Handle(handle) => Some(handle.identity()),
            Candidate::Invalid(JsonValue::Null) => None,
            Candidate::Invalid(value) => Some(ImageIdentity::Opaque(value.to_string())),
        }
    }
}

impl ImageRef for ImageHandle {
    fn identity(&self) -> Option<ImageIdentity> {
        Some(ImageHandle::identity(self))
    }
}

impl ImageRef for ImageIdentity {
    fn identity(&self) -> Option<ImageIdentity> {
        Some(self.clone())
    }
}

impl ImageRef for str {
    fn identity(&self) -> Option<ImageIdentity> {
        (!self.is_empty()).then(|| ImageIdentity::Url(self.to_string()))
    }
}

/// True when both references denote the same logical image, or both are absent.
pub fn same_image<A, B>(a: Option<&A>, b: Option<&B>) -> bool
where
    A: ImageRef + ?Sized,
    B: ImageRef + ?Sized,
{
    a.and_then(|a| ImageRef::identity(a)) == b.and_then(|b| ImageRef::identity(b))
}
