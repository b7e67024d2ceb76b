use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine;
use futures::future::BoxFuture;
use tracing::{debug, trace};

use crate::error::LoadError;
use crate::image_ref::{Bitmap, Candidate, ImageHandle};
use crate::translator::Translator;

/// Whether the fetch should request CORS access to the pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossOrigin {
    Anonymous,
    Omitted,
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub default_name: Option<String>,
    pub cross_origin: CrossOrigin,
}

/// Low-level primitive turning a URL into a decoded image.
pub trait ImageFetcher: Send + Sync {
    fn fetch(
        &self,
        url: &str,
        request: &FetchRequest,
    ) -> BoxFuture<'static, Result<ImageHandle, LoadError>>;
}

/// Produces one settled outcome for any candidate shape.
#[derive(Clone)]
pub struct Loader {
    fetcher: Arc<dyn ImageFetcher>,
    translator: Translator,
}

impl Loader {
    pub fn new(fetcher: Arc<dyn ImageFetcher>, translator: Translator) -> Self {
        Self {
            fetcher,
            translator,
        }
    }

    pub async fn load(
        &self,
        candidate: Option<Candidate>,
        request: &FetchRequest,
    ) -> Result<ImageHandle, LoadError> {
        match candidate {
            Some(Candidate::Url(url)) if !url.is_empty() => {
                debug!(%url, "fetching image");
                self.fetcher.fetch(&url, request).await
            }
            Some(Candidate::Handle(handle)) => {
                if handle.name().is_none() {
                    if let Some(name) = &request.default_name {
                        handle.set_name(name.clone());
                    }
                }
                if !handle.is_complete() {
                    debug!(identity = %handle.identity(), "waiting for image handle readiness");
                }
                handle.wait_ready().await?;
                Ok(handle)
            }
            _ => Err(LoadError::InvalidImage(self.translator.t("invalidImageError"))),
        }
    }
}

/// Fetches local files, `file://` URLs and base64 `data:` URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsImageFetcher;

enum ImageLocation {
    File(PathBuf),
    Data(Vec<u8>),
}

impl ImageLocation {
    fn parse(url: &str) -> Result<Self, LoadError> {
        if let Some(rest) = url.strip_prefix("data:") {
            let (header, payload) = rest
                .split_once(',')
                .ok_or_else(|| LoadError::DataUrl("missing ',' separator".to_string()))?;
            if !header.ends_with(";base64") {
                return Err(LoadError::DataUrl(format!(
                    "only base64 payloads are supported, got '{header}'"
                )));
            }
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(payload.trim())
                .map_err(|err| LoadError::DataUrl(err.to_string()))?;
            return Ok(Self::Data(bytes));
        }
        if let Some(path) = url.strip_prefix("file://") {
            return Ok(Self::File(PathBuf::from(path)));
        }
        if url.contains("://") {
            return Err(LoadError::Unsupported(url.to_string()));
        }
        Ok(Self::File(PathBuf::from(url)))
    }

    fn file_stem(&self) -> Option<String> {
        match self {
            Self::File(path) => path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned()),
            Self::Data(_) => None,
        }
    }

    fn read(self) -> Result<Vec<u8>, LoadError> {
        match self {
            Self::File(path) => Ok(std::fs::read(path)?),
            Self::Data(bytes) => Ok(bytes),
        }
    }
}

impl ImageFetcher for FsImageFetcher {
    fn fetch(
        &self,
        url: &str,
        request: &FetchRequest,
    ) -> BoxFuture<'static, Result<ImageHandle, LoadError>> {
        let url = url.to_string();
        let request = request.clone();
        Box::pin(async move {
            // Local sources have no CORS semantics; the policy only matters to
            // network-backed fetchers.
            trace!(cross_origin = ?request.cross_origin, %url, "fs fetch");
            let location = ImageLocation::parse(&url)?;
            let name = location.file_stem().or(request.default_name);
            let rgba = tokio::task::spawn_blocking(move || {
                let bytes = location.read()?;
                decode_rgba8_apply_exif(&bytes)
            })
            .await??;
            let (width, height) = rgba.dimensions();
            debug!(%url, width, height, "decoded image");
            let handle = ImageHandle::ready(
                Some(url),
                Bitmap {
                    width,
                    height,
                    pixels: rgba.into_raw(),
                },
            );
            if let Some(name) = name {
                handle.set_name(name);
            }
            Ok::<_, LoadError>(handle)
        })
    }
}

// Decodes to RGBA8 and applies EXIF orientation when present; missing
// metadata leaves the orientation untouched.
fn decode_rgba8_apply_exif(bytes: &[u8]) -> Result<image::RgbaImage, LoadError> {
    let img = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .decode()?;
    let mut img = img.to_rgba8();

    let orientation: u16 = read_orientation(bytes).unwrap_or(1);
    match orientation {
        2 => img = image::imageops::flip_horizontal(&img),
        3 => img = image::imageops::rotate180(&img),
        4 => img = image::imageops::flip_vertical(&img),
        5 => {
            // transpose
            img = image::imageops::rotate90(&img);
            img = image::imageops::flip_horizontal(&img);
        }
        6 => img = image::imageops::rotate90(&img),
        7 => {
            // transverse
            img = image::imageops::rotate270(&img);
            img = image::imageops::flip_horizontal(&img);
        }
        8 => img = image::imageops::rotate270(&img),
        _ => {}
    }

    Ok(img)
}

fn read_orientation(bytes: &[u8]) -> Option<u16> {
    let exif = exif::Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let value = field.value.get_uint(0)? as u16;
    trace!(orientation = value, "exif orientation");
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    // JPEG 2x1 with EXIF orientation 6 (rotate 90 CW), base64 encoded
    const ORIENT6_JPEG: &str = concat!(
        "/9j/4AAQSkZJRgABAQAAAQABAAD/4QAiRXhpZgAATU0AKgAAAAgAAQESAAMAAAABAAYAAAAAAAD/2wBDAAgGBgcGBQgHBwcJCQgKDBQNDAsLDBkSEw8UHRofHh0aHBwgJC4nICIsIxwcKDcpLDAxNDQ0Hyc5PTgyPC4zNDL/",
        "2wBDAQkJCQwLDBgNDRgyIRwhMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjL/wAARCAABAAIDASIAAhEBAxEB/8QAHwAAAQUBAQEBAQEAAAAAAAAAAAECAwQFBgcICQoL/8QAtRAAAgEDAwIEAwUFBAQAAAF9AQIDAAQRBRIhMUEGE1FhByJxFDKBkaEII0KxwRVS0fAkM2JyggkKFhcYGRolJicoKSo0NTY3ODk6Q0RFRkdISUpTVFVWV1hZWmNkZWZnaGlqc3R1dnd4eXqDhIWGh4iJipKTlJWWl5iZmqKjpKWmp6ipqrKztLW2t7i5usLDxMXGx8jJytLT1NXW19jZ2uHi4+Tl5ufo6erx8vP09fb3+Pn6/8QAHwEAAwEBAQEBAQEBAQAAAAAAAAECAwQFBgcICQoL/8QAtREAAgECBAQDBAcFBAQAAQJ3AAECAxEEBSExBhJBUQdhcRMiMoEIFEKRobHBCSMzUvAVYnLRChYkNOEl8RcYGRomJygpKjU2Nzg5OkNERUZHSElKU1RVVldYWVpjZGVmZ2hpanN0dXZ3eHl6goOEhYaHiImKkpOUlZaXmJmaoqOkpaanqKmqsrO0tba3uLm6wsPExcbHyMnK0tPU1dbX2Nna4uPk5ebn6Onq8vP09fb3+Pn6/9oADAMBAAIRAxEAPwDi6KKK+ZP3E//Z"
    );

    fn request() -> FetchRequest {
        FetchRequest {
            default_name: Some("untitled".to_string()),
            cross_origin: CrossOrigin::Anonymous,
        }
    }

    fn loader() -> Loader {
        Loader::new(Arc::new(FsImageFetcher), Translator::new(&HashMap::new()))
    }

    #[test]
    fn applies_orientation_six() {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(ORIENT6_JPEG)
            .unwrap();
        let img = decode_rgba8_apply_exif(&bytes).unwrap();
        assert_eq!(img.dimensions(), (1, 2));
    }

    #[tokio::test]
    async fn data_urls_decode_without_touching_disk() {
        let url = format!("data:image/jpeg;base64,{ORIENT6_JPEG}");
        let handle = FsImageFetcher.fetch(&url, &request()).await.unwrap();
        assert_eq!(handle.size().map(|s| (s.width, s.height)), Some((1, 2)));
        assert_eq!(handle.name().as_deref(), Some("untitled"));
        assert_eq!(handle.src(), Some(url.as_str()));
    }

    #[tokio::test]
    async fn files_are_named_after_their_stem() {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(ORIENT6_JPEG)
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("holiday.jpg");
        std::fs::write(&path, &bytes).unwrap();
        let url = format!("file://{}", path.display());
        let handle = FsImageFetcher.fetch(&url, &request()).await.unwrap();
        assert_eq!(handle.name().as_deref(), Some("holiday"));
    }

    #[tokio::test]
    async fn remote_urls_are_unsupported() {
        let err = FsImageFetcher
            .fetch("https://example.com/a.png", &request())
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Unsupported(_)));
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let err = FsImageFetcher
            .fetch("/definitely/not/here.png", &request())
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Io(_)));
    }

    #[tokio::test]
    async fn invalid_candidates_use_translated_message() {
        let err = loader()
            .load(Some(Candidate::Invalid(serde_json::json!(42))), &request())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid image provided.");
        let err = loader().load(None, &request()).await.unwrap_err();
        assert!(matches!(err, LoadError::InvalidImage(_)));
    }

    #[tokio::test]
    async fn unnamed_handles_receive_the_default_name() {
        let (handle, completer) = ImageHandle::pending(None);
        let loading = {
            let handle = handle.clone();
            tokio::spawn(async move { loader().load(Some(handle.into()), &request()).await })
        };
        completer.complete(Bitmap {
            width: 1,
            height: 1,
            pixels: vec![0; 4],
        });
        let loaded = loading.await.unwrap().unwrap();
        assert!(loaded.ptr_eq(&handle));
        assert_eq!(loaded.name().as_deref(), Some("untitled"));
    }
}
