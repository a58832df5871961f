//! Frame sources.
//!
//! A frame source turns one still image into the bytes the encoder expects
//! on its input: packed RGB24 pixels for raw video input, or the untouched
//! JPEG file for MJPEG input.

use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// List of image extensions accepted as frames.
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif", "webp"];

/// JPEG start-of-image marker.
const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// Pixel layout written to the encoder's stdin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    /// Packed 8-bit RGB, `width * height * 3` bytes per frame.
    #[default]
    Rgb24,
    /// One complete JPEG image per frame.
    Mjpeg,
}

impl InputFormat {
    /// Whether `path` can be used as a frame in this format.
    pub fn accepts(&self, path: &Path) -> bool {
        match self {
            Self::Rgb24 => is_image_file(path),
            Self::Mjpeg => has_extension(path, &["jpg", "jpeg"]),
        }
    }
}

impl std::fmt::Display for InputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rgb24 => write!(f, "rgb24"),
            Self::Mjpeg => write!(f, "mjpeg"),
        }
    }
}

/// Options shared by every source scanned from a directory.
#[derive(Debug, Clone)]
pub struct SourceOptions {
    pub format: InputFormat,
    pub width: u32,
    pub height: u32,
    /// Keep decoded bytes after the first load.
    pub cache: bool,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            format: InputFormat::Rgb24,
            width: 1280,
            height: 720,
            cache: true,
        }
    }
}

impl SourceOptions {
    /// Bytes per frame for raw input, `None` for MJPEG.
    pub fn frame_size(&self) -> Option<usize> {
        match self.format {
            InputFormat::Rgb24 => Some(self.width as usize * self.height as usize * 3),
            InputFormat::Mjpeg => None,
        }
    }
}

/// Something that can produce the bytes of one frame.
#[async_trait]
pub trait FrameSource: Send {
    /// Stable identifier reported alongside the frame.
    fn id(&self) -> &str;

    /// Load the frame bytes.
    ///
    /// Implementations that touch the disk or decode must keep that work
    /// off the async runtime.
    async fn load(&mut self) -> Result<Bytes>;
}

/// A still image on disk.
#[derive(Debug, Clone)]
pub struct ImageFrameSource {
    id: String,
    path: PathBuf,
    options: SourceOptions,
    cached: Option<Bytes>,
}

impl ImageFrameSource {
    /// Create a source for the image at `path`, identified by its file name.
    pub fn new(path: impl Into<PathBuf>, options: SourceOptions) -> Self {
        let path = path.into();
        let id = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());

        Self {
            id,
            path,
            options,
            cached: None,
        }
    }
}

/// Read and convert one image file. Blocking.
fn decode(id: &str, path: &Path, options: &SourceOptions) -> Result<Bytes> {
    match options.format {
        InputFormat::Mjpeg => {
            let data = std::fs::read(path).map_err(|e| Error::load_failed(id, e.to_string()))?;
            if !data.starts_with(&JPEG_SOI) {
                return Err(Error::load_failed(id, "not a JPEG image"));
            }
            Ok(Bytes::from(data))
        }
        InputFormat::Rgb24 => {
            let img = image::open(path)
                .map_err(|e| Error::load_failed(id, e.to_string()))?
                .to_rgb8();

            let (width, height) = (options.width, options.height);
            let img = if img.dimensions() != (width, height) {
                tracing::debug!(
                    frame = %id,
                    from = ?img.dimensions(),
                    to = ?(width, height),
                    "Resizing frame"
                );
                image::imageops::resize(&img, width, height, FilterType::Triangle)
            } else {
                img
            };

            Ok(Bytes::from(img.into_raw()))
        }
    }
}

#[async_trait]
impl FrameSource for ImageFrameSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn load(&mut self) -> Result<Bytes> {
        if let Some(ref data) = self.cached {
            return Ok(data.clone());
        }

        let id = self.id.clone();
        let path = self.path.clone();
        let options = self.options.clone();
        let data = tokio::task::spawn_blocking(move || decode(&id, &path, &options))
            .await
            .map_err(|e| Error::load_failed(&self.id, e.to_string()))??;
        if self.options.cache {
            self.cached = Some(data.clone());
        }
        Ok(data)
    }
}

/// A frame held in memory, used for generated patterns and tests.
#[derive(Debug, Clone)]
pub struct MemoryFrameSource {
    id: String,
    data: Bytes,
}

impl MemoryFrameSource {
    pub fn new(id: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            data: data.into(),
        }
    }
}

#[async_trait]
impl FrameSource for MemoryFrameSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn load(&mut self) -> Result<Bytes> {
        Ok(self.data.clone())
    }
}

/// List the frames in `dir`, sorted by file name.
///
/// Only files with an image extension accepted by `options.format` are
/// included. The directory is read once; later changes are not picked up.
///
/// # Errors
///
/// Fails if the directory cannot be read or contains no usable images.
pub fn scan_frames_dir(
    dir: impl AsRef<Path>,
    options: &SourceOptions,
) -> Result<Vec<ImageFrameSource>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(Error::DirectoryNotFound {
            path: dir.to_path_buf(),
        });
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && options.format.accepts(&path) {
            paths.push(path);
        }
    }

    if paths.is_empty() {
        return Err(Error::InvalidInput(format!(
            "no {} frames found in {}",
            options.format,
            dir.display()
        )));
    }

    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    tracing::info!("Found {} frames in {:?}", paths.len(), dir);

    Ok(paths
        .into_iter()
        .map(|p| ImageFrameSource::new(p, options.clone()))
        .collect())
}

/// Check if a path has an image file extension.
pub fn is_image_file(path: &Path) -> bool {
    has_extension(path, IMAGE_EXTENSIONS)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}
