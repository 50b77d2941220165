use crate::error::{IoContext, PlaybackError, Result};
use crate::library::{self, Library};
use crate::store;
use image::ImageFormat;
use image::codecs::jpeg::JpegEncoder;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const THUMB_EDGE: u32 = 300;
const THUMB_QUALITY: u8 = 30;

/// Upload ingestion and derived thumbnails.
pub trait MediaPipeline: Send + Sync {
    /// Store `bytes` as a new image in `folder`; returns the name used.
    fn ingest(&self, folder: &str, name: &str, bytes: &[u8]) -> Result<String>;
    /// Path of the thumbnail for `name`, rendering it when missing.
    fn thumbnail(&self, folder: &str, name: &str) -> Option<PathBuf>;
    /// Remove derived artifacts of a deleted image.
    fn discard(&self, folder: &str, name: &str) -> Result<()>;
}

/// Files under the upload tree, thumbnails rendered with the `image` crate.
pub struct LocalMedia {
    library: Library,
}

impl LocalMedia {
    pub fn new(library: Library) -> Self {
        Self { library }
    }

    fn render_thumbnail(&self, source: &Path, target: &Path) -> Result<()> {
        let img = image::open(source).map_err(|err| {
            PlaybackError::io(
                "failed to decode",
                source,
                std::io::Error::new(std::io::ErrorKind::InvalidData, err),
            )
        })?;
        let thumb = img.thumbnail(THUMB_EDGE, THUMB_EDGE);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).at("failed to create directory", parent)?;
        }
        let encoded = match ImageFormat::from_path(target) {
            Ok(ImageFormat::Jpeg) | Err(_) => {
                let file = File::create(target).at("failed to create", target)?;
                let encoder = JpegEncoder::new_with_quality(BufWriter::new(file), THUMB_QUALITY);
                thumb.to_rgb8().write_with_encoder(encoder)
            }
            Ok(format) => thumb.save_with_format(target, format),
        };
        encoded.map_err(|err| {
            PlaybackError::io(
                "failed to encode",
                target,
                std::io::Error::other(err),
            )
        })
    }
}

impl MediaPipeline for LocalMedia {
    fn ingest(&self, folder: &str, name: &str, bytes: &[u8]) -> Result<String> {
        let folder = library::validate_name(folder)?;
        let name = library::validate_name(name)?;
        if !library::is_image(name) {
            return Err(PlaybackError::InvalidInput(format!(
                "'{name}' is not a supported image type"
            )));
        }
        self.library.create_folder(folder)?;
        let unique = unique_name(&self.library.folder_path(folder), name);
        store::write_atomic(&self.library.image_path(folder, &unique), bytes)?;
        info!(folder, file = %unique, bytes = bytes.len(), "image ingested");
        if self.thumbnail(folder, &unique).is_none() {
            debug!(file = %unique, "no thumbnail for ingested image");
        }
        Ok(unique)
    }

    fn thumbnail(&self, folder: &str, name: &str) -> Option<PathBuf> {
        let target = self.library.thumb_path(folder, name);
        if target.is_file() {
            return Some(target);
        }
        let source = self.library.image_path(folder, name);
        if !source.is_file() {
            return None;
        }
        match self.render_thumbnail(&source, &target) {
            Ok(()) => Some(target),
            Err(err) => {
                warn!(error = %err, file = name, "thumbnail rendering failed");
                let _ = fs::remove_file(&target);
                None
            }
        }
    }

    fn discard(&self, folder: &str, name: &str) -> Result<()> {
        store::remove_if_exists(&self.library.thumb_path(folder, name)).map(|_| ())
    }
}

/// `name`, or `stem_N.ext` for the first N that is free in `dir`.
fn unique_name(dir: &Path, name: &str) -> String {
    if !dir.join(name).exists() {
        return name.to_string();
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (1..)
        .map(|n| format!("{stem}_{n}{ext}"))
        .find(|candidate| !dir.join(candidate).exists())
        .unwrap_or_else(|| name.to_string())
}
