use crate::config::Paths;
use crate::error::{IoContext, PlaybackError, Result};
use crate::store;
use serde::Deserialize;
use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageEntry {
    pub name: String,
    pub modified: Option<SystemTime>,
}

/// Ordering choices for the thumbnail grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    Custom,
    Random,
    #[default]
    Newest,
    Oldest,
    Az,
    Za,
}

#[inline]
pub fn is_image(name: &str) -> bool {
    matches!(
        Path::new(name)
            .extension()
            .and_then(OsStr::to_str)
            .map(|s| s.to_ascii_lowercase()),
        Some(ref e) if IMAGE_EXTENSIONS.contains(&e.as_str())
    )
}

/// Accept a single path component that is safe to join under a managed
/// directory.
pub fn validate_name(name: &str) -> Result<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(PlaybackError::InvalidInput("name must not be empty".into()));
    }
    if trimmed.starts_with('.')
        || trimmed.len() > 255
        || trimmed.contains(['/', '\\', '\0'])
    {
        return Err(PlaybackError::InvalidInput(format!(
            "'{trimmed}' is not a valid file or folder name"
        )));
    }
    Ok(trimmed)
}

/// Folder and file listing for the upload tree.
#[derive(Debug, Clone)]
pub struct Library {
    uploads: PathBuf,
    thumbs: PathBuf,
    custom_orders: PathBuf,
}

impl Library {
    pub fn new(paths: &Paths) -> Self {
        Self {
            uploads: paths.uploads.clone(),
            thumbs: paths.thumbs.clone(),
            custom_orders: paths.custom_orders.clone(),
        }
    }

    pub fn folder_path(&self, folder: &str) -> PathBuf {
        self.uploads.join(folder)
    }

    pub fn image_path(&self, folder: &str, name: &str) -> PathBuf {
        self.uploads.join(folder).join(name)
    }

    pub fn thumb_path(&self, folder: &str, name: &str) -> PathBuf {
        self.thumbs.join(folder).join(name)
    }

    pub fn folder_exists(&self, folder: &str) -> bool {
        self.folder_path(folder).is_dir()
    }

    pub fn list_folders(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.uploads) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err).at("failed to list", &self.uploads),
        };
        let mut folders: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| !name.starts_with('.'))
            .collect();
        folders.sort();
        Ok(folders)
    }

    pub fn create_folder(&self, name: &str) -> Result<String> {
        let name = validate_name(name)?.to_string();
        let path = self.folder_path(&name);
        fs::create_dir_all(&path).at("failed to create folder", &path)?;
        let thumbs = self.thumbs.join(&name);
        fs::create_dir_all(&thumbs).at("failed to create folder", &thumbs)?;
        debug!(folder = %name, "folder ready");
        Ok(name)
    }

    /// Visible image files of `folder`, sorted by name.
    pub fn list_images(&self, folder: &str) -> Result<Vec<ImageEntry>> {
        let dir = self.folder_path(folder);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(PlaybackError::NotFound(format!("folder '{folder}'")));
            }
            Err(err) => return Err(err).at("failed to list", &dir),
        };
        let mut images = Vec::new();
        for entry in entries.filter_map(|entry| entry.ok()) {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') || !is_image(&name) {
                continue;
            }
            let Ok(meta) = fs::metadata(entry.path()) else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            images.push(ImageEntry {
                name,
                modified: meta.modified().ok(),
            });
        }
        images.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(images)
    }

    pub fn image_names(&self, folder: &str) -> Result<Vec<String>> {
        Ok(self
            .list_images(folder)?
            .into_iter()
            .map(|entry| entry.name)
            .collect())
    }

    fn custom_order_path(&self, folder: &str) -> PathBuf {
        self.custom_orders.join(format!("{folder}.txt"))
    }

    /// The saved order for `folder`, if one exists and is readable.
    pub fn load_custom_order(&self, folder: &str) -> Option<Vec<String>> {
        let path = self.custom_order_path(folder);
        if !path.exists() {
            return None;
        }
        Some(store::load_list(&path))
    }

    pub fn save_custom_order(&self, folder: &str, order: &[String]) -> Result<()> {
        let folder = validate_name(folder)?;
        if !self.folder_exists(folder) {
            return Err(PlaybackError::NotFound(format!("folder '{folder}'")));
        }
        let mut seen = HashSet::new();
        let mut cleaned = Vec::with_capacity(order.len());
        for name in order {
            let name = validate_name(name)?;
            if seen.insert(name.to_string()) {
                cleaned.push(name.to_string());
            }
        }
        if cleaned.is_empty() {
            return Err(PlaybackError::InvalidInput("order must not be empty".into()));
        }
        store::save_list(&self.custom_order_path(folder), &cleaned)
    }

    /// Drop `name` from the folder's saved order, if it has one.
    pub fn forget_in_custom_order(&self, folder: &str, name: &str) -> Result<()> {
        let Some(mut order) = self.load_custom_order(folder) else {
            return Ok(());
        };
        let before = order.len();
        order.retain(|entry| entry != name);
        if order.len() == before {
            return Ok(());
        }
        store::save_list(&self.custom_order_path(folder), &order)
    }

    /// Images of `folder` arranged for the thumbnail grid. `playlist` is the
    /// active ordering, used by [`SortMode::Random`].
    pub fn sorted_images(
        &self,
        folder: &str,
        sort: SortMode,
        playlist: &[String],
    ) -> Result<Vec<String>> {
        let mut entries = self.list_images(folder)?;
        let names = match sort {
            SortMode::Custom => match self.load_custom_order(folder) {
                Some(order) => arrange_by(&order, entries),
                None => entries.into_iter().map(|e| e.name).collect(),
            },
            SortMode::Random => arrange_by(playlist, entries),
            SortMode::Newest => {
                entries.sort_by(|a, b| b.modified.cmp(&a.modified).then(a.name.cmp(&b.name)));
                entries.into_iter().map(|e| e.name).collect()
            }
            SortMode::Oldest => {
                entries.sort_by(|a, b| a.modified.cmp(&b.modified).then(a.name.cmp(&b.name)));
                entries.into_iter().map(|e| e.name).collect()
            }
            SortMode::Az => entries.into_iter().map(|e| e.name).collect(),
            SortMode::Za => entries.into_iter().rev().map(|e| e.name).collect(),
        };
        Ok(names)
    }
}

/// Entries named in `order` first (in that order), then the rest by name.
fn arrange_by(order: &[String], entries: Vec<ImageEntry>) -> Vec<String> {
    let present: HashSet<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    let mut placed: HashSet<&str> = HashSet::new();
    let mut names = Vec::with_capacity(entries.len());
    for name in order {
        if present.contains(name.as_str()) && placed.insert(name.as_str()) {
            names.push(name.clone());
        }
    }
    for entry in &entries {
        if !placed.contains(entry.name.as_str()) {
            names.push(entry.name.clone());
        }
    }
    names
}
