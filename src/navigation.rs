//! Movement through the active ordering.
//!
//! The active folder is the one stored in the settings, or the primary folder
//! when none is selected. Its ordering is `image_order.txt` for the primary
//! folder and `slideshow_list.txt` for any other. Every operation that moves
//! the pointer or rewrites an ordering holds the navigator's mutation lock.

use crate::config::{AppConfig, Paths, PlaylistOptions};
use crate::coordination::{DeletionLock, WakeSignal};
use crate::error::{IoContext, PlaybackError, Result};
use crate::library::{self, Library, SortMode};
use crate::media::{LocalMedia, MediaPipeline};
use crate::playlist;
use crate::settings::{PlaybackConfig, SettingsStore};
use crate::store;
use crate::viewer::{ProcessViewer, ViewerControl, ViewerSync};
use parking_lot::Mutex;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Outcome of [`Navigator::try_advance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// The step ran; carries the shown filename, `None` for an empty ordering.
    Shown(Option<String>),
    /// A foreground mutation holds the lock.
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Forward,
    Backward,
}

/// Where the pointer sits in an ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Known(usize),
    Unknown,
}

fn locate(order: &[String], current: Option<&str>) -> Position {
    current
        .and_then(|name| order.iter().position(|entry| entry == name))
        .map_or(Position::Unknown, Position::Known)
}

fn step_index(position: Position, len: usize, step: Step) -> usize {
    match (position, step) {
        (Position::Unknown, _) => 0,
        (Position::Known(i), Step::Forward) => (i + 1) % len,
        (Position::Known(i), Step::Backward) => (i + len - 1) % len,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BrowseView {
    pub folder: String,
    pub order: Vec<String>,
    pub current: Option<String>,
    pub current_index: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FolderImages {
    pub folder: String,
    pub images: Vec<String>,
    pub total: usize,
    pub current: Option<String>,
    pub current_index: Option<usize>,
}

pub struct Navigator {
    primary: String,
    paths: Paths,
    playlist: PlaylistOptions,
    library: Library,
    settings: SettingsStore,
    viewer: ViewerSync,
    wake: WakeSignal,
    deletion: DeletionLock,
    media: Arc<dyn MediaPipeline>,
    mutation: Mutex<()>,
}

impl Navigator {
    pub fn new(
        cfg: &AppConfig,
        control: Arc<dyn ViewerControl>,
        media: Arc<dyn MediaPipeline>,
    ) -> Self {
        let paths = cfg.paths();
        let library = Library::new(&paths);
        let settings = SettingsStore::new(
            paths.settings.clone(),
            paths.uploads.clone(),
            cfg.playback.default_delay,
        );
        let viewer = ViewerSync::new(
            paths.viewer_link.clone(),
            paths.pointer.clone(),
            cfg.viewer.public_url.clone(),
            cfg.viewer.zoom_retry_wait,
            control,
        );
        let wake = WakeSignal::new(paths.wake_flag.clone());
        let deletion = DeletionLock::new(paths.deletion_lock.clone());
        Self {
            primary: cfg.primary_folder.clone(),
            paths,
            playlist: cfg.playlist.clone(),
            library,
            settings,
            viewer,
            wake,
            deletion,
            media,
            mutation: Mutex::new(()),
        }
    }

    /// Navigator wired to the real viewer processes and local media storage.
    pub fn from_config(cfg: &AppConfig) -> Self {
        let control = Arc::new(ProcessViewer::new(cfg.viewer.clone()));
        let media = Arc::new(LocalMedia::new(Library::new(&cfg.paths())));
        Self::new(cfg, control, media)
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn viewer(&self) -> &ViewerSync {
        &self.viewer
    }

    pub fn wake(&self) -> &WakeSignal {
        &self.wake
    }

    pub fn deletion(&self) -> &DeletionLock {
        &self.deletion
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn media(&self) -> &dyn MediaPipeline {
        self.media.as_ref()
    }

    pub fn primary_folder(&self) -> &str {
        &self.primary
    }

    pub fn active_folder(&self, cfg: &PlaybackConfig) -> String {
        cfg.current_folder
            .clone()
            .unwrap_or_else(|| self.primary.clone())
    }

    fn order_path(&self, folder: &str) -> &Path {
        if folder == self.primary {
            &self.paths.primary_order
        } else {
            &self.paths.folder_order
        }
    }

    /// Active folder and its ordering, read fresh from disk.
    pub fn active_order(&self) -> (String, Vec<String>) {
        let folder = self.active_folder(&self.settings.load());
        let order = store::load_list(self.order_path(&folder));
        (folder, order)
    }

    /// Step forward on request; restarts the scheduler countdown.
    pub fn advance(&self) -> Result<Option<String>> {
        let _mutation = self.mutation.lock();
        let shown = self.step(Step::Forward)?;
        self.wake.trigger();
        Ok(shown)
    }

    pub fn retreat(&self) -> Result<Option<String>> {
        let _mutation = self.mutation.lock();
        let shown = self.step(Step::Backward)?;
        self.wake.trigger();
        Ok(shown)
    }

    /// Scheduler step: never waits on a foreground mutation and never wakes
    /// the scheduler itself.
    pub fn try_advance(&self) -> Result<Advance> {
        let Some(_mutation) = self.mutation.try_lock() else {
            return Ok(Advance::Busy);
        };
        self.step(Step::Forward).map(Advance::Shown)
    }

    fn step(&self, step: Step) -> Result<Option<String>> {
        let (folder, order) = self.active_order();
        if order.is_empty() {
            debug!(folder = %folder, "ordering empty; nothing to show");
            return Ok(None);
        }
        let current = self.viewer.current();
        let position = locate(&order, current.as_deref());
        if position == Position::Unknown {
            debug!(pointer = current.as_deref().unwrap_or("-"), "pointer unknown; starting over");
        }
        let name = &order[step_index(position, order.len(), step)];
        self.viewer.publish(&self.library.image_path(&folder, name))?;
        Ok(Some(name.clone()))
    }

    pub fn jump(&self, filename: &str) -> Result<String> {
        let filename = library::validate_name(filename)?;
        let _mutation = self.mutation.lock();
        let folder = self.active_folder(&self.settings.load());
        let path = self.library.image_path(&folder, filename);
        if !path.is_file() {
            return Err(PlaybackError::NotFound(format!(
                "'{filename}' in folder '{folder}'"
            )));
        }
        self.viewer.publish(&path)?;
        self.wake.trigger();
        info!(folder = %folder, file = filename, "jumped");
        Ok(filename.to_string())
    }

    /// Make `folder` active, rebuild its ordering and show its first image.
    pub fn select_folder(&self, folder: &str) -> Result<Option<String>> {
        let folder = library::validate_name(folder)?.to_string();
        if !self.library.folder_exists(&folder) {
            return Err(PlaybackError::NotFound(format!("folder '{folder}'")));
        }
        let _mutation = self.mutation.lock();
        let selected = folder.clone();
        let cfg = self
            .settings
            .update(move |cfg| cfg.current_folder = Some(selected));
        let order = if folder == self.primary {
            playlist::regenerate(
                &self.library,
                &folder,
                cfg.weighted_shuffle,
                &self.playlist,
                &self.paths.primary_order,
            )
        } else {
            self.derive_folder_order(&folder)?
        };
        let shown = self.show_first(&folder, &order);
        self.wake.trigger();
        info!(folder = %folder, photos = order.len(), "folder selected");
        Ok(shown)
    }

    /// Saved custom order restricted to files still present, or the sorted
    /// listing; persisted as the folder ordering.
    fn derive_folder_order(&self, folder: &str) -> Result<Vec<String>> {
        let names = self.library.image_names(folder)?;
        let order = match self.library.load_custom_order(folder) {
            Some(custom) => {
                let mut order: Vec<String> =
                    custom.into_iter().filter(|n| names.contains(n)).collect();
                if order.is_empty() {
                    order = names;
                }
                order
            }
            None => names,
        };
        if let Err(err) = store::save_list(&self.paths.folder_order, &order) {
            error!(error = %err, "failed to persist folder ordering");
        }
        Ok(order)
    }

    fn show_first(&self, folder: &str, order: &[String]) -> Option<String> {
        let first = order.first()?;
        match self.viewer.publish(&self.library.image_path(folder, first)) {
            Ok(()) => Some(first.clone()),
            Err(err) => {
                error!(error = %err, file = %first, "failed to publish first image");
                None
            }
        }
    }

    /// Remove `filename` from the active folder and keep the pointer in place.
    ///
    /// An image on screen that is not the deleted one stays on screen.
    /// Otherwise the image now occupying the deleted slot is shown, or the
    /// new last one. Returns the image shown afterwards, `None` once the
    /// ordering is empty.
    pub fn delete(&self, filename: &str) -> Result<Option<String>> {
        let filename = library::validate_name(filename)?;
        let _deleting = self.deletion.acquire();
        let _mutation = self.mutation.lock();

        let (folder, mut order) = self.active_order();
        let current = self.viewer.current();
        let file = self.library.image_path(&folder, filename);
        let on_disk = file.is_file();
        let position = order.iter().position(|entry| entry == filename);
        if position.is_none() && !on_disk {
            return Err(PlaybackError::NotFound(format!(
                "'{filename}' in folder '{folder}'"
            )));
        }
        let index = position.unwrap_or(0);

        if on_disk {
            fs::remove_file(&file).at("failed to delete", &file)?;
        }
        if let Err(err) = self.media.discard(&folder, filename) {
            warn!(error = %err, file = filename, "failed to remove thumbnail");
        }
        if let Some(pos) = position {
            order.remove(pos);
        }
        if let Err(err) = store::save_list(self.order_path(&folder), &order) {
            error!(error = %err, "failed to persist ordering after delete");
        }
        if let Err(err) = self.library.forget_in_custom_order(&folder, filename) {
            warn!(error = %err, "failed to update custom order after delete");
        }
        info!(folder = %folder, file = filename, remaining = order.len(), "image deleted");

        let kept = current
            .filter(|name| name != filename && order.contains(name));
        let shown = if order.is_empty() {
            if let Err(err) = self.viewer.clear() {
                error!(error = %err, "failed to clear viewer");
            }
            None
        } else if kept.is_some() {
            kept
        } else {
            let next = &order[index.min(order.len() - 1)];
            match self.viewer.publish(&self.library.image_path(&folder, next)) {
                Ok(()) => Some(next.clone()),
                Err(err) => {
                    error!(error = %err, file = %next, "failed to publish after delete");
                    None
                }
            }
        };
        self.wake.trigger();
        Ok(shown)
    }

    pub fn browse(&self) -> BrowseView {
        let (folder, order) = self.active_order();
        let current = self.viewer.current();
        let current_index = match locate(&order, current.as_deref()) {
            Position::Known(i) => i,
            Position::Unknown => 0,
        };
        BrowseView {
            folder,
            order,
            current,
            current_index,
        }
    }

    /// Images of `folder` arranged for the thumbnail grid.
    pub fn folder_images(&self, folder: &str, sort: SortMode) -> Result<FolderImages> {
        let folder = library::validate_name(folder)?.to_string();
        let (active, order) = self.active_order();
        let playlist = if active == folder { order } else { Vec::new() };
        let images = self.library.sorted_images(&folder, sort, &playlist)?;
        let current = self.viewer.current();
        let current_index = current
            .as_deref()
            .and_then(|name| images.iter().position(|entry| entry == name));
        Ok(FolderImages {
            total: images.len(),
            folder,
            images,
            current,
            current_index,
        })
    }

    /// Regenerate the primary ordering on request.
    pub fn reshuffle(&self) -> Vec<String> {
        let _mutation = self.mutation.lock();
        let cfg = self.settings.load();
        let order = playlist::regenerate(
            &self.library,
            &self.primary,
            cfg.weighted_shuffle,
            &self.playlist,
            &self.paths.primary_order,
        );
        if self.active_folder(&cfg) == self.primary {
            self.show_first(&self.primary, &order);
            self.wake.trigger();
        }
        order
    }

    /// Store a new per-image delay given in minutes and restart the countdown.
    pub fn set_delay(&self, minutes: u64) -> Result<PlaybackConfig> {
        if minutes == 0 {
            return Err(PlaybackError::InvalidInput(
                "delay must be at least one minute".into(),
            ));
        }
        let seconds = minutes
            .checked_mul(60)
            .ok_or_else(|| PlaybackError::InvalidInput("delay is too large".into()))?;
        let cfg = self.settings.update(|cfg| cfg.delay = seconds);
        self.wake.trigger();
        Ok(cfg)
    }

    /// Takes effect the next time the primary ordering is generated.
    pub fn set_weighted_shuffle(&self, enabled: bool) -> PlaybackConfig {
        self.settings.update(|cfg| cfg.weighted_shuffle = enabled)
    }

    /// Start-up: clear leftovers, rebuild the orderings and show something.
    pub fn bootstrap(&self) -> Option<String> {
        if self.deletion.clear_stale() {
            info!("stale deletion lock cleared at start-up");
        }
        let _mutation = self.mutation.lock();
        let cfg = self.settings.load();
        let primary_order = playlist::regenerate(
            &self.library,
            &self.primary,
            cfg.weighted_shuffle,
            &self.playlist,
            &self.paths.primary_order,
        );
        let folder = self.active_folder(&cfg);
        let order = if folder == self.primary {
            primary_order
        } else {
            match self.derive_folder_order(&folder) {
                Ok(order) => order,
                Err(err) => {
                    warn!(folder = %folder, error = %err, "selected folder unreadable");
                    Vec::new()
                }
            }
        };
        let shown = self.show_first(&folder, &order);
        info!(
            folder = %folder,
            photos = order.len(),
            shown = shown.as_deref().unwrap_or("-"),
            "playback bootstrapped"
        );
        shown
    }
}
