//! Hand-off of the "now showing" image to the external viewer process.
//!
//! The viewer watches `static/current.jpg` (a symlink) and reloads on
//! `SIGUSR1`. A transient zoom overlay may sit on top of it; it is retired
//! before every new image so it never masks a fresh photo.

use crate::config::ViewerConfig;
use crate::error::{IoContext, PlaybackError, Result};
use crate::store;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, UNIX_EPOCH};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoomDirection {
    In,
    Out,
}

impl ZoomDirection {
    fn key(self) -> &'static str {
        match self {
            Self::In => "Up",
            Self::Out => "Down",
        }
    }
}

/// Side effects on the external viewer processes.
pub trait ViewerControl: Send + Sync {
    /// Ask the viewer to reload the published image.
    fn refresh(&self) -> Result<()>;
    /// Terminate the zoom overlay, if one is running.
    fn retire_overlay(&self) -> Result<()>;
    /// Send zoom keystrokes to a running overlay. `Ok(false)` if none exists.
    fn signal_zoom(&self, direction: ZoomDirection) -> Result<bool>;
    /// Start a zoom overlay showing `link`.
    fn launch_overlay(&self, link: &Path) -> Result<()>;
}

/// [`ViewerControl`] backed by `pkill`, `xdotool` and `feh`.
pub struct ProcessViewer {
    cfg: ViewerConfig,
}

impl ProcessViewer {
    pub fn new(cfg: ViewerConfig) -> Self {
        Self { cfg }
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<Output> {
        Command::new(program)
            .args(args)
            .env("DISPLAY", &self.cfg.display)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| PlaybackError::process(program, err.to_string()))
    }
}

impl ViewerControl for ProcessViewer {
    fn refresh(&self) -> Result<()> {
        if !self.cfg.enabled {
            return Ok(());
        }
        let output = self.run("pkill", &["-USR1", &self.cfg.process_name])?;
        if output.status.success() {
            Ok(())
        } else {
            Err(PlaybackError::process(
                "pkill",
                format!("no '{}' process to refresh", self.cfg.process_name),
            ))
        }
    }

    fn retire_overlay(&self) -> Result<()> {
        if !self.cfg.enabled {
            return Ok(());
        }
        let pattern = format!("{}.*{}", self.cfg.process_name, self.cfg.overlay_title);
        // Exit status 1 only means nothing matched.
        let output = self.run("pkill", &["-f", &pattern])?;
        match output.status.code() {
            Some(0) | Some(1) => Ok(()),
            _ => Err(PlaybackError::process(
                "pkill",
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            )),
        }
    }

    fn signal_zoom(&self, direction: ZoomDirection) -> Result<bool> {
        if !self.cfg.enabled {
            return Ok(false);
        }
        let search = self.run("xdotool", &["search", "--name", &self.cfg.overlay_title])?;
        let stdout = String::from_utf8_lossy(&search.stdout);
        let Some(window) = stdout.lines().map(str::trim).find(|l| !l.is_empty()) else {
            return Ok(false);
        };
        self.run("xdotool", &["windowactivate", window])?;
        for _ in 0..self.cfg.zoom_steps {
            self.run("xdotool", &["key", "--window", window, direction.key()])?;
        }
        Ok(true)
    }

    fn launch_overlay(&self, link: &Path) -> Result<()> {
        if !self.cfg.enabled {
            return Ok(());
        }
        let child = Command::new(&self.cfg.process_name)
            .arg("--fullscreen")
            .arg("--title")
            .arg(&self.cfg.overlay_title)
            .arg(link)
            .env("DISPLAY", &self.cfg.display)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| PlaybackError::process(&self.cfg.process_name, err.to_string()))?;
        info!(pid = child.id(), "zoom overlay launched");
        Ok(())
    }
}

/// Publishes the current image: symlink, pointer record and refresh signal.
pub struct ViewerSync {
    link: PathBuf,
    pointer: PathBuf,
    public_url: String,
    zoom_wait: Duration,
    revision: AtomicU64,
    control: Arc<dyn ViewerControl>,
}

impl ViewerSync {
    pub fn new(
        link: PathBuf,
        pointer: PathBuf,
        public_url: String,
        zoom_wait: Duration,
        control: Arc<dyn ViewerControl>,
    ) -> Self {
        Self {
            link,
            pointer,
            public_url,
            zoom_wait,
            revision: AtomicU64::new(0),
            control,
        }
    }

    /// Make `image` the shown photo. Only the symlink replacement is fatal;
    /// the pointer record and the viewer signals are best-effort.
    pub fn publish(&self, image: &Path) -> Result<()> {
        self.retire_overlay();
        let target = std::path::absolute(image).at("failed to resolve", image)?;
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.replace_link(&target)?;
        if let Err(err) = store::write_record(&self.pointer, &name) {
            warn!(error = %err, "failed to record current image");
        }
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        info!(image = %name, revision, "published");
        self.notify();
        Ok(())
    }

    /// Withdraw the shown photo; afterwards nothing is published.
    pub fn clear(&self) -> Result<()> {
        self.retire_overlay();
        store::remove_if_exists(&self.pointer)?;
        store::remove_if_exists(&self.link)?;
        self.revision.fetch_add(1, Ordering::SeqCst);
        info!("viewer cleared");
        self.notify();
        Ok(())
    }

    fn replace_link(&self, target: &Path) -> Result<()> {
        if let Some(parent) = self.link.parent() {
            fs::create_dir_all(parent).at("failed to create directory", parent)?;
        }
        let name = self
            .link
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = self
            .link
            .with_file_name(format!(".{name}.tmp-{}", std::process::id()));
        store::remove_if_exists(&tmp)?;
        std::os::unix::fs::symlink(target, &tmp).at("failed to create symlink", &tmp)?;
        fs::rename(&tmp, &self.link).at("failed to replace", &self.link)
    }

    /// Filename recorded as currently shown.
    pub fn current(&self) -> Option<String> {
        store::read_record(&self.pointer).unwrap_or_else(|err| {
            warn!(error = %err, "failed to read current image record");
            None
        })
    }

    /// Absolute path the link points at, when that file exists.
    pub fn resolve(&self) -> Option<PathBuf> {
        let target = fs::read_link(&self.link).ok()?;
        let full = if target.is_absolute() {
            target
        } else {
            self.link.parent()?.join(target)
        };
        full.is_file().then_some(full)
    }

    /// Public URL of the link while something is published.
    pub fn reference(&self) -> Option<String> {
        fs::symlink_metadata(&self.link)
            .ok()
            .map(|_| self.public_url.clone())
    }

    /// Modification time of the link in seconds since the epoch.
    pub fn read_mtime(&self) -> Option<f64> {
        let modified = fs::symlink_metadata(&self.link).ok()?.modified().ok()?;
        Some(modified.duration_since(UNIX_EPOCH).ok()?.as_secs_f64())
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    pub fn public_url(&self) -> &str {
        &self.public_url
    }

    pub fn notify(&self) {
        if let Err(err) = self.control.refresh() {
            warn!(error = %err, "failed to refresh viewer");
        }
    }

    pub fn retire_overlay(&self) {
        if let Err(err) = self.control.retire_overlay() {
            warn!(error = %err, "failed to retire zoom overlay");
        }
    }

    /// Run a control call on the blocking pool; the calls spawn and wait on
    /// external programs.
    async fn on_control<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ViewerControl) -> Result<T> + Send + 'static,
    {
        let control = Arc::clone(&self.control);
        tokio::task::spawn_blocking(move || work(control.as_ref()))
            .await
            .map_err(|err| PlaybackError::Task(err.to_string()))?
    }

    /// Zoom the overlay, launching it first when none is running. Never
    /// fails; the return value says whether the keystrokes were delivered.
    pub async fn request_zoom(&self, direction: ZoomDirection) -> bool {
        match self.on_control(move |c| c.signal_zoom(direction)).await {
            Ok(true) => return true,
            Ok(false) => debug!("no zoom overlay running; launching one"),
            Err(err) => debug!(error = %err, "zoom signal failed; launching overlay"),
        }
        let link = self.link.clone();
        if let Err(err) = self.on_control(move |c| c.launch_overlay(&link)).await {
            warn!(error = %err, "failed to launch zoom overlay");
            return false;
        }
        tokio::time::sleep(self.zoom_wait).await;
        match self.on_control(move |c| c.signal_zoom(direction)).await {
            Ok(delivered) => delivered,
            Err(err) => {
                warn!(error = %err, "zoom retry failed");
                false
            }
        }
    }
}
