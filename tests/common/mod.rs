#![allow(dead_code)]

use frame_playback::Result;
use frame_playback::config::AppConfig;
use frame_playback::library::Library;
use frame_playback::media::LocalMedia;
use frame_playback::navigation::Navigator;
use frame_playback::store;
use frame_playback::viewer::{ViewerControl, ZoomDirection};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

/// Viewer double that counts refresh requests, optionally taking its time.
#[derive(Default)]
pub struct CountingControl {
    pub refreshes: AtomicUsize,
    pub refresh_delay: Duration,
}

impl CountingControl {
    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

impl ViewerControl for CountingControl {
    fn refresh(&self) -> Result<()> {
        if !self.refresh_delay.is_zero() {
            std::thread::sleep(self.refresh_delay);
        }
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    fn retire_overlay(&self) -> Result<()> {
        Ok(())
    }
    fn signal_zoom(&self, _direction: ZoomDirection) -> Result<bool> {
        Ok(true)
    }
    fn launch_overlay(&self, _link: &Path) -> Result<()> {
        Ok(())
    }
}

pub struct Frame {
    pub tmp: TempDir,
    pub cfg: AppConfig,
    pub control: Arc<CountingControl>,
    pub navigator: Arc<Navigator>,
}

impl Frame {
    pub fn new() -> Self {
        Self::with_control(CountingControl::default())
    }

    fn with_control(control: CountingControl) -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut cfg = AppConfig::rooted_at(tmp.path());
        cfg.scheduler.tick = Duration::from_millis(50);
        cfg.playlist.seed = Some(7);
        cfg.viewer.zoom_retry_wait = Duration::from_millis(1);
        let control = Arc::new(control);
        let media = Arc::new(LocalMedia::new(Library::new(&cfg.paths())));
        let navigator = Arc::new(Navigator::new(&cfg, control.clone(), media));
        Self {
            tmp,
            cfg,
            control,
            navigator,
        }
    }

    /// Create `folder` holding the given image files.
    pub fn folder(&self, folder: &str, names: &[&str]) -> &Self {
        let library = self.navigator.library();
        library.create_folder(folder).expect("create folder");
        for name in names {
            fs::write(library.image_path(folder, name), name.as_bytes()).expect("write image");
        }
        self
    }

    /// Write the primary ordering directly so tests control the sequence.
    pub fn primary_order(&self, names: &[&str]) -> &Self {
        let entries: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        store::save_list(&self.cfg.paths().primary_order, &entries).expect("save order");
        self
    }

    /// Primary folder with `names` on disk and in that order.
    pub fn with_main(names: &[&str]) -> Self {
        let frame = Self::new();
        frame.folder("main", names).primary_order(names);
        frame
    }

    /// Like [`Frame::with_main`], with a viewer whose refresh blocks for `delay`.
    pub fn with_slow_viewer(names: &[&str], delay: Duration) -> Self {
        let frame = Self::with_control(CountingControl {
            refresh_delay: delay,
            ..CountingControl::default()
        });
        frame.folder("main", names).primary_order(names);
        frame
    }

    pub fn order(&self) -> Vec<String> {
        self.navigator.active_order().1
    }

    pub fn current(&self) -> Option<String> {
        self.navigator.viewer().current()
    }

    pub fn set_delay_ticks(&self, ticks: u64) {
        self.navigator.settings().update(|cfg| cfg.delay = ticks);
    }
}
