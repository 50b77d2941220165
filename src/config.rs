use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = "/opt/photo-frame/etc/frame-playback.yaml";

/// Static application configuration, read once at start-up from YAML.
///
/// Everything the user tunes at runtime (delay, selected folder, shuffle mode)
/// lives in the JSON settings document instead; see [`crate::settings`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
    #[serde(default = "default_primary_folder")]
    pub primary_folder: String,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub playlist: PlaylistOptions,
    #[serde(default)]
    pub playback: PlaybackOptions,
    #[serde(default)]
    pub scheduler: SchedulerOptions,
    #[serde(default)]
    pub viewer: ViewerConfig,
    #[serde(default)]
    pub scripts: ScriptsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HttpConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PlaylistOptions {
    /// Fraction of the weighted order drawn from recent photos.
    pub blend_ratio: f64,
    /// Photos modified within this many days count as recent.
    pub cutoff_days: u32,
    /// Fixed RNG seed; unset means a fresh OS-seeded shuffle every time.
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PlaybackOptions {
    /// Seconds per image when no settings document exists yet.
    pub default_delay: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SchedulerOptions {
    /// Length of one countdown step. The stored delay counts these steps.
    #[serde(with = "humantime_serde")]
    pub tick: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ViewerConfig {
    /// When false no external commands are run; files are still published.
    pub enabled: bool,
    pub process_name: String,
    pub overlay_title: String,
    pub public_url: String,
    pub display: String,
    pub zoom_steps: u32,
    #[serde(with = "humantime_serde")]
    pub zoom_retry_wait: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ScriptsConfig {
    pub dir: PathBuf,
    pub interpreter: String,
    pub allowed: Vec<String>,
    pub env: BTreeMap<String, String>,
    #[serde(with = "humantime_serde")]
    pub default_duration: Duration,
}

/// Locations of every document the appliance reads or writes.
#[derive(Debug, Clone)]
pub struct Paths {
    pub root: PathBuf,
    pub settings: PathBuf,
    pub primary_order: PathBuf,
    pub folder_order: PathBuf,
    pub custom_orders: PathBuf,
    pub wake_flag: PathBuf,
    pub deletion_lock: PathBuf,
    pub static_dir: PathBuf,
    pub viewer_link: PathBuf,
    pub pointer: PathBuf,
    pub uploads: PathBuf,
    pub thumbs: PathBuf,
}

impl Paths {
    pub fn under(root: &Path) -> Self {
        let static_dir = root.join("static");
        Self {
            root: root.to_path_buf(),
            settings: root.join("config.json"),
            primary_order: root.join("image_order.txt"),
            folder_order: root.join("slideshow_list.txt"),
            custom_orders: root.join("orders"),
            wake_flag: root.join("delay_updated.flag"),
            deletion_lock: root.join("deletion.lock"),
            viewer_link: static_dir.join("current.jpg"),
            pointer: static_dir.join("current_image.txt"),
            uploads: static_dir.join("uploads"),
            thumbs: static_dir.join("thumbs"),
            static_dir,
        }
    }
}

impl AppConfig {
    /// Load the YAML file at `path`. A missing file yields the defaults so a
    /// fresh appliance boots without any configuration.
    pub fn load(path: &Path) -> Result<Self> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(config = %path.display(), "no config file; using defaults");
                return Self::default().validated();
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read config at {}", path.display()));
            }
        };
        let cfg: AppConfig = serde_yaml::from_slice(&data)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;
        cfg.validated()
    }

    /// Defaults rooted at `root`; used by tests and tooling.
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root.into(),
            ..Self::default()
        }
    }

    pub fn validated(self) -> Result<Self> {
        ensure!(
            !self.root_dir.as_os_str().is_empty(),
            "root-dir must not be empty"
        );
        ensure!(
            crate::library::validate_name(&self.primary_folder).is_ok(),
            "primary-folder must be a plain folder name"
        );
        self.playlist.validate()?;
        ensure!(
            self.playback.default_delay >= 1,
            "playback.default-delay must be at least one second"
        );
        ensure!(
            self.scheduler.tick > Duration::ZERO,
            "scheduler.tick must be positive"
        );
        Ok(self)
    }

    pub fn paths(&self) -> Paths {
        Paths::under(&self.root_dir)
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http.bind_address, self.http.port)
    }
}

impl PlaylistOptions {
    pub fn cutoff(&self) -> Duration {
        Duration::from_secs(u64::from(self.cutoff_days) * 86_400)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            (0.0..=1.0).contains(&self.blend_ratio),
            "playlist.blend-ratio must be within 0.0..=1.0"
        );
        ensure!(
            self.cutoff_days > 0,
            "playlist.cutoff-days must be positive"
        );
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            primary_folder: default_primary_folder(),
            http: HttpConfig::default(),
            playlist: PlaylistOptions::default(),
            playback: PlaybackOptions::default(),
            scheduler: SchedulerOptions::default(),
            viewer: ViewerConfig::default(),
            scripts: ScriptsConfig::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for PlaylistOptions {
    fn default() -> Self {
        Self {
            blend_ratio: 0.6,
            cutoff_days: 90,
            seed: None,
        }
    }
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self { default_delay: 5 }
    }
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
        }
    }
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            process_name: "feh".to_string(),
            overlay_title: "feh-zoom".to_string(),
            public_url: "/static/current.jpg".to_string(),
            display: ":0".to_string(),
            zoom_steps: 3,
            zoom_retry_wait: Duration::from_millis(300),
        }
    }
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        let mut env = BTreeMap::new();
        env.insert("DISPLAY".to_string(), ":0".to_string());
        env.insert("XDG_RUNTIME_DIR".to_string(), "/run/user/1000".to_string());
        Self {
            dir: PathBuf::from("/home/pi/Rolex"),
            interpreter: "python3".to_string(),
            allowed: Vec::new(),
            env,
            default_duration: Duration::from_secs(15 * 60),
        }
    }
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("/home/pi/frame-app")
}

fn default_primary_folder() -> String {
    "main".to_string()
}

fn default_bind_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    5000
}

#[cfg(test)]
mod tests {
    use super::AppConfig;
    use std::time::Duration;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg: AppConfig = serde_yaml::from_str("{}").expect("parse config");
        let cfg = cfg.validated().expect("valid");
        assert_eq!(cfg.primary_folder, "main");
        assert_eq!(cfg.http.port, 5000);
        assert_eq!(cfg.playlist.cutoff_days, 90);
        assert_eq!(cfg.scheduler.tick, Duration::from_secs(1));
        assert_eq!(cfg.viewer.zoom_retry_wait, Duration::from_millis(300));
        assert_eq!(cfg.paths().settings, cfg.root_dir.join("config.json"));
    }

    #[test]
    fn parses_overrides() {
        let cfg: AppConfig = serde_yaml::from_str(
            r#"
root-dir: /srv/frame
primary-folder: family
http:
  port: 8080
playlist:
  blend-ratio: 0.25
  cutoff-days: 30
  seed: 7
scheduler:
  tick: 250ms
viewer:
  enabled: false
scripts:
  allowed: [PlainClock.py]
  default-duration: 30m
"#,
        )
        .expect("parse config");
        let cfg = cfg.validated().expect("valid");
        assert_eq!(cfg.primary_folder, "family");
        assert_eq!(cfg.http.port, 8080);
        assert_eq!(cfg.playlist.seed, Some(7));
        assert_eq!(cfg.scheduler.tick, Duration::from_millis(250));
        assert!(!cfg.viewer.enabled);
        assert_eq!(cfg.scripts.allowed, vec!["PlainClock.py".to_string()]);
        assert_eq!(cfg.scripts.default_duration, Duration::from_secs(1800));
        assert_eq!(
            cfg.paths().viewer_link,
            std::path::PathBuf::from("/srv/frame/static/current.jpg")
        );
    }

    #[test]
    fn rejects_out_of_range_blend() {
        let cfg: AppConfig =
            serde_yaml::from_str("playlist:\n  blend-ratio: 1.5\n").expect("parse config");
        assert!(cfg.validated().is_err());
    }

    #[test]
    fn rejects_nested_primary_folder() {
        let cfg: AppConfig =
            serde_yaml::from_str("primary-folder: a/b\n").expect("parse config");
        assert!(cfg.validated().is_err());
    }
}
