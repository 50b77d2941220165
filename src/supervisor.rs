//! Single-slot owner of the full-screen helper script.
//!
//! At most one script runs at a time. Starting a new one stops the previous
//! one first, and every run may carry an auto-stop timer. Timers are tagged
//! with the generation of the run they belong to so a timer that fires late
//! never stops a newer script.

use crate::config::ScriptsConfig;
use crate::error::{PlaybackError, Result};
use crate::library;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

const STOP_GRACE: Duration = Duration::from_secs(5);

struct ActiveScript {
    name: String,
    generation: u64,
    child: Child,
    timer: Option<JoinHandle<()>>,
}

pub struct ScriptSupervisor {
    cfg: ScriptsConfig,
    generation: AtomicU64,
    slot: Mutex<Option<ActiveScript>>,
}

impl ScriptSupervisor {
    pub fn new(cfg: ScriptsConfig) -> Self {
        Self {
            cfg,
            generation: AtomicU64::new(0),
            slot: Mutex::new(None),
        }
    }

    /// Run `script` from the scripts directory, replacing any running one.
    /// A zero `duration` means no auto-stop.
    pub async fn start(
        self: &Arc<Self>,
        script: &str,
        args: &[String],
        duration: Option<Duration>,
    ) -> Result<()> {
        self.stop().await;

        let script = library::validate_name(script)?;
        if !self.cfg.allowed.iter().any(|allowed| allowed == script) {
            return Err(PlaybackError::Forbidden(format!(
                "script '{script}' is not allowed"
            )));
        }
        let path = self.cfg.dir.join(script);
        if !path.is_file() {
            return Err(PlaybackError::NotFound(format!("script '{script}'")));
        }

        let child = Command::new(&self.cfg.interpreter)
            .arg(&path)
            .args(args)
            .envs(&self.cfg.env)
            .current_dir(&self.cfg.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| PlaybackError::process(&self.cfg.interpreter, err.to_string()))?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(script, pid = child.id(), generation, "script started");

        let duration = duration.unwrap_or(self.cfg.default_duration);
        let timer = (!duration.is_zero()).then(|| {
            let supervisor = Arc::clone(self);
            tokio::spawn(async move {
                sleep(duration).await;
                supervisor.expire(generation).await;
            })
        });

        let mut slot = self.slot.lock().await;
        *slot = Some(ActiveScript {
            name: script.to_string(),
            generation,
            child,
            timer,
        });
        Ok(())
    }

    async fn expire(&self, generation: u64) {
        let mut slot = self.slot.lock().await;
        if slot.as_ref().map(|active| active.generation) != Some(generation) {
            debug!(generation, "stale auto-stop timer ignored");
            return;
        }
        if let Some(mut active) = slot.take() {
            active.timer = None;
            info!(script = %active.name, "script duration elapsed");
            terminate(active).await;
        }
    }

    /// Stop the running script, if any. Safe to call repeatedly.
    pub async fn stop(&self) {
        let active = self.slot.lock().await.take();
        if let Some(active) = active {
            terminate(active).await;
        }
    }

    /// Name of the running script. A script that exited on its own frees
    /// the slot.
    pub async fn active(&self) -> Option<String> {
        let mut slot = self.slot.lock().await;
        let exited = match slot.as_mut() {
            None => return None,
            Some(active) => matches!(active.child.try_wait(), Ok(Some(_))),
        };
        if exited {
            if let Some(active) = slot.take() {
                debug!(script = %active.name, "script exited on its own");
                if let Some(timer) = active.timer {
                    timer.abort();
                }
            }
            return None;
        }
        slot.as_ref().map(|active| active.name.clone())
    }
}

async fn terminate(mut active: ActiveScript) {
    if let Some(timer) = active.timer.take() {
        timer.abort();
    }
    if let Some(pid) = active.child.id() {
        info!(script = %active.name, pid, "stopping script");
        if let Err(err) = active.child.start_kill() {
            warn!(error = %err, "failed to signal script");
        }
    }
    match timeout(STOP_GRACE, active.child.wait()).await {
        Ok(Ok(status)) => debug!(script = %active.name, %status, "script stopped"),
        Ok(Err(err)) => warn!(error = %err, "failed to reap script"),
        Err(_) => warn!(script = %active.name, "script did not exit in time"),
    }
}
