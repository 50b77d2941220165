use crate::navigation::{Advance, Navigator};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Countdown loop that advances the slideshow every `delay` ticks.
///
/// A wake signal restarts the countdown with the delay read fresh from the
/// settings. When the countdown reaches zero while a delete or another
/// mutation is in flight, the advance is retried on the following tick.
pub async fn run(navigator: Arc<Navigator>, tick: Duration, cancel: CancellationToken) -> Result<()> {
    let mut seen = navigator.wake().revision();
    let mut remaining = navigator.settings().load().delay;
    info!(delay = remaining, tick = ?tick, "playback scheduler started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(tick) => {}
        }

        navigator.wake().poll_boundary();
        let revision = navigator.wake().revision();
        if revision != seen {
            seen = revision;
            remaining = navigator.settings().load().delay;
            debug!(revision, delay = remaining, "countdown restarted");
            continue;
        }

        remaining = remaining.saturating_sub(1);
        if remaining > 0 {
            continue;
        }
        if navigator.deletion().is_held() {
            debug!("delete in progress; deferring advance");
            continue;
        }

        let nav = navigator.clone();
        let outcome = tokio::task::spawn_blocking(move || nav.try_advance()).await;
        match outcome {
            Ok(Ok(Advance::Busy)) => {
                debug!("navigator busy; deferring advance");
                continue;
            }
            Ok(Ok(Advance::Shown(Some(name)))) => debug!(image = %name, "scheduled advance"),
            Ok(Ok(Advance::Shown(None))) => debug!("nothing to advance to"),
            Ok(Err(err)) => warn!(error = %err, "scheduled advance failed"),
            Err(err) => warn!(error = %err, "scheduled advance task failed"),
        }
        seen = navigator.wake().revision();
        remaining = navigator.settings().load().delay;
    }

    info!("playback scheduler stopped");
    Ok(())
}
