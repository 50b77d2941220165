use crate::config::PlaylistOptions;
use crate::library::{ImageEntry, Library};
use crate::store;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::path::Path;
use std::time::SystemTime;
use tracing::{debug, error, info};

/// Arrange `entries` into a play order.
///
/// Plain mode is a uniform shuffle. Weighted mode splits photos into recent
/// and archive by modification time, ranks recent ones by a random score that
/// decays with age, shuffles the archive and interleaves the two so neither
/// kind runs long. The result is always a permutation of `entries`.
pub fn build_order<R: Rng>(
    entries: &[ImageEntry],
    weighted: bool,
    options: &PlaylistOptions,
    now: SystemTime,
    rng: &mut R,
) -> Vec<String> {
    if !weighted {
        let mut order: Vec<String> = entries.iter().map(|e| e.name.clone()).collect();
        order.shuffle(rng);
        return order;
    }

    let cutoff = options.cutoff().as_secs_f64().max(1.0);
    let mut recent: Vec<(f64, &str)> = Vec::new();
    let mut archive: Vec<&str> = Vec::new();
    for entry in entries {
        match entry.modified {
            Some(modified) => {
                let age = now
                    .duration_since(modified)
                    .unwrap_or_default()
                    .as_secs_f64();
                if age <= cutoff {
                    let score = rng.random::<f64>() * (-age / cutoff).exp();
                    recent.push((score, entry.name.as_str()));
                } else {
                    archive.push(entry.name.as_str());
                }
            }
            None => archive.push(entry.name.as_str()),
        }
    }
    recent.sort_by(|a, b| b.0.total_cmp(&a.0));
    archive.shuffle(rng);

    let total = entries.len();
    let recent_quota = ((options.blend_ratio * total as f64).round() as usize).min(total);
    let archive_quota = total - recent_quota;
    let (recent_head, recent_overflow) = recent.split_at(recent_quota.min(recent.len()));
    let (archive_head, archive_overflow) = archive.split_at(archive_quota.min(archive.len()));

    debug!(
        recent = recent.len(),
        archive = archive.len(),
        recent_quota,
        archive_quota,
        "weighted split"
    );

    let mut order = Vec::with_capacity(total);
    let mut recent_iter = recent_head.iter().map(|(_, name)| *name);
    let mut archive_iter = archive_head.iter().copied();
    loop {
        let r = recent_iter.next();
        let a = archive_iter.next();
        if r.is_none() && a.is_none() {
            break;
        }
        order.extend(r.map(str::to_string));
        order.extend(a.map(str::to_string));
    }
    order.extend(recent_overflow.iter().map(|(_, name)| name.to_string()));
    order.extend(archive_overflow.iter().map(|name| name.to_string()));
    order
}

pub fn rng_for(options: &PlaylistOptions) -> StdRng {
    match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

/// Rebuild the primary folder's order and persist it to `order_path`.
///
/// A failed save is logged; the fresh order is returned either way so the
/// caller can still act on it.
pub fn regenerate(
    library: &Library,
    folder: &str,
    weighted: bool,
    options: &PlaylistOptions,
    order_path: &Path,
) -> Vec<String> {
    let entries = match library.list_images(folder) {
        Ok(entries) => entries,
        Err(err) => {
            info!(folder, error = %err, "primary folder unavailable; playlist empty");
            Vec::new()
        }
    };
    let mut rng = rng_for(options);
    let order = build_order(&entries, weighted, options, SystemTime::now(), &mut rng);
    if let Err(err) = store::save_list(order_path, &order) {
        error!(error = %err, "failed to persist playlist");
    }
    info!(folder, photos = order.len(), weighted, "playlist regenerated");
    order
}
