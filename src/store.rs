//! Durable documents on disk: JSON records, newline-separated lists and
//! zero-content marker files.
//!
//! Every write goes through [`write_atomic`], so readers only ever observe the
//! previous or the next complete version of a document.

use crate::error::{IoContext, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Write `bytes` to a sibling temp file, fsync it, then rename over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).at("failed to create directory", parent)?;
    }
    let tmp = temp_sibling(path);
    let written = (|| {
        let mut file = File::create(&tmp).at("failed to create", &tmp)?;
        file.write_all(bytes).at("failed to write", &tmp)?;
        file.sync_all().at("failed to sync", &tmp)?;
        fs::rename(&tmp, path).at("failed to replace", path)
    })();
    if written.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    written
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value).map_err(|err| {
        crate::error::PlaybackError::io("failed to encode", path, err.into())
    })?;
    write_atomic(path, &json)
}

/// `Ok(None)` when the file is absent, an error when it exists but cannot be
/// read or parsed.
pub fn read_json_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).at("failed to read", path),
    };
    let value = serde_json::from_slice::<T>(&data).map_err(|err| {
        crate::error::PlaybackError::io("failed to parse", path, err.into())
    })?;
    Ok(Some(value))
}

pub fn parse_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Read a newline-separated list; a missing file is an empty list.
pub fn read_list(path: &Path) -> Result<Vec<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(parse_list(&text)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err).at("failed to read", path),
    }
}

/// Like [`read_list`], but a damaged document is logged and treated as empty.
pub fn load_list(path: &Path) -> Vec<String> {
    read_list(path).unwrap_or_else(|err| {
        warn!(error = %err, "unreadable order document; treating as empty");
        Vec::new()
    })
}

pub fn save_list(path: &Path, entries: &[String]) -> Result<()> {
    let mut text = entries.join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    write_atomic(path, text.as_bytes())
}

/// First non-empty line of a single-value record.
pub fn read_record(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).at("failed to read", path),
    }
}

pub fn write_record(path: &Path, value: &str) -> Result<()> {
    write_atomic(path, value.as_bytes())
}

/// Create the marker if needed and bump its modification time.
pub fn touch(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).at("failed to create directory", parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .at("failed to open", path)?;
    file.set_modified(SystemTime::now())
        .at("failed to set mtime on", path)?;
    Ok(())
}

/// Returns whether something was removed; a missing file is not an error.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed");
            Ok(true)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err).at("failed to remove", path),
    }
}

pub fn mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

fn temp_sibling(path: &Path) -> PathBuf {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{name}.tmp-{}-{seq}", std::process::id()))
}
