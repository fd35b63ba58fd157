use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;

use crate::error::SoundError;

const READ_CHUNK: usize = 4096;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of a [`download`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Completed,
    /// `should_stop` returned true; the partial file was removed.
    Cancelled,
}

/// Download `url` to `dest`, reporting progress as (bytes so far, total).
///
/// Total is 0 when the server sends no Content-Length. `should_stop` is
/// checked between socket reads, so a stop request is honored within one
/// read. Any failure leaves playback untouched: the caller aborts the
/// session before starting emitters.
pub fn download<F, S>(
    url: &str,
    dest: &Path,
    mut on_progress: F,
    should_stop: S,
) -> Result<DownloadStatus, SoundError>
where
    F: FnMut(u64, u64),
    S: Fn() -> bool,
{
    let fail = |source: Box<dyn std::error::Error + Send + Sync>| SoundError::DownloadFailed {
        url: url.to_string(),
        source,
    };

    tracing::info!("Downloading {} to {}", url, dest.display());

    // Connect timeout only: the body read may legitimately take minutes.
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(CONNECT_TIMEOUT)
        .build();
    let response = agent.get(url).call().map_err(|e| fail(Box::new(e)))?;

    let total: u64 = response
        .header("Content-Length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| fail(Box::new(e)))?;
    }

    let file = File::create(dest).map_err(|e| fail(Box::new(e)))?;
    let mut writer = BufWriter::new(file);
    let mut reader = response.into_reader();

    let mut buffer = [0u8; READ_CHUNK];
    let mut current = 0u64;

    loop {
        if should_stop() {
            drop(writer);
            let _ = fs::remove_file(dest);
            tracing::info!("Download of {} cancelled after {} bytes", url, current);
            return Ok(DownloadStatus::Cancelled);
        }

        let n = reader.read(&mut buffer).map_err(|e| fail(Box::new(e)))?;
        if n == 0 {
            break;
        }

        writer
            .write_all(&buffer[..n])
            .map_err(|e| fail(Box::new(e)))?;
        current += n as u64;
        on_progress(current, total);
    }

    writer.flush().map_err(|e| fail(Box::new(e)))?;
    tracing::info!("Downloaded {} bytes from {}", current, url);
    Ok(DownloadStatus::Completed)
}

/// Cache file name for a sound URL: the last path segment with anything
/// outside `[a-zA-Z0-9_.]` replaced by underscores.
pub fn cache_file_name(url: &str) -> String {
    let name = url
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("sound");

    match Regex::new(r"[^a-zA-Z0-9_.]") {
        Ok(re) => re.replace_all(name, "_").into_owned(),
        Err(_) => name.to_string(),
    }
}

/// Default on-disk cache for downloaded sounds.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("soundwire")
}
