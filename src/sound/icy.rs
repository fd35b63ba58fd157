use std::io::{self, Read};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use symphonia::core::io::{MediaSource, ReadOnlySource};
use symphonia::core::probe::Hint;

use crate::error::SoundError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

fn stream_title_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"StreamTitle='([^']*)'").expect("valid regex"))
}

/// Reader adapter stripping icecast inline metadata.
///
/// Icy streams interleave a metadata frame (1 length byte, then
/// `length * 16` bytes of text) after every `metaint` bytes of audio. With
/// `metaint == 0` the stream passes through untouched.
pub struct IcyReader<R: Read> {
    inner: R,
    metaint: usize,
    until_meta: usize,
}

impl<R: Read> IcyReader<R> {
    pub fn new(inner: R, metaint: usize) -> Self {
        Self {
            inner,
            metaint,
            until_meta: metaint,
        }
    }

    /// Returns false on a clean end of stream at the frame boundary.
    fn skip_metadata(&mut self) -> io::Result<bool> {
        let mut len = [0u8; 1];
        if self.inner.read(&mut len)? == 0 {
            return Ok(false);
        }

        let len = len[0] as usize * 16;
        if len == 0 {
            return Ok(true);
        }

        let mut meta = vec![0u8; len];
        self.inner.read_exact(&mut meta)?;

        if let Ok(text) = std::str::from_utf8(&meta) {
            if let Some(caps) = stream_title_re().captures(text) {
                tracing::debug!("Stream title: {}", &caps[1]);
            }
        }
        Ok(true)
    }
}

impl<R: Read> Read for IcyReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.metaint == 0 {
            return self.inner.read(buf);
        }

        if self.until_meta == 0 {
            if !self.skip_metadata()? {
                return Ok(0);
            }
            self.until_meta = self.metaint;
        }

        let want = buf.len().min(self.until_meta);
        let n = self.inner.read(&mut buf[..want])?;
        self.until_meta -= n;
        Ok(n)
    }
}

/// Connect to an icecast-style stream and return a media source with
/// metadata stripped, plus a probe hint from the Content-Type.
///
/// Schemeless URLs get `http://` prepended, matching how stream addresses
/// are usually pasted in.
pub fn open_stream(url: &str) -> Result<(Box<dyn MediaSource>, Hint), SoundError> {
    let url = if url.starts_with("http") {
        url.to_string()
    } else {
        format!("http://{url}")
    };

    let fail = |source: Box<dyn std::error::Error + Send + Sync>| SoundError::StreamOpenFailed {
        url: url.clone(),
        source,
    };

    let agent = ureq::AgentBuilder::new()
        .timeout_connect(CONNECT_TIMEOUT)
        .redirects(8)
        .build();
    let response = agent
        .get(&url)
        .set("Icy-MetaData", "1")
        .call()
        .map_err(|e| fail(Box::new(e)))?;

    let metaint: usize = response
        .header("icy-metaint")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);

    let mut hint = Hint::new();
    if let Some(content_type) = response.header("Content-Type") {
        hint.mime_type(content_type);
    }

    tracing::info!("Opened stream {} (metaint {})", url, metaint);

    let reader = IcyReader::new(response.into_reader(), metaint);
    Ok((Box::new(ReadOnlySource::new(reader)), hint))
}
