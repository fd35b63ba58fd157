use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{Result, SoundError};
use crate::sound::backend::PcmFormat;

/// Pull-based decoder turning any supported container/codec into a lazy
/// sequence of canonical PCM chunks: signed 16-bit little-endian, source
/// sample rate and channel count preserved, block aligned.
///
/// Chunks are sized to roughly one second of audio for pacing. The
/// sequence is finite and not restartable; a fresh playback request builds
/// a fresh pipeline.
pub struct PcmStream {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    pcm_format: PcmFormat,
    sample_buf: Option<SampleBuffer<i16>>,
    pending: Vec<u8>,
    eof: bool,
}

impl PcmStream {
    /// Open a downloaded or local file.
    pub fn open_file(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(SoundError::SourceIo)?;

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        Self::from_source(Box::new(file), hint)
    }

    /// Open an arbitrary media source (e.g. a live network stream).
    pub fn from_source(source: Box<dyn MediaSource>, hint: Hint) -> Result<Self> {
        let mss = MediaSourceStream::new(source, Default::default());

        let meta_opts: MetadataOptions = Default::default();
        let fmt_opts: FormatOptions = Default::default();

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &fmt_opts, &meta_opts)
            .map_err(SoundError::DecodeFailed)?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(SoundError::NoAudioTrack)?;

        let sample_rate = track.codec_params.sample_rate.ok_or(SoundError::UnknownFormat)?;
        let channels = track
            .codec_params
            .channels
            .ok_or(SoundError::UnknownFormat)?
            .count() as u16;
        let pcm_format =
            PcmFormat::for_channels(channels).ok_or(SoundError::UnsupportedChannels(channels))?;

        let dec_opts: DecoderOptions = Default::default();
        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &dec_opts)
            .map_err(SoundError::DecodeFailed)?;
        let track_id = track.id;

        tracing::debug!(
            "Decoding stream: {} Hz, {} channel(s)",
            sample_rate,
            channels
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            pcm_format,
            sample_buf: None,
            pending: Vec::new(),
            eof: false,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn pcm_format(&self) -> PcmFormat {
        self.pcm_format
    }

    /// Bytes per chunk: one second of audio at the canonical format.
    pub fn chunk_size(&self) -> usize {
        self.sample_rate as usize * self.pcm_format.block_align()
    }

    /// Next PCM chunk in decode order, or `None` at end of stream.
    ///
    /// The final chunk may be shorter than [`chunk_size`](Self::chunk_size).
    pub fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let target = self.chunk_size();

        while self.pending.len() < target && !self.eof {
            self.decode_next_packet()?;
        }

        if self.pending.is_empty() {
            return Ok(None);
        }

        let take = target.min(self.pending.len());
        let rest = self.pending.split_off(take);
        let chunk = std::mem::replace(&mut self.pending, rest);
        Ok(Some(chunk))
    }

    fn decode_next_packet(&mut self) -> Result<()> {
        let packet = match self.format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(err))
                if err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                self.eof = true;
                return Ok(());
            }
            Err(err) => return Err(SoundError::DecodeFailed(err)),
        };

        if packet.track_id() != self.track_id {
            return Ok(());
        }

        match self.decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let frames = decoded.capacity();
                let needed = frames * spec.channels.count();

                let too_small = self
                    .sample_buf
                    .as_ref()
                    .map_or(true, |buf| buf.capacity() < needed);
                if too_small {
                    self.sample_buf = Some(SampleBuffer::<i16>::new(frames as u64, spec));
                }

                if let Some(buf) = self.sample_buf.as_mut() {
                    buf.copy_interleaved_ref(decoded);
                    for sample in buf.samples() {
                        self.pending.extend_from_slice(&sample.to_le_bytes());
                    }
                }
                Ok(())
            }
            // Recoverable per-packet failures: skip the packet
            Err(SymphoniaError::IoError(_)) | Err(SymphoniaError::DecodeError(_)) => Ok(()),
            Err(err) => Err(SoundError::DecodeFailed(err)),
        }
    }
}
