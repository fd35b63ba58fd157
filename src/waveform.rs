//! Waveform envelope extraction for beat-reactive effects.
//!
//! Not genuine spectral filtering: the stream is interleaved 16-bit
//! little-endian samples, and picking every other byte approximates a
//! high band (sample high bytes, offset 0) and a low band (offset 1).

/// Frequency band selector for [`extract_envelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    Bass,
    Treble,
}

impl Band {
    fn byte_offset(self) -> usize {
        match self {
            Band::Treble => 0,
            Band::Bass => 1,
        }
    }
}

/// Flash threshold for clamped (cross-device) envelopes.
const FLASH_THRESHOLD: f32 = 20.0;

/// Average signed amplitude of one band of a PCM chunk.
///
/// With `clamp` set (used when propagating to linked lights), the average
/// is rectified and loud passages collapse to a flash level: 1.0 normally,
/// 2.0 when `flash_mode` is at the loudest tier (3). Empty and odd-length
/// buffers yield 0.
pub fn extract_envelope(buffer: &[u8], band: Band, clamp: bool, flash_mode: u8) -> f32 {
    // Odd-length input is not valid 16-bit PCM
    if buffer.len() % 2 != 0 {
        return 0.0;
    }

    let mut sum = 0.0f32;
    let mut count = 0u32;

    for byte in buffer.iter().skip(band.byte_offset()).step_by(2) {
        sum += *byte as i8 as f32;
        count += 1;
    }

    if count == 0 {
        return 0.0;
    }

    let mut avg = sum / count as f32;

    if clamp {
        if avg < 0.0 {
            avg = avg.abs();
        }

        if avg > FLASH_THRESHOLD {
            return if flash_mode < 3 { 1.0 } else { 2.0 };
        }
    }

    avg
}

/// Current envelope of one object, consumed by its visual effect.
///
/// No history is kept beyond the current values; the bass counter decays
/// once per host tick so effects fade out after the music stops.
#[derive(Debug, Default, Clone, Copy)]
pub struct Envelope {
    treble: f32,
    bass: f32,
}

impl Envelope {
    pub fn update(&mut self, treble: f32, bass: f32) {
        self.treble = treble;
        self.bass = bass;
    }

    /// Decay the bass counter by one step toward zero.
    pub fn tick(&mut self) {
        if self.bass > 0.0 {
            self.bass -= 1.0;
        }
        if self.bass < 0.0 {
            self.bass = 0.0;
        }
    }

    pub fn treble(&self) -> f32 {
        self.treble
    }

    pub fn bass(&self) -> f32 {
        self.bass
    }
}
