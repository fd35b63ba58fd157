use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::{Result, SoundError};

/// Handle for one allocated hardware voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceId(pub u64);

/// Handle for one hardware buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u64);

/// Canonical PCM chunk layouts fed to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmFormat {
    Mono16,
    Stereo16,
}

impl PcmFormat {
    pub fn channels(self) -> u16 {
        match self {
            PcmFormat::Mono16 => 1,
            PcmFormat::Stereo16 => 2,
        }
    }

    /// Bytes per sample frame.
    pub fn block_align(self) -> usize {
        self.channels() as usize * 2
    }

    pub fn for_channels(channels: u16) -> Option<Self> {
        match channels {
            1 => Some(PcmFormat::Mono16),
            2 => Some(PcmFormat::Stereo16),
            _ => None,
        }
    }
}

/// Spatial and psychoacoustic parameters of one voice.
#[derive(Debug, Clone, Copy)]
pub struct VoiceParams {
    pub position: [f32; 3],
    pub direction: [f32; 3],
    pub reference_distance: f32,
    pub rolloff_factor: f32,
    pub max_distance: f32,
    pub cone_inner_angle: f32,
    pub cone_outer_angle: f32,
    pub cone_outer_gain: f32,
}

/// Abstraction over positional audio backends.
///
/// The session manager receives one at construction and never reaches into
/// engine internals. Implementations: the host's OpenAL-style voice API in
/// game builds, [`MockBackend`] for tests and headless hosts. All methods
/// may be called from session worker threads.
pub trait AudioBackend: Send + Sync {
    /// Allocate a non-looping voice at a fixed position and orientation.
    fn create_voice(&self, params: &VoiceParams) -> Result<VoiceId>;

    /// Allocate `count` buffer handles for queueing on a voice.
    fn create_buffers(&self, count: usize) -> Result<Vec<BufferId>>;

    /// Upload a PCM chunk into `buffer` and append it to the voice's queue.
    fn queue_buffer(
        &self,
        voice: VoiceId,
        buffer: BufferId,
        pcm: &[u8],
        format: PcmFormat,
        sample_rate: u32,
    ) -> Result<()>;

    /// Begin playback of queued buffers.
    fn play(&self, voice: VoiceId) -> Result<()>;

    /// Buffers that finished playing since the last poll, ready for reuse.
    fn processed_buffers(&self, voice: VoiceId) -> Result<Vec<BufferId>>;

    /// Raw gain multiplier; clamped by the backend's own valid range.
    fn set_gain(&self, voice: VoiceId, gain: f32) -> Result<()>;

    /// Stop playback. Must tolerate already-stopped voices.
    fn stop(&self, voice: VoiceId) -> Result<()>;

    /// Release the voice and its buffer handles.
    fn release(&self, voice: VoiceId, buffers: &[BufferId]);
}

#[derive(Debug)]
struct MockVoice {
    params: VoiceParams,
    playing: bool,
    gain: f32,
    queued: Vec<BufferId>,
    done: Vec<BufferId>,
    total_queued: usize,
    starved: bool,
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    voices: HashMap<VoiceId, MockVoice>,
    peak_live: usize,
    auto_complete: bool,
}

/// In-memory [`AudioBackend`] for tests and headless hosts.
///
/// Records allocation and queueing activity so tests can assert on buffer
/// lifecycles. With `auto_complete` enabled every queued buffer is reported
/// processed on the next poll; individual voices can be starved to never
/// complete.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report every queued buffer as processed on the next poll.
    pub fn set_auto_complete(&self, enabled: bool) {
        self.state.lock().auto_complete = enabled;
    }

    /// Make `voice` never report processed buffers, regardless of
    /// auto-complete.
    pub fn starve(&self, voice: VoiceId) {
        if let Some(v) = self.state.lock().voices.get_mut(&voice) {
            v.starved = true;
        }
    }

    /// Move all queued buffers of `voice` to the processed set.
    pub fn complete_queued(&self, voice: VoiceId) {
        if let Some(v) = self.state.lock().voices.get_mut(&voice) {
            let mut queued = std::mem::take(&mut v.queued);
            v.done.append(&mut queued);
        }
    }

    pub fn live_voices(&self) -> usize {
        self.state.lock().voices.len()
    }

    /// Highest number of simultaneously allocated voices ever observed.
    pub fn peak_live_voices(&self) -> usize {
        self.state.lock().peak_live
    }

    pub fn voice_ids(&self) -> Vec<VoiceId> {
        self.state.lock().voices.keys().copied().collect()
    }

    /// Voices within `radius` of `position`.
    pub fn voices_near(&self, position: [f32; 3], radius: f32) -> Vec<VoiceId> {
        let state = self.state.lock();
        state
            .voices
            .iter()
            .filter(|(_, v)| {
                let dx = v.params.position[0] - position[0];
                let dy = v.params.position[1] - position[1];
                let dz = v.params.position[2] - position[2];
                (dx * dx + dy * dy + dz * dz).sqrt() <= radius
            })
            .map(|(id, _)| *id)
            .collect()
    }

    /// Total chunks ever queued on `voice`.
    pub fn total_queued(&self, voice: VoiceId) -> usize {
        self.state
            .lock()
            .voices
            .get(&voice)
            .map_or(0, |v| v.total_queued)
    }

    /// Chunks currently in the voice's queue (in-flight).
    pub fn queue_depth(&self, voice: VoiceId) -> usize {
        self.state
            .lock()
            .voices
            .get(&voice)
            .map_or(0, |v| v.queued.len())
    }

    pub fn gain_of(&self, voice: VoiceId) -> Option<f32> {
        self.state.lock().voices.get(&voice).map(|v| v.gain)
    }

    pub fn is_playing(&self, voice: VoiceId) -> bool {
        self.state
            .lock()
            .voices
            .get(&voice)
            .map_or(false, |v| v.playing)
    }
}

impl AudioBackend for MockBackend {
    fn create_voice(&self, params: &VoiceParams) -> Result<VoiceId> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = VoiceId(state.next_id);
        state.voices.insert(
            id,
            MockVoice {
                params: *params,
                playing: false,
                gain: 1.0,
                queued: Vec::new(),
                done: Vec::new(),
                total_queued: 0,
                starved: false,
            },
        );
        let live = state.voices.len();
        state.peak_live = state.peak_live.max(live);
        Ok(id)
    }

    fn create_buffers(&self, count: usize) -> Result<Vec<BufferId>> {
        let mut state = self.state.lock();
        let mut buffers = Vec::with_capacity(count);
        for _ in 0..count {
            state.next_id += 1;
            buffers.push(BufferId(state.next_id));
        }
        Ok(buffers)
    }

    fn queue_buffer(
        &self,
        voice: VoiceId,
        buffer: BufferId,
        pcm: &[u8],
        _format: PcmFormat,
        _sample_rate: u32,
    ) -> Result<()> {
        if pcm.is_empty() {
            return Err(SoundError::Backend("empty PCM chunk".to_string()));
        }

        let mut state = self.state.lock();
        let voice = state
            .voices
            .get_mut(&voice)
            .ok_or_else(|| SoundError::Backend("unknown voice".to_string()))?;
        voice.queued.push(buffer);
        voice.total_queued += 1;
        Ok(())
    }

    fn play(&self, voice: VoiceId) -> Result<()> {
        let mut state = self.state.lock();
        let voice = state
            .voices
            .get_mut(&voice)
            .ok_or_else(|| SoundError::Backend("unknown voice".to_string()))?;
        voice.playing = true;
        Ok(())
    }

    fn processed_buffers(&self, voice: VoiceId) -> Result<Vec<BufferId>> {
        let mut state = self.state.lock();
        let auto = state.auto_complete;
        let voice = state
            .voices
            .get_mut(&voice)
            .ok_or_else(|| SoundError::Backend("unknown voice".to_string()))?;

        if auto && !voice.starved {
            let mut queued = std::mem::take(&mut voice.queued);
            voice.done.append(&mut queued);
        }

        Ok(std::mem::take(&mut voice.done))
    }

    fn set_gain(&self, voice: VoiceId, gain: f32) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(v) = state.voices.get_mut(&voice) {
            v.gain = gain;
        }
        Ok(())
    }

    fn stop(&self, voice: VoiceId) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(v) = state.voices.get_mut(&voice) {
            v.playing = false;
        }
        Ok(())
    }

    fn release(&self, voice: VoiceId, _buffers: &[BufferId]) {
        self.state.lock().voices.remove(&voice);
    }
}
