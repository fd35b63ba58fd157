use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::{Result, SoundError};
use crate::sound::backend::{AudioBackend, BufferId, PcmFormat, VoiceId, VoiceParams};
use crate::types::BlockPos;

/// Buffer ring size per emitter.
pub const BUFFER_COUNT: usize = 8;

/// Lateral offset of each half of a stereo pair, in blocks.
const STEREO_OFFSET: f32 = 0.01;

/// Reference distance is deliberately tiny: loud "inside" the source
/// block, attenuating quickly outside it.
const REFERENCE_DISTANCE: f32 = 0.05;
const ROLLOFF_FACTOR: f32 = 0.4;
const MAX_DISTANCE: f32 = 50.0;
const CONE_INNER_ANGLE: f32 = 60.0;
const CONE_OUTER_ANGLE: f32 = 90.0;
const CONE_OUTER_GAIN: f32 = 0.2;

/// One 3-D positioned mono voice with its own buffer ring.
///
/// The ring of [`BUFFER_COUNT`] hardware buffers is partitioned into
/// in-flight (queued on the voice) and free (consumed, reusable); the two
/// always sum to [`BUFFER_COUNT`]. A chunk is only written to a free buffer.
pub struct Emitter {
    backend: Arc<dyn AudioBackend>,
    position: [f32; 3],
    direction: [f32; 3],
    voice: Option<VoiceId>,
    free: VecDeque<BufferId>,
    in_flight: Vec<BufferId>,
    started: bool,
}

impl Emitter {
    pub fn new(backend: Arc<dyn AudioBackend>, position: [f32; 3], facing_degrees: f32) -> Self {
        let yaw = facing_degrees.to_radians();
        // Yaw-degrees to a horizontal unit direction vector
        let direction = [-yaw.sin(), 0.0, yaw.cos()];

        Self {
            backend,
            position,
            direction,
            voice: None,
            free: VecDeque::new(),
            in_flight: Vec::new(),
            started: false,
        }
    }

    /// Allocate the voice and buffer ring. All buffers start free;
    /// playback begins on the first enqueue.
    pub fn start(&mut self) -> Result<()> {
        let params = VoiceParams {
            position: self.position,
            direction: self.direction,
            reference_distance: REFERENCE_DISTANCE,
            rolloff_factor: ROLLOFF_FACTOR,
            max_distance: MAX_DISTANCE,
            cone_inner_angle: CONE_INNER_ANGLE,
            cone_outer_angle: CONE_OUTER_ANGLE,
            cone_outer_gain: CONE_OUTER_GAIN,
        };

        let voice = self.backend.create_voice(&params)?;
        match self.backend.create_buffers(BUFFER_COUNT) {
            Ok(buffers) => {
                self.free = buffers.into();
                self.voice = Some(voice);
                Ok(())
            }
            Err(err) => {
                // Don't leak the voice on partial allocation
                self.backend.release(voice, &[]);
                Err(err)
            }
        }
    }

    pub fn has_free_buffer(&self) -> bool {
        !self.free.is_empty()
    }

    /// Poll the backend for finished buffers and return them to the free
    /// set. Must run before each scheduling decision.
    pub fn reclaim_processed(&mut self) -> Result<()> {
        let voice = match self.voice {
            Some(voice) => voice,
            None => return Ok(()),
        };

        for buffer in self.backend.processed_buffers(voice)? {
            if let Some(index) = self.in_flight.iter().position(|b| *b == buffer) {
                self.in_flight.swap_remove(index);
                self.free.push_back(buffer);
            }
        }
        Ok(())
    }

    /// Claim a free buffer, upload the chunk and append it to the voice's
    /// queue. The very first enqueue starts playback.
    pub fn enqueue(&mut self, pcm: &[u8], format: PcmFormat, sample_rate: u32) -> Result<()> {
        let voice = self.voice.ok_or(SoundError::NotStarted)?;
        let buffer = self.free.pop_front().ok_or(SoundError::NoFreeBuffer)?;

        if let Err(err) = self.backend.queue_buffer(voice, buffer, pcm, format, sample_rate) {
            self.free.push_front(buffer);
            return Err(err);
        }
        self.in_flight.push(buffer);

        if !self.started {
            self.backend.play(voice)?;
            self.started = true;
        }
        Ok(())
    }

    /// Apply the computed listener gain. The backend convention doubles
    /// the raw multiplier.
    pub fn set_gain(&mut self, gain: f32) -> Result<()> {
        if let Some(voice) = self.voice {
            self.backend.set_gain(voice, gain * 2.0)?;
        }
        Ok(())
    }

    /// Stop playback and release the voice and all buffers. Idempotent:
    /// sessions tear down from multiple trigger paths and must not
    /// double-free.
    pub fn stop(&mut self) {
        if let Some(voice) = self.voice.take() {
            if let Err(err) = self.backend.stop(voice) {
                tracing::warn!("Failed to stop voice: {}", err);
            }

            let mut buffers: Vec<BufferId> = self.free.drain(..).collect();
            buffers.append(&mut self.in_flight);
            self.backend.release(voice, &buffers);
            self.started = false;
        }
    }
}

impl Drop for Emitter {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Two emitters faking stereo imaging on a mono-per-voice backend.
///
/// The halves sit [`STEREO_OFFSET`] blocks either side of the shared
/// position. Interleaved stereo chunks are split by 4-byte sample frames
/// into left/right mono streams; mono chunks are mirrored to both halves.
pub struct StereoEmitterPair {
    left: Emitter,
    right: Emitter,
    format: PcmFormat,
    sample_rate: u32,
}

impl StereoEmitterPair {
    pub fn new(
        backend: &Arc<dyn AudioBackend>,
        pos: BlockPos,
        facing_degrees: f32,
        format: PcmFormat,
        sample_rate: u32,
    ) -> Self {
        let center = [
            pos.x as f32 + 0.5,
            pos.y as f32 + 0.5,
            pos.z as f32 + 0.5,
        ];
        let left_pos = [center[0] - STEREO_OFFSET, center[1], center[2]];
        let right_pos = [center[0] + STEREO_OFFSET, center[1], center[2]];

        Self {
            left: Emitter::new(Arc::clone(backend), left_pos, facing_degrees),
            right: Emitter::new(Arc::clone(backend), right_pos, facing_degrees),
            format,
            sample_rate,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        self.left.start()?;
        self.right.start()
    }

    pub fn has_free_buffer(&self) -> bool {
        self.left.has_free_buffer() && self.right.has_free_buffer()
    }

    pub fn reclaim_processed(&mut self) -> Result<()> {
        self.left.reclaim_processed()?;
        self.right.reclaim_processed()
    }

    pub fn set_gain(&mut self, gain: f32) -> Result<()> {
        self.left.set_gain(gain)?;
        self.right.set_gain(gain)
    }

    /// Enqueue one decoded chunk, splitting stereo interleave per half.
    pub fn enqueue_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        match self.format {
            PcmFormat::Stereo16 => {
                let (left, right) = split_stereo(chunk);
                self.left.enqueue(&left, PcmFormat::Mono16, self.sample_rate)?;
                self.right.enqueue(&right, PcmFormat::Mono16, self.sample_rate)
            }
            PcmFormat::Mono16 => {
                self.left.enqueue(chunk, PcmFormat::Mono16, self.sample_rate)?;
                self.right.enqueue(chunk, PcmFormat::Mono16, self.sample_rate)
            }
        }
    }

    pub fn stop(&mut self) {
        self.left.stop();
        self.right.stop();
    }
}

/// Split interleaved 16-bit stereo into two mono byte streams. Trailing
/// bytes short of a full 4-byte frame are dropped.
pub fn split_stereo(chunk: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut left = Vec::with_capacity(chunk.len() / 2);
    let mut right = Vec::with_capacity(chunk.len() / 2);

    for frame in chunk.chunks_exact(4) {
        left.extend_from_slice(&frame[0..2]);
        right.extend_from_slice(&frame[2..4]);
    }

    (left, right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sound::backend::MockBackend;

    fn backend() -> Arc<MockBackend> {
        Arc::new(MockBackend::new())
    }

    fn emitter(mock: &Arc<MockBackend>) -> Emitter {
        let backend: Arc<dyn AudioBackend> = Arc::clone(mock) as Arc<dyn AudioBackend>;
        Emitter::new(backend, [0.5, 64.5, 0.5], 90.0)
    }

    #[test]
    fn test_buffer_ring_partition() {
        let mock = backend();
        let mut em = emitter(&mock);
        em.start().unwrap();

        assert!(em.has_free_buffer());
        assert_eq!(em.free.len() + em.in_flight.len(), BUFFER_COUNT);

        let chunk = vec![1u8; 64];
        for _ in 0..BUFFER_COUNT {
            em.enqueue(&chunk, PcmFormat::Mono16, 8000).unwrap();
            assert_eq!(em.free.len() + em.in_flight.len(), BUFFER_COUNT);
        }

        assert!(!em.has_free_buffer());
        assert!(matches!(
            em.enqueue(&chunk, PcmFormat::Mono16, 8000),
            Err(SoundError::NoFreeBuffer)
        ));
    }

    #[test]
    fn test_reclaim_returns_buffers() {
        let mock = backend();
        let mut em = emitter(&mock);
        em.start().unwrap();

        let chunk = vec![1u8; 64];
        for _ in 0..BUFFER_COUNT {
            em.enqueue(&chunk, PcmFormat::Mono16, 8000).unwrap();
        }
        assert!(!em.has_free_buffer());

        let voice = mock.voice_ids()[0];
        mock.complete_queued(voice);
        em.reclaim_processed().unwrap();

        assert!(em.has_free_buffer());
        assert_eq!(em.free.len(), BUFFER_COUNT);
        assert!(em.in_flight.is_empty());
    }

    #[test]
    fn test_first_enqueue_starts_playback() {
        let mock = backend();
        let mut em = emitter(&mock);
        em.start().unwrap();

        let voice = mock.voice_ids()[0];
        assert!(!mock.is_playing(voice));

        em.enqueue(&[1u8; 64], PcmFormat::Mono16, 8000).unwrap();
        assert!(mock.is_playing(voice));
    }

    #[test]
    fn test_enqueue_before_start() {
        let mock = backend();
        let mut em = emitter(&mock);
        assert!(matches!(
            em.enqueue(&[1u8; 4], PcmFormat::Mono16, 8000),
            Err(SoundError::NotStarted)
        ));
    }

    #[test]
    fn test_gain_is_doubled() {
        let mock = backend();
        let mut em = emitter(&mock);
        em.start().unwrap();

        em.set_gain(0.4).unwrap();
        let voice = mock.voice_ids()[0];
        assert_eq!(mock.gain_of(voice), Some(0.8));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mock = backend();
        let mut em = emitter(&mock);
        em.start().unwrap();
        assert_eq!(mock.live_voices(), 1);

        em.stop();
        assert_eq!(mock.live_voices(), 0);
        em.stop(); // no-op, never an error
        assert_eq!(mock.live_voices(), 0);
    }

    #[test]
    fn test_split_stereo_interleave() {
        // Frames: (L0 L1 | R0 R1)
        let chunk = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let (left, right) = split_stereo(&chunk);
        assert_eq!(left, vec![1, 2, 5, 6]);
        assert_eq!(right, vec![3, 4, 7, 8]);
    }

    #[test]
    fn test_split_stereo_drops_partial_frame() {
        let chunk = [1u8, 2, 3, 4, 5, 6];
        let (left, right) = split_stereo(&chunk);
        assert_eq!(left, vec![1, 2]);
        assert_eq!(right, vec![3, 4]);
    }

    #[test]
    fn test_pair_offsets_and_split() {
        let mock = backend();
        let backend_dyn: Arc<dyn AudioBackend> = Arc::clone(&mock) as Arc<dyn AudioBackend>;
        let mut pair = StereoEmitterPair::new(
            &backend_dyn,
            BlockPos::new(0, 64, 0),
            0.0,
            PcmFormat::Stereo16,
            8000,
        );
        pair.start().unwrap();

        assert_eq!(mock.live_voices(), 2);
        assert_eq!(mock.voices_near([0.5 - 0.01, 64.5, 0.5], 0.001).len(), 1);
        assert_eq!(mock.voices_near([0.5 + 0.01, 64.5, 0.5], 0.001).len(), 1);

        pair.enqueue_chunk(&[1u8, 2, 3, 4]).unwrap();
        for voice in mock.voice_ids() {
            assert_eq!(mock.total_queued(voice), 1);
        }

        pair.stop();
        assert_eq!(mock.live_voices(), 0);
    }
}
