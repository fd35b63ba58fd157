//! Live audio streaming and mixing pipeline.
//!
//! ## Architecture
//!
//! ```text
//! SoundManager
//!   └── session worker (one thread per PlaybackKey)
//!       ├── PcmStream       (download/icy source -> 16-bit PCM chunks)
//!       ├── StereoEmitterPair (home)   ─┐
//!       ├── StereoEmitterPair (speaker) ┤ lockstep chunk fan-out
//!       └── StereoEmitterPair (speaker) ┘
//!
//! Each StereoEmitterPair has two Emitters, each owning a ring of 8
//! backend buffers. A chunk is pulled only when every pair has a free
//! buffer; the same chunk also feeds the waveform analyzer for the
//! connected lighting effects.
//! ```

pub mod backend;
pub mod decode;
pub mod emitter;
pub mod icy;
pub mod manager;
mod player;

pub use backend::{AudioBackend, BufferId, MockBackend, PcmFormat, VoiceId, VoiceParams};
pub use decode::PcmStream;
pub use emitter::{Emitter, StereoEmitterPair, BUFFER_COUNT};
pub use manager::{SessionState, SoundManager};
