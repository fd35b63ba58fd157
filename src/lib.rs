//! Spatial audio streaming and mixing for wired in-world speaker
//! networks.
//!
//! The crate downloads or streams remote audio, decodes it incrementally
//! to 16-bit PCM, fans each chunk out to every 3-D emitter linked to the
//! playing object, recomputes perceived loudness from a coherent-source
//! sound-pressure model, and derives beat-reactive envelope values for
//! connected lighting effects.
//!
//! The host engine supplies three capabilities at construction: an
//! [`AudioBackend`] (positional voices and buffer queues), a
//! [`WorldQuery`] (what lives where, listener position) and a
//! [`ConnectionLookup`] (the wire topology). Everything else is owned
//! here.

pub mod config;
pub mod download;
pub mod error;
pub mod events;
pub mod sound;
pub mod types;
pub mod volume;
pub mod waveform;
pub mod wire;
pub mod world;

pub use config::Config;
pub use error::{ConnectionError, SoundError};
pub use events::{Event, EventBus};
pub use sound::{AudioBackend, MockBackend, PcmFormat, SessionState, SoundManager};
pub use types::{BlockPos, PlaybackKey, Sound, Vec3};
pub use wire::{Connection, ConnectionLookup, ConnectionStore};
pub use world::{ObjectKind, WorldQuery};
