use crate::types::{BlockPos, Vec3};

/// What kind of wired object occupies a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// A sound-source home (record player, radio): owns playback sessions.
    Home,
    /// An amplifying speaker: receives the stream at its own position.
    Speaker,
    /// An amplitude-reactive object (light, laser): receives envelope values.
    Amplitude,
    /// Nothing recognized at this position.
    None,
}

/// World query capability injected into the mixing core.
///
/// The core never touches engine globals; the host wires this to its own
/// world/tile lookup. Implementations must be callable from session worker
/// threads.
pub trait WorldQuery: Send + Sync {
    fn object_kind_at(&self, world: i32, pos: BlockPos) -> ObjectKind;

    /// Facing of the object at `pos` in degrees (yaw). 0.0 when unknown.
    fn facing_of(&self, world: i32, pos: BlockPos) -> f32;

    /// Eye position of the local listener, or `None` when the listener is
    /// not in that world.
    fn listener_position(&self, world: i32) -> Option<Vec3>;

    /// Push unclamped treble/bass envelopes to the home object at `pos`.
    fn add_home_amplitude(&self, world: i32, pos: BlockPos, treble: f32, bass: f32);

    /// Push clamped flash levels to an amplitude-reactive object at `pos`.
    fn set_amplitude(&self, world: i32, pos: BlockPos, treble: f32, bass: f32);
}
