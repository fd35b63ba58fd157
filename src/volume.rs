//! Sound-pressure propagation model.
//!
//! Pure calculations converting SPL, distance and coherent multi-source
//! combination into a playback gain for the local listener.

use crate::types::BlockPos;
use crate::wire::ConnectionLookup;
use crate::world::{ObjectKind, WorldQuery};

/// Gain sentinel for "nothing audible here".
pub const NO_VOLUME: f32 = -80.0;

/// Base loudness of the sound-source home itself, in dB.
const SOURCE_BASE_DB: f64 = 50.0;

/// Base loudness of each linked speaker, in dB.
const SPEAKER_BASE_DB: f64 = 90.0;

/// World distances are huge compared to rooms, so speaker falloff is scaled
/// down to keep linked speakers audible.
const SPEAKER_DISTANCE_SCALE: f64 = 1.5;

/// Distances are clamped to this to avoid the singularity at 0.
const MIN_DISTANCE: f64 = 1e-4;

/// Inverse-distance attenuation anchored at a 1 meter reference.
///
/// <https://en.wikipedia.org/wiki/Sound_pressure#Distance>
pub fn spl_over_distance(base_spl: f64, distance_meter: f64) -> f64 {
    let measure_distance_meter = 1.0;
    let dl = measure_distance_meter + 20.0 * (distance_meter / measure_distance_meter).ln();

    base_spl - dl
}

/// Combine independent coherent sources into one SPL.
///
/// <http://www.sengpielaudio.com/calculator-coherentsources.htm>
pub fn coherent_pressure(spls: &[f64]) -> f64 {
    20.0 * spls
        .iter()
        .map(|spl| 10f64.powf(spl / 20.0))
        .sum::<f64>()
        .log10()
}

/// Playback gain for the local listener, given a session's home position.
///
/// Combines the home source (50 dB) with every linked speaker (90 dB each,
/// distance scaled by 1/1.5) coherently. Returns [`NO_VOLUME`] when `pos`
/// holds no sound-source home or the listener is elsewhere, and 0.0 when
/// the combination is non-finite.
pub fn gain_for_listener(
    world: &dyn WorldQuery,
    graph: &dyn ConnectionLookup,
    world_id: i32,
    pos: BlockPos,
) -> f32 {
    if world.object_kind_at(world_id, pos) != ObjectKind::Home {
        return NO_VOLUME;
    }

    let head = match world.listener_position(world_id) {
        Some(head) => head,
        None => return NO_VOLUME,
    };

    let home_distance = head.distance_to(pos.as_vec3()).max(MIN_DISTANCE);
    let mut spls = vec![spl_over_distance(SOURCE_BASE_DB, home_distance)];

    for linked in graph.linked_positions(world_id, pos) {
        if world.object_kind_at(world_id, linked) != ObjectKind::Speaker {
            continue;
        }

        let distance = (head.distance_to(linked.as_vec3()) / SPEAKER_DISTANCE_SCALE)
            .max(MIN_DISTANCE);
        spls.push(spl_over_distance(SPEAKER_BASE_DB, distance));
    }

    let audible = coherent_pressure(&spls);
    let gain = NO_VOLUME + audible as f32;

    if gain.is_finite() {
        gain
    } else {
        0.0
    }
}
