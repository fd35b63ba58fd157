//! Per-session decode loop: the mixing and backpressure core.
//!
//! Each session owns one worker that pulls decoded chunks and fans them
//! out to every emitter pair in lockstep. The loop blocks only on pipeline
//! I/O and on the all-pairs-free buffer gate; cancellation is observed
//! between those points.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, TryRecvError};

use crate::error::Result;
use crate::sound::backend::AudioBackend;
use crate::sound::decode::PcmStream;
use crate::sound::emitter::StereoEmitterPair;
use crate::types::PlaybackKey;
use crate::volume;
use crate::waveform::{self, Band};
use crate::wire::ConnectionLookup;
use crate::world::{ObjectKind, WorldQuery};

/// Poll interval while waiting for a free buffer on every pair.
const GATE_POLL: Duration = Duration::from_millis(1);

pub(crate) struct SessionContext {
    pub key: PlaybackKey,
    pub backend: Arc<dyn AudioBackend>,
    pub world: Arc<dyn WorldQuery>,
    pub graph: Arc<dyn ConnectionLookup>,
    pub flash_mode: u8,
    pub stop_rx: Receiver<()>,
}

impl SessionContext {
    /// Cooperative cancellation: an explicit signal or a dropped sender
    /// both stop the session.
    pub(crate) fn stopped(&self) -> bool {
        matches!(
            self.stop_rx.try_recv(),
            Ok(()) | Err(TryRecvError::Disconnected)
        )
    }
}

/// Drive one decoded stream through every linked emitter until exhaustion
/// or cancellation. Emitters are fully released on all exit paths.
pub(crate) fn run(ctx: &SessionContext, mut pcm: PcmStream) -> Result<()> {
    let mut pairs = build_pairs(ctx, &pcm)?;

    tracing::info!(
        "Session {} playing through {} emitter pair(s)",
        ctx.key,
        pairs.len()
    );

    let result = decode_loop(ctx, &mut pcm, &mut pairs);

    for pair in pairs.iter_mut() {
        pair.stop();
    }

    result
}

/// One pair per resolved position: the home plus every directly linked
/// speaker-type object. Partial start failures release what was started.
fn build_pairs(ctx: &SessionContext, pcm: &PcmStream) -> Result<Vec<StereoEmitterPair>> {
    let home = ctx.key.pos;
    let world_id = ctx.key.world;

    let mut positions = vec![home];
    for linked in ctx.graph.linked_positions(world_id, home) {
        if ctx.world.object_kind_at(world_id, linked) == ObjectKind::Speaker {
            positions.push(linked);
        }
    }

    let mut pairs: Vec<StereoEmitterPair> = Vec::with_capacity(positions.len());
    for pos in positions {
        let facing = ctx.world.facing_of(world_id, pos);
        let mut pair = StereoEmitterPair::new(
            &ctx.backend,
            pos,
            facing,
            pcm.pcm_format(),
            pcm.sample_rate(),
        );

        if let Err(err) = pair.start() {
            for started in pairs.iter_mut() {
                started.stop();
            }
            pair.stop();
            return Err(err);
        }
        pairs.push(pair);
    }

    Ok(pairs)
}

fn decode_loop(
    ctx: &SessionContext,
    pcm: &mut PcmStream,
    pairs: &mut [StereoEmitterPair],
) -> Result<()> {
    loop {
        if ctx.stopped() {
            tracing::debug!("Session {} stopped", ctx.key);
            return Ok(());
        }

        for pair in pairs.iter_mut() {
            pair.reclaim_processed()?;
        }

        let gain = volume::gain_for_listener(&*ctx.world, &*ctx.graph, ctx.key.world, ctx.key.pos);
        for pair in pairs.iter_mut() {
            pair.set_gain(gain)?;
        }

        // Backpressure gate: advance only when every pair can take a
        // chunk, keeping all linked speakers in sync.
        if !pairs.iter().all(|p| p.has_free_buffer()) {
            thread::sleep(GATE_POLL);
            continue;
        }

        let chunk = match pcm.next_chunk()? {
            Some(chunk) => chunk,
            None => {
                tracing::debug!("Session {} exhausted its stream", ctx.key);
                return Ok(());
            }
        };

        for pair in pairs.iter_mut() {
            pair.enqueue_chunk(&chunk)?;
        }

        update_lights(ctx, &chunk);
    }
}

/// Feed the raw chunk to the waveform analyzer: unclamped envelopes on the
/// home object, clamped flash levels on every linked amplitude-reactive
/// object. Skipped when the listener is not in the session's world.
fn update_lights(ctx: &SessionContext, chunk: &[u8]) {
    let world_id = ctx.key.world;
    let home = ctx.key.pos;

    if ctx.world.listener_position(world_id).is_none() {
        return;
    }
    if ctx.world.object_kind_at(world_id, home) != ObjectKind::Home {
        return;
    }

    let treble = waveform::extract_envelope(chunk, Band::Treble, false, ctx.flash_mode);
    let bass = waveform::extract_envelope(chunk, Band::Bass, false, ctx.flash_mode);
    ctx.world.add_home_amplitude(world_id, home, treble, bass);

    let mut clamped: Option<(f32, f32)> = None;

    for linked in ctx.graph.linked_positions(world_id, home) {
        if ctx.world.object_kind_at(world_id, linked) != ObjectKind::Amplitude {
            continue;
        }

        let (treble, bass) = *clamped.get_or_insert_with(|| {
            (
                waveform::extract_envelope(chunk, Band::Treble, true, ctx.flash_mode),
                waveform::extract_envelope(chunk, Band::Bass, true, ctx.flash_mode),
            )
        });
        ctx.world.set_amplitude(world_id, linked, treble, bass);
    }
}
