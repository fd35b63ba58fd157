//! Playback session registry.
//!
//! Tracks which (position, world) keys are currently playing, spawns one
//! worker per session and tears sessions down on stop, stream exhaustion
//! and chunk/world unload.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;

use crate::config::Config;
use crate::download;
use crate::error::{Result, SoundError};
use crate::events::{Event, EventBus};
use crate::sound::backend::AudioBackend;
use crate::sound::decode::PcmStream;
use crate::sound::icy;
use crate::sound::player::{self, SessionContext};
use crate::types::{BlockPos, PlaybackKey, Sound};
use crate::wire::ConnectionLookup;
use crate::world::WorldQuery;

/// Lifecycle of one session, queryable by key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Downloading,
    Playing,
    Stopped,
}

enum SessionSource {
    /// Download the URL to the cache, then play the file.
    Download { url: String },
    /// Open a live network stream.
    Stream { url: String },
    /// Play an already-local file (warm cache).
    File(PathBuf),
}

struct SessionHandle {
    id: u64,
    sound: Sound,
    state: Arc<Mutex<SessionState>>,
    stop_tx: Sender<()>,
    worker: Option<JoinHandle<()>>,
}

/// Top-level playback controller.
///
/// Owns the active-session map (at most one session per key); the audio
/// backend, world query and connection graph are injected at construction
/// and shared with every session worker.
pub struct SoundManager {
    backend: Arc<dyn AudioBackend>,
    world: Arc<dyn WorldQuery>,
    graph: Arc<dyn ConnectionLookup>,
    config: Config,
    cache_dir: PathBuf,
    sessions: Arc<Mutex<HashMap<PlaybackKey, SessionHandle>>>,
    next_session_id: Arc<Mutex<u64>>,
    /// Serializes session replacement so two play() calls for one key can
    /// never both hold that key's emitter voices.
    replace_lock: Mutex<()>,
    events: EventBus,
}

impl SoundManager {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        world: Arc<dyn WorldQuery>,
        graph: Arc<dyn ConnectionLookup>,
        config: Config,
    ) -> Self {
        Self {
            backend,
            world,
            graph,
            config,
            cache_dir: download::default_cache_dir(),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_session_id: Arc::new(Mutex::new(0)),
            replace_lock: Mutex::new(()),
            events: EventBus::new(),
        }
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Bus carrying download progress and playback lifecycle events for
    /// UI collaborators.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Download and play a sound at `pos`. Any session already at this key
    /// is fully stopped first.
    pub fn play(&self, pos: BlockPos, world_id: i32, sound: Sound) -> Result<()> {
        let url = sound.url.clone();
        self.spawn_session(
            PlaybackKey::new(pos, world_id),
            sound,
            SessionSource::Download { url },
        )
    }

    /// Play a live network stream (icecast-style) at `pos`.
    pub fn play_stream(&self, pos: BlockPos, world_id: i32, sound: Sound) -> Result<()> {
        let url = sound.url.clone();
        self.spawn_session(
            PlaybackKey::new(pos, world_id),
            sound,
            SessionSource::Stream { url },
        )
    }

    /// Play a local file at `pos`, bypassing the download step.
    pub fn play_file(
        &self,
        pos: BlockPos,
        world_id: i32,
        sound: Sound,
        path: impl Into<PathBuf>,
    ) -> Result<()> {
        self.spawn_session(
            PlaybackKey::new(pos, world_id),
            sound,
            SessionSource::File(path.into()),
        )
    }

    /// Stop the session at `pos`, if any. Idempotent: stopping an idle key
    /// is a no-op. Blocks until the worker has released its emitters.
    pub fn stop(&self, pos: BlockPos, world_id: i32) {
        self.stop_key(PlaybackKey::new(pos, world_id));
    }

    /// Stop every session whose position falls within the given chunk.
    pub fn stop_in_chunk(&self, world_id: i32, chunk_x: i32, chunk_z: i32) {
        let keys: Vec<PlaybackKey> = self
            .sessions
            .lock()
            .keys()
            .filter(|k| k.world == world_id && k.pos.chunk() == (chunk_x, chunk_z))
            .copied()
            .collect();

        for key in keys {
            self.stop_key(key);
        }
    }

    /// Stop every session in the given world.
    pub fn stop_in_world(&self, world_id: i32) {
        let keys: Vec<PlaybackKey> = self
            .sessions
            .lock()
            .keys()
            .filter(|k| k.world == world_id)
            .copied()
            .collect();

        for key in keys {
            self.stop_key(key);
        }
    }

    pub fn stop_all(&self) {
        let keys: Vec<PlaybackKey> = self.sessions.lock().keys().copied().collect();
        for key in keys {
            self.stop_key(key);
        }
    }

    pub fn is_playing_at(&self, pos: BlockPos, world_id: i32) -> bool {
        self.sessions
            .lock()
            .contains_key(&PlaybackKey::new(pos, world_id))
    }

    pub fn sound_playing_at(&self, pos: BlockPos, world_id: i32) -> Option<Sound> {
        self.sessions
            .lock()
            .get(&PlaybackKey::new(pos, world_id))
            .map(|h| h.sound.clone())
    }

    pub fn session_state_at(&self, pos: BlockPos, world_id: i32) -> Option<SessionState> {
        self.sessions
            .lock()
            .get(&PlaybackKey::new(pos, world_id))
            .map(|h| *h.state.lock())
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    fn next_id(&self) -> u64 {
        let mut next = self.next_session_id.lock();
        *next += 1;
        *next
    }

    fn spawn_session(&self, key: PlaybackKey, sound: Sound, source: SessionSource) -> Result<()> {
        // Serialize replacement: the old session must be fully torn down
        // before the new one may touch the same emitter hardware.
        let _replacing = self.replace_lock.lock();
        self.stop_key(key);

        tracing::info!("Playing \"{}\" at {}", sound.name, key);

        let id = self.next_id();
        let (stop_tx, stop_rx) = bounded(1);
        let state = Arc::new(Mutex::new(match source {
            SessionSource::Download { .. } => SessionState::Downloading,
            _ => SessionState::Playing,
        }));

        let ctx = SessionContext {
            key,
            backend: Arc::clone(&self.backend),
            world: Arc::clone(&self.world),
            graph: Arc::clone(&self.graph),
            flash_mode: self.config.flash_mode,
            stop_rx,
        };

        let worker_state = Arc::clone(&state);
        let worker_sessions = Arc::clone(&self.sessions);
        let worker_events = self.events.clone();
        let worker_sound = sound.clone();
        let cache_dir = self.cache_dir.clone();

        let worker = thread::Builder::new()
            .name(format!("soundwire-{}-{}", key.world, id))
            .spawn(move || {
                session_main(
                    ctx,
                    worker_sound,
                    source,
                    cache_dir,
                    worker_state,
                    worker_events,
                );

                // Self-remove on natural exit, unless a replacement
                // session already owns the key.
                let mut sessions = worker_sessions.lock();
                if sessions.get(&key).map(|h| h.id) == Some(id) {
                    sessions.remove(&key);
                }
            })
            .map_err(SoundError::ThreadSpawnFailed)?;

        self.sessions.lock().insert(
            key,
            SessionHandle {
                id,
                sound,
                state,
                stop_tx,
                worker: Some(worker),
            },
        );

        Ok(())
    }

    fn stop_key(&self, key: PlaybackKey) {
        let handle = self.sessions.lock().remove(&key);

        if let Some(mut handle) = handle {
            tracing::info!("Stopping sound at {}", key);
            let _ = handle.stop_tx.try_send(());

            // Join outside the registry lock; the worker may briefly hold
            // it while self-removing.
            if let Some(worker) = handle.worker.take() {
                let _ = worker.join();
            }
            *handle.state.lock() = SessionState::Stopped;
        }
    }
}

fn session_main(
    ctx: SessionContext,
    sound: Sound,
    source: SessionSource,
    cache_dir: PathBuf,
    state: Arc<Mutex<SessionState>>,
    events: EventBus,
) {
    let key = ctx.key;
    let result = acquire_and_play(&ctx, &sound, source, &cache_dir, &state, &events);

    match result {
        Ok(()) => tracing::info!("Session {} finished", key),
        Err(SoundError::DownloadFailed { ref url, .. }) => {
            tracing::warn!("Download failed for {}: {}", key, url);
            events.publish(Event::DownloadFailed { key });
        }
        Err(err) => {
            tracing::error!("Session {} failed: {}", key, err);
            events.publish(Event::PlaybackFailed {
                key,
                message: err.to_string(),
            });
        }
    }

    *state.lock() = SessionState::Stopped;
    events.publish(Event::PlaybackStopped { key });
}

fn acquire_and_play(
    ctx: &SessionContext,
    sound: &Sound,
    source: SessionSource,
    cache_dir: &PathBuf,
    state: &Arc<Mutex<SessionState>>,
    events: &EventBus,
) -> Result<()> {
    let key = ctx.key;

    let pcm = match source {
        SessionSource::Download { url } => {
            events.publish(Event::DownloadStarted {
                key,
                name: sound.name.clone(),
            });

            let dest = cache_dir.join(download::cache_file_name(&url));
            let status = download::download(
                &url,
                &dest,
                |current, total| {
                    events.publish(Event::DownloadProgress {
                        key,
                        current,
                        total,
                    });
                },
                || ctx.stopped(),
            )?;

            // A stop during the download aborts before any emitter starts
            if status == download::DownloadStatus::Cancelled || ctx.stopped() {
                return Ok(());
            }
            *state.lock() = SessionState::Playing;
            PcmStream::open_file(&dest)?
        }
        SessionSource::File(path) => PcmStream::open_file(&path)?,
        SessionSource::Stream { url } => {
            let (media, hint) = icy::open_stream(&url)?;
            PcmStream::from_source(media, hint)?
        }
    };

    events.publish(Event::PlaybackStarted {
        key,
        name: sound.name.clone(),
    });

    player::run(ctx, pcm)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Session scenarios (start/stop roundtrip, replacement, lockstep
    // backpressure, bulk unload) live in tests/playback.rs; these cover
    // registry bookkeeping that needs no audio fixture.

    use crate::sound::backend::MockBackend;
    use crate::types::Vec3;
    use crate::wire::ConnectionStore;
    use crate::world::ObjectKind;

    struct EmptyWorld;

    impl WorldQuery for EmptyWorld {
        fn object_kind_at(&self, _: i32, _: BlockPos) -> ObjectKind {
            ObjectKind::None
        }
        fn facing_of(&self, _: i32, _: BlockPos) -> f32 {
            0.0
        }
        fn listener_position(&self, _: i32) -> Option<Vec3> {
            None
        }
        fn add_home_amplitude(&self, _: i32, _: BlockPos, _: f32, _: f32) {}
        fn set_amplitude(&self, _: i32, _: BlockPos, _: f32, _: f32) {}
    }

    fn manager() -> SoundManager {
        SoundManager::new(
            Arc::new(MockBackend::new()),
            Arc::new(EmptyWorld),
            Arc::new(ConnectionStore::new()),
            Config::default(),
        )
    }

    #[test]
    fn test_empty_registry() {
        let manager = manager();
        assert_eq!(manager.active_sessions(), 0);
        assert!(!manager.is_playing_at(BlockPos::new(0, 64, 0), 0));
        assert!(manager.sound_playing_at(BlockPos::new(0, 64, 0), 0).is_none());
    }

    #[test]
    fn test_stop_idle_key_is_noop() {
        let manager = manager();
        manager.stop(BlockPos::new(0, 64, 0), 0);
        manager.stop_in_chunk(0, 0, 0);
        manager.stop_in_world(0);
        manager.stop_all();
        assert_eq!(manager.active_sessions(), 0);
    }

    #[test]
    fn test_failed_session_removes_key() {
        let manager = manager();
        let pos = BlockPos::new(0, 64, 0);
        let sound = Sound::new("missing", "file://missing");

        let (rx, _) = manager.events().subscribe();
        manager
            .play_file(pos, 0, sound, "/nonexistent/file.mp3")
            .unwrap();

        // Worker fails on open and self-removes
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while manager.is_playing_at(pos, 0) && std::time::Instant::now() < deadline {
            thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(!manager.is_playing_at(pos, 0));

        let failed = rx
            .try_iter()
            .any(|e| matches!(e, Event::PlaybackFailed { .. }));
        assert!(failed);
    }
}
