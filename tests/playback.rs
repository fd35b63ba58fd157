//! End-to-end playback session scenarios against the mock backend.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use soundwire::sound::BUFFER_COUNT;
use soundwire::{
    BlockPos, Config, ConnectionStore, Event, MockBackend, ObjectKind, Sound, SoundManager,
    Vec3, WorldQuery,
};

/// Test world: a home block, optional speakers/lights, a fixed listener
/// in world 0, and a record of every envelope pushed at it.
struct TestWorld {
    kinds: Mutex<Vec<(BlockPos, ObjectKind)>>,
    listener_world: i32,
    home_amplitudes: Mutex<Vec<(BlockPos, f32, f32)>>,
    amplitudes: Mutex<Vec<(BlockPos, f32, f32)>>,
}

impl TestWorld {
    fn new(kinds: Vec<(BlockPos, ObjectKind)>) -> Self {
        Self {
            kinds: Mutex::new(kinds),
            listener_world: 0,
            home_amplitudes: Mutex::new(Vec::new()),
            amplitudes: Mutex::new(Vec::new()),
        }
    }
}

impl WorldQuery for TestWorld {
    fn object_kind_at(&self, _world: i32, pos: BlockPos) -> ObjectKind {
        self.kinds
            .lock()
            .iter()
            .find(|(p, _)| *p == pos)
            .map(|(_, k)| *k)
            .unwrap_or(ObjectKind::None)
    }

    fn facing_of(&self, _world: i32, _pos: BlockPos) -> f32 {
        180.0
    }

    fn listener_position(&self, world: i32) -> Option<Vec3> {
        (world == self.listener_world).then(|| Vec3::new(0.0, 66.0, 0.0))
    }

    fn add_home_amplitude(&self, _world: i32, pos: BlockPos, treble: f32, bass: f32) {
        self.home_amplitudes.lock().push((pos, treble, bass));
    }

    fn set_amplitude(&self, _world: i32, pos: BlockPos, treble: f32, bass: f32) {
        self.amplitudes.lock().push((pos, treble, bass));
    }
}

fn sine_wav(seconds: f64) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("track.wav");

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 8000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    let total = (seconds * 8000.0) as usize;
    for i in 0..total {
        let sample = ((i as f64 * 220.0 * 2.0 * std::f64::consts::PI / 8000.0).sin()
            * 12000.0) as i16;
        writer.write_sample(sample).unwrap();
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();

    (dir, path)
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn sound() -> Sound {
    Sound::new("test track", "http://example.com/track.wav")
}

struct Rig {
    backend: Arc<MockBackend>,
    world: Arc<TestWorld>,
    graph: Arc<ConnectionStore>,
    manager: SoundManager,
}

fn rig(kinds: Vec<(BlockPos, ObjectKind)>) -> Rig {
    let backend = Arc::new(MockBackend::new());
    let world = Arc::new(TestWorld::new(kinds));
    let graph = Arc::new(ConnectionStore::new());
    let manager = SoundManager::new(
        Arc::clone(&backend) as Arc<dyn soundwire::AudioBackend>,
        Arc::clone(&world) as Arc<dyn WorldQuery>,
        Arc::clone(&graph) as Arc<dyn soundwire::ConnectionLookup>,
        Config::default(),
    );

    Rig {
        backend,
        world,
        graph,
        manager,
    }
}

#[test]
fn start_then_stop_releases_everything() {
    let home = BlockPos::new(0, 64, 0);
    let r = rig(vec![(home, ObjectKind::Home)]);
    let (_dir, wav) = sine_wav(30.0);

    r.manager.play_file(home, 0, sound(), &wav).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        r.backend.live_voices() == 2
    }));
    assert!(r.manager.is_playing_at(home, 0));
    assert_eq!(r.manager.sound_playing_at(home, 0).unwrap().name, "test track");

    r.manager.stop(home, 0);

    // Zero emitters allocated, key removed
    assert_eq!(r.backend.live_voices(), 0);
    assert!(!r.manager.is_playing_at(home, 0));
    assert_eq!(r.manager.active_sessions(), 0);
}

#[test]
fn stream_exhaustion_tears_down_session() {
    let home = BlockPos::new(0, 64, 0);
    let r = rig(vec![(home, ObjectKind::Home)]);
    r.backend.set_auto_complete(true);
    let (_dir, wav) = sine_wav(2.0);

    r.manager.play_file(home, 0, sound(), &wav).unwrap();

    assert!(wait_until(Duration::from_secs(10), || {
        !r.manager.is_playing_at(home, 0)
    }));
    assert_eq!(r.backend.live_voices(), 0);

    // The analyzer saw the stream: home envelopes were pushed
    assert!(!r.world.home_amplitudes.lock().is_empty());
}

#[test]
fn replacement_never_overlaps_voices() {
    let home = BlockPos::new(0, 64, 0);
    let r = rig(vec![(home, ObjectKind::Home)]);
    let (_dir, wav) = sine_wav(30.0);

    r.manager.play_file(home, 0, sound(), &wav).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        r.backend.live_voices() == 2
    }));

    // Replace the running session at the same key several times
    for _ in 0..3 {
        r.manager
            .play_file(home, 0, Sound::new("other", "http://example.com/b.wav"), &wav)
            .unwrap();
        assert!(wait_until(Duration::from_secs(5), || {
            r.backend.live_voices() == 2
        }));
        assert_eq!(r.manager.active_sessions(), 1);
    }

    // Old sessions were always fully stopped before the new one started
    assert_eq!(r.backend.peak_live_voices(), 2);

    r.manager.stop_all();
    assert_eq!(r.backend.live_voices(), 0);
}

#[test]
fn lockstep_gate_blocks_on_starved_pair() {
    let home = BlockPos::new(0, 64, 0);
    let speakers = [
        BlockPos::new(4, 64, 0),
        BlockPos::new(0, 64, 4),
        BlockPos::new(4, 64, 4),
    ];

    let mut kinds = vec![(home, ObjectKind::Home)];
    for s in speakers {
        kinds.push((s, ObjectKind::Speaker));
    }
    let r = rig(kinds);
    for s in speakers {
        r.graph.connect(0, home, s, 16.0).unwrap();
    }

    let (_dir, wav) = sine_wav(60.0);

    r.manager.play_file(home, 0, sound(), &wav).unwrap();

    // Home + 3 speakers, stereo pairs: 8 voices
    assert!(wait_until(Duration::from_secs(5), || {
        r.backend.live_voices() == 8
    }));

    // Nothing completes yet, so every ring fills and the session stalls
    assert!(wait_until(Duration::from_secs(5), || {
        r.backend
            .voice_ids()
            .iter()
            .all(|v| r.backend.total_queued(*v) == BUFFER_COUNT)
    }));

    // Starve both halves of one speaker's pair, let everything else drain
    let starved = r.backend.voices_near([4.5, 64.5, 0.5], 0.1);
    assert_eq!(starved.len(), 2);
    for v in &starved {
        r.backend.starve(*v);
    }
    r.backend.set_auto_complete(true);

    // The fed pairs empty their queues, but the all-pairs-free gate keeps
    // any of them from consuming further chunks
    assert!(wait_until(Duration::from_secs(5), || {
        r.backend
            .voice_ids()
            .iter()
            .filter(|v| !starved.contains(*v))
            .all(|v| r.backend.queue_depth(*v) == 0)
    }));
    std::thread::sleep(Duration::from_millis(100));

    for v in r.backend.voice_ids() {
        assert_eq!(r.backend.total_queued(v), BUFFER_COUNT);
    }
    for v in &starved {
        assert_eq!(r.backend.queue_depth(*v), BUFFER_COUNT);
    }

    // Still alive, just blocked
    assert!(r.manager.is_playing_at(home, 0));

    r.manager.stop(home, 0);
    assert_eq!(r.backend.live_voices(), 0);
}

#[test]
fn download_failure_aborts_without_voices() {
    let home = BlockPos::new(0, 64, 0);
    let r = rig(vec![(home, ObjectKind::Home)]);
    let (events, _) = r.manager.events().subscribe();

    // Nothing listens on port 1: connection refused
    r.manager
        .play(home, 0, Sound::new("refused", "http://127.0.0.1:1/x.mp3"))
        .unwrap();

    assert!(wait_until(Duration::from_secs(10), || {
        !r.manager.is_playing_at(home, 0)
    }));

    // The session failed before any emitter was allocated
    assert_eq!(r.backend.peak_live_voices(), 0);
    let failed = events
        .try_iter()
        .any(|e| matches!(e, Event::DownloadFailed { .. }));
    assert!(failed);
}

#[test]
fn chunk_unload_stops_only_that_region() {
    let near = BlockPos::new(2, 64, 2); // chunk (0, 0)
    let far = BlockPos::new(100, 64, 100); // chunk (6, 6)
    let r = rig(vec![(near, ObjectKind::Home), (far, ObjectKind::Home)]);
    let (_dir, wav) = sine_wav(30.0);

    r.manager.play_file(near, 0, sound(), &wav).unwrap();
    r.manager.play_file(far, 0, sound(), &wav).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        r.backend.live_voices() == 4
    }));

    r.manager.stop_in_chunk(0, 0, 0);

    assert!(!r.manager.is_playing_at(near, 0));
    assert!(r.manager.is_playing_at(far, 0));
    assert_eq!(r.backend.live_voices(), 2);

    r.manager.stop_all();
}

#[test]
fn world_unload_stops_only_that_world() {
    let pos = BlockPos::new(0, 64, 0);
    let r = rig(vec![(pos, ObjectKind::Home)]);
    let (_dir, wav) = sine_wav(30.0);

    r.manager.play_file(pos, 0, sound(), &wav).unwrap();
    r.manager.play_file(pos, -1, sound(), &wav).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        r.manager.active_sessions() == 2
    }));

    r.manager.stop_in_world(-1);

    assert!(r.manager.is_playing_at(pos, 0));
    assert!(!r.manager.is_playing_at(pos, -1));

    r.manager.stop_all();
    assert_eq!(r.manager.active_sessions(), 0);
}

#[test]
fn linked_lights_receive_clamped_envelopes() {
    let home = BlockPos::new(0, 64, 0);
    let light = BlockPos::new(3, 64, 0);
    let r = rig(vec![(home, ObjectKind::Home), (light, ObjectKind::Amplitude)]);
    r.graph.connect(0, home, light, 16.0).unwrap();
    r.backend.set_auto_complete(true);

    let (_dir, wav) = sine_wav(2.0);
    r.manager.play_file(home, 0, sound(), &wav).unwrap();

    assert!(wait_until(Duration::from_secs(10), || {
        !r.manager.is_playing_at(home, 0)
    }));

    // Lights are not speakers: only the home pair existed
    assert_eq!(r.backend.peak_live_voices(), 2);

    let pushed = r.world.amplitudes.lock();
    assert!(!pushed.is_empty());
    assert!(pushed.iter().all(|(p, _, _)| *p == light));
}
