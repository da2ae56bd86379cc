// Session: the public entry point. Owns every shared subsystem, spawns one
// thread per zone plus the triage and checkpoint threads, and exposes the
// synchronous post/update/query/delete/suspend/resume/close/destroy/flush/
// save/set_checkpoint_frequency/get_stats surface a consumer drives
// (spec.md §6). `Config::new(path)...open(mode)` mirrors the teacher's own
// `Config::new(folder).open()` builder shape.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::chapter_writer::ChapterWriterHandle;
use crate::checkpoint::CheckpointState;
use crate::error::{Error, Result};
use crate::funnel_queue::FunnelQueue;
use crate::geometry::Geometry;
use crate::layout::{ChapterRemap, ConfigRecord, Layout, SaveMode};
use crate::load_context::LoadContext;
use crate::name::RecordName;
use crate::open_chapter::OpenChapter;
use crate::rebuild;
use crate::request::{Outcome, PendingRequest, Reply, RequestKind};
use crate::sparse_cache::SparseCache;
use crate::stats::{IndexStats, VolumeStats, ZoneStats};
use crate::triage;
use crate::volume::Volume;
use crate::volume_index::VolumeIndex;
use crate::zone::{ControlMessage, IndexZone, ZoneMessage, ZoneShared, ZoneSnapshot};

const DEFAULT_CACHE_CHAPTERS: u32 = 4;
const DEFAULT_READ_THREADS: u32 = 1;

/// How `Config::open` should interpret the files at its path.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OpenMode {
    /// Start a fresh, empty volume, discarding anything already there.
    Create,
    /// Restore from the latest valid save slot; fails with
    /// `Error::NotSavedCleanly` if none exists.
    Load,
    /// Reconstruct the volume index by scanning on-disk chapter contents,
    /// ignoring any save slots (spec.md §4.9).
    Rebuild,
}

/// Builder for the parameters that are fixed for the lifetime of one open
/// (spec.md [ADDED] Configuration surface). Not a generic settings file:
/// the on-disk counterpart is the binary config region, decoded by
/// `crate::layout`.
#[derive(Clone, Debug)]
pub struct Config {
    path: PathBuf,
    geometry: Geometry,
    zone_count: u32,
    cache_chapters: u32,
    read_threads: u32,
    checkpoint_frequency: u32,
}

impl Config {
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            geometry: Geometry::default(),
            zone_count: 1,
            cache_chapters: DEFAULT_CACHE_CHAPTERS,
            read_threads: DEFAULT_READ_THREADS,
            checkpoint_frequency: 0,
        }
    }

    #[must_use]
    pub fn geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = geometry;
        self
    }

    #[must_use]
    pub fn zone_count(mut self, zone_count: u32) -> Self {
        self.zone_count = zone_count.clamp(1, 16);
        self
    }

    #[must_use]
    pub fn cache_chapters(mut self, cache_chapters: u32) -> Self {
        self.cache_chapters = cache_chapters.max(1);
        self
    }

    #[must_use]
    pub fn read_threads(mut self, read_threads: u32) -> Self {
        self.read_threads = read_threads.max(1);
        self
    }

    #[must_use]
    pub fn checkpoint_frequency(mut self, checkpoint_frequency: u32) -> Self {
        self.checkpoint_frequency = checkpoint_frequency;
        self
    }

    /// Opens a session per `mode` (spec.md §6 `open_index`).
    pub fn open(self, mode: OpenMode) -> Result<Session> {
        Session::open(self, mode)
    }
}

/// Coordinates a `save`/checkpoint commit: snapshotting every zone's open
/// chapter via its own funnel queue (never reaching into zone-local state
/// directly) and handing the result to `layout`.
struct SaveCoordinator {
    layout: Layout,
    zone_shared: Arc<ZoneShared>,
    volume_index: Arc<VolumeIndex>,
    checkpoint: Arc<CheckpointState>,
}

impl SaveCoordinator {
    fn snapshot_zones(&self) -> Vec<ZoneSnapshot> {
        self.zone_shared
            .peers
            .iter()
            .map(|peer| {
                let reply = Reply::new();
                peer.push(ZoneMessage::Control(ControlMessage::Snapshot(reply.clone())));
                reply.recv()
            })
            .collect()
    }

    fn commit(&self, mode: SaveMode) -> Result<()> {
        let snapshots = self.snapshot_zones();
        let oldest_vcn = snapshots.iter().map(|s| s.oldest_vcn).min().unwrap_or(0);
        let newest_vcn = snapshots.iter().map(|s| s.newest_vcn).max().unwrap_or(0);
        let open_chapters = snapshots.into_iter().map(|s| s.open_chapter).collect();
        let volume_index = self.volume_index.encode()?;
        self.layout.commit_save(
            mode,
            oldest_vcn,
            newest_vcn,
            self.checkpoint.chapters_since_last(),
            volume_index,
            open_chapters,
        )
    }
}

/// A session bound to one open volume. Not `Clone`: every subsystem it
/// owns is already internally `Arc`-shared where worker threads need
/// access, so there is exactly one `Session` per open.
pub struct Session {
    geometry: Geometry,
    volume_index: Arc<VolumeIndex>,
    volume_stats: Arc<VolumeStats>,
    zone_stats: Vec<Arc<ZoneStats>>,
    zone_shared: Arc<ZoneShared>,
    writer: Arc<ChapterWriterHandle>,
    checkpoint: Arc<CheckpointState>,
    save_coordinator: Arc<SaveCoordinator>,
    zone_threads: Mutex<Vec<JoinHandle<()>>>,
    triage_queue: Option<Arc<FunnelQueue<TriageMessage>>>,
    triage_thread: Mutex<Option<JoinHandle<()>>>,
    checkpoint_thread: Mutex<Option<JoinHandle<()>>>,
    outstanding: AtomicU64,
    quiesce: Arc<(Mutex<()>, Condvar)>,
    suspended: AtomicBool,
    closed: AtomicBool,
}

enum TriageMessage {
    Request { zone_id: u32, pending: PendingRequest },
    Shutdown,
}

impl Session {
    fn open(config: Config, mode: OpenMode) -> Result<Session> {
        match mode {
            OpenMode::Create => Self::open_create(config),
            OpenMode::Load => Self::open_load(config),
            OpenMode::Rebuild => Self::open_rebuild(config),
        }
    }

    fn config_record(config: &Config) -> ConfigRecord {
        ConfigRecord {
            geometry: config.geometry,
            zone_count: config.zone_count,
            cache_chapters: config.cache_chapters,
            read_threads: config.read_threads,
            checkpoint_frequency: config.checkpoint_frequency,
            remap: ChapterRemap::none(),
        }
    }

    fn open_create(config: Config) -> Result<Session> {
        let record = Self::config_record(&config);
        let layout = Layout::create(&config.path, &record)?;
        let volume = Volume::create(&config.path, config.geometry, config.cache_chapters as usize)?;
        let volume_index = VolumeIndex::new(config.geometry, config.zone_count);
        Self::assemble(config, layout, volume, volume_index, None)
    }

    fn open_load(config: Config) -> Result<Session> {
        let (layout, record) = Layout::open(&config.path)?;
        let geometry = record.geometry;
        let zone_count = record.zone_count;
        let cache_chapters = record.cache_chapters;

        let save = layout
            .find_latest_save()
            .ok_or(Error::NotSavedCleanly)?;
        if save.open_chapters.len() as u32 != zone_count {
            return Err(Error::CorruptComponent(
                "save slot's zone count does not match the config region".into(),
            ));
        }

        let volume = Volume::open(&config.path, geometry, cache_chapters as usize)?;
        let volume_index = VolumeIndex::decode(&save.volume_index, geometry)?;

        let config = Config {
            path: config.path,
            geometry,
            zone_count,
            cache_chapters,
            read_threads: record.read_threads.max(1),
            checkpoint_frequency: record.checkpoint_frequency,
        };

        let mut restore = Vec::with_capacity(save.open_chapters.len());
        for bytes in &save.open_chapters {
            restore.push((save.oldest_vcn, save.newest_vcn, OpenChapter::decode(bytes)?));
        }

        let checkpoint_restore = save.checkpoint_chapters_since_last;
        let session = Self::assemble(config, layout, volume, volume_index, Some(restore))?;
        session.checkpoint.restore_chapters_since_last(checkpoint_restore);
        Ok(session)
    }

    fn open_rebuild(config: Config) -> Result<Session> {
        let record = Self::config_record(&config);
        let layout = Layout::create(&config.path, &record)?;
        let volume = if config.path.exists() {
            Volume::open(&config.path, config.geometry, config.cache_chapters as usize)?
        } else {
            Volume::create(&config.path, config.geometry, config.cache_chapters as usize)?
        };
        let volume_index = VolumeIndex::new(config.geometry, config.zone_count);

        let load_context = LoadContext::new();
        let result = rebuild::rebuild(
            &volume,
            &volume_index,
            &config.geometry,
            config.read_threads as usize,
            &load_context,
        )?;
        log::debug!(
            "rebuild recovered window [{}, {})",
            result.oldest_vcn,
            result.newest_vcn
        );

        let restore: Vec<_> = (0..config.zone_count)
            .map(|_| {
                (
                    result.oldest_vcn,
                    result.newest_vcn,
                    OpenChapter::new(&config.geometry, config.zone_count),
                )
            })
            .collect();

        Self::assemble(config, layout, volume, volume_index, Some(restore))
    }

    /// Shared tail of all three open paths: wires up the shared subsystems
    /// and spawns the worker threads. `restore`, when present, is applied
    /// to each zone before its worker loop starts servicing requests.
    fn assemble(
        config: Config,
        layout: Layout,
        volume: Volume,
        volume_index: VolumeIndex,
        restore: Option<Vec<(u64, u64, OpenChapter)>>,
    ) -> Result<Session> {
        let geometry = config.geometry;
        let zone_count = config.zone_count;

        let volume = Arc::new(Mutex::new(volume));
        let volume_index = Arc::new(volume_index);
        let sparse_cache = Arc::new(SparseCache::new(config.cache_chapters as usize));
        let writer = ChapterWriterHandle::spawn(Arc::clone(&volume), zone_count);
        let checkpoint = Arc::new(CheckpointState::new(config.checkpoint_frequency));
        let volume_stats = Arc::new(VolumeStats::default());
        let zone_stats: Vec<_> = (0..zone_count).map(|_| Arc::new(ZoneStats::default())).collect();
        let peers: Vec<_> = (0..zone_count).map(|_| FunnelQueue::new()).collect();

        let zone_shared = Arc::new(ZoneShared {
            geometry,
            volume_index: Arc::clone(&volume_index),
            volume: Arc::clone(&volume),
            sparse_cache,
            writer: Arc::clone(&writer),
            checkpoint: Arc::clone(&checkpoint),
            volume_stats: Arc::clone(&volume_stats),
            peers,
            zone_stats: zone_stats.clone(),
        });

        let mut restore = restore.unwrap_or_default();
        let zone_threads: Vec<_> = (0..zone_count)
            .map(|id| {
                let initial = if restore.is_empty() { None } else { Some(restore.remove(0)) };
                spawn_zone_thread(id, Arc::clone(&zone_shared), initial)
            })
            .collect();

        let (triage_queue, triage_thread) =
            if triage::triage_thread_needed(geometry.sparse_chapters_per_volume, zone_count) {
                let (queue, thread) = spawn_triage_thread(Arc::clone(&volume_index), Arc::clone(&zone_shared));
                (Some(queue), Some(thread))
            } else {
                (None, None)
            };

        let save_coordinator = Arc::new(SaveCoordinator {
            layout,
            zone_shared: Arc::clone(&zone_shared),
            volume_index: Arc::clone(&volume_index),
            checkpoint: Arc::clone(&checkpoint),
        });
        let checkpoint_thread = spawn_checkpoint_thread(Arc::clone(&checkpoint), Arc::clone(&save_coordinator));

        Ok(Session {
            geometry,
            volume_index,
            volume_stats,
            zone_stats,
            zone_shared,
            writer,
            checkpoint,
            save_coordinator,
            zone_threads: Mutex::new(zone_threads),
            triage_queue,
            triage_thread: Mutex::new(triage_thread),
            checkpoint_thread: Mutex::new(Some(checkpoint_thread)),
            outstanding: AtomicU64::new(0),
            quiesce: Arc::new((Mutex::new(()), Condvar::new())),
            suspended: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn post(&self, name: RecordName, metadata: [u8; 16]) -> Result<Outcome> {
        self.submit(name, RequestKind::Post, Some(metadata))
    }

    pub fn update(&self, name: RecordName, metadata: [u8; 16]) -> Result<Outcome> {
        self.submit(name, RequestKind::Update, Some(metadata))
    }

    pub fn query(&self, name: RecordName, update_on_hit: bool) -> Result<Outcome> {
        self.submit(name, RequestKind::Query { update_on_hit }, None)
    }

    pub fn delete(&self, name: RecordName) -> Result<Outcome> {
        self.submit(name, RequestKind::Delete, None)
    }

    fn submit(&self, name: RecordName, kind: RequestKind, metadata: Option<[u8; 16]>) -> Result<Outcome> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::NoIndex);
        }
        if self.suspended.load(Ordering::Acquire) {
            return Err(Error::Busy);
        }
        if self.writer.is_poisoned() {
            return Err(Error::Disabled);
        }

        self.outstanding.fetch_add(1, Ordering::SeqCst);
        let result = self.dispatch(name, kind, metadata);
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        let (lock, cv) = &*self.quiesce;
        let _guard = lock.lock().expect("quiesce mutex poisoned");
        cv.notify_all();
        result
    }

    fn dispatch(&self, name: RecordName, kind: RequestKind, metadata: Option<[u8; 16]>) -> Result<Outcome> {
        let zone_id = self.volume_index.zone_of(&name);
        let reply = Reply::new();
        let pending = PendingRequest {
            name,
            kind,
            metadata,
            reply: reply.clone(),
        };

        if let Some(queue) = &self.triage_queue {
            queue.push(TriageMessage::Request { zone_id, pending });
        } else {
            triage::simulate_index_zone_barrier_message(&self.volume_index, &self.zone_shared.peers, &name);
            self.zone_shared.peers[zone_id as usize].push(ZoneMessage::Request(pending));
        }
        reply.recv()
    }

    /// Blocks until every in-flight request has completed (spec.md §5: "the
    /// session counts outstanding requests so flush/close can wait for
    /// quiescence").
    pub fn flush(&self) -> Result<()> {
        let (lock, cv) = &*self.quiesce;
        let mut guard = lock.lock().expect("quiesce mutex poisoned");
        while self.outstanding.load(Ordering::SeqCst) != 0 {
            guard = cv.wait(guard).expect("quiesce mutex poisoned");
        }
        Ok(())
    }

    /// Snapshots the current index state into the next save slot (spec.md
    /// §4.9 "Save"): quiesces, then commits through `layout`.
    pub fn save(&self) -> Result<()> {
        self.flush()?;
        self.save_coordinator.commit(SaveMode::Save)
    }

    /// Pauses request processing; `save` additionally commits a save slot
    /// before returning (spec.md §6 `suspend(session, save?)`).
    pub fn suspend(&self, save: bool) -> Result<()> {
        if save {
            self.save()?;
        } else {
            self.flush()?;
        }
        self.suspended.store(true, Ordering::Release);
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        self.suspended.store(false, Ordering::Release);
        Ok(())
    }

    pub fn set_checkpoint_frequency(&self, frequency: u32) {
        self.checkpoint.set_frequency(frequency);
    }

    #[must_use]
    pub fn get_stats(&self) -> IndexStats {
        let entries_indexed = self.volume_index.entry_count() as u64;
        IndexStats::collect(
            self.zone_stats.iter().map(|s| s.as_ref()),
            &self.volume_stats,
            entries_indexed,
        )
    }

    /// Shuts down every worker thread without saving. A caller that wants
    /// the index to be loadable afterwards must call `save` first — the
    /// two are kept separate so a caller that already called `save`
    /// doesn't pay for a second, redundant quiesce+commit (spec.md §8
    /// scenario 4 calls them as two explicit steps).
    pub fn close(&self) -> Result<()> {
        self.shutdown_threads()
    }

    /// Shuts down every worker thread and discards all save slots, so nothing
    /// short of `Rebuild` can recover this volume afterwards. Used when the
    /// caller is permanently done with the index rather than merely
    /// pausing it.
    pub fn destroy(&self) -> Result<()> {
        self.shutdown_threads()?;
        self.save_coordinator.layout.discard_saves()
    }

    fn shutdown_threads(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.flush()?;

        for peer in &self.zone_shared.peers {
            peer.push(ZoneMessage::Shutdown);
        }
        for thread in self.zone_threads.lock().expect("zone threads mutex poisoned").drain(..) {
            let _ = thread.join();
        }

        if let Some(queue) = &self.triage_queue {
            queue.push(TriageMessage::Shutdown);
        }
        if let Some(thread) = self.triage_thread.lock().expect("triage thread mutex poisoned").take() {
            let _ = thread.join();
        }

        self.checkpoint.shutdown();
        if let Some(thread) = self
            .checkpoint_thread
            .lock()
            .expect("checkpoint thread mutex poisoned")
            .take()
        {
            let _ = thread.join();
        }

        self.writer.shutdown();
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown_threads() {
            log::warn!("error shutting down session during drop: {err}");
        }
    }
}

fn spawn_zone_thread(
    id: u32,
    shared: Arc<ZoneShared>,
    initial: Option<(u64, u64, OpenChapter)>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut zone = IndexZone::new(id, Arc::clone(&shared));
        if let Some((oldest_vcn, newest_vcn, open_chapter)) = initial {
            zone.restore_state(oldest_vcn, newest_vcn, open_chapter);
        }
        loop {
            match shared.peers[id as usize].pop_blocking() {
                ZoneMessage::Shutdown => return,
                message => zone.dispatch_index_request(message),
            }
        }
    })
}

fn spawn_triage_thread(
    volume_index: Arc<VolumeIndex>,
    shared: Arc<ZoneShared>,
) -> (Arc<FunnelQueue<TriageMessage>>, JoinHandle<()>) {
    let queue = Arc::new(FunnelQueue::new());
    let worker_queue = Arc::clone(&queue);
    let thread = std::thread::spawn(move || loop {
        match worker_queue.pop_blocking() {
            TriageMessage::Shutdown => return,
            TriageMessage::Request { zone_id, pending } => {
                triage::simulate_index_zone_barrier_message(&volume_index, &shared.peers, &pending.name);
                shared.peers[zone_id as usize].push(ZoneMessage::Request(pending));
            }
        }
    });
    (queue, thread)
}

fn spawn_checkpoint_thread(checkpoint: Arc<CheckpointState>, save_coordinator: Arc<SaveCoordinator>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while checkpoint.wait_for_due() {
            if let Err(err) = save_coordinator.commit(SaveMode::Checkpoint) {
                log::warn!("checkpoint commit failed: {err}");
            }
        }
    })
}
