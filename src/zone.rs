// An index zone: owns one shard of the volume index, its open chapter,
// and the newest/oldest VCN pair for that shard. Zones are single-
// threaded — the zone's own worker thread is the only writer to its
// shard and open chapter, so everything below runs without additional
// synchronization beyond the shared `Volume`/`SparseCache`/chapter-writer
// handles (spec.md §4.4).

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use crate::chapter_writer::{ChapterWriterHandle, Submission};
use crate::checkpoint::CheckpointState;
use crate::error::{Error, Result};
use crate::funnel_queue::FunnelQueue;
use crate::geometry::Geometry;
use crate::name::RecordName;
use crate::open_chapter::{OpenChapter, OpenChapterRecord};
use crate::request::{Location, Outcome, PendingRequest, RequestKind, Reply};
use crate::sparse_cache::SparseCache;
use crate::stats::{VolumeStats, ZoneStats};
use crate::volume::Volume;
use crate::volume_index::VolumeIndex;

pub(crate) enum ControlMessage {
    SparseCacheBarrier(u64),
    AnnounceChapterClosed(u64),
    /// Asks the zone to hand back a snapshot of its current state, used by
    /// `save`/checkpoint (spec.md §4.9) to collect every zone's open
    /// chapter without reaching into another thread's local state.
    Snapshot(Reply<ZoneSnapshot>),
}

#[derive(Clone, Debug)]
pub(crate) struct ZoneSnapshot {
    pub oldest_vcn: u64,
    pub newest_vcn: u64,
    pub open_chapter: Vec<u8>,
}

pub(crate) enum ZoneMessage {
    Request(PendingRequest),
    Control(ControlMessage),
    /// Tells the zone worker loop to exit. Handled by the loop itself
    /// (see `session.rs`), never reaches `dispatch_index_request`.
    Shutdown,
}

/// Shared context every zone worker needs, cloned (cheaply, via `Arc`)
/// into each zone at `Session` construction time.
pub(crate) struct ZoneShared {
    pub geometry: Geometry,
    pub volume_index: Arc<VolumeIndex>,
    pub volume: Arc<Mutex<Volume>>,
    pub sparse_cache: Arc<SparseCache>,
    pub writer: Arc<ChapterWriterHandle>,
    pub checkpoint: Arc<CheckpointState>,
    pub volume_stats: Arc<VolumeStats>,
    pub peers: Vec<FunnelQueue<ZoneMessage>>,
    /// One entry per zone, shared with `Session::get_stats` so the counters
    /// a zone updates on its own worker thread can be read from outside it
    /// without routing every stats call through the funnel queue.
    pub zone_stats: Vec<Arc<ZoneStats>>,
}

pub(crate) struct IndexZone {
    id: u32,
    shared: Arc<ZoneShared>,
    open_chapter: OpenChapter,
    /// Set while this zone is waiting for the writer to finish the chapter
    /// it just submitted; must be cleared before the zone may close
    /// another chapter (spec.md §4.4 step 1 / §4.6).
    writing_chapter_pending: Option<Reply<Result<()>>>,
    oldest_vcn: u64,
    /// This zone's own view of the newest (currently open) virtual chapter.
    /// Every zone advances this independently, in lockstep, following
    /// whichever zone closes a chapter first via `ANNOUNCE_CHAPTER_CLOSED`
    /// (spec.md §4.4 step 8) — there is no shared counter to race on.
    newest_vcn: u64,
    stats: Arc<ZoneStats>,
}

impl IndexZone {
    #[must_use]
    pub fn new(id: u32, shared: Arc<ZoneShared>) -> Self {
        let open_chapter = OpenChapter::new(&shared.geometry, shared.volume_index.zone_count());
        let stats = Arc::clone(&shared.zone_stats[id as usize]);
        Self {
            id,
            shared,
            open_chapter,
            writing_chapter_pending: None,
            oldest_vcn: 0,
            newest_vcn: 0,
            stats,
        }
    }

    #[must_use]
    pub fn stats(&self) -> &ZoneStats {
        &self.stats
    }

    #[must_use]
    pub fn oldest_vcn(&self) -> u64 {
        self.oldest_vcn
    }

    #[must_use]
    pub fn newest_vcn(&self) -> u64 {
        self.newest_vcn
    }

    #[must_use]
    pub fn open_chapter(&self) -> &OpenChapter {
        &self.open_chapter
    }

    /// Restores a zone's in-memory state from a save-slot or rebuild
    /// snapshot. Only valid immediately after construction, before any
    /// request has been dispatched.
    pub fn restore_state(&mut self, oldest_vcn: u64, newest_vcn: u64, open_chapter: OpenChapter) {
        self.oldest_vcn = oldest_vcn;
        self.newest_vcn = newest_vcn;
        self.open_chapter = open_chapter;
    }

    /// The single entry point the zone worker loop calls for every message
    /// it pops off its queue (spec.md §4.4's dispatch table).
    pub fn dispatch_index_request(&mut self, message: ZoneMessage) {
        match message {
            ZoneMessage::Request(request) => {
                let result = self.handle_request(&request);
                request.reply.send(result);
            }
            ZoneMessage::Control(ControlMessage::SparseCacheBarrier(vcn)) => {
                self.update_sparse_cache(vcn);
            }
            ZoneMessage::Control(ControlMessage::AnnounceChapterClosed(vcn)) => {
                if self.newest_vcn == vcn {
                    if let Err(err) = self.close_chapter(false) {
                        log::warn!("zone {} failed to follow chapter close for vcn {vcn}: {err}", self.id);
                    }
                }
            }
            ZoneMessage::Control(ControlMessage::Snapshot(reply)) => {
                reply.send(ZoneSnapshot {
                    oldest_vcn: self.oldest_vcn,
                    newest_vcn: self.newest_vcn,
                    open_chapter: self.open_chapter.encode(),
                });
            }
            ZoneMessage::Shutdown => {
                log::warn!("zone {} received Shutdown through dispatch_index_request; the worker loop should intercept it first", self.id);
            }
        }
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    fn handle_request(&mut self, request: &PendingRequest) -> Result<Outcome> {
        if self.shared.writer.is_poisoned() {
            return Err(Error::Disabled);
        }
        self.stats.entries_accessed.fetch_add(1, Ordering::Relaxed);
        match request.kind {
            RequestKind::Delete => self.remove_from_index_zone(&request.name),
            RequestKind::Post | RequestKind::Update | RequestKind::Query { .. } => {
                self.search_index_zone(&request.name, request.kind, request.metadata)
            }
        }
    }

    /// Handles POST/UPDATE/QUERY: volume-index lookup, confirm in the
    /// cited chapter, and for POST/UPDATE (or a QUERY asked to promote on
    /// hit) insert/refresh the open chapter (spec.md §4.4).
    fn search_index_zone(
        &mut self,
        name: &RecordName,
        kind: RequestKind,
        metadata: Option<[u8; 16]>,
    ) -> Result<Outcome> {
        if let Some(record) = self.open_chapter.get(name) {
            let old_metadata = record.metadata;
            if matches!(kind, RequestKind::Post | RequestKind::Update) {
                let new = metadata.unwrap_or(old_metadata);
                self.open_chapter.put(*name, OpenChapterRecord { metadata: new })?;
                return Ok(Outcome {
                    found: true,
                    location: Some(Location::InOpenChapter),
                    old_metadata: Some(old_metadata),
                    new_metadata: Some(new),
                });
            }
            return Ok(Outcome {
                found: true,
                location: Some(Location::InOpenChapter),
                old_metadata: Some(old_metadata),
                new_metadata: None,
            });
        }

        let record = self.shared.volume_index.zone_lock(self.id).get_record(name);
        if record.found {
            let vcn = record.vcn.expect("found record carries a vcn");
            let confirmed = self.confirm_on_volume(vcn, record.from_sparse, name)?;
            if let Some(old_metadata) = confirmed {
                let location = if record.from_sparse {
                    Location::InSparse
                } else {
                    Location::InDense
                };
                let should_promote =
                    matches!(kind, RequestKind::Post | RequestKind::Update | RequestKind::Query { update_on_hit: true });
                if should_promote {
                    let new = metadata.unwrap_or(old_metadata);
                    self.promote_to_open_chapter(name, new)?;
                    return Ok(Outcome {
                        found: true,
                        location: Some(location),
                        old_metadata: Some(old_metadata),
                        new_metadata: Some(new),
                    });
                }
                return Ok(Outcome {
                    found: true,
                    location: Some(location),
                    old_metadata: Some(old_metadata),
                    new_metadata: None,
                });
            }
        }

        if matches!(kind, RequestKind::Post | RequestKind::Update) {
            let metadata = metadata.ok_or_else(|| Error::InvalidArgument("post/update requires metadata".into()))?;
            self.promote_to_open_chapter(name, metadata)?;
            return Ok(Outcome {
                found: false,
                location: Some(Location::Unavailable),
                old_metadata: None,
                new_metadata: Some(metadata),
            });
        }

        Ok(Outcome::miss())
    }

    fn confirm_on_volume(&self, vcn: u64, from_sparse: bool, name: &RecordName) -> Result<Option<[u8; 16]>> {
        if from_sparse {
            if let Some(record) = self.shared.sparse_cache.search(vcn, name) {
                self.shared.volume_stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(record.metadata));
            }
            self.shared.volume_stats.cache_misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }
        let mut volume = self.shared.volume.lock().expect("volume mutex poisoned");
        self.shared.volume_stats.disk_reads.fetch_add(1, Ordering::Relaxed);
        Ok(volume.search_chapter(vcn, name)?.map(|r| r.metadata))
    }

    fn promote_to_open_chapter(&mut self, name: &RecordName, metadata: [u8; 16]) -> Result<()> {
        let record = OpenChapterRecord { metadata };
        let vcn = self.newest_vcn;
        match self.open_chapter.put(*name, record) {
            Ok(()) => {}
            Err(_) => {
                self.stats.overflows.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
        }
        self.stats.entries_stored.fetch_add(1, Ordering::Relaxed);
        let sample_rate = self.shared.geometry.sparse_sample_rate;
        let mut shard = self.shared.volume_index.zone_lock(self.id);
        if shard.set_chapter(name, vcn) {
            // already tracked; refreshed in place
        } else if let Err(Error::Overflow { .. }) = shard.put(name, vcn, sample_rate) {
            self.stats.overflows.fetch_add(1, Ordering::Relaxed);
        } else if shard.get_record(name).is_collision {
            self.stats.collisions.fetch_add(1, Ordering::Relaxed);
        }
        drop(shard);
        if self.open_chapter.is_full() {
            self.open_next_chapter()?;
        }
        Ok(())
    }

    fn remove_from_index_zone(&mut self, name: &RecordName) -> Result<Outcome> {
        let removed_open = self.open_chapter.remove(name);
        let removed_index = self.shared.volume_index.zone_lock(self.id).remove(name);
        Ok(Outcome {
            found: removed_open || removed_index,
            location: None,
            old_metadata: None,
            new_metadata: None,
        })
    }

    fn update_sparse_cache(&self, vcn: u64) {
        if self.shared.sparse_cache.contains(vcn) {
            return;
        }
        let mut volume = self.shared.volume.lock().expect("volume mutex poisoned");
        if let Ok(Some((_, entries))) = volume.scan_chapters_in_order(vcn, vcn).map(|v| v.into_iter().next()) {
            drop(volume);
            self.shared.sparse_cache.admit(vcn, entries);
        }
    }

    /// Closes this zone's share of the current open chapter and starts the
    /// next one: wait for the previous writer handoff to land, submit this
    /// chapter's entries, advance the window, run checkpointing, and (only
    /// when this zone is the one that triggered the close, rather than one
    /// following a peer's announcement) tell peer zones to close in step
    /// (spec.md §4.4).
    fn open_next_chapter(&mut self) -> Result<()> {
        self.close_chapter(true)
    }

    fn close_chapter(&mut self, self_triggered: bool) -> Result<()> {
        if let Some(pending) = self.writing_chapter_pending.take() {
            pending.recv()?;
        }

        let entries = self.open_chapter.sorted_entries();
        let closing_vcn = self.newest_vcn;
        self.newest_vcn += 1;

        self.shared.volume_index.set_zone_open_chapter(self.id, self.newest_vcn);
        let expire = self
            .shared
            .geometry
            .chapters_to_expire(self.oldest_vcn, self.newest_vcn);
        self.oldest_vcn += expire;

        self.open_chapter.clear();

        if self.shared.checkpoint.process_checkpointing() {
            log::debug!("zone {} triggered a checkpoint after closing vcn {closing_vcn}", self.id);
        }

        let reply = Reply::new();
        self.shared.writer.submit(Submission {
            vcn: closing_vcn,
            zone_id: self.id,
            entries,
            done: reply.clone(),
        });
        self.writing_chapter_pending = Some(reply);

        if self_triggered && self.shared.peers.len() > 1 {
            for (peer_id, peer) in self.shared.peers.iter().enumerate() {
                if peer_id as u32 != self.id {
                    peer.push(ZoneMessage::Control(ControlMessage::AnnounceChapterClosed(closing_vcn)));
                }
            }
        }

        log::debug!("zone {} closed chapter vcn {closing_vcn}", self.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn shared_for_test(geometry: Geometry, zone_count: u32) -> Arc<ZoneShared> {
        let dir = tempfile::tempdir().unwrap();
        let volume = Arc::new(Mutex::new(Volume::create(dir.path().join("volume"), geometry, 2).unwrap()));
        let writer = ChapterWriterHandle::spawn(Arc::clone(&volume), zone_count);
        Arc::new(ZoneShared {
            geometry,
            volume_index: Arc::new(VolumeIndex::new(geometry, zone_count)),
            volume,
            sparse_cache: Arc::new(SparseCache::new(4)),
            writer,
            checkpoint: Arc::new(CheckpointState::new(0)),
            volume_stats: Arc::new(VolumeStats::default()),
            peers: (0..zone_count).map(|_| FunnelQueue::new()).collect(),
            zone_stats: (0..zone_count).map(|_| Arc::new(ZoneStats::default())).collect(),
        })
    }

    #[test]
    fn post_then_query_hits_open_chapter() {
        let shared = shared_for_test(Geometry::default(), 1);
        let mut zone = IndexZone::new(0, shared);
        let name = RecordName::new([1; 16]);

        let post = zone.search_index_zone(&name, RequestKind::Post, Some([0xAA; 16])).unwrap();
        assert!(!post.found);

        let query = zone
            .search_index_zone(&name, RequestKind::Query { update_on_hit: false }, None)
            .unwrap();
        assert!(query.found);
        assert_eq!(query.location, Some(Location::InOpenChapter));
        assert_eq!(query.old_metadata, Some([0xAA; 16]));
    }

    #[test]
    fn delete_then_query_misses() {
        let shared = shared_for_test(Geometry::default(), 1);
        let mut zone = IndexZone::new(0, shared);
        let name = RecordName::new([2; 16]);
        zone.search_index_zone(&name, RequestKind::Post, Some([1; 16])).unwrap();
        let removed = zone.remove_from_index_zone(&name).unwrap();
        assert!(removed.found);
        let query = zone
            .search_index_zone(&name, RequestKind::Query { update_on_hit: false }, None)
            .unwrap();
        assert!(!query.found);
    }
}
