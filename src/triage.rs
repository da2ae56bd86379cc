// The triage stage: a single-threaded pre-stage that looks up a name in
// the volume index (read-only) and, if the hint currently lives in the
// sparse band, broadcasts a `SparseCacheBarrier` control message to every
// zone before the request itself reaches its owning zone (spec.md §4.5).
// Only needed when the index is sparse and `zone_count > 1`; for
// single-zone or purely-dense indexes the barrier is simulated inline so
// no second queue or thread is needed.

use crate::funnel_queue::FunnelQueue;
use crate::name::RecordName;
use crate::volume_index::VolumeIndex;
use crate::zone::{ControlMessage, ZoneMessage};

/// Returns the VCN that must be admitted into the shared sparse cache
/// before this request is safe to deliver to its zone, or `None` if no
/// barrier is needed.
#[must_use]
pub(crate) fn vcn_requiring_barrier(volume_index: &VolumeIndex, name: &RecordName) -> Option<u64> {
    let triage = volume_index.lookup(name);
    if triage.in_sampled_chapter {
        triage.virtual_chapter
    } else {
        None
    }
}

/// Is a standalone triage thread needed at all? Dense-only or single-zone
/// indexes never need to broadcast a barrier, so the stage collapses to a
/// no-op (spec.md §4.5: "simulated inline").
#[must_use]
pub(crate) fn triage_thread_needed(sparse_chapters_per_volume: u32, zone_count: u32) -> bool {
    sparse_chapters_per_volume > 0 && zone_count > 1
}

/// Inline stand-in for the triage thread when `triage_thread_needed` is
/// false: broadcasts the barrier (if any) directly from the submitting
/// thread, with no second queue involved (spec.md §4.5
/// `simulate_index_zone_barrier_message`).
pub(crate) fn simulate_index_zone_barrier_message(
    volume_index: &VolumeIndex,
    peers: &[FunnelQueue<ZoneMessage>],
    name: &RecordName,
) {
    if let Some(vcn) = vcn_requiring_barrier(volume_index, name) {
        for peer in peers {
            peer.push(ZoneMessage::Control(ControlMessage::SparseCacheBarrier(vcn)));
        }
    }
}
