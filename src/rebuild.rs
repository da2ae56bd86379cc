// Rebuild: reconstructs the volume index from on-disk chapter contents
// after a crash, when no valid save slot was found (spec.md §4.9). Finds
// `[lowest_vcn, highest_vcn]` by scanning chapter headers, derives the
// post-rebuild window, then replays every record page in that window
// through `VolumeIndex::put`, honoring the dense/sparse split that will
// exist once rebuild finishes (sampled-only for chapters that land in the
// sparse band).

use crate::error::{Error, Result};
use crate::geometry::Geometry;
use crate::load_context::LoadContext;
use crate::volume::Volume;
use crate::volume_index::VolumeIndex;

/// Outcome of a rebuild: the window the volume index now covers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct RebuildResult {
    pub oldest_vcn: u64,
    pub newest_vcn: u64,
}

/// Scans `volume` for the VCN range present on disk and replays every
/// record in that range into `volume_index`. Returns `Error::Busy` if
/// `load_context` transitions away from `Opening` mid-scan (spec.md: "The
/// load is interruptible").
pub(crate) fn rebuild(
    volume: &Volume,
    volume_index: &VolumeIndex,
    geometry: &Geometry,
    read_threads: usize,
    load_context: &LoadContext,
) -> Result<RebuildResult> {
    let boundaries = volume.find_chapter_boundaries(read_threads)?;
    let Some(&lowest) = boundaries.iter().min() else {
        log::debug!("rebuild found no chapters on disk, starting from an empty volume");
        return Ok(RebuildResult {
            oldest_vcn: 0,
            newest_vcn: 0,
        });
    };
    let highest = *boundaries.iter().max().expect("non-empty checked above");

    let newest = highest + 1;
    // At most chapters_per_volume distinct VCNs fit on disk, so this
    // matches the steady-state expiry math in `chapters_to_expire`
    // (set_open_chapter uses the same formula once entries are replayed).
    let oldest = newest.saturating_sub(u64::from(geometry.chapters_per_volume)).max(lowest);

    log::debug!("rebuild replaying chapters [{oldest}, {newest}) from disk");

    let chapters = volume.scan_chapters_in_order(oldest, newest.saturating_sub(1))?;
    for (vcn, entries) in chapters {
        if load_context.is_busy() {
            return Err(Error::Busy);
        }
        for (name, record) in entries {
            replay_record(volume_index, geometry, vcn, &name, record.metadata);
        }
    }

    // Demote/purge now that every record in the final window has been
    // replayed into dense — doing this before the loop (as the dense band
    // is populated) would run the demotion pass against an empty index and
    // leave every non-sampled sparse-band name incorrectly in dense.
    volume_index.set_open_chapter(newest);

    Ok(RebuildResult {
        oldest_vcn: oldest,
        newest_vcn: newest,
    })
}

fn replay_record(
    volume_index: &VolumeIndex,
    geometry: &Geometry,
    vcn: u64,
    name: &crate::name::RecordName,
    _metadata: [u8; 16],
) {
    let zone_id = volume_index.zone_of(name);
    let mut zone = volume_index.zone_lock(zone_id);
    match zone.put(name, vcn, geometry.sparse_sample_rate) {
        Ok(()) => {}
        Err(err) if err.is_swallowed_during_write() => {
            log::warn!("rebuild: dropped a record while replaying vcn {vcn}: {err}");
        }
        Err(err) => {
            log::warn!("rebuild: unexpected error replaying vcn {vcn}, dropping record: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::RecordName;
    use crate::open_chapter::OpenChapterRecord;
    use test_log::test;

    #[test]
    fn rebuild_recovers_window_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let geometry = Geometry::default();
        let mut volume = Volume::create(dir.path().join("volume"), geometry, 2).unwrap();

        for vcn in 0..5u64 {
            let entries: Vec<_> = (0..4u8)
                .map(|i| {
                    let byte = (vcn as u8) * 4 + i;
                    (RecordName::new([byte; 16]), OpenChapterRecord { metadata: [byte; 16] })
                })
                .collect();
            volume.write_chapter(vcn, &entries).unwrap();
        }

        let volume_index = VolumeIndex::new(geometry, 1);
        let load_context = LoadContext::new();
        let result = rebuild(&volume, &volume_index, &geometry, 2, &load_context).unwrap();

        assert_eq!(result.oldest_vcn, 0);
        assert_eq!(result.newest_vcn, 5);

        // vcn 2 is outside the post-rebuild sparse band (vcn < 2), so this
        // name survives the dense/sparse demotion regardless of whether it
        // happens to be a sparse sample.
        let probe = RecordName::new([8; 16]);
        assert!(volume_index.zone_lock(0).get_record(&probe).found);
    }

    #[test]
    fn empty_volume_rebuilds_to_empty_window() {
        let dir = tempfile::tempdir().unwrap();
        let geometry = Geometry::default();
        let volume = Volume::create(dir.path().join("volume"), geometry, 2).unwrap();
        let volume_index = VolumeIndex::new(geometry, 1);
        let load_context = LoadContext::new();
        let result = rebuild(&volume, &volume_index, &geometry, 1, &load_context).unwrap();
        assert_eq!(result.oldest_vcn, 0);
        assert_eq!(result.newest_vcn, 0);
    }
}
