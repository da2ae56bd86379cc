// Integration tests for the six concrete scenarios in spec.md §8, run
// against the geometry and zone count that section uses throughout: 16
// records/page, 4 record pages/chapter, 2 index pages/chapter, 8
// chapters/volume, 2 sparse chapters, sample_rate 4, zone_count 2.

use uds::{Config, Geometry, Location, OpenMode, RecordName};

fn scenario_geometry() -> Geometry {
    Geometry::new(16, 4, 2, 8, 2, 4).unwrap()
}

/// Builds a name whose zone, under `zone_count == 2`, is `zone & 1` —
/// `RecordName::zone` reduces bytes 6..=9 mod `zone_count`, and for
/// `zone_count == 2` that reduces to the parity of byte 6's low bit, which
/// this leaves untouched by the rest of `unique`'s spread.
fn name_in_zone(zone: u8, unique: u64) -> RecordName {
    let mixed = unique.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ unique.rotate_left(23);
    let mut bytes = mixed.to_le_bytes().to_vec();
    bytes.extend_from_slice(&mixed.rotate_left(29).to_le_bytes());
    let mut array = [0u8; 16];
    array.copy_from_slice(&bytes);
    array[6] = (array[6] & 0xFE) | (zone & 1);
    RecordName::new(array)
}

fn per_zone_capacity(geometry: &Geometry, zone_count: u32) -> usize {
    (geometry.records_per_chapter() as usize).div_ceil(zone_count as usize)
}

#[test]
fn scenario_1_single_post_then_query() {
    let dir = tempfile::tempdir().unwrap();
    let session = Config::new(dir.path().join("volume"))
        .geometry(scenario_geometry())
        .zone_count(2)
        .open(OpenMode::Create)
        .unwrap();

    let n0 = RecordName::new([0u8; 16]);
    let m0 = [0xAAu8; 16];

    let posted = session.post(n0, m0).unwrap();
    assert!(!posted.found);
    assert_eq!(posted.location, Some(Location::Unavailable));

    let queried = session.query(n0, false).unwrap();
    assert!(queried.found);
    assert_eq!(queried.location, Some(Location::InOpenChapter));
    assert_eq!(queried.old_metadata, Some(m0));

    session.close().unwrap();
}

#[test]
fn scenario_2_chapter_rollover_moves_entries_out_of_the_open_chapter() {
    let dir = tempfile::tempdir().unwrap();
    let geometry = scenario_geometry();
    let session = Config::new(dir.path().join("volume"))
        .geometry(geometry)
        .zone_count(2)
        .open(OpenMode::Create)
        .unwrap();

    let capacity = per_zone_capacity(&geometry, 2);
    let names: Vec<_> = (0..capacity as u64).map(|i| name_in_zone(0, i)).collect();
    for name in &names {
        session.post(*name, [0x11; 16]).unwrap();
    }
    session.flush().unwrap();

    // Every name so far still lives in zone 0's open chapter.
    let still_open = session.query(names[0], false).unwrap();
    assert_eq!(still_open.location, Some(Location::InOpenChapter));

    // One more distinct name overflows the chapter, closing it.
    let overflow = name_in_zone(0, capacity as u64);
    session.post(overflow, [0x22; 16]).unwrap();
    session.flush().unwrap();

    // The first name posted is now served from the closed (dense) chapter
    // on disk rather than the open chapter, confirming the rollover ran.
    let rolled = session.query(names[0], false).unwrap();
    assert!(rolled.found);
    assert_eq!(rolled.location, Some(Location::InDense));

    session.close().unwrap();
}

#[test]
fn scenario_3_volume_rotation_ages_out_the_oldest_chapter() {
    let dir = tempfile::tempdir().unwrap();
    let geometry = scenario_geometry();
    let session = Config::new(dir.path().join("volume"))
        .geometry(geometry)
        .zone_count(2)
        .open(OpenMode::Create)
        .unwrap();

    let capacity = per_zone_capacity(&geometry, 2);
    let first_chapter_name = name_in_zone(0, 0);
    // vcn 3: with the window correctly at [1, 9) and 2 sparse chapters, vcn
    // 3 is the first *dense* chapter (1 and 2 are the sparse band), so every
    // entry in it — not just a sampled fraction — must still be found.
    let dense_chapter_name = name_in_zone(0, 3 * capacity as u64);

    // Fill and close 9 chapters in zone 0 (vcn 0..9), matching spec.md's
    // "continue posting until newest_vcn = 9".
    for chapter in 0..9u64 {
        for i in 0..capacity as u64 {
            let unique = chapter * capacity as u64 + i;
            session.post(name_in_zone(0, unique), [chapter as u8; 16]).unwrap();
        }
    }
    session.flush().unwrap();

    // chapters_per_volume is 8, so with newest_vcn = 9 the window is
    // [1, 9) and vcn 0's entries, including the very first name posted,
    // have aged out entirely.
    let aged_out = session.query(first_chapter_name, false).unwrap();
    assert!(!aged_out.found);

    // The window holds exactly 8 chapters ([1, 9)), not 6 — a shrunk window
    // (oldest_vcn landing on 3 instead of 1) would push vcn 3 into the
    // sparse band and drop all but a sampled fraction of its entries, while
    // still passing the vcn-0 check above.
    let still_present = session.query(dense_chapter_name, false).unwrap();
    assert!(still_present.found);
    assert_eq!(still_present.location, Some(Location::InDense));

    session.close().unwrap();
}

#[test]
fn scenario_4_save_then_load_round_trip_preserves_dense_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("volume");
    let geometry = scenario_geometry();
    let capacity = per_zone_capacity(&geometry, 2);

    let fourth_chapter_name = name_in_zone(0, 4 * capacity as u64);
    {
        let session = Config::new(&path)
            .geometry(geometry)
            .zone_count(2)
            .open(OpenMode::Create)
            .unwrap();
        for chapter in 0..9u64 {
            for i in 0..capacity as u64 {
                let unique = chapter * capacity as u64 + i;
                session.post(name_in_zone(0, unique), [chapter as u8; 16]).unwrap();
            }
        }
        session.flush().unwrap();
        session.save().unwrap();
        session.close().unwrap();
    }

    let reopened = Config::new(&path).open(OpenMode::Load).unwrap();
    let found = reopened.query(fourth_chapter_name, false).unwrap();
    assert!(found.found);
    assert_eq!(found.location, Some(Location::InDense));
    reopened.close().unwrap();
}

/// Finds a name in `chapter` (posted by `name_in_zone(zone, chapter *
/// capacity + i)` for some `i`) whose sparse-sample-ness matches `sampled`.
fn name_in_chapter_with_sample(zone: u8, chapter: u64, capacity: usize, sample_rate: u32, sampled: bool) -> RecordName {
    (0..capacity as u64)
        .map(|i| name_in_zone(zone, chapter * capacity as u64 + i))
        .find(|name| name.is_sparse_sample(sample_rate) == sampled)
        .unwrap_or_else(|| panic!("no {}sampled name found in chapter {chapter}", if sampled { "" } else { "non-" }))
}

#[test]
fn scenario_5_rebuild_recovers_dense_entries_without_a_save() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("volume");
    let geometry = scenario_geometry();
    let capacity = per_zone_capacity(&geometry, 2);

    let last_chapter_name = name_in_zone(0, 8 * capacity as u64);
    // After the fill below, steady state (scenario 3) leaves the window at
    // [1, 9): chapter 1 is the oldest in-window chapter and, being within
    // `sparse_chapters_per_volume` of `oldest`, lands in the sparse band.
    let sampled_in_oldest = name_in_chapter_with_sample(0, 1, capacity, geometry.sparse_sample_rate, true);
    let unsampled_in_oldest = name_in_chapter_with_sample(0, 1, capacity, geometry.sparse_sample_rate, false);
    {
        let session = Config::new(&path)
            .geometry(geometry)
            .zone_count(2)
            .open(OpenMode::Create)
            .unwrap();
        for chapter in 0..9u64 {
            for i in 0..capacity as u64 {
                let unique = chapter * capacity as u64 + i;
                session.post(name_in_zone(0, unique), [chapter as u8; 16]).unwrap();
            }
        }
        session.flush().unwrap();
        // No save slot is ever committed, simulating a crash before a clean
        // shutdown; `close` tears down the worker threads without saving.
        session.close().unwrap();
    }

    // Reopening with `Load` must fail: nothing was ever saved.
    let load_err = Config::new(&path).open(OpenMode::Load).unwrap_err();
    assert!(matches!(load_err, uds::Error::NotSavedCleanly));

    let rebuilt = Config::new(&path)
        .geometry(geometry)
        .zone_count(2)
        .open(OpenMode::Rebuild)
        .unwrap();

    // The most recently written chapter survives rebuild's disk scan.
    let recovered = rebuilt.query(last_chapter_name, false).unwrap();
    assert!(recovered.found);

    // The oldest in-window chapter (vcn 1) must still be in the window at
    // all — pins the window-boundary math against narrowing it to [2, 9)
    // and dropping vcn 1 entirely.
    let oldest_hit = rebuilt.query(sampled_in_oldest, false).unwrap();
    assert!(oldest_hit.found);
    assert_eq!(oldest_hit.location, Some(Location::InSparse));

    // A non-sampled name in that same (now sparse-band) chapter must miss —
    // pins the dense/sparse demotion running after replay, not before it.
    let demoted_miss = rebuilt.query(unsampled_in_oldest, false).unwrap();
    assert!(!demoted_miss.found);

    rebuilt.close().unwrap();
}

#[test]
fn scenario_6_delete_then_repost_reports_found_with_new_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let session = Config::new(dir.path().join("volume"))
        .geometry(scenario_geometry())
        .zone_count(2)
        .open(OpenMode::Create)
        .unwrap();

    let name = name_in_zone(0, 1);
    session.post(name, [1; 16]).unwrap();
    let deleted = session.delete(name).unwrap();
    assert!(deleted.found);

    let missed = session.query(name, false).unwrap();
    assert!(!missed.found);

    session.post(name, [2; 16]).unwrap();
    let requeried = session.query(name, false).unwrap();
    assert!(requeried.found);
    assert_eq!(requeried.old_metadata, Some([2; 16]));

    session.close().unwrap();
}
