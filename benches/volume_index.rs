use criterion::{criterion_group, criterion_main, Criterion};
use uds::volume_index::VolumeIndex;
use uds::Geometry;

fn name(seed: u64) -> uds::RecordName {
    let mixed = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ seed.rotate_left(17);
    let mut bytes = [0u8; 16];
    bytes[0..8].copy_from_slice(&mixed.to_le_bytes());
    uds::RecordName::new(bytes)
}

fn geometry() -> Geometry {
    // A geometry large enough to hold several hundred thousand names
    // across its dense band without tripping chapter demotion mid-run.
    Geometry::new(256, 64, 8, 64, 8, 4).unwrap()
}

fn put(c: &mut Criterion) {
    let geometry = geometry();
    c.bench_function("volume index put", |b| {
        let idx = VolumeIndex::new(geometry, 4);
        let mut next = 0u64;
        b.iter(|| {
            let probe = name(next);
            let zone_id = idx.zone_of(&probe);
            idx.zone_lock(zone_id)
                .put(&probe, 0, geometry.sparse_sample_rate)
                .unwrap();
            next += 1;
        });
    });
}

fn lookup_hit(c: &mut Criterion) {
    let geometry = geometry();
    let idx = VolumeIndex::new(geometry, 4);
    for i in 0..200_000u64 {
        let probe = name(i);
        let zone_id = idx.zone_of(&probe);
        idx.zone_lock(zone_id).put(&probe, 0, geometry.sparse_sample_rate).unwrap();
    }

    c.bench_function("volume index lookup, hit", |b| {
        let mut probe = 0u64;
        b.iter(|| {
            let triage = idx.lookup(&name(probe % 200_000));
            assert!(triage.virtual_chapter.is_some());
            probe += 1;
        });
    });
}

fn lookup_miss(c: &mut Criterion) {
    let geometry = geometry();
    let idx = VolumeIndex::new(geometry, 4);
    for i in 0..200_000u64 {
        let probe = name(i);
        let zone_id = idx.zone_of(&probe);
        idx.zone_lock(zone_id).put(&probe, 0, geometry.sparse_sample_rate).unwrap();
    }

    c.bench_function("volume index lookup, miss", |b| {
        let mut probe = 1_000_000u64;
        b.iter(|| {
            let triage = idx.lookup(&name(probe));
            assert!(triage.virtual_chapter.is_none());
            probe += 1;
        });
    });
}

criterion_group!(benches, put, lookup_hit, lookup_miss);
criterion_main!(benches);
