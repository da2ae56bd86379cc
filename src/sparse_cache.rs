// The sparse cache: a fixed-capacity cache of decoded sparse-chapter record
// sets, shared across all zones (spec.md §4.3). Unlike a zone's own dense
// shard, the sparse cache is not partitioned — every zone can ask it
// whether a name appears in any cached sparse chapter. Membership only
// changes at a barrier: every zone must have processed the same
// `SPARSE_CACHE_BARRIER` control message for a VCN before that chapter is
// admitted, so all zones observe cache contents identically (spec.md
// §4.5).

use std::sync::Arc;

use quick_cache::sync::Cache;

use crate::name::RecordName;
use crate::open_chapter::OpenChapterRecord;

#[derive(Clone, Debug)]
struct CachedChapter {
    entries: Vec<(RecordName, OpenChapterRecord)>,
}

impl CachedChapter {
    fn find(&self, name: &RecordName) -> Option<OpenChapterRecord> {
        self.entries
            .binary_search_by(|(n, _)| n.cmp(name))
            .ok()
            .map(|idx| self.entries[idx].1)
    }
}

pub struct SparseCache {
    chapters: Cache<u64, Arc<CachedChapter>>,
}

impl SparseCache {
    #[must_use]
    pub fn new(capacity_chapters: usize) -> Self {
        Self {
            chapters: Cache::new(capacity_chapters.max(1)),
        }
    }

    #[must_use]
    pub fn contains(&self, vcn: u64) -> bool {
        self.chapters.get(&vcn).is_some()
    }

    /// Admits a decoded chapter into the cache. Only called after every
    /// zone has acknowledged the barrier for `vcn` (spec.md §4.5) —
    /// `SparseCache` itself does not track barrier state, that lives in
    /// `triage.rs`.
    pub fn admit(&self, vcn: u64, mut entries: Vec<(RecordName, OpenChapterRecord)>) {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        self.chapters.insert(vcn, Arc::new(CachedChapter { entries }));
    }

    pub fn evict(&self, vcn: u64) {
        self.chapters.remove(&vcn);
    }

    #[must_use]
    pub fn search(&self, vcn: u64, name: &RecordName) -> Option<OpenChapterRecord> {
        self.chapters.get(&vcn)?.find(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn entry(byte: u8) -> (RecordName, OpenChapterRecord) {
        (
            RecordName::new([byte; 16]),
            OpenChapterRecord { metadata: [byte; 16] },
        )
    }

    #[test]
    fn admit_then_search_hits() {
        let cache = SparseCache::new(4);
        cache.admit(3, vec![entry(1), entry(2)]);
        assert!(cache.contains(3));
        assert_eq!(cache.search(3, &RecordName::new([1; 16])).unwrap().metadata, [1; 16]);
        assert!(cache.search(3, &RecordName::new([9; 16])).is_none());
    }

    #[test]
    fn evict_clears_membership() {
        let cache = SparseCache::new(4);
        cache.admit(3, vec![entry(1)]);
        cache.evict(3);
        assert!(!cache.contains(3));
    }
}
