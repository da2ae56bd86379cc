// Caches decoded index page maps per physical chapter slot, so repeated
// lookups against a hot (recently-written) chapter skip re-reading and
// re-decoding its index pages (spec.md §4.3). Record pages still go to
// disk on every search; only the map that routes to the right one is
// cached.

use std::sync::Arc;

use quick_cache::sync::Cache;

use crate::error::Result;
use crate::name::RecordName;
use crate::open_chapter::OpenChapterRecord;
use crate::volume::chapter_io::ChapterReader;
use crate::volume::index_page_map::IndexPageMap;

pub struct PageCache {
    maps: Cache<u32, Arc<IndexPageMap>>,
}

impl PageCache {
    #[must_use]
    pub fn new(capacity_chapters: usize) -> Self {
        Self {
            maps: Cache::new(capacity_chapters.max(1)),
        }
    }

    pub fn invalidate(&self, physical_chapter: u32) {
        self.maps.remove(&physical_chapter);
    }

    pub fn search(
        &self,
        physical_chapter: u32,
        reader: &ChapterReader<'_>,
        name: &RecordName,
    ) -> Result<Option<OpenChapterRecord>> {
        let map = match self.maps.get(&physical_chapter) {
            Some(map) => map,
            None => {
                let Some(map) = reader.read_index_page_map()? else {
                    return Ok(None);
                };
                let map = Arc::new(map);
                self.maps.insert(physical_chapter, Arc::clone(&map));
                map
            }
        };
        reader.search_with_map(&map, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn cache_starts_empty_and_accepts_inserts() {
        let cache = PageCache::new(2);
        assert!(cache.maps.get(&0).is_none());
        cache.maps.insert(0, Arc::new(IndexPageMap::default()));
        assert!(cache.maps.get(&0).is_some());
        cache.invalidate(0);
        assert!(cache.maps.get(&0).is_none());
    }
}
