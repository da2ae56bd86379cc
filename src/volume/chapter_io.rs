// Reads and writes a single chapter's region of the volume file: an index
// page region (header + index page map) followed by a record page region
// (sorted name/metadata pairs), per spec.md §4.3.

use std::fs::File;
use std::os::unix::fs::FileExt;

use crate::error::{Error, Result};
use crate::geometry::{Geometry, BYTES_PER_PAGE};
use crate::name::{RecordName, NAME_SIZE};
use crate::open_chapter::OpenChapterRecord;
use crate::volume::index_page_map::IndexPageMap;

const RECORD_SIZE: usize = NAME_SIZE + 16; // name + metadata
const HEADER_SIZE: usize = 8 + 4; // vcn + count

fn chapter_base(geometry: &Geometry, physical_chapter: u32) -> u64 {
    u64::from(physical_chapter) * geometry.chapter_size_bytes()
}

fn record_region_offset(geometry: &Geometry) -> u64 {
    u64::from(geometry.index_pages_per_chapter) * u64::from(BYTES_PER_PAGE)
}

pub struct ChapterWriter<'a> {
    file: &'a mut File,
    geometry: &'a Geometry,
    physical_chapter: u32,
}

impl<'a> ChapterWriter<'a> {
    pub fn new(file: &'a mut File, geometry: &'a Geometry, physical_chapter: u32) -> Self {
        Self {
            file,
            geometry,
            physical_chapter,
        }
    }

    pub fn write(&mut self, vcn: u64, entries: &[(RecordName, OpenChapterRecord)]) -> Result<()> {
        let base = chapter_base(self.geometry, self.physical_chapter);

        let names: Vec<RecordName> = entries.iter().map(|(n, _)| *n).collect();
        let map = IndexPageMap::build(&names, self.geometry.records_per_page as usize);

        let mut index_region = vec![0u8; HEADER_SIZE];
        index_region[0..8].copy_from_slice(&vcn.to_le_bytes());
        index_region[8..12].copy_from_slice(&(entries.len() as u32).to_le_bytes());
        let map_bytes = map.encode();
        index_region.extend_from_slice(&(map_bytes.len() as u32).to_le_bytes());
        index_region.extend_from_slice(&map_bytes);

        let index_capacity = u64::from(self.geometry.index_pages_per_chapter) * u64::from(BYTES_PER_PAGE);
        if index_region.len() as u64 > index_capacity {
            return Err(Error::OutOfRange(
                "chapter index page map does not fit in index_pages_per_chapter".into(),
            ));
        }
        self.file.write_all_at(&index_region, base)?;

        let record_capacity =
            u64::from(self.geometry.record_pages_per_chapter) * u64::from(self.geometry.records_per_page) as u64;
        if entries.len() as u64 > record_capacity {
            return Err(Error::OutOfRange(
                "chapter has more entries than record pages can hold".into(),
            ));
        }

        let mut record_region = vec![0u8; (record_capacity as usize) * RECORD_SIZE];
        for (i, (name, record)) in entries.iter().enumerate() {
            let off = i * RECORD_SIZE;
            record_region[off..off + NAME_SIZE].copy_from_slice(name.as_bytes());
            record_region[off + NAME_SIZE..off + RECORD_SIZE].copy_from_slice(&record.metadata);
        }
        self.file
            .write_all_at(&record_region, base + record_region_offset(self.geometry))?;

        Ok(())
    }
}

pub struct ChapterReader<'a> {
    file: &'a File,
    geometry: &'a Geometry,
    physical_chapter: u32,
}

impl<'a> ChapterReader<'a> {
    pub fn new(file: &'a File, geometry: &'a Geometry, physical_chapter: u32) -> Self {
        Self {
            file,
            geometry,
            physical_chapter,
        }
    }

    fn read_header(&self) -> Result<(u64, u32)> {
        let base = chapter_base(self.geometry, self.physical_chapter);
        let mut header = [0u8; HEADER_SIZE];
        self.file.read_exact_at(&mut header, base)?;
        let vcn = u64::from_le_bytes(header[0..8].try_into().unwrap());
        let count = u32::from_le_bytes(header[8..12].try_into().unwrap());
        Ok((vcn, count))
    }

    /// The VCN stored in this physical slot's header, or `None` if the slot
    /// has never been written. Used by rebuild's boundary scan, which only
    /// needs the header, not the full chapter contents (spec.md §4.3
    /// `find_volume_chapter_boundaries`).
    pub fn vcn_if_present(&self) -> Result<Option<u64>> {
        let (vcn, count) = self.read_header()?;
        Ok(if count == 0 { None } else { Some(vcn) })
    }

    /// Reads and decodes the stored index page map, or `None` if this
    /// physical slot has never been written (a freshly created volume
    /// reads all zeroes: vcn 0, count 0, map length 0).
    pub fn read_index_page_map(&self) -> Result<Option<IndexPageMap>> {
        let base = chapter_base(self.geometry, self.physical_chapter);
        let (_, count) = self.read_header()?;
        if count == 0 {
            return Ok(None);
        }
        let mut len_bytes = [0u8; 4];
        self.file
            .read_exact_at(&mut len_bytes, base + HEADER_SIZE as u64)?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        let mut map_bytes = vec![0u8; len];
        self.file
            .read_exact_at(&mut map_bytes, base + HEADER_SIZE as u64 + 4)?;
        Ok(Some(IndexPageMap::decode(&map_bytes)?))
    }

    pub fn search_with_map(&self, map: &IndexPageMap, name: &RecordName) -> Result<Option<OpenChapterRecord>> {
        if map.page_count() == 0 {
            return Ok(None);
        }
        let page = map.page_for(name);
        if page >= self.geometry.record_pages_per_chapter as usize {
            return Ok(None);
        }
        let (_, total_count) = self.read_header()?;
        let records_per_page = self.geometry.records_per_page as usize;
        let page_start_index = page * records_per_page;
        let valid_in_page = (total_count as usize)
            .saturating_sub(page_start_index)
            .min(records_per_page);
        if valid_in_page == 0 {
            return Ok(None);
        }

        let base = chapter_base(self.geometry, self.physical_chapter);
        let page_offset = base + record_region_offset(self.geometry) + (page_start_index * RECORD_SIZE) as u64;
        let mut buf = vec![0u8; valid_in_page * RECORD_SIZE];
        self.file.read_exact_at(&mut buf, page_offset)?;

        // Only the records actually written to this page (`valid_in_page`)
        // are included — the rest of the page is zero padding that would
        // break the sorted-by-name order a binary search relies on.
        let chunks: Vec<_> = buf.chunks_exact(RECORD_SIZE).collect();
        if let Ok(idx) = chunks.binary_search_by(|chunk| chunk[0..NAME_SIZE].cmp(name.as_bytes())) {
            let mut metadata = [0u8; 16];
            metadata.copy_from_slice(&chunks[idx][NAME_SIZE..RECORD_SIZE]);
            return Ok(Some(OpenChapterRecord { metadata }));
        }
        Ok(None)
    }

    /// Reads the whole chapter's records if its stored VCN falls within
    /// `[oldest_vcn, newest_vcn]` — used by rebuild, which replays chapters
    /// in VCN order rather than doing point lookups (spec.md §6.4).
    pub fn read_if_in_range(
        &self,
        oldest_vcn: u64,
        newest_vcn: u64,
    ) -> Result<Option<(u64, Vec<(RecordName, OpenChapterRecord)>)>> {
        let (vcn, count) = self.read_header()?;
        if count == 0 || vcn < oldest_vcn || vcn > newest_vcn {
            return Ok(None);
        }
        let base = chapter_base(self.geometry, self.physical_chapter);
        let mut buf = vec![0u8; count as usize * RECORD_SIZE];
        self.file
            .read_exact_at(&mut buf, base + record_region_offset(self.geometry))?;

        let mut entries = Vec::with_capacity(count as usize);
        for chunk in buf.chunks_exact(RECORD_SIZE) {
            let mut name = [0u8; NAME_SIZE];
            name.copy_from_slice(&chunk[0..NAME_SIZE]);
            let mut metadata = [0u8; 16];
            metadata.copy_from_slice(&chunk[NAME_SIZE..RECORD_SIZE]);
            entries.push((RecordName::new(name), OpenChapterRecord { metadata }));
        }
        Ok(Some((vcn, entries)))
    }
}
