// Rotating save slots (spec.md §4.8): each slot is a committable snapshot
// of volume-index + open-chapter + index-state metadata, written as one
// region (see `region.rs`). Two write modes share this format — `Save`
// (clean shutdown, always valid on load) and `Checkpoint` (periodic,
// "valid if complete"). Completeness is guaranteed structurally: a slot
// file is written to a temporary file in the same directory and only made
// visible by an atomic rename (the same trick the teacher uses for its
// own config file, `file::rewrite_atomic`), so a crash mid-write can never
// leave a partially-written slot where a reader would find it.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::layout::region::{read_region, write_region};

const CONFIG_VERSION_MAJOR: u32 = 1;
const CONFIG_VERSION_MINOR: u32 = 0;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum SaveMode {
    Save,
    Checkpoint,
}

impl SaveMode {
    fn tag(self) -> u8 {
        match self {
            Self::Save => 0,
            Self::Checkpoint => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Self::Save),
            1 => Ok(Self::Checkpoint),
            _ => Err(Error::CorruptComponent("unknown save-slot mode tag".into())),
        }
    }
}

/// Everything a load or rebuild-skip needs to restore in-memory state.
#[derive(Clone, Debug)]
pub(crate) struct SaveSlotPayload {
    pub mode: SaveMode,
    pub nonce: u64,
    pub sequence: u64,
    pub oldest_vcn: u64,
    pub newest_vcn: u64,
    pub checkpoint_chapters_since_last: u64,
    pub volume_index: Vec<u8>,
    pub open_chapters: Vec<Vec<u8>>,
}

impl SaveSlotPayload {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.mode.tag());
        out.extend_from_slice(&self.nonce.to_le_bytes());
        out.extend_from_slice(&self.sequence.to_le_bytes());
        out.extend_from_slice(&self.oldest_vcn.to_le_bytes());
        out.extend_from_slice(&self.newest_vcn.to_le_bytes());
        out.extend_from_slice(&self.checkpoint_chapters_since_last.to_le_bytes());
        out.extend_from_slice(&(self.volume_index.len() as u64).to_le_bytes());
        out.extend_from_slice(&self.volume_index);
        out.extend_from_slice(&(self.open_chapters.len() as u32).to_le_bytes());
        for chapter in &self.open_chapters {
            out.extend_from_slice(&(chapter.len() as u64).to_le_bytes());
            out.extend_from_slice(chapter);
        }
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        fn truncated() -> Error {
            Error::CorruptComponent("truncated save-slot payload".into())
        }
        fn read_u64(bytes: &[u8], pos: &mut usize) -> Result<u64> {
            let slice = bytes.get(*pos..*pos + 8).ok_or_else(truncated)?;
            *pos += 8;
            Ok(u64::from_le_bytes(slice.try_into().unwrap()))
        }

        let mode = SaveMode::from_tag(*bytes.first().ok_or_else(truncated)?)?;
        let mut pos = 1usize;
        let nonce = read_u64(bytes, &mut pos)?;
        let sequence = read_u64(bytes, &mut pos)?;
        let oldest_vcn = read_u64(bytes, &mut pos)?;
        let newest_vcn = read_u64(bytes, &mut pos)?;
        let checkpoint_chapters_since_last = read_u64(bytes, &mut pos)?;

        let vi_len = read_u64(bytes, &mut pos)? as usize;
        let volume_index = bytes.get(pos..pos + vi_len).ok_or_else(truncated)?.to_vec();
        pos += vi_len;

        let zone_count = u32::from_le_bytes(bytes.get(pos..pos + 4).ok_or_else(truncated)?.try_into().unwrap());
        pos += 4;
        let mut open_chapters = Vec::with_capacity(zone_count as usize);
        for _ in 0..zone_count {
            let len = read_u64(bytes, &mut pos)? as usize;
            let chunk = bytes.get(pos..pos + len).ok_or_else(truncated)?.to_vec();
            pos += len;
            open_chapters.push(chunk);
        }

        Ok(Self {
            mode,
            nonce,
            sequence,
            oldest_vcn,
            newest_vcn,
            checkpoint_chapters_since_last,
            volume_index,
            open_chapters,
        })
    }
}

/// Manages the rotating slot files `{base}.save.0 .. {base}.save.{n-1}`
/// sitting alongside the volume file and the config region.
pub(crate) struct SaveSlots {
    base: PathBuf,
    num_slots: usize,
}

impl SaveSlots {
    #[must_use]
    pub fn new(base: impl AsRef<Path>, num_slots: usize) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
            num_slots: num_slots.max(2),
        }
    }

    fn slot_path(&self, slot: usize) -> PathBuf {
        let mut path = self.base.clone().into_os_string();
        path.push(format!(".save.{slot}"));
        PathBuf::from(path)
    }

    fn read_slot(&self, slot: usize) -> Option<SaveSlotPayload> {
        let bytes = fs::read(self.slot_path(slot)).ok()?;
        let (_, payload) = read_region(&bytes).ok()?;
        SaveSlotPayload::decode(payload).ok()
    }

    /// Finds the slot with the highest `sequence` number among those that
    /// decode cleanly. A slot that fails to parse (torn write that somehow
    /// survived, foreign file) is skipped with a warning rather than
    /// failing the whole scan — a sibling slot may still be valid.
    pub fn find_latest(&self) -> Option<(usize, SaveSlotPayload)> {
        let mut best: Option<(usize, SaveSlotPayload)> = None;
        for slot in 0..self.num_slots {
            match self.read_slot(slot) {
                Some(payload) => {
                    let replace = match &best {
                        Some((_, b)) => payload.sequence > b.sequence,
                        None => true,
                    };
                    if replace {
                        best = Some((slot, payload));
                    }
                }
                None if fs::metadata(self.slot_path(slot)).is_ok() => {
                    log::warn!("save slot {slot} exists but failed to decode cleanly, skipping");
                }
                None => {}
            }
        }
        best
    }

    /// Picks the next slot to write into: one past whichever slot
    /// currently holds the highest sequence number, wrapping around.
    #[must_use]
    pub fn setup_next(&self) -> (usize, u64) {
        match self.find_latest() {
            Some((slot, payload)) => ((slot + 1) % self.num_slots, payload.sequence + 1),
            None => (0, 0),
        }
    }

    /// Commits `payload` into `slot` via a write-to-temp-then-rename, so a
    /// reader never observes a half-written slot (spec.md §4.8
    /// `commit_save`).
    pub fn commit(&self, slot: usize, payload: &SaveSlotPayload) -> Result<()> {
        let encoded = write_region(CONFIG_VERSION_MAJOR, CONFIG_VERSION_MINOR, &payload.encode());
        let target = self.slot_path(slot);
        let dir = target.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(&encoded)?;
        temp.flush()?;
        {
            let file = File::open(temp.path())?;
            file.sync_all()?;
        }
        temp.persist(&target).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    /// A save that was setup but never committed needs no cleanup: the
    /// temp file used by `commit` is self-contained and simply dropped.
    /// Kept for symmetry with spec.md's `cancel_save`/`setup_save_slot`
    /// pairing.
    pub fn cancel(&self, _slot: usize) {}

    pub fn discard_all(&self) -> Result<()> {
        for slot in 0..self.num_slots {
            let path = self.slot_path(slot);
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}
