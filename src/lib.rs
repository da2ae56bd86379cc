//! UDS: an on-disk, content-addressed deduplication index.
//!
//! A UDS volume maps 16-byte chunk names to a hint about where their
//! physical data last lived (spec.md §1-§3): `post`/`update` record that
//! hint, `query` asks for it back, `delete` removes it. The index itself
//! never stores or moves the underlying data — it is advisory, sized to
//! fit far more names than it can hold full records for, trading
//! occasional false negatives for a constant, small memory footprint
//! (spec.md §9 design notes).
//!
//! The public surface is deliberately small: build a [`Config`], `open`
//! it in one of three [`OpenMode`]s, and drive the returned [`Session`].
//! Everything else — zones, the chapter writer, the volume index, the
//! on-disk layout — is internal.
//!
//! ```no_run
//! use uds::{Config, OpenMode};
//!
//! # fn main() -> uds::Result<()> {
//! let session = Config::new("/var/lib/uds/volume")
//!     .zone_count(4)
//!     .open(OpenMode::Create)?;
//!
//! let name = uds::RecordName::new([0u8; 16]);
//! session.post(name, [0u8; 16])?;
//! let found = session.query(name, false)?;
//! assert!(found.found);
//!
//! session.save()?;
//! session.close()?;
//! # Ok(())
//! # }
//! ```

mod chapter_writer;
mod checkpoint;
/// Exposed (like the teacher's `segment::filter`) so `benches/delta_index.rs`
/// can drive it directly; not part of the crate's advertised public surface.
pub mod delta_index;
mod error;
mod funnel_queue;
mod geometry;
mod layout;
mod load_context;
mod name;
mod open_chapter;
mod rebuild;
mod request;
mod session;
mod sparse_cache;
mod stats;
mod triage;
mod volume;
/// Exposed for `benches/volume_index.rs`; see `delta_index`'s note above.
pub mod volume_index;
mod zone;

pub use error::{Error, Result};
pub use geometry::Geometry;
pub use name::RecordName;
pub use request::{Location, Outcome, RequestKind};
pub use session::{Config, OpenMode, Session};
pub use stats::{IndexStats, VolumeStatsSnapshot, ZoneStatsSnapshot};
