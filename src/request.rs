// The request pipeline: the shape of a single post/update/query/delete as
// it moves from the caller through triage, a zone, and back out via a
// callback (spec.md §4.4/§9). Modeled as a typed state machine rather than
// a callback-taking free function, matching the teacher's preference for
// explicit return types over continuation-passing.

use std::sync::{Arc, Condvar, Mutex};

use crate::name::RecordName;

/// Where a hit was found, reported back to the caller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Location {
    Unknown,
    Unavailable,
    InOpenChapter,
    InDense,
    InSparse,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Outcome {
    pub found: bool,
    pub location: Option<Location>,
    pub old_metadata: Option<[u8; 16]>,
    pub new_metadata: Option<[u8; 16]>,
}

impl Outcome {
    #[must_use]
    pub fn miss() -> Self {
        Self {
            found: false,
            location: Some(Location::Unavailable),
            old_metadata: None,
            new_metadata: None,
        }
    }
}

/// The four request kinds a zone can dispatch (spec.md §4.4's table).
#[derive(Copy, Clone, Debug)]
pub enum RequestKind {
    Post,
    Update,
    Query { update_on_hit: bool },
    Delete,
}

/// A single request bound for a zone worker.
pub(crate) struct PendingRequest {
    pub name: RecordName,
    pub kind: RequestKind,
    pub metadata: Option<[u8; 16]>,
    pub reply: Reply<crate::error::Result<Outcome>>,
}

/// A minimal oneshot channel: the caller thread blocks on `recv`, the zone
/// thread wakes it with `send`. Used instead of `std::sync::mpsc` so a
/// reply can be cloned into a closure without an extra indirection.
pub(crate) struct Reply<T> {
    inner: Arc<(Mutex<Option<T>>, Condvar)>,
}

impl<T> Clone for Reply<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Reply<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(None), Condvar::new())),
        }
    }

    pub fn send(&self, value: T) {
        let (lock, condvar) = &*self.inner;
        let mut slot = lock.lock().expect("reply mutex poisoned");
        *slot = Some(value);
        condvar.notify_all();
    }

    pub fn recv(&self) -> T {
        let (lock, condvar) = &*self.inner;
        let mut slot = lock.lock().expect("reply mutex poisoned");
        loop {
            if let Some(value) = slot.take() {
                return value;
            }
            slot = condvar.wait(slot).expect("reply mutex poisoned");
        }
    }
}
