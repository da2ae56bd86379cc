// The chapter writer: a single background thread per index that packs
// the per-zone open-chapter images submitted for a given VCN into one
// sorted on-disk chapter (spec.md §4.6). Ownership of a closed chapter's
// data is transferred from each zone into the writer via a bounded
// handoff (here, a `FunnelQueue`); the writer hands back a completion
// signal each zone waits on before it may reuse its writing-chapter slot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::error::Result;
use crate::funnel_queue::FunnelQueue;
use crate::name::RecordName;
use crate::open_chapter::OpenChapterRecord;
use crate::request::Reply;
use crate::volume::Volume;

pub(crate) struct Submission {
    pub vcn: u64,
    pub zone_id: u32,
    pub entries: Vec<(RecordName, OpenChapterRecord)>,
    pub done: Reply<Result<()>>,
}

enum Message {
    Submit(Submission),
    Shutdown,
}

/// Handle shared by every zone worker and the writer thread.
pub(crate) struct ChapterWriterHandle {
    queue: FunnelQueue<Message>,
    /// Set once any chapter write has failed — poisons the index
    /// (spec.md §7: "any error during chapter-writer commit poisons the
    /// index").
    poisoned: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ChapterWriterHandle {
    #[must_use]
    pub fn spawn(volume: Arc<Mutex<Volume>>, zone_count: u32) -> Arc<Self> {
        let handle = Arc::new(Self {
            queue: FunnelQueue::new(),
            poisoned: AtomicBool::new(false),
            thread: Mutex::new(None),
        });

        let worker_handle = Arc::clone(&handle);
        let thread = std::thread::spawn(move || run(worker_handle, volume, zone_count));
        *handle.thread.lock().expect("chapter writer thread mutex poisoned") = Some(thread);
        handle
    }

    pub fn submit(&self, submission: Submission) {
        self.queue.push(Message::Submit(submission));
    }

    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    pub fn shutdown(&self) {
        self.queue.push(Message::Shutdown);
        if let Some(thread) = self
            .thread
            .lock()
            .expect("chapter writer thread mutex poisoned")
            .take()
        {
            let _ = thread.join();
        }
    }
}

fn run(handle: Arc<ChapterWriterHandle>, volume: Arc<Mutex<Volume>>, zone_count: u32) {
    let mut pending: HashMap<u64, Vec<Submission>> = HashMap::new();

    loop {
        match handle.queue.pop_blocking() {
            Message::Shutdown => return,
            Message::Submit(submission) => {
                let vcn = submission.vcn;
                let bucket = pending.entry(vcn).or_default();
                bucket.push(submission);

                if bucket.len() as u32 == zone_count {
                    let submissions = pending.remove(&vcn).expect("bucket just inserted into");
                    let result = pack_and_write(&volume, vcn, &submissions);
                    if result.is_err() {
                        handle.poisoned.store(true, Ordering::Release);
                        log::error!("chapter writer failed to commit vcn {vcn}, index poisoned");
                    } else {
                        log::debug!("chapter writer committed vcn {vcn}");
                    }
                    for submission in submissions {
                        submission.done.send(result.as_ref().map(|()| ()).map_err(clone_error));
                    }
                }
            }
        }
    }
}

fn clone_error(err: &crate::error::Error) -> crate::error::Error {
    crate::error::Error::BadState(format!("chapter write failed: {err}"))
}

fn pack_and_write(volume: &Arc<Mutex<Volume>>, vcn: u64, submissions: &[Submission]) -> Result<()> {
    let mut merged: Vec<(RecordName, OpenChapterRecord)> = submissions
        .iter()
        .flat_map(|s| s.entries.iter().copied())
        .collect();
    merged.sort_by(|a, b| a.0.cmp(&b.0));
    let mut volume = volume.lock().expect("volume mutex poisoned");
    volume.write_chapter(vcn, &merged)?;
    volume.sync()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use test_log::test;

    fn entry(byte: u8) -> (RecordName, OpenChapterRecord) {
        (
            RecordName::new([byte; 16]),
            OpenChapterRecord { metadata: [byte; 16] },
        )
    }

    #[test]
    fn all_zones_submitting_commits_the_chapter() {
        let dir = tempfile::tempdir().unwrap();
        let geometry = Geometry::default();
        let volume = Arc::new(Mutex::new(Volume::create(dir.path().join("volume"), geometry, 2).unwrap()));
        let handle = ChapterWriterHandle::spawn(Arc::clone(&volume), 2);

        let reply_a = Reply::new();
        handle.submit(Submission {
            vcn: 0,
            zone_id: 0,
            entries: vec![entry(1)],
            done: reply_a.clone(),
        });
        let reply_b = Reply::new();
        handle.submit(Submission {
            vcn: 0,
            zone_id: 1,
            entries: vec![entry(2)],
            done: reply_b.clone(),
        });

        reply_a.recv().unwrap();
        reply_b.recv().unwrap();

        let found = volume
            .lock()
            .unwrap()
            .search_chapter(0, &RecordName::new([2; 16]))
            .unwrap();
        assert!(found.is_some());
        assert!(!handle.is_poisoned());

        handle.shutdown();
    }
}
