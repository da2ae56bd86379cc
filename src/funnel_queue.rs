// A multi-producer, single-consumer queue used to hand requests and
// control messages from any caller thread to a zone's single worker
// thread (spec.md §9 design notes: "producers exchange a tail pointer; the
// consumer polls"). The design note describes a lock-free intrusive list;
// this implementation keeps the single-consumer-polls contract but backs
// it with a `Mutex<VecDeque>` plus a `Condvar` rather than hand-rolled
// atomics, trading some throughput under heavy contention for an
// implementation that is straightforward to get right.
//
// Every zone's request stream, plus its control-message stream (barrier,
// drain, flush), is carried on one of these so ordering between requests
// and control messages issued by the same producer is preserved.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

pub struct FunnelQueue<T> {
    queue: Mutex<VecDeque<T>>,
    not_empty: Condvar,
}

impl<T> Default for FunnelQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FunnelQueue<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
        }
    }

    /// Enqueues `item`. Any number of producer threads may call this
    /// concurrently.
    pub fn push(&self, item: T) {
        let mut queue = self.queue.lock().expect("funnel queue mutex poisoned");
        queue.push_back(item);
        self.not_empty.notify_one();
    }

    /// Non-blocking pop, used by the consumer's poll loop.
    pub fn try_pop(&self) -> Option<T> {
        self.queue.lock().expect("funnel queue mutex poisoned").pop_front()
    }

    /// Blocks until an item is available. Only ever called by the single
    /// consumer thread.
    pub fn pop_blocking(&self) -> T {
        let mut queue = self.queue.lock().expect("funnel queue mutex poisoned");
        loop {
            if let Some(item) = queue.pop_front() {
                return item;
            }
            queue = self
                .not_empty
                .wait(queue)
                .expect("funnel queue mutex poisoned");
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().expect("funnel queue mutex poisoned").is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().expect("funnel queue mutex poisoned").len()
    }
}
