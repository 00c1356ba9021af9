//! Priority scheduler for pending chunk uploads.
//!
//! A single binary heap ordered by `(effective priority, enqueue time,
//! sequence)`: strict priority across lanes, FIFO within a lane. With aging
//! enabled, an entry that waited longer than the threshold is promoted one
//! level and its wait clock restarts, so a low-priority transfer cannot be
//! starved forever by a stream of high-priority work. Without aging it can.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Mutex;
use std::time::Duration;

use ferry_protocol::Priority;
use tokio::sync::Notify;
use tokio::time::Instant;

struct Entry<T> {
    priority: Priority,
    enqueued_at: Instant,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    // Max-heap: higher priority first, then the earlier enqueue, then the
    // lower sequence number.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.enqueued_at.cmp(&self.enqueued_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Inner<T> {
    heap: BinaryHeap<Entry<T>>,
    next_seq: u64,
    closed: bool,
}

pub struct PriorityScheduler<T> {
    inner: Mutex<Inner<T>>,
    notify: Notify,
    aging_threshold: Option<Duration>,
}

impl<T> PriorityScheduler<T> {
    /// Creates a scheduler. `None` disables aging.
    pub fn new(aging_threshold: Option<Duration>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                next_seq: 0,
                closed: false,
            }),
            notify: Notify::new(),
            aging_threshold,
        }
    }

    /// Enqueues `item`. Returns `false` once the scheduler is closed.
    pub fn push(&self, item: T, priority: Priority) -> bool {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return false;
            }
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.heap.push(Entry {
                priority,
                enqueued_at: Instant::now(),
                seq,
                item,
            });
        }
        self.notify.notify_one();
        true
    }

    /// Removes the highest-ranked entry, if any.
    pub fn try_pop(&self) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();
        self.pop_locked(&mut inner)
    }

    /// Waits for the next entry. Returns `None` once closed and drained.
    pub async fn next(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(item) = self.pop_locked(&mut inner) {
                    // Another waiter may be able to take the next entry.
                    if !inner.heap.is_empty() {
                        self.notify.notify_one();
                    }
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Rejects further pushes and wakes every waiter.
    pub fn close(&self) {
        self.inner.lock().unwrap().closed = true;
        self.notify.notify_waiters();
    }

    /// Keeps only the entries for which `keep` returns true. Returns the
    /// number removed.
    pub fn retain(&self, mut keep: impl FnMut(&T) -> bool) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.heap.len();
        inner.heap.retain(|entry| keep(&entry.item));
        before - inner.heap.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pop_locked(&self, inner: &mut Inner<T>) -> Option<T> {
        if let Some(threshold) = self.aging_threshold {
            age(&mut inner.heap, threshold);
        }
        inner.heap.pop().map(|entry| entry.item)
    }
}

/// Promotes every entry that waited at least `threshold` by one level.
fn age<T>(heap: &mut BinaryHeap<Entry<T>>, threshold: Duration) {
    let now = Instant::now();
    let due = |e: &Entry<T>| e.priority < Priority::High && now - e.enqueued_at >= threshold;
    if !heap.iter().any(due) {
        return;
    }

    let mut entries = std::mem::take(heap).into_vec();
    for entry in &mut entries {
        if due(&*entry) {
            entry.priority = entry.priority.promote();
            entry.enqueued_at = now;
        }
    }
    *heap = BinaryHeap::from(entries);
}
