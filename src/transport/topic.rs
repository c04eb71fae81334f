//! Keyed, partitioned in-process topic
//!
//! Messages with the same key always land in the same partition and only the
//! head of a partition is ever handed out. The next message for a key is not
//! visible until the head is acknowledged, so per-key order is preserved even
//! across redeliveries. A negatively acknowledged head stays at the front and
//! becomes visible again after the redelivery backoff.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

struct Slot<T> {
    seq: u64,
    message: T,
    attempts: u32,
    in_flight: bool,
    not_before: Option<Instant>,
}

struct Partition<T> {
    queue: VecDeque<Slot<T>>,
}

/// A message handed to a consumer, to be acked or nacked by `(partition, seq)`
#[derive(Debug, Clone)]
pub struct Delivery<T> {
    pub partition: usize,
    pub seq: u64,
    /// 1 on first delivery
    pub attempt: u32,
    pub message: T,
}

pub struct Topic<T> {
    name: &'static str,
    partitions: Vec<Mutex<Partition<T>>>,
    notify: Notify,
    backoff: Duration,
    next_seq: AtomicU64,
}

impl<T: Clone> Topic<T> {
    pub fn new(name: &'static str, partitions: usize, backoff: Duration) -> Self {
        let partitions = partitions.max(1);
        Self {
            name,
            partitions: (0..partitions)
                .map(|_| {
                    Mutex::new(Partition {
                        queue: VecDeque::new(),
                    })
                })
                .collect(),
            notify: Notify::new(),
            backoff,
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    #[inline]
    pub fn partition_for(&self, key: u128) -> usize {
        (key % self.partitions.len() as u128) as usize
    }

    fn partition(&self, idx: usize) -> MutexGuard<'_, Partition<T>> {
        self.partitions[idx]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Append to the partition owning `key`; returns the message sequence
    pub fn publish(&self, key: u128, message: T) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let idx = self.partition_for(key);
        self.partition(idx).queue.push_back(Slot {
            seq,
            message,
            attempts: 0,
            in_flight: false,
            not_before: None,
        });
        self.notify.notify_waiters();
        seq
    }

    /// Hand out the first deliverable head among `partitions`
    pub fn try_fetch(&self, partitions: &[usize]) -> Option<Delivery<T>> {
        let now = Instant::now();
        for &idx in partitions {
            if idx >= self.partitions.len() {
                continue;
            }
            let mut partition = self.partition(idx);
            let Some(head) = partition.queue.front_mut() else {
                continue;
            };
            if head.in_flight || head.not_before.is_some_and(|t| t > now) {
                continue;
            }
            head.in_flight = true;
            head.attempts += 1;
            return Some(Delivery {
                partition: idx,
                seq: head.seq,
                attempt: head.attempts,
                message: head.message.clone(),
            });
        }
        None
    }

    /// Like [`Topic::try_fetch`], waiting up to `wait` for something to arrive
    pub async fn fetch(&self, partitions: &[usize], wait: Duration) -> Option<Delivery<T>> {
        let notified = self.notify.notified();
        if let Some(delivery) = self.try_fetch(partitions) {
            return Some(delivery);
        }
        let _ = tokio::time::timeout(wait, notified).await;
        self.try_fetch(partitions)
    }

    /// Remove the delivered head. Returns false if it is no longer the head.
    pub fn ack(&self, partition: usize, seq: u64) -> bool {
        let mut p = self.partition(partition);
        if p.queue.front().is_some_and(|h| h.seq == seq && h.in_flight) {
            p.queue.pop_front();
            drop(p);
            self.notify.notify_waiters();
            true
        } else {
            false
        }
    }

    /// Return the delivered head for redelivery after the backoff
    pub fn nack(&self, partition: usize, seq: u64) -> bool {
        let mut p = self.partition(partition);
        match p.queue.front_mut() {
            Some(head) if head.seq == seq && head.in_flight => {
                head.in_flight = false;
                head.not_before = Some(Instant::now() + self.backoff);
                true
            }
            _ => false,
        }
    }

    /// Messages not yet acknowledged, in flight included
    pub fn len(&self) -> usize {
        (0..self.partitions.len())
            .map(|i| self.partition(i).queue.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
