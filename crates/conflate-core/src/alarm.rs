// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded alarm queue shared between the host application and the runtime.
//!
//! Producers never block: [`AlarmQueue::enqueue`] fails with
//! [`CoreError::QueueFull`] when all slots are taken.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::error::{CoreError, Result};

/// Number of alarm slots.
pub const ALARM_QUEUE_CAPACITY: usize = 100;
/// Longest alarm name kept, in characters.
pub const MAX_ALARM_NAME: usize = 25;
/// Longest alarm message kept, in characters.
pub const MAX_ALARM_MESSAGE: usize = 255;

/// One alarm record.
///
/// A record with `open == false` is the empty-queue sentinel; its other
/// fields carry no meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alarm {
    pub open: bool,
    pub sequence: u64,
    pub name: String,
    pub message: String,
    pub raised_at: Option<DateTime<Utc>>,
}

impl Alarm {
    fn closed() -> Self {
        Self {
            open: false,
            sequence: 0,
            name: String::new(),
            message: String::new(),
            raised_at: None,
        }
    }
}

/// Fill level of an [`AlarmQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Empty,
    Partial,
    Full,
}

struct Ring {
    slots: Vec<Option<Alarm>>,
    head: usize,
    tail: usize,
    count: usize,
    next_sequence: u64,
}

/// Fixed-capacity FIFO of alarms.
pub struct AlarmQueue {
    ring: Mutex<Ring>,
    capacity: usize,
}

impl Default for AlarmQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl AlarmQueue {
    pub fn new() -> Self {
        Self::with_capacity(ALARM_QUEUE_CAPACITY)
    }

    /// A queue with a custom slot count. Zero is bumped to one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Mutex::new(Ring {
                slots: vec![None; capacity],
                head: 0,
                tail: 0,
                count: 0,
                next_sequence: 0,
            }),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        // Ring updates never panic midway, so a poisoned ring is consistent.
        self.ring.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue an alarm, returning its sequence number.
    ///
    /// Over-long names and messages are silently truncated.
    pub fn enqueue(&self, name: &str, message: &str) -> Result<u64> {
        let name = truncate(name, MAX_ALARM_NAME);
        let message = truncate(message, MAX_ALARM_MESSAGE);
        let raised_at = Utc::now();

        let mut ring = self.lock();
        if ring.count == self.capacity {
            return Err(CoreError::QueueFull {
                capacity: self.capacity,
            });
        }

        let sequence = ring.next_sequence;
        ring.next_sequence += 1;
        let tail = ring.tail;
        ring.slots[tail] = Some(Alarm {
            open: true,
            sequence,
            name,
            message,
            raised_at: Some(raised_at),
        });
        ring.tail = (tail + 1) % self.capacity;
        ring.count += 1;

        Ok(sequence)
    }

    /// Pop the oldest alarm, or the closed sentinel when empty.
    pub fn dequeue(&self) -> Alarm {
        let mut ring = self.lock();
        if ring.count == 0 {
            return Alarm::closed();
        }

        let head = ring.head;
        let alarm = ring.slots[head].take();
        ring.head = (head + 1) % self.capacity;
        ring.count -= 1;

        alarm.unwrap_or_else(Alarm::closed)
    }

    pub fn len(&self) -> usize {
        self.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn state(&self) -> QueueState {
        match self.len() {
            0 => QueueState::Empty,
            n if n == self.capacity => QueueState::Full,
            _ => QueueState::Partial,
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_sequences_start_at_zero() {
        let queue = AlarmQueue::new();
        assert!(queue.enqueue("svc1", "disk full").is_ok());
        assert!(queue.enqueue("svc2", "oom").is_ok());

        let first = queue.dequeue();
        let second = queue.dequeue();

        assert!(first.open);
        assert_eq!(first.sequence, 0);
        assert_eq!(first.name, "svc1");
        assert_eq!(first.message, "disk full");

        assert!(second.open);
        assert_eq!(second.sequence, 1);
        assert_eq!(second.name, "svc2");
        assert_eq!(second.message, "oom");
    }

    #[test]
    fn test_empty_dequeue_is_closed() {
        let queue = AlarmQueue::new();
        assert!(!queue.dequeue().open);
        assert_eq!(queue.state(), QueueState::Empty);
    }

    #[test]
    fn test_full_queue_rejects_without_change() {
        let queue = AlarmQueue::new();
        for n in 0..ALARM_QUEUE_CAPACITY {
            assert_eq!(queue.enqueue("a", "m").unwrap(), n as u64);
        }
        assert_eq!(queue.state(), QueueState::Full);

        let err = queue.enqueue("overflow", "m").unwrap_err();
        assert!(matches!(err, CoreError::QueueFull { capacity: 100 }));
        assert_eq!(queue.len(), ALARM_QUEUE_CAPACITY);

        // Rejected alarms don't consume a sequence number
        assert_eq!(queue.dequeue().sequence, 0);
        assert_eq!(queue.enqueue("b", "m").unwrap(), 100);
    }

    #[test]
    fn test_wraps_around() {
        let queue = AlarmQueue::with_capacity(3);
        for round in 0..10u64 {
            queue.enqueue("a", "m").unwrap();
            queue.enqueue("b", "m").unwrap();
            assert_eq!(queue.state(), QueueState::Partial);
            assert_eq!(queue.dequeue().sequence, round * 2);
            assert_eq!(queue.dequeue().sequence, round * 2 + 1);
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_truncates_to_exact_limits() {
        let queue = AlarmQueue::new();
        let name = "n".repeat(MAX_ALARM_NAME + 10);
        let message = "m".repeat(MAX_ALARM_MESSAGE * 2);
        queue.enqueue(&name, &message).unwrap();

        let alarm = queue.dequeue();
        assert_eq!(alarm.name.chars().count(), MAX_ALARM_NAME);
        assert_eq!(alarm.message.chars().count(), MAX_ALARM_MESSAGE);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let name = "é".repeat(40);
        assert_eq!(truncate(&name, MAX_ALARM_NAME).chars().count(), MAX_ALARM_NAME);
        assert_eq!(truncate("short", MAX_ALARM_NAME), "short");
    }

    #[test]
    fn test_concurrent_producers_single_consumer() {
        let queue = Arc::new(AlarmQueue::new());
        let producers: Vec<_> = (0..4)
            .map(|t| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for n in 0..20 {
                        queue.enqueue(&format!("t{}", t), &format!("{}", n)).unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let mut last = None;
        let mut drained = 0;
        loop {
            let alarm = queue.dequeue();
            if !alarm.open {
                break;
            }
            if let Some(prev) = last {
                assert!(alarm.sequence > prev);
            }
            last = Some(alarm.sequence);
            drained += 1;
        }
        assert_eq!(drained, 80);
    }
}
