//
// Copyright (c) The Proxima Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Instant;

// Handle to a scheduled timer.
//
// Dropping a handle does not cancel the timer; owners of deferred work hold
// the handle and cancel it explicitly when the work is no longer wanted.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TimerHandle(u64);

// Single-owner timer scheduler.
//
// All deferred work of a protocol instance lives here as plain messages. The
// wheel never consults the system clock: callers pass `now` in, which keeps
// instances deterministic under simulated time. Stale heap entries left
// behind by cancel/reset are discarded lazily on pop.
#[derive(Debug)]
pub struct TimerWheel<T> {
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    entries: HashMap<u64, TimerEntry<T>>,
    next_id: u64,
}

#[derive(Debug)]
struct TimerEntry<T> {
    deadline: Instant,
    msg: T,
}

// ===== impl TimerWheel =====

impl<T> TimerWheel<T> {
    pub fn new() -> TimerWheel<T> {
        TimerWheel {
            heap: BinaryHeap::new(),
            entries: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    // Schedules `msg` to fire at `deadline`.
    pub fn schedule(&mut self, deadline: Instant, msg: T) -> TimerHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, TimerEntry { deadline, msg });
        self.heap.push(Reverse((deadline, id)));
        TimerHandle(id)
    }

    // Cancels a pending timer, returning its message if it hadn't fired yet.
    pub fn cancel(&mut self, handle: TimerHandle) -> Option<T> {
        self.entries.remove(&handle.0).map(|entry| entry.msg)
    }

    // Moves a pending timer to a new deadline. Returns false if the timer
    // already fired or was cancelled.
    pub fn reset(&mut self, handle: TimerHandle, deadline: Instant) -> bool {
        match self.entries.get_mut(&handle.0) {
            Some(entry) => {
                entry.deadline = deadline;
                self.heap.push(Reverse((deadline, handle.0)));
                true
            }
            None => false,
        }
    }

    // Returns the earliest pending deadline.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            match self.entries.get(&id) {
                Some(entry) if entry.deadline == deadline => {
                    return Some(deadline);
                }
                _ => {
                    // Stale heap entry.
                    self.heap.pop();
                }
            }
        }
        None
    }

    // Pops the next timer whose deadline is not after `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<T> {
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            let valid = matches!(
                self.entries.get(&id),
                Some(entry) if entry.deadline == deadline
            );
            if !valid {
                self.heap.pop();
                continue;
            }
            if deadline > now {
                return None;
            }
            self.heap.pop();
            return self.entries.remove(&id).map(|entry| entry.msg);
        }
        None
    }

    // Cancels all pending timers.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.entries.clear();
    }
}

impl<T> Default for TimerWheel<T> {
    fn default() -> TimerWheel<T> {
        TimerWheel::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn fire_in_deadline_order() {
        let start = Instant::now();
        let mut wheel = TimerWheel::new();
        wheel.schedule(start + Duration::from_secs(2), "b");
        wheel.schedule(start + Duration::from_secs(1), "a");
        wheel.schedule(start + Duration::from_secs(3), "c");

        assert_eq!(wheel.next_deadline(), Some(start + Duration::from_secs(1)));
        assert_eq!(wheel.pop_due(start), None);
        let now = start + Duration::from_secs(2);
        assert_eq!(wheel.pop_due(now), Some("a"));
        assert_eq!(wheel.pop_due(now), Some("b"));
        assert_eq!(wheel.pop_due(now), None);
        assert_eq!(wheel.pop_due(start + Duration::from_secs(3)), Some("c"));
        assert!(wheel.is_empty());
    }

    #[test]
    fn cancel_prevents_firing() {
        let start = Instant::now();
        let mut wheel = TimerWheel::new();
        let handle = wheel.schedule(start + Duration::from_secs(1), "a");
        assert_eq!(wheel.cancel(handle), Some("a"));
        assert_eq!(wheel.cancel(handle), None);
        assert_eq!(wheel.pop_due(start + Duration::from_secs(5)), None);
        assert_eq!(wheel.next_deadline(), None);
    }

    #[test]
    fn reset_moves_deadline() {
        let start = Instant::now();
        let mut wheel = TimerWheel::new();
        let handle = wheel.schedule(start + Duration::from_secs(1), "a");
        assert!(wheel.reset(handle, start + Duration::from_secs(10)));
        assert_eq!(wheel.pop_due(start + Duration::from_secs(5)), None);
        assert_eq!(wheel.pop_due(start + Duration::from_secs(10)), Some("a"));
        assert!(!wheel.reset(handle, start + Duration::from_secs(20)));
    }
}
