//! Event Queue - Bounded buffer between the kernel sensor and triage workers
//!
//! - `enqueue` never blocks: a full queue fails fast with `QueueError::Full`.
//! - `dequeue` blocks until an event is available or the queue is closed.
//! - Process affinity: at most one event per pid is in flight. A worker skips
//!   events whose pid is busy, so per-pid FIFO order holds while unrelated
//!   processes are triaged in parallel.
//! - Every dequeued event is tracked until `finish` delivers its verdict.
//!   Delivery runs outside the queue lock; the pid stays busy until it
//!   returns, which is what keeps per-pid verdicts in order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use super::sensor::{EventId, KernelEvent};

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("event queue full (capacity {capacity})")]
    Full { capacity: usize },

    #[error("event queue closed")]
    Closed,
}

// ============================================================================
// TICKETS
// ============================================================================

/// Proof of an in-flight event. Consumed by `EventQueue::finish`.
#[derive(Debug)]
pub struct Ticket {
    seq: u64,
    pid: u32,
    event_id: EventId,
}

impl Ticket {
    /// Global dequeue order
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }
}

#[derive(Debug)]
pub struct Dequeued {
    pub ticket: Ticket,
    pub event: KernelEvent,
}

/// Event left without a verdict when the queue was force-drained
#[derive(Debug, Clone)]
pub struct Unfinished {
    pub pid: u32,
    pub event_id: EventId,
    /// `true` if a worker had dequeued it, `false` if it never left the queue
    pub was_in_flight: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub capacity: usize,
    pub depth: usize,
    pub in_flight: usize,
    pub enqueued: u64,
    pub rejected: u64,
    pub completed: u64,
    pub closed: bool,
}

// ============================================================================
// QUEUE
// ============================================================================

struct Slot {
    seq: u64,
    event_id: EventId,
    /// `finish` is running the sink for this slot
    delivering: bool,
}

struct QueueState {
    events: VecDeque<KernelEvent>,
    busy: HashMap<u32, Slot>,
    abandoned: HashSet<u64>,
    next_seq: u64,
    closed: bool,
}

impl QueueState {
    fn is_idle(&self) -> bool {
        self.events.is_empty() && self.busy.is_empty()
    }
}

pub struct EventQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    idle: Condvar,
    released: Condvar,
    capacity: usize,
    enqueued: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                events: VecDeque::with_capacity(capacity.min(65_536)),
                busy: HashMap::new(),
                abandoned: HashSet::new(),
                next_seq: 0,
                closed: false,
            }),
            available: Condvar::new(),
            idle: Condvar::new(),
            released: Condvar::new(),
            capacity,
            enqueued: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        }
    }

    /// Push an event from the sensor. Never blocks.
    pub fn enqueue(&self, event: KernelEvent) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(QueueError::Closed);
        }
        if state.events.len() >= self.capacity {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(QueueError::Full { capacity: self.capacity });
        }

        state.events.push_back(event);
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        drop(state);

        self.available.notify_one();
        Ok(())
    }

    /// Take the oldest event whose process has nothing in flight.
    ///
    /// Returns `QueueError::Closed` once the queue is closed and empty.
    pub fn dequeue(&self) -> Result<Dequeued, QueueError> {
        let mut state = self.state.lock();

        loop {
            let QueueState { events, busy, .. } = &mut *state;
            let position = events.iter().position(|e| !busy.contains_key(&e.pid()));

            if let Some(event) = position.and_then(|idx| state.events.remove(idx)) {
                let seq = state.next_seq;
                state.next_seq += 1;

                let ticket = Ticket { seq, pid: event.pid(), event_id: event.id() };
                state.busy.insert(
                    ticket.pid,
                    Slot { seq, event_id: ticket.event_id, delivering: false },
                );
                return Ok(Dequeued { ticket, event });
            }

            if state.closed && state.events.is_empty() {
                return Err(QueueError::Closed);
            }

            self.available.wait(&mut state);
        }
    }

    /// Deliver the verdict for an in-flight event and release its process.
    ///
    /// `deliver` runs without the queue lock, so a slow sink never stalls
    /// `enqueue`. The pid is released only after `deliver` returns. Returns
    /// `false` (and skips `deliver`) if the event was already force-drained.
    pub fn finish(&self, ticket: Ticket, deliver: impl FnOnce()) -> bool {
        {
            let mut state = self.state.lock();
            if state.abandoned.remove(&ticket.seq) {
                log::warn!(
                    "Late verdict for {} (pid {}) dropped: already failed safe",
                    ticket.event_id, ticket.pid
                );
                return false;
            }
            if let Some(slot) = state.busy.get_mut(&ticket.pid) {
                if slot.seq == ticket.seq {
                    slot.delivering = true;
                }
            }
        }

        deliver();

        let mut state = self.state.lock();
        if state.busy.get(&ticket.pid).map(|slot| slot.seq) == Some(ticket.seq) {
            state.busy.remove(&ticket.pid);
        }
        self.completed.fetch_add(1, Ordering::Relaxed);

        let idle = state.is_idle();
        drop(state);

        self.available.notify_all();
        self.released.notify_all();
        if idle {
            self.idle.notify_all();
        }
        true
    }

    /// Reject further enqueues and wake every blocked `dequeue`.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }

    /// Wait until no event is queued or in flight.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();

        while !state.is_idle() {
            if self.idle.wait_until(&mut state, deadline).timed_out() {
                return state.is_idle();
            }
        }
        true
    }

    /// Force-drain: every in-flight event (oldest first), then every queued
    /// event, is handed to `deliver` exactly once. Verdicts already being
    /// delivered by `finish` are waited for first so a pid's fail-safe
    /// verdicts never overtake its real one. Late `finish` calls for the
    /// drained in-flight events become no-ops.
    pub fn fail_remaining(&self, mut deliver: impl FnMut(&Unfinished)) -> Vec<Unfinished> {
        let mut left = Vec::new();
        {
            let mut state = self.state.lock();
            while state.busy.values().any(|slot| slot.delivering) {
                self.released.wait(&mut state);
            }

            let mut in_flight: Vec<(u32, Slot)> = state.busy.drain().collect();
            in_flight.sort_by_key(|(_, slot)| slot.seq);
            for (pid, slot) in in_flight {
                state.abandoned.insert(slot.seq);
                left.push(Unfinished { pid, event_id: slot.event_id, was_in_flight: true });
            }

            while let Some(event) = state.events.pop_front() {
                left.push(Unfinished { pid: event.pid(), event_id: event.id(), was_in_flight: false });
            }
        }

        self.available.notify_all();
        self.idle.notify_all();

        for unfinished in &left {
            deliver(unfinished);
        }
        left
    }

    pub fn depth(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().busy.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            capacity: self.capacity,
            depth: state.events.len(),
            in_flight: state.busy.len(),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            closed: state.closed,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::sensor::EventKind;
    use std::sync::Arc;

    fn event(id: u64, pid: u32) -> KernelEvent {
        KernelEvent::new(id, id, pid, pid, EventKind::FileWrite, "C:\\data\\a.txt", vec![]).unwrap()
    }

    #[test]
    fn test_full_queue_rejects_without_blocking() {
        let queue = EventQueue::new(2);
        queue.enqueue(event(1, 1)).unwrap();
        queue.enqueue(event(2, 2)).unwrap();

        let started = Instant::now();
        assert_eq!(queue.enqueue(event(3, 3)), Err(QueueError::Full { capacity: 2 }));
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(queue.stats().rejected, 1);
    }

    #[test]
    fn test_fifo_and_process_affinity() {
        let queue = EventQueue::new(8);
        queue.enqueue(event(1, 10)).unwrap();
        queue.enqueue(event(2, 10)).unwrap();
        queue.enqueue(event(3, 20)).unwrap();

        let first = queue.dequeue().unwrap();
        assert_eq!(first.event.id(), EventId(1));

        // pid 10 is busy, so the next taker skips to pid 20
        let second = queue.dequeue().unwrap();
        assert_eq!(second.event.id(), EventId(3));

        assert!(queue.finish(first.ticket, || {}));
        let third = queue.dequeue().unwrap();
        assert_eq!(third.event.id(), EventId(2));
        assert!(third.ticket.seq() > second.ticket.seq());
    }

    #[test]
    fn test_close_wakes_blocked_dequeue() {
        let queue = Arc::new(EventQueue::new(4));
        let q = Arc::clone(&queue);
        let handle = std::thread::spawn(move || q.dequeue().map(|d| d.event.id()));

        std::thread::sleep(Duration::from_millis(50));
        queue.close();

        assert_eq!(handle.join().unwrap(), Err(QueueError::Closed));
        assert_eq!(queue.enqueue(event(1, 1)), Err(QueueError::Closed));
    }

    #[test]
    fn test_close_still_drains_queued_events() {
        let queue = EventQueue::new(4);
        queue.enqueue(event(1, 1)).unwrap();
        queue.close();

        let item = queue.dequeue().unwrap();
        assert!(queue.finish(item.ticket, || {}));
        assert_eq!(queue.dequeue().unwrap_err(), QueueError::Closed);
        assert!(queue.wait_idle(Duration::from_millis(10)));
    }

    #[test]
    fn test_slow_delivery_does_not_block_enqueue() {
        let queue = Arc::new(EventQueue::new(8));
        queue.enqueue(event(1, 1)).unwrap();
        let item = queue.dequeue().unwrap();

        let q = Arc::clone(&queue);
        let worker = std::thread::spawn(move || {
            q.finish(item.ticket, || std::thread::sleep(Duration::from_millis(500)))
        });
        std::thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        queue.enqueue(event(2, 2)).unwrap();
        assert!(started.elapsed() < Duration::from_millis(50));

        // The other pid is free to be triaged meanwhile
        let other = queue.dequeue().unwrap();
        assert_eq!(other.event.id(), EventId(2));
        assert!(queue.finish(other.ticket, || {}));

        assert!(worker.join().unwrap());
        assert!(queue.wait_idle(Duration::from_millis(10)));
    }

    #[test]
    fn test_pid_stays_busy_until_delivery_returns() {
        let queue = Arc::new(EventQueue::new(8));
        queue.enqueue(event(1, 7)).unwrap();
        queue.enqueue(event(2, 7)).unwrap();
        let first = queue.dequeue().unwrap();

        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let q = Arc::clone(&queue);
        let worker = std::thread::spawn(move || {
            q.finish(first.ticket, || {
                entered_tx.send(()).unwrap();
                release_rx.recv().unwrap();
            })
        });
        entered_rx.recv().unwrap();

        assert_eq!(queue.stats().in_flight, 1);
        assert_eq!(queue.depth(), 1);

        release_tx.send(()).unwrap();
        assert!(worker.join().unwrap());
        assert_eq!(queue.dequeue().unwrap().event.id(), EventId(2));
    }

    #[test]
    fn test_fail_remaining_waits_for_delivery_in_progress() {
        let queue = Arc::new(EventQueue::new(8));
        queue.enqueue(event(1, 3)).unwrap();
        queue.enqueue(event(2, 3)).unwrap();
        let first = queue.dequeue().unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let q = Arc::clone(&queue);
        let o = Arc::clone(&order);
        let worker = std::thread::spawn(move || {
            q.finish(first.ticket, || {
                entered_tx.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(100));
                o.lock().push(EventId(1));
            })
        });
        entered_rx.recv().unwrap();

        let left = queue.fail_remaining(|u| order.lock().push(u.event_id));
        assert!(worker.join().unwrap());
        assert_eq!(left.len(), 1);
        assert_eq!(*order.lock(), vec![EventId(1), EventId(2)]);
    }

    #[test]
    fn test_fail_remaining_delivers_each_once() {
        let queue = EventQueue::new(8);
        queue.enqueue(event(1, 1)).unwrap();
        queue.enqueue(event(2, 1)).unwrap();
        queue.enqueue(event(3, 2)).unwrap();

        let stuck = queue.dequeue().unwrap();
        assert!(!queue.wait_idle(Duration::from_millis(20)));

        let mut delivered = Vec::new();
        let left = queue.fail_remaining(|u| delivered.push((u.event_id, u.was_in_flight)));
        assert_eq!(left.len(), 3);
        assert_eq!(
            delivered,
            vec![(EventId(1), true), (EventId(2), false), (EventId(3), false)]
        );

        let mut late = false;
        assert!(!queue.finish(stuck.ticket, || late = true));
        assert!(!late);
        assert!(queue.wait_idle(Duration::from_millis(10)));
    }
}
