//! Blocking priority queue ordered by per-element runtime-computed delay.
//!
//! Unlike a conventional delay queue, elements here may change their effective
//! delay after insertion. An element typically enters with `i64::MAX` delay via
//! [`DynamicDelayQueue::add_last`] and is then moved to its real slot with
//! [`DynamicDelayQueue::reposition`], which updates the queue before the
//! element is allowed to change what its `delay_millis` returns.

use crate::clock;
use crate::error::TaskError;
use crate::ordered_list::OrderedList;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// An element whose readiness is expressed as a signed delay in milliseconds.
///
/// A delay of zero or less means the element is ready now. Implementations are
/// free to recompute the value on every call; the queue only mutates element
/// positions under its lock, so order is re-established through
/// [`DynamicDelayQueue::reposition`] or [`DynamicDelayQueue::sort_queue`].
pub trait Delayed {
    fn delay_millis(&self) -> i64;
}

/// Blocking, unbounded priority queue keyed by [`Delayed::delay_millis`].
///
/// Equal delays dequeue in insertion order. All mutators share one mutex; the
/// guard is exposed through [`DynamicDelayQueue::lock`] so callers can iterate
/// a consistent snapshot or drive a consuming iterator.
pub struct DynamicDelayQueue<T> {
    list: Mutex<OrderedList<T>>,
    ready: Condvar,
    interrupt_generation: AtomicU64,
}

/// Stable upper-bound index: inserting here keeps the list sorted and places
/// the new element after every existing element with an equal delay.
fn insertion_end_index<T: Delayed>(list: &OrderedList<T>, delay_millis: i64) -> usize {
    list.as_slice()
        .partition_point(|entry| entry.delay_millis() <= delay_millis)
}

impl<T: Delayed + PartialEq + Clone> DynamicDelayQueue<T> {
    pub fn new() -> Self {
        DynamicDelayQueue {
            list: Mutex::new(OrderedList::new()),
            ready: Condvar::new(),
            interrupt_generation: AtomicU64::new(0),
        }
    }

    /// Acquire the queue's mutex.
    ///
    /// Iteration and the consuming iterator operate through this guard, which
    /// ties their lifetime to the lock being held.
    pub fn lock(&self) -> MutexGuard<'_, OrderedList<T>> {
        self.list.lock()
    }

    /// Insert at the position that keeps delays non-decreasing, after any
    /// element with an equal delay.
    pub fn add(&self, element: T) {
        let mut list = self.list.lock();
        let index = insertion_end_index(&list, element.delay_millis());
        list.insert(index, element);
        drop(list);
        self.ready.notify_one();
    }

    /// Identical to [`DynamicDelayQueue::add`]; the queue is unbounded so the
    /// timeout is never consulted.
    pub fn offer(&self, element: T, _timeout: Duration) -> bool {
        self.add(element);
        true
    }

    /// Append unconditionally.
    ///
    /// Fast path for elements known to belong at the tail, such as entries
    /// carrying `i64::MAX` delay pending a [`DynamicDelayQueue::reposition`].
    pub fn add_last(&self, element: T) {
        self.list.lock().push_back(element);
    }

    /// Return the head if it is ready, without removing it. Never blocks.
    pub fn peek(&self) -> Option<T> {
        let list = self.list.lock();
        match list.first() {
            Some(head) if head.delay_millis() <= 0 => Some(head.clone()),
            _ => None,
        }
    }

    /// Remove and return the head if it is ready; `None` otherwise.
    pub fn poll(&self) -> Option<T> {
        let mut list = self.list.lock();
        match list.first() {
            Some(head) if head.delay_millis() <= 0 => Some(list.remove(0)),
            _ => None,
        }
    }

    /// Wait up to `timeout` for the head to become ready, re-reading the head
    /// after every wake. Returns `Ok(None)` on timeout.
    pub fn poll_timeout(&self, timeout: Duration) -> Result<Option<T>, TaskError> {
        let start = clock::accurate_millis();
        let timeout_ms = timeout.as_millis() as i64;
        let entry_generation = self.interrupt_generation.load(Ordering::Acquire);

        let mut list = self.list.lock();
        loop {
            if let Some(head) = list.first() {
                if head.delay_millis() <= 0 {
                    return Ok(Some(list.remove(0)));
                }
            }

            let remaining = timeout_ms - (clock::accurate_millis() - start);
            if remaining <= 0 {
                return Ok(None);
            }
            let wait_ms = match list.first() {
                Some(head) => remaining.min(head.delay_millis().max(1)),
                None => remaining,
            };
            let _ = self
                .ready
                .wait_for(&mut list, Duration::from_millis(wait_ms as u64));
            if self.interrupt_generation.load(Ordering::Acquire) != entry_generation {
                return Err(TaskError::Interrupted);
            }
        }
    }

    /// Block until the head is ready, then remove and return it.
    ///
    /// Unwinds with [`TaskError::Interrupted`] when
    /// [`DynamicDelayQueue::interrupt_waiters`] is called while blocked.
    pub fn take(&self) -> Result<T, TaskError> {
        let mut list = self.list.lock();
        self.block_till_available(&mut list)?;
        Ok(list.remove(0))
    }

    /// Wait on the queue's condition through a caller-held guard.
    ///
    /// Returns false when the wait timed out rather than being notified.
    /// Consumers with their own selection logic (the priority scheduler) use
    /// this to sleep on the same condition the mutators signal.
    pub fn wait_ready(
        &self,
        guard: &mut MutexGuard<'_, OrderedList<T>>,
        timeout: Option<Duration>,
    ) -> bool {
        match timeout {
            Some(timeout) => !self.ready.wait_for(guard, timeout).timed_out(),
            None => {
                self.ready.wait(guard);
                true
            }
        }
    }

    /// Wake every waiter without interrupting it, so each re-examines the head.
    pub fn notify_waiters(&self) {
        self.ready.notify_all();
    }

    /// Interrupt every currently blocked waiter; their `take`/`poll_timeout`
    /// calls unwind with [`TaskError::Interrupted`].
    pub fn interrupt_waiters(&self) {
        self.interrupt_generation.fetch_add(1, Ordering::AcqRel);
        self.ready.notify_all();
    }

    /// Move `element` to the slot matching `new_delay_millis`, then invoke
    /// `allow_delay_update` while still holding the lock.
    ///
    /// The closure is the element's single opportunity to change the value its
    /// `delay_millis` reports; the queue has already been reordered when it
    /// runs, so the order invariant holds before and after the update.
    /// Returns false when the element is not in the queue.
    pub fn reposition(
        &self,
        element: &T,
        new_delay_millis: i64,
        allow_delay_update: impl FnOnce(),
    ) -> bool {
        let mut list = self.list.lock();
        let index = insertion_end_index(&list, new_delay_millis);
        // repositioned elements are most likely near the tail
        if !list.reposition(element, index, true) {
            return false;
        }
        allow_delay_update();
        drop(list);
        self.ready.notify_all();
        true
    }

    /// Full sort under the lock.
    ///
    /// Only needed when many elements changed their delays out of band;
    /// [`DynamicDelayQueue::reposition`] is the cheaper path for one element.
    pub fn sort_queue(&self) {
        let mut list = self.list.lock();
        list.sort_by(|a, b| a.delay_millis().cmp(&b.delay_millis()));
        drop(list);
        self.ready.notify_all();
    }

    /// Remove ready elements into `sink` under a single lock hold, up to `max`.
    /// Returns how many were moved.
    pub fn drain_to(&self, sink: &mut Vec<T>, max: usize) -> usize {
        let mut list = self.list.lock();
        let mut moved = 0;
        while moved < max {
            match list.first() {
                Some(head) if head.delay_millis() <= 0 => {
                    sink.push(list.remove(0));
                    moved += 1;
                }
                _ => break,
            }
        }
        moved
    }

    /// Remove every element regardless of readiness, returning them in order.
    pub fn drain_all(&self) -> Vec<T> {
        self.list.lock().take_all()
    }

    pub fn clear(&self) {
        self.list.lock().clear();
    }

    pub fn contains(&self, element: &T) -> bool {
        self.list.lock().contains(element)
    }

    /// Remove a specific element, reporting whether it was present.
    pub fn remove(&self, element: &T) -> bool {
        self.list.lock().remove_item(element)
    }

    pub fn len(&self) -> usize {
        self.list.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.lock().is_empty()
    }

    /// The queue is unbounded.
    pub fn remaining_capacity(&self) -> usize {
        usize::MAX
    }

    /// Block once for head availability, then return an iterator that consumes
    /// the live queue through the supplied guard.
    pub fn consume_iterator<'q, 'g>(
        &'q self,
        guard: &'g mut MutexGuard<'q, OrderedList<T>>,
    ) -> Result<ConsumeIterator<'q, 'g, T>, TaskError> {
        self.block_till_available(guard)?;
        Ok(ConsumeIterator { guard, next: None })
    }

    /// Loop: empty queue waits indefinitely, an unready head waits its delay,
    /// a ready head returns. Must be called with the guard held.
    fn block_till_available(&self, guard: &mut MutexGuard<'_, OrderedList<T>>) -> Result<(), TaskError> {
        let entry_generation = self.interrupt_generation.load(Ordering::Acquire);
        loop {
            let wait_ms = match guard.first() {
                None => None,
                Some(head) => {
                    let delay = head.delay_millis();
                    if delay <= 0 {
                        return Ok(());
                    }
                    Some(delay)
                }
            };
            match wait_ms {
                None => {
                    self.ready.wait(guard);
                }
                Some(delay) => {
                    let _ = self
                        .ready
                        .wait_for(guard, Duration::from_millis(delay as u64));
                }
            }
            if self.interrupt_generation.load(Ordering::Acquire) != entry_generation {
                return Err(TaskError::Interrupted);
            }
        }
    }
}

impl<T: Delayed + PartialEq + Clone> Default for DynamicDelayQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator that consumes ready elements from the live queue.
///
/// `remove_next` verifies the head is still the element `peek_next` observed
/// and signals [`TaskError::ConcurrentModification`] otherwise.
pub struct ConsumeIterator<'q, 'g, T> {
    guard: &'g mut MutexGuard<'q, OrderedList<T>>,
    next: Option<T>,
}

impl<T: Delayed + PartialEq + Clone> ConsumeIterator<'_, '_, T> {
    pub fn has_next(&mut self) -> bool {
        self.peek_next().is_some()
    }

    /// Ready head without removing it; `None` when nothing is ready.
    pub fn peek_next(&mut self) -> Option<T> {
        if self.next.is_none() {
            self.next = match self.guard.first() {
                Some(head) if head.delay_millis() <= 0 => Some(head.clone()),
                _ => None,
            };
        }
        self.next.clone()
    }

    /// Remove and return the next ready element.
    pub fn remove_next(&mut self) -> Result<T, TaskError> {
        match self.next.take() {
            Some(expected) => {
                if self.guard.is_empty() {
                    return Err(TaskError::ConcurrentModification);
                }
                let removed = self.guard.remove(0);
                if removed != expected {
                    self.guard.insert(0, removed);
                    return Err(TaskError::ConcurrentModification);
                }
                Ok(removed)
            }
            None => match self.guard.first() {
                Some(head) if head.delay_millis() <= 0 => Ok(self.guard.remove(0)),
                _ => Err(TaskError::IllegalState("no ready element to consume")),
            },
        }
    }
}
