//! Deterministic discrete-event scheduling for the CARTSIM workspace.
//!
//! The simulation core consumes a narrow scheduling interface: schedule an
//! event once at a future tick, schedule a repeating event, and stop a
//! previously scheduled entry. At a given tick, entries fire in ascending
//! `(ordering, sequence)` order, so cell steps, helper steps, and profiler
//! steps each occupy a fixed relative priority and insertion order breaks
//! the remaining ties. No entropy is consumed here; two schedules fed the
//! same calls replay identically.

use serde::{Deserialize, Serialize};
use slotmap::{SlotMap, new_key_type};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use thiserror::Error;

new_key_type! {
    /// Stable handle for a scheduled entry.
    pub struct EntryId;
}

/// Relative priority of entries firing at the same tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Ordering {
    /// Cell-agent steps run first.
    Cells,
    /// Deferred-action (helper) steps run after all cell steps.
    Helpers,
    /// Profiling/checkpoint steps run last.
    Profilers,
}

/// Errors raised by the scheduler.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    /// Indicates a repeating entry with a zero interval.
    #[error("repeating interval must be non-zero")]
    ZeroInterval,
}

#[derive(Debug)]
struct Scheduled<E> {
    event: E,
    interval: Option<u64>,
    stopped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    tick: u64,
    ordering: Ordering,
    sequence: u64,
}

/// Tick-ordered event queue with one-shot and repeating entries.
///
/// Stopping an entry is idempotent and lazy: the entry is marked and
/// discarded the next time it surfaces, so a handle may be stopped from
/// inside the very event it is delivering.
#[derive(Debug)]
pub struct Schedule<E> {
    entries: SlotMap<EntryId, Scheduled<E>>,
    queue: BinaryHeap<Reverse<(QueueKey, EntryId)>>,
    sequence: u64,
}

impl<E: Copy> Default for Schedule<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Copy> Schedule<E> {
    /// Create an empty schedule.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: SlotMap::with_key(),
            queue: BinaryHeap::new(),
            sequence: 0,
        }
    }

    fn push(&mut self, tick: u64, ordering: Ordering, id: EntryId) {
        let key = QueueKey {
            tick,
            ordering,
            sequence: self.sequence,
        };
        self.sequence += 1;
        self.queue.push(Reverse((key, id)));
    }

    /// Schedule `event` to fire exactly once at `tick`.
    pub fn schedule_once(&mut self, tick: u64, ordering: Ordering, event: E) -> EntryId {
        let id = self.entries.insert(Scheduled {
            event,
            interval: None,
            stopped: false,
        });
        self.push(tick, ordering, id);
        id
    }

    /// Schedule `event` to fire at `start` and then every `interval` ticks
    /// until stopped.
    pub fn schedule_repeating(
        &mut self,
        start: u64,
        interval: u64,
        ordering: Ordering,
        event: E,
    ) -> Result<EntryId, ScheduleError> {
        if interval == 0 {
            return Err(ScheduleError::ZeroInterval);
        }
        let id = self.entries.insert(Scheduled {
            event,
            interval: Some(interval),
            stopped: false,
        });
        self.push(start, ordering, id);
        Ok(id)
    }

    /// Stop an entry. Safe to call repeatedly or on an already-fired
    /// one-shot; unknown handles are ignored.
    pub fn stop(&mut self, id: EntryId) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.stopped = true;
        }
    }

    /// Returns whether `id` is still live (scheduled and not stopped).
    #[must_use]
    pub fn is_live(&self, id: EntryId) -> bool {
        self.entries.get(id).is_some_and(|entry| !entry.stopped)
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.values().filter(|entry| !entry.stopped).count()
    }

    /// Returns true if no live entries remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pop the next entry due at or before `tick`, re-enqueueing repeating
    /// entries for their next firing. Returns `None` once `tick` is drained.
    pub fn take_due(&mut self, tick: u64) -> Option<(EntryId, E)> {
        while let Some(Reverse((key, id))) = self.queue.peek().copied() {
            if key.tick > tick {
                return None;
            }
            self.queue.pop();
            let Some(entry) = self.entries.get(id) else {
                continue;
            };
            if entry.stopped {
                self.entries.remove(id);
                continue;
            }
            let event = entry.event;
            match entry.interval {
                Some(interval) => self.push(key.tick + interval, key.ordering, id),
                None => {
                    self.entries.remove(id);
                }
            }
            return Some((id, event));
        }
        None
    }

    /// Tick of the earliest pending live entry, if any.
    #[must_use]
    pub fn next_tick(&self) -> Option<u64> {
        self.queue
            .iter()
            .filter(|Reverse((_, id))| self.is_live(*id))
            .map(|Reverse((key, _))| key.tick)
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orderings_fire_in_fixed_priority() {
        let mut schedule = Schedule::new();
        schedule.schedule_once(5, Ordering::Profilers, 'p');
        schedule.schedule_once(5, Ordering::Cells, 'c');
        schedule.schedule_once(5, Ordering::Helpers, 'h');

        let mut fired = Vec::new();
        while let Some((_, event)) = schedule.take_due(5) {
            fired.push(event);
        }
        assert_eq!(fired, vec!['c', 'h', 'p']);
    }

    #[test]
    fn insertion_order_breaks_ties() {
        let mut schedule = Schedule::new();
        let a = schedule.schedule_once(1, Ordering::Helpers, 0u8);
        let b = schedule.schedule_once(1, Ordering::Helpers, 1u8);
        assert_ne!(a, b);
        assert_eq!(schedule.take_due(1).map(|(_, e)| e), Some(0));
        assert_eq!(schedule.take_due(1).map(|(_, e)| e), Some(1));
        assert!(schedule.take_due(1).is_none());
    }

    #[test]
    fn repeating_entry_fires_until_stopped() {
        let mut schedule = Schedule::new();
        let id = schedule
            .schedule_repeating(2, 3, Ordering::Cells, 'r')
            .expect("repeat");
        assert_eq!(schedule.take_due(2).map(|(_, e)| e), Some('r'));
        assert!(schedule.take_due(2).is_none());
        assert_eq!(schedule.take_due(5).map(|(_, e)| e), Some('r'));

        schedule.stop(id);
        schedule.stop(id); // idempotent
        assert!(schedule.take_due(8).is_none());
        assert!(schedule.is_empty());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut schedule: Schedule<u8> = Schedule::new();
        assert_eq!(
            schedule.schedule_repeating(0, 0, Ordering::Cells, 0),
            Err(ScheduleError::ZeroInterval)
        );
    }

    #[test]
    fn stopped_one_shot_never_fires() {
        let mut schedule = Schedule::new();
        let id = schedule.schedule_once(4, Ordering::Helpers, 'x');
        schedule.stop(id);
        assert!(schedule.take_due(4).is_none());
        assert!(!schedule.is_live(id));
    }

    #[test]
    fn events_scheduled_mid_tick_fire_same_tick() {
        let mut schedule = Schedule::new();
        schedule.schedule_once(1, Ordering::Cells, 'c');
        let (_, first) = schedule.take_due(1).expect("cell event");
        assert_eq!(first, 'c');
        // A decision made during the cell step schedules a helper for the
        // same tick; it must surface before the tick is drained.
        schedule.schedule_once(1, Ordering::Helpers, 'h');
        assert_eq!(schedule.take_due(1).map(|(_, e)| e), Some('h'));
        assert!(schedule.take_due(1).is_none());
    }
}
